//! Source Specification
//!
//! The human-edited `environment.yml` the lock artifact is generated from.
//! Only the fields the pipeline itself needs are interpreted; dependency
//! entries stay opaque and are left to the lock engine.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{ProvisionError, Result};
use crate::platform::PlatformSet;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SourceSpecification {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub channels: Vec<String>,

    #[serde(default)]
    pub dependencies: Vec<Value>,

    /// Platforms declared for locking (a conda-lock extension).
    #[serde(default)]
    pub platforms: Vec<String>,
}

impl SourceSpecification {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ProvisionError::io(format!("reading {}", path.display()), e))?;

        serde_yaml::from_str(&content).map_err(|e| {
            ProvisionError::Config(format!(
                "invalid source specification {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn declared_platforms(&self) -> PlatformSet {
        self.platforms.iter().cloned().collect()
    }
}
