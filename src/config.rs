//! Provisioning Configuration
//!
//! Settings come from built-in defaults, an optional YAML file and finally
//! command-line flags, in that order of precedence. The resolved values are
//! frozen into an [`EnvironmentDescriptor`] once per run.
//!
//! # Example YAML Format
//!
//! ```yaml
//! install_path: .setup/mamba
//! environment_name: rgp
//! runtime_version: 1.5.8
//! tool_pins:
//!   conda-lock: 2.5.7
//!   mamba: 1.5.8
//! lock_file: conda-lock.yml
//! platforms: [linux-64, osx-arm64]
//! version_checks:
//!   - name: az
//!     command: [az, version]
//!     json_key: azure-cli
//!     min: 2.30.0
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::pipeline::verify::VersionCheck;

/// Default micromamba release installed as the package-management runtime.
pub const DEFAULT_RUNTIME_VERSION: &str = "1.5.8";

/// Default environment name.
pub const DEFAULT_ENVIRONMENT_NAME: &str = "envstrap";

/// Meta-tools installed into the base installation, with their pinned versions.
pub const DEFAULT_TOOL_PINS: &[(&str, &str)] = &[("conda-lock", "2.5.7"), ("mamba", "1.5.8")];

/// Bounded timeout for archive downloads.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Per-user state directory holding the base installation and package cache.
static STATE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".envstrap")
});

/// Default base installation path.
pub static DEFAULT_INSTALL_PATH: Lazy<PathBuf> = Lazy::new(|| STATE_DIR.join("micromamba"));

/// Default package cache used while building environments.
pub static DEFAULT_CACHE_PATH: Lazy<PathBuf> = Lazy::new(|| STATE_DIR.join("pkgs"));

/// Immutable description of the environment a run provisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDescriptor {
    install_path: PathBuf,
    environment_name: String,
    tool_version_pins: BTreeMap<String, String>,
}

impl EnvironmentDescriptor {
    pub fn new(
        install_path: impl Into<PathBuf>,
        environment_name: impl Into<String>,
        tool_version_pins: BTreeMap<String, String>,
    ) -> Self {
        Self {
            install_path: install_path.into(),
            environment_name: environment_name.into(),
            tool_version_pins,
        }
    }

    /// Root of the base installation.
    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    pub fn environment_name(&self) -> &str {
        &self.environment_name
    }

    pub fn tool_version_pins(&self) -> &BTreeMap<String, String> {
        &self.tool_version_pins
    }

    /// Directory the named environment is materialized into.
    pub fn environment_path(&self) -> PathBuf {
        self.install_path.join("envs").join(&self.environment_name)
    }

    /// Path of the runtime executable inside the base installation.
    pub fn runtime_path(&self) -> PathBuf {
        crate::environment::micromamba::runtime_binary(&self.install_path)
    }
}

/// Full set of settings for one invocation.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    pub install_path: PathBuf,
    pub cache_path: PathBuf,
    pub environment_name: String,
    pub runtime_version: String,
    /// Mirror to download the runtime archive from instead of the release API.
    pub runtime_url: Option<String>,
    pub tool_pins: BTreeMap<String, String>,
    pub channels: Vec<String>,
    pub lock_file: PathBuf,
    pub source_spec: PathBuf,
    pub platforms: Vec<String>,
    pub log_path: PathBuf,
    pub repo_root: PathBuf,
    pub activation_script: PathBuf,
    pub version_checks: Vec<VersionCheck>,
    /// Text in the lock engine's output that signals a new lock; when unset
    /// drift is decided by comparing lock file hashes.
    pub drift_marker: Option<String>,
    pub fetch_timeout_secs: u64,
    pub strict_tool_versions: bool,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            install_path: DEFAULT_INSTALL_PATH.clone(),
            cache_path: DEFAULT_CACHE_PATH.clone(),
            environment_name: DEFAULT_ENVIRONMENT_NAME.to_string(),
            runtime_version: DEFAULT_RUNTIME_VERSION.to_string(),
            runtime_url: None,
            tool_pins: DEFAULT_TOOL_PINS
                .iter()
                .map(|(tool, version)| (tool.to_string(), version.to_string()))
                .collect(),
            channels: vec!["conda-forge".to_string()],
            lock_file: PathBuf::from("conda-lock.yml"),
            source_spec: PathBuf::from("environment.yml"),
            platforms: Vec::new(),
            log_path: PathBuf::from("conda-lock.log"),
            repo_root: PathBuf::from("."),
            activation_script: PathBuf::from(".setup/activate.sh"),
            version_checks: Vec::new(),
            drift_marker: None,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            strict_tool_versions: false,
        }
    }
}

impl ProvisionConfig {
    /// Loads settings from a YAML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)
            .map_err(|e| ProvisionError::io(format!("reading {}", path.display()), e))?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            ProvisionError::Config(format!("invalid configuration {}: {}", path.display(), e))
        })?;

        debug!("Resolved configuration: {:?}", config);
        Ok(config)
    }

    /// Merges `tool=version` pins over the configured ones.
    pub fn apply_pins(&mut self, pins: &[String]) -> Result<()> {
        for pin in pins {
            let (tool, version) = parse_pin(pin)?;
            self.tool_pins.insert(tool, version);
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Freezes the resolved settings into a descriptor.
    pub fn descriptor(&self) -> Result<EnvironmentDescriptor> {
        validate_environment_name(&self.environment_name)?;

        Ok(EnvironmentDescriptor::new(
            self.install_path.clone(),
            self.environment_name.trim(),
            self.tool_pins.clone(),
        ))
    }
}

/// Accepts names that resolve to a single directory directly under `envs/`.
pub fn validate_environment_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ProvisionError::Config(
            "environment name must not be empty".to_string(),
        ));
    }
    if name.contains(['/', '\\']) {
        return Err(ProvisionError::Config(format!(
            "environment name '{}' must not contain path separators",
            name
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ProvisionError::Config(format!(
            "environment name '{}' does not name a directory under envs/",
            name
        ))),
    }
}

/// Parses a `tool=version` pin.
pub fn parse_pin(pin: &str) -> Result<(String, String)> {
    match pin.split_once('=') {
        Some((tool, version)) if !tool.trim().is_empty() && !version.trim().is_empty() => {
            Ok((tool.trim().to_string(), version.trim().to_string()))
        }
        _ => Err(ProvisionError::Config(format!(
            "invalid pin '{}', expected TOOL=VERSION",
            pin
        ))),
    }
}
