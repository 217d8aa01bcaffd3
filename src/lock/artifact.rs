//! Lock Artifacts and Per-Platform Renderings
//!
//! Read-only models of the unified lock file (`conda-lock.yml`) and of the
//! `@EXPLICIT` per-platform files rendered from it. The pipeline never edits
//! either; it uses these to check that a rendering matches its artifact.
//!
//! # Example Lock Format
//!
//! ```yaml
//! version: 1
//! metadata:
//!   platforms: [linux-64]
//! package:
//!   - name: samtools
//!     version: '1.17'
//!     manager: conda
//!     platform: linux-64
//!     url: https://conda.anaconda.org/bioconda/linux-64/samtools-1.17-hd87286a_2.tar.bz2
//!     hash:
//!       md5: 5e4b5e5b8f0b0c0c7d7b2e2c8f0e1a1b
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{ProvisionError, Result};

/// Marker line that starts the package list of an explicit rendering.
const EXPLICIT_MARKER: &str = "@EXPLICIT";

/// The unified, multi-platform lock file.
#[derive(Deserialize, Debug, Clone)]
pub struct LockArtifact {
    pub version: u32,

    #[serde(default)]
    pub metadata: LockMetadata,

    #[serde(default)]
    pub package: Vec<LockedPackage>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LockMetadata {
    #[serde(default)]
    pub platforms: Vec<String>,

    /// Hash of the source specification per platform.
    #[serde(default)]
    pub content_hash: BTreeMap<String, String>,
}

/// One resolved package for one platform.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LockedPackage {
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
    /// `conda` or `pip`; only conda packages appear in explicit renderings.
    pub manager: String,
    pub platform: String,
    pub url: String,

    #[serde(default)]
    pub hash: PackageHash,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageHash {
    #[serde(default)]
    pub md5: Option<String>,

    #[serde(default)]
    pub sha256: Option<String>,
}

impl LockArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ProvisionError::io(format!("reading {}", path.display()), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| ProvisionError::Config(format!("unreadable lock artifact: {}", e)))
    }

    /// Packages resolved for `platform`.
    pub fn packages_for<'a>(&'a self, platform: &'a str) -> impl Iterator<Item = &'a LockedPackage> {
        self.package.iter().filter(move |pkg| pkg.platform == platform)
    }

    /// Conda package URLs for `platform`, without hash fragments.
    pub fn conda_urls(&self, platform: &str) -> BTreeSet<String> {
        self.packages_for(platform)
            .filter(|pkg| pkg.manager == "conda")
            .map(|pkg| strip_fragment(&pkg.url).to_string())
            .collect()
    }
}

/// A parsed `@EXPLICIT` rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedLock {
    pub platform: Option<String>,
    pub urls: Vec<String>,
}

impl RenderedLock {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ProvisionError::io(format!("reading {}", path.display()), e))?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut rendered = Self::default();
        let mut in_packages = false;

        for line in content.lines().map(str::trim) {
            if let Some(platform) = line.strip_prefix("# platform:") {
                rendered.platform = Some(platform.trim().to_string());
            } else if line == EXPLICIT_MARKER {
                in_packages = true;
            } else if in_packages && !line.is_empty() && !line.starts_with('#') {
                rendered.urls.push(strip_fragment(line).to_string());
            }
        }
        rendered
    }

    pub fn url_set(&self) -> BTreeSet<String> {
        self.urls.iter().cloned().collect()
    }
}

/// Checks that `rendered` lists exactly the artifact's conda packages for `platform`.
pub fn check_rendering(
    artifact: &LockArtifact,
    platform: &str,
    rendered: &RenderedLock,
) -> std::result::Result<(), String> {
    if let Some(declared) = &rendered.platform {
        if declared != platform {
            return Err(format!(
                "rendering declares platform {} but was expected for {}",
                declared, platform
            ));
        }
    }

    let expected = artifact.conda_urls(platform);
    let actual = rendered.url_set();
    if expected == actual {
        return Ok(());
    }

    let missing = expected.difference(&actual).count();
    let extra = actual.difference(&expected).count();
    Err(format!(
        "{} rendering diverges from lock artifact ({} missing, {} extra)",
        platform, missing, extra
    ))
}

/// Accepts versions YAML may have read as numbers (`1.17`).
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(de::Error::custom("expected a version string")),
    }
}

fn strip_fragment(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}
