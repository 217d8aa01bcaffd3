//! Target Platforms
//!
//! Conda-style platform identifiers (`linux-64`, `osx-arm64`, ...) and the
//! ordered set the lock engine iterates over.

use std::fmt;

use crate::error::{ProvisionError, Result};

/// Platform identifiers the pipeline knows how to target.
pub const KNOWN_PLATFORMS: &[&str] = &[
    "linux-64",
    "linux-aarch64",
    "linux-ppc64le",
    "osx-64",
    "osx-arm64",
    "win-64",
];

/// Returns the conda platform identifier of the running host.
pub fn host_platform() -> Result<&'static str> {
    platform_for(std::env::consts::OS, std::env::consts::ARCH)
}

fn platform_for(os: &str, arch: &str) -> Result<&'static str> {
    match (os, arch) {
        ("linux", "x86_64") => Ok("linux-64"),
        ("linux", "aarch64") => Ok("linux-aarch64"),
        ("linux", "powerpc64") => Ok("linux-ppc64le"),
        ("macos", "x86_64") => Ok("osx-64"),
        ("macos", "aarch64") => Ok("osx-arm64"),
        ("windows", "x86_64") => Ok("win-64"),
        _ => Err(ProvisionError::Config(format!(
            "unsupported host platform {}/{}",
            os, arch
        ))),
    }
}

/// Ordered, duplicate-free set of platform identifiers.
///
/// Order only affects the argument list handed to the lock engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformSet {
    platforms: Vec<String>,
}

impl PlatformSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a platform, keeping the first occurrence of duplicates.
    pub fn insert(&mut self, platform: impl Into<String>) -> bool {
        let platform = platform.into().trim().to_string();
        if platform.is_empty() || self.platforms.contains(&platform) {
            return false;
        }
        self.platforms.push(platform);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.platforms.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Identifiers outside [`KNOWN_PLATFORMS`]. The lock engine has the
    /// final say on what it accepts.
    pub fn unknown(&self) -> Vec<&str> {
        self.iter()
            .filter(|p| !KNOWN_PLATFORMS.contains(p))
            .collect()
    }
}

impl<S: Into<String>> FromIterator<S> for PlatformSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for platform in iter {
            set.insert(platform);
        }
        set
    }
}

impl fmt::Display for PlatformSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.platforms.join(", "))
    }
}
