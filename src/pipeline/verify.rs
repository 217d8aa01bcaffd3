//! Version Compatibility Checks
//!
//! Each check runs an external command. Without bounds it is a plain
//! pass/fail collaborator (exit status 0 passes). With `min`/`max` bounds
//! the command's output is parsed for a semantic version, optionally read
//! from a key of its JSON output, and compared against the bounds.

use std::io::ErrorKind;
use std::process::Command;

use log::{debug, info};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VersionCheck {
    /// Tool name used in messages.
    pub name: String,

    /// Program and arguments, e.g. `[az, version]`.
    pub command: Vec<String>,

    /// Top-level key holding the version when the command prints JSON.
    #[serde(default)]
    pub json_key: Option<String>,

    #[serde(default)]
    pub min: Option<String>,

    #[serde(default)]
    pub max: Option<String>,
}

impl VersionCheck {
    /// A pass/fail check on a command's exit status.
    pub fn command(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            json_key: None,
            min: None,
            max: None,
        }
    }

    fn is_bounded(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    /// Runs the check, returning the version found for bounded checks.
    pub fn run(&self) -> Result<Option<Version>> {
        let failed = |msg: String| ProvisionError::VersionCheckFailed(msg);

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| failed(format!("check '{}' has no command", self.name)))?;
        let display = self.command.join(" ");

        debug!("Running version check: {}", display);
        let output = Command::new(program).args(args).output().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                failed(format!("'{}' command not found", program))
            } else {
                failed(format!("could not run '{}': {}", display, e))
            }
        })?;

        if !output.status.success() {
            return Err(failed(format!(
                "'{}' command failed with exit code {}",
                display,
                output
                    .status
                    .code()
                    .map_or_else(|| "unknown".to_string(), |c| c.to_string())
            )));
        }

        if !self.is_bounded() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = match &self.json_key {
            Some(key) => version_from_json(&stdout, key),
            None => extract_version(&stdout),
        }
        .ok_or_else(|| failed(format!("could not read a version from '{}'", display)))?;

        check_bounds(&self.name, &version, self.min.as_deref(), self.max.as_deref())?;
        Ok(Some(version))
    }
}

/// Runs every check in order, stopping at the first failure.
pub fn run_checks(checks: &[VersionCheck]) -> Result<()> {
    for check in checks {
        match check.run()? {
            Some(version) => info!("{} {} is compatible", check.name, version),
            None => info!("{} check passed", check.name),
        }
    }
    Ok(())
}

/// Fails unless `min <= version <= max`.
pub fn check_bounds(name: &str, version: &Version, min: Option<&str>, max: Option<&str>) -> Result<()> {
    if let Some(min) = min {
        let min = parse_lenient(min)
            .ok_or_else(|| ProvisionError::Config(format!("invalid minimum version '{}'", min)))?;
        if *version < min {
            return Err(ProvisionError::VersionCheckFailed(format!(
                "{} version is {}, must be >= {}",
                name, version, min
            )));
        }
    }

    if let Some(max) = max {
        let max = parse_lenient(max)
            .ok_or_else(|| ProvisionError::Config(format!("invalid maximum version '{}'", max)))?;
        if *version > max {
            return Err(ProvisionError::VersionCheckFailed(format!(
                "{} version is {}, must be <= {}",
                name, version, max
            )));
        }
    }

    Ok(())
}

fn version_from_json(text: &str, key: &str) -> Option<Version> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    parse_lenient(value.get(key)?.as_str()?)
}

/// First token of `text` that reads as a version.
fn extract_version(text: &str) -> Option<Version> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .find_map(parse_lenient)
}

/// Parses `1.2.3`, `v1.2.3` and two-component `1.2` versions.
fn parse_lenient(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }

    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() == 2 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
        return Version::parse(&format!("{}.0", raw)).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(parse_lenient("v2.30.0"), Some(Version::new(2, 30, 0)));
        assert_eq!(parse_lenient("1.17"), Some(Version::new(1, 17, 0)));
        assert_eq!(parse_lenient("micromamba"), None);
    }

    #[test]
    fn test_extract_version_from_banner() {
        assert_eq!(
            extract_version("conda-lock, version 2.5.7\n"),
            Some(Version::new(2, 5, 7))
        );
    }

    #[test]
    fn test_version_from_json_key() {
        let json = r#"{"azure-cli": "2.61.0", "azure-cli-core": "2.61.0", "extensions": {}}"#;
        assert_eq!(version_from_json(json, "azure-cli"), Some(Version::new(2, 61, 0)));
        assert_eq!(version_from_json(json, "missing"), None);
    }

    #[test]
    fn test_bounds() {
        let v = Version::new(2, 29, 0);
        let err = check_bounds("az", &v, Some("2.30.0"), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "version check failed: az version is 2.29.0, must be >= 2.30.0"
        );

        assert!(check_bounds("az", &Version::new(2, 30, 0), Some("2.30.0"), Some("3.0.0")).is_ok());
        assert!(check_bounds("az", &Version::new(3, 1, 0), None, Some("3.0.0")).is_err());
        assert!(matches!(
            check_bounds("az", &v, Some("not-a-version"), None),
            Err(ProvisionError::Config(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unbounded_check_is_exit_status() {
        assert_eq!(VersionCheck::command("ok", sh("exit 0")).run().unwrap(), None);

        let err = VersionCheck::command("bad", sh("exit 4")).run().unwrap_err();
        assert!(err.to_string().contains("exit code 4"));
    }

    #[test]
    fn test_missing_command() {
        let check = VersionCheck::command("ghost", vec!["envstrap-no-such-tool".to_string()]);
        let err = check.run().unwrap_err();
        assert!(err.to_string().contains("'envstrap-no-such-tool' command not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_bounded_json_check() {
        let check = VersionCheck {
            name: "az".to_string(),
            command: sh(r#"echo '{"azure-cli": "2.61.0"}'"#),
            json_key: Some("azure-cli".to_string()),
            min: Some("2.30.0".to_string()),
            max: None,
        };
        assert_eq!(check.run().unwrap(), Some(Version::new(2, 61, 0)));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_checks_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let checks = vec![
            VersionCheck::command("first", sh("exit 1")),
            VersionCheck::command("second", sh(&format!("touch '{}'", marker.display()))),
        ];

        assert!(run_checks(&checks).is_err());
        assert!(!marker.exists());
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let check: VersionCheck =
            serde_yaml::from_str("name: az\ncommand: [az, version]\njson_key: azure-cli\nmin: 2.30.0\n")
                .unwrap();
        assert_eq!(check.command, vec!["az", "version"]);
        assert_eq!(check.min.as_deref(), Some("2.30.0"));
        assert!(check.max.is_none());
    }
}
