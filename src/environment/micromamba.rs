//! Micromamba Runtime
//!
//! Thin wrapper over the micromamba executable living inside a base
//! installation. Every call is a fresh subprocess; nothing about installed
//! packages is cached between calls.
//!
//! # Layout
//!
//! A base installation rooted at `{base}` looks like:
//! - `{base}/bin/micromamba`: the runtime itself
//! - `{base}/bin/{tool}`: meta-tools installed by the bootstrapper
//! - `{base}/envs/{name}`: materialized environments

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, error, info};
use serde::Deserialize;

use crate::error::{ProvisionError, Result};
use crate::install::installed_version;

/// Path of the micromamba executable inside a base installation.
pub fn runtime_binary(base: &Path) -> PathBuf {
    if cfg!(windows) {
        base.join("Library").join("bin").join("micromamba.exe")
    } else {
        base.join("bin").join("micromamba")
    }
}

/// Path of an executable installed into the base installation.
pub fn tool_binary(base: &Path, tool: &str) -> PathBuf {
    if cfg!(windows) {
        base.join("Scripts").join(format!("{}.exe", tool))
    } else {
        base.join("bin").join(tool)
    }
}

/// One row of `micromamba list --json`.
#[derive(Deserialize, Debug, Clone)]
struct ListedPackage {
    name: String,
    version: String,
}

/// A micromamba runtime bound to one root prefix.
#[derive(Debug, Clone)]
pub struct Micromamba {
    binary: PathBuf,
    root_prefix: PathBuf,
}

impl Micromamba {
    /// The runtime of the base installation at `base`.
    pub fn at(base: &Path) -> Self {
        Self {
            binary: runtime_binary(base),
            root_prefix: base.to_path_buf(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn root_prefix(&self) -> &Path {
        &self.root_prefix
    }

    /// Creates a Command configured with this installation's `MAMBA_ROOT_PREFIX`.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env("MAMBA_ROOT_PREFIX", &self.root_prefix);
        cmd
    }

    /// Returns the reported version when the runtime exists and runs.
    pub fn version(&self) -> Option<String> {
        if !self.binary.is_file() {
            return None;
        }
        installed_version(&self.binary)
    }

    /// Lists packages installed in `prefix` as `name -> version`.
    pub fn list_packages(&self, prefix: &Path) -> Result<BTreeMap<String, String>> {
        let output = self
            .command()
            .arg("list")
            .arg("--json")
            .arg("--prefix")
            .arg(prefix)
            .output()
            .map_err(|e| ProvisionError::io(format!("running {}", self.binary.display()), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::Config(format!(
                "failed to list packages in {}: {}",
                prefix.display(),
                stderr.trim()
            )));
        }

        parse_package_list(&String::from_utf8_lossy(&output.stdout))
    }

    /// Installs `specs` into `prefix` in a single solver call.
    pub fn install(&self, prefix: &Path, channels: &[String], specs: &[String]) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("install")
            .arg("--yes")
            .arg("--root-prefix")
            .arg(&self.root_prefix)
            .arg("--prefix")
            .arg(prefix);
        for channel in channels {
            cmd.arg("--channel").arg(channel);
        }
        cmd.args(specs);

        debug!("Running {:?}", cmd);
        info!("Installing into {}: {}", prefix.display(), specs.join(" "));

        let output = cmd.output().map_err(|e| ProvisionError::BatchInstallFailed {
            prefix: prefix.to_path_buf(),
            detail: format!("could not run {}: {}", self.binary.display(), e),
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("micromamba install failed:\n{}", stderr);
        Err(ProvisionError::BatchInstallFailed {
            prefix: prefix.to_path_buf(),
            detail: last_line(&stderr)
                .unwrap_or_else(|| format!("exit status {:?}", output.status.code())),
        })
    }
}

/// Parses `micromamba list --json` output.
fn parse_package_list(json: &str) -> Result<BTreeMap<String, String>> {
    let packages: Vec<ListedPackage> = serde_json::from_str(json)
        .map_err(|e| ProvisionError::Config(format!("unexpected package list format: {}", e)))?;

    Ok(packages
        .into_iter()
        .map(|pkg| (pkg.name, pkg.version))
        .collect())
}

/// Last non-empty line of a tool's diagnostic output.
pub(crate) fn last_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}
