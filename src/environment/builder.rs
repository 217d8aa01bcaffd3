//! Locked Environment Builder
//!
//! Materializes a named environment from a lock artifact using the lock
//! engine, with the base installation's solver as the backing installer.
//! An existing environment directory is never touched: rebuilding requires
//! removing it first.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, error, info};

use super::micromamba::{last_line, tool_binary};
use crate::error::{ProvisionError, Result};

/// Lock engine executable name.
pub const LOCK_ENGINE: &str = "conda-lock";

/// Solver used as the lock engine's installer.
pub const SOLVER: &str = "mamba";

/// A materialized environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    pub name: String,
    /// Absolute, resolved prefix of the environment.
    pub prefix: PathBuf,
}

impl EnvironmentHandle {
    /// Name to hand to `micromamba activate`; the prefix path is unambiguous
    /// regardless of the caller's root prefix.
    pub fn qualified_name(&self) -> String {
        self.prefix.display().to_string()
    }
}

/// Result of [`LockedEnvironmentBuilder::build_environment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The target directory existed; nothing was changed.
    AlreadyExists { prefix: PathBuf },
    Built(EnvironmentHandle),
}

/// Builds environments from lock artifacts.
#[derive(Debug, Clone, Default)]
pub struct LockedEnvironmentBuilder {
    pkgs_dir: Option<PathBuf>,
}

impl LockedEnvironmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Package cache the solver downloads into while building.
    pub fn with_pkgs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pkgs_dir = Some(dir.into());
        self
    }

    /// Builds `environment_name` inside the base installation at `base`.
    pub fn build_environment(
        &self,
        base: &Path,
        environment_name: &str,
        lock_artifact: &Path,
    ) -> Result<BuildOutcome> {
        let lock_engine = require_tool(base, LOCK_ENGINE)?;
        let solver = require_tool(base, SOLVER)?;

        let prefix = base.join("envs").join(environment_name);
        if prefix.exists() {
            info!(
                "Environment '{}' already exists at {}",
                environment_name,
                prefix.display()
            );
            return Ok(BuildOutcome::AlreadyExists { prefix });
        }

        if !lock_artifact.is_file() {
            return Err(ProvisionError::LockArtifactMissing {
                path: lock_artifact.to_path_buf(),
            });
        }

        info!(
            "Creating environment '{}' from {}",
            environment_name,
            lock_artifact.display()
        );

        let mut cmd = Command::new(&lock_engine);
        cmd.arg("install")
            .arg("--conda")
            .arg(&solver)
            .arg("--prefix")
            .arg(&prefix)
            .arg(lock_artifact)
            .env("MAMBA_ROOT_PREFIX", base);
        if let Some(pkgs_dir) = &self.pkgs_dir {
            cmd.env("CONDA_PKGS_DIRS", pkgs_dir);
        }
        debug!("Running {:?}", cmd);

        let build_failed = |detail: String| ProvisionError::BuildFailed {
            environment: environment_name.to_string(),
            detail,
        };

        let output = cmd
            .output()
            .map_err(|e| build_failed(format!("could not run {}: {}", lock_engine.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            error!("{} install failed:\n{}", LOCK_ENGINE, stderr);
            debug!("stdout:\n{}", stdout);

            let detail = last_line(&stderr)
                .or_else(|| last_line(&stdout))
                .unwrap_or_else(|| format!("exit status {:?}", output.status.code()));
            return Err(build_failed(detail));
        }

        let prefix = fs::canonicalize(&prefix).map_err(|e| {
            build_failed(format!(
                "{} reported success but {} is unusable: {}",
                LOCK_ENGINE,
                prefix.display(),
                e
            ))
        })?;

        info!("Environment '{}' ready at {}", environment_name, prefix.display());
        Ok(BuildOutcome::Built(EnvironmentHandle {
            name: environment_name.to_string(),
            prefix,
        }))
    }
}

fn require_tool(base: &Path, tool: &str) -> Result<PathBuf> {
    let path = tool_binary(base, tool);
    if path.is_file() {
        Ok(path)
    } else {
        Err(ProvisionError::ToolMissing {
            tool: tool.to_string(),
            path,
        })
    }
}
