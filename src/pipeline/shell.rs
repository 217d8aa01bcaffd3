//! Shell Activation Hook
//!
//! Writes an activation script for the built environment and a one-line
//! `.envrc` directive that sources it, so an interactive shell entering the
//! repository picks the environment up through direnv. Both files are
//! rewritten on every run; content is a pure function of the paths involved.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};

use crate::error::{ProvisionError, Result};

/// Per-repository file direnv evaluates on shell entry.
pub const ENVRC_FILE: &str = ".envrc";

/// Shell-integration tool asked to trust the directive.
pub const DIRENV: &str = "direnv";

/// Whether the hook files had to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Written,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct ShellIntegration {
    repo_root: PathBuf,
    activation_script: PathBuf,
    allow_tool: Option<String>,
}

impl ShellIntegration {
    /// `activation_script` is relative to `repo_root` unless absolute.
    pub fn new(repo_root: impl Into<PathBuf>, activation_script: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            activation_script: activation_script.into(),
            allow_tool: Some(DIRENV.to_string()),
        }
    }

    /// Skips asking the shell-integration tool to trust the directive.
    pub fn without_allow(mut self) -> Self {
        self.allow_tool = None;
        self
    }

    pub fn envrc_path(&self) -> PathBuf {
        self.repo_root.join(ENVRC_FILE)
    }

    pub fn script_path(&self) -> PathBuf {
        self.repo_root.join(&self.activation_script)
    }

    /// Writes the activation script and directive for the environment at
    /// `prefix`, activated through the runtime at `runtime`.
    pub fn write_activation(&self, runtime: &Path, root_prefix: &Path, prefix: &Path) -> Result<HookOutcome> {
        let script = activation_script(runtime, root_prefix, prefix);
        let directive = format!("source_env {}\n", shell_quote(&self.activation_script.display().to_string()));

        let script_changed = write_if_changed(&self.script_path(), &script)?;
        let envrc_changed = write_if_changed(&self.envrc_path(), &directive)?;

        self.allow()?;

        if script_changed || envrc_changed {
            info!("Wrote activation hook {}", self.envrc_path().display());
            Ok(HookOutcome::Written)
        } else {
            Ok(HookOutcome::Unchanged)
        }
    }

    fn allow(&self) -> Result<()> {
        let Some(tool) = &self.allow_tool else {
            return Ok(());
        };

        let Ok(binary) = which::which(tool) else {
            warn!(
                "{} not found; {} written but not allowed",
                tool,
                self.envrc_path().display()
            );
            return Ok(());
        };

        debug!("Running {} allow {}", binary.display(), self.repo_root.display());
        let output = Command::new(&binary)
            .arg("allow")
            .arg(&self.repo_root)
            .output()
            .map_err(|e| ProvisionError::ShellIntegrationFailed(format!("could not run {}: {}", tool, e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ProvisionError::ShellIntegrationFailed(format!(
            "{} allow failed: {}",
            tool,
            stderr.trim()
        )))
    }
}

fn activation_script(runtime: &Path, root_prefix: &Path, prefix: &Path) -> String {
    format!(
        "# Generated by envstrap; changes are overwritten on the next install.\n\
         export MAMBA_ROOT_PREFIX={}\n\
         eval \"$({} shell hook --shell bash)\"\n\
         micromamba activate {}\n",
        shell_quote(&root_prefix.display().to_string()),
        shell_quote(&runtime.display().to_string()),
        shell_quote(&prefix.display().to_string()),
    )
}

/// Single-quotes `value` for POSIX shells.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
    if fs::read_to_string(path).map(|existing| existing == content).unwrap_or(false) {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ProvisionError::ShellIntegrationFailed(format!("creating {}: {}", parent.display(), e))
        })?;
    }
    fs::write(path, content).map_err(|e| {
        ProvisionError::ShellIntegrationFailed(format!("writing {}: {}", path.display(), e))
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn integration(root: &Path) -> ShellIntegration {
        ShellIntegration::new(root, ".setup/activate.sh").without_allow()
    }

    #[test]
    fn test_directive_is_one_line() {
        let dir = tempdir().unwrap();
        integration(dir.path())
            .write_activation(Path::new("/opt/base/bin/micromamba"), Path::new("/opt/base"), Path::new("/opt/base/envs/rgp"))
            .unwrap();

        let envrc = fs::read_to_string(dir.path().join(ENVRC_FILE)).unwrap();
        assert_eq!(envrc, "source_env '.setup/activate.sh'\n");

        let script = fs::read_to_string(dir.path().join(".setup/activate.sh")).unwrap();
        assert!(script.contains("export MAMBA_ROOT_PREFIX='/opt/base'"));
        assert!(script.contains("micromamba activate '/opt/base/envs/rgp'"));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let dir = tempdir().unwrap();
        let hook = integration(dir.path());
        let args = (Path::new("/b/bin/micromamba"), Path::new("/b"), Path::new("/b/envs/x"));

        assert_eq!(hook.write_activation(args.0, args.1, args.2).unwrap(), HookOutcome::Written);
        assert_eq!(hook.write_activation(args.0, args.1, args.2).unwrap(), HookOutcome::Unchanged);
    }

    #[test]
    fn test_prior_hook_overwritten() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(ENVRC_FILE), "layout python\nsource_env old.sh\n").unwrap();

        let outcome = integration(dir.path())
            .write_activation(Path::new("/b/bin/micromamba"), Path::new("/b"), Path::new("/b/envs/x"))
            .unwrap();

        assert_eq!(outcome, HookOutcome::Written);
        let envrc = fs::read_to_string(dir.path().join(ENVRC_FILE)).unwrap();
        assert_eq!(envrc.lines().count(), 1);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/a b/c"), "'/a b/c'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
