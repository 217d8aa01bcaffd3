//! Provisioning Errors
//!
//! Every stage of the pipeline is fail-fast: an error is terminal for the
//! run and is surfaced to the operator as a single line. The variants below
//! are the complete failure taxonomy; "nothing to do" outcomes are modelled
//! as success variants on each component's outcome type instead.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Failure raised by a provisioning stage.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("package-management runtime not found or not working at {}", path.display())]
    RuntimeMissing { path: PathBuf },

    #[error("required tool '{tool}' not found at {}", path.display())]
    ToolMissing { tool: String, path: PathBuf },

    #[error("refusing to overwrite {}: expected version {expected}, found {found}", path.display())]
    ConflictingInstall {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("batched install into {} failed: {detail}", prefix.display())]
    BatchInstallFailed { prefix: PathBuf, detail: String },

    #[error("lock artifact not found: {}", path.display())]
    LockArtifactMissing { path: PathBuf },

    #[error("building environment '{environment}' failed: {detail}")]
    BuildFailed { environment: String, detail: String },

    #[error("lock generation failed; see {}", log.display())]
    LockGenerationFailed { log: PathBuf },

    #[error("rendering per-platform lock files failed: {detail}")]
    RenderFailed { detail: String },

    #[error("download of {url} failed: {detail}")]
    NetworkFetchFailed { url: String, detail: String },

    #[error("extracting '{entry}' failed: {detail}")]
    ExtractionFailed { entry: String, detail: String },

    #[error("could not make {} executable: {source}", path.display())]
    PermissionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("version check failed: {0}")]
    VersionCheckFailed(String),

    #[error("shell integration failed: {0}")]
    ShellIntegrationFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Wraps an I/O error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_missing_names_tool() {
        let err = ProvisionError::ToolMissing {
            tool: "conda-lock".to_string(),
            path: PathBuf::from("/opt/base/bin/conda-lock"),
        };
        let msg = err.to_string();
        assert!(msg.contains("conda-lock"));
        assert!(msg.contains("/opt/base/bin/conda-lock"));
    }

    #[test]
    fn test_messages_are_single_line() {
        let err = ProvisionError::ConflictingInstall {
            path: PathBuf::from("/opt/bin/micromamba"),
            expected: "1.5.8".to_string(),
            found: "1.4.0".to_string(),
        };
        assert!(!err.to_string().contains('\n'));
    }

    #[test]
    fn test_io_helper_keeps_context() {
        let err = ProvisionError::io(
            "reading lock file",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.to_string(), "reading lock file: gone");
    }
}
