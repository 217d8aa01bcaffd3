//! envstrap - Reproducible Environment Provisioning
//!
//! Installs a micromamba base, bootstraps pinned meta-tools into it, builds
//! a named environment from a lock artifact, and keeps that artifact in sync
//! with its source specification. Every step is idempotent: re-running a
//! finished install reports "nothing to do" instead of redoing work.
//!
//! # Architecture
//!
//! - [`install`]: Download and placement of single-binary tools
//! - [`environment`]: Base bootstrap and locked environment builds
//! - [`lock`]: Lock regeneration and drift detection
//! - [`pipeline`]: Ordered install stages and the orchestrator
//! - [`report`]: Colored operator-facing outcome lines
//!
//! # Example
//!
//! ```rust,no_run
//! use envstrap::config::ProvisionConfig;
//! use envstrap::pipeline::{default_stages, InstallOrchestrator};
//!
//! fn main() -> envstrap::Result<()> {
//!     let config = ProvisionConfig::load("envstrap.yaml".as_ref())?;
//!
//!     let mut orchestrator = InstallOrchestrator::new(default_stages(&config)?)
//!         .with_cache_path(&config.cache_path);
//!     orchestrator.install(config.descriptor()?, false)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod environment;
pub mod error;
pub mod install;
pub mod lock;
pub mod pipeline;
pub mod platform;
pub mod report;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{EnvironmentDescriptor, ProvisionConfig};
pub use error::{ProvisionError, Result};
pub use install::{CacheWorkspace, ToolInstaller};
pub use lock::{DriftResult, LockDriftDetector};
pub use pipeline::InstallOrchestrator;
pub use platform::PlatformSet;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "envstrap";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "envstrap");
    }

    #[test]
    fn test_module_exports_descriptor() {
        let descriptor = ProvisionConfig::default().descriptor().unwrap();
        assert_eq!(descriptor.environment_name(), config::DEFAULT_ENVIRONMENT_NAME);
    }

    #[test]
    fn test_module_exports_platform_set() {
        let platforms: PlatformSet = ["linux-64", "linux-64"].into_iter().collect();
        assert_eq!(platforms.len(), 1);
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
