//! Lock Artifact Module
//!
//! Keeps the unified lock artifact and its per-platform renderings in sync
//! with the human-edited source specification.
//!
//! # Structure
//!
//! - [`source`]: The `environment.yml` source specification
//! - [`artifact`]: Read-only lock artifact and rendering models
//! - [`drift`]: Regeneration and drift detection

pub mod artifact;
pub mod drift;
pub mod source;

pub use artifact::{check_rendering, LockArtifact, LockedPackage, RenderedLock};
pub use drift::{DriftCheck, DriftResult, LockDriftDetector, DRIFT_EXIT_CODE};
pub use source::SourceSpecification;
