//! Tool Installation Module
//!
//! Downloads and installs single-binary tools such as the micromamba
//! runtime.
//!
//! # Structure
//!
//! - [`workspace`]: Scoped temporary directories for downloads
//! - [`fetch`]: Bounded-timeout archive downloads
//! - [`tool`]: Idempotent install of one versioned executable

pub mod fetch;
pub mod tool;
pub mod workspace;

pub use fetch::{ArchiveFetcher, HttpFetcher};
pub use tool::{installed_version, ArchiveKind, ToolInstaller, ToolOutcome, ToolRelease};
pub use workspace::{with_workspace, CacheWorkspace};
