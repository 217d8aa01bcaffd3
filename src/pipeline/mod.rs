//! Installation Pipeline Module
//!
//! Sequences the provisioning components into a full install.
//!
//! # Structure
//!
//! - [`stage`]: The `Stage` trait and per-run context
//! - [`stages`]: Stage adapters for each component
//! - [`verify`]: Version-compatibility checks
//! - [`shell`]: Shell activation hook
//! - [`timeline`]: Per-stage timing summary
//! - [`orchestrator`]: Ordered, fail-fast execution of the stages

pub mod orchestrator;
pub mod shell;
pub mod stage;
pub mod stages;
pub mod timeline;
pub mod verify;

pub use orchestrator::{InstallOrchestrator, InstallReport};
pub use shell::{HookOutcome, ShellIntegration};
pub use stage::{Stage, StageContext, StageReport};
pub use stages::default_stages;
pub use timeline::{EventType, StageTimeline};
pub use verify::{run_checks, VersionCheck};
