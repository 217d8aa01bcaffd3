//! Environment Management Module
//!
//! Handles the micromamba base installation and the environments built
//! from lock artifacts inside it.

pub mod bootstrap;
pub mod builder;
pub mod micromamba;

pub use bootstrap::{BaseBootstrapper, BootstrapOutcome};
pub use builder::{BuildOutcome, EnvironmentHandle, LockedEnvironmentBuilder, LOCK_ENGINE, SOLVER};
pub use micromamba::{runtime_binary, tool_binary, Micromamba};
