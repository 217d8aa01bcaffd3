//! Installation Stage Abstraction
//!
//! The orchestrator drives a fixed list of stages through this trait; each
//! stage wraps one component and reports whether it did work.

use crate::config::EnvironmentDescriptor;
use crate::environment::EnvironmentHandle;
use crate::error::Result;

/// State shared by the stages of one run.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub descriptor: EnvironmentDescriptor,
    /// Set by the environment stage once the prefix is known.
    pub environment: Option<EnvironmentHandle>,
}

impl StageContext {
    pub fn new(descriptor: EnvironmentDescriptor) -> Self {
        Self {
            descriptor,
            environment: None,
        }
    }

    /// Handle of the environment being provisioned, falling back to the
    /// descriptor's target path before the environment stage has run.
    pub fn environment_handle(&self) -> EnvironmentHandle {
        self.environment.clone().unwrap_or_else(|| EnvironmentHandle {
            name: self.descriptor.environment_name().to_string(),
            prefix: self.descriptor.environment_path(),
        })
    }
}

/// How a stage finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageReport {
    /// Work was done.
    Done(String),
    /// The goal state was already reached.
    NothingToDo(String),
}

impl StageReport {
    pub fn message(&self) -> &str {
        match self {
            Self::Done(msg) | Self::NothingToDo(msg) => msg,
        }
    }
}

/// One step of an installation run.
pub trait Stage {
    fn name(&self) -> &str;

    fn run(&mut self, ctx: &mut StageContext) -> Result<StageReport>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn test_handle_falls_back_to_descriptor() {
        let ctx = StageContext::new(EnvironmentDescriptor::new("/opt/base", "rgp", BTreeMap::new()));
        let handle = ctx.environment_handle();

        assert_eq!(handle.name, "rgp");
        assert_eq!(handle.prefix, PathBuf::from("/opt/base/envs/rgp"));
    }

    #[test]
    fn test_report_message() {
        assert_eq!(StageReport::Done("built".into()).message(), "built");
        assert_eq!(StageReport::NothingToDo("exists".into()).message(), "exists");
    }
}
