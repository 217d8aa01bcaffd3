//! Install Orchestrator
//!
//! Runs the installation stages strictly in order for one environment:
//! runtime, base meta-tools, locked environment, version checks, shell hook.
//! The first failing stage ends the run and its error is returned as is.
//! Completed stages are not rolled back.
//!
//! # Example
//!
//! ```rust,no_run
//! use envstrap::config::ProvisionConfig;
//! use envstrap::pipeline::{default_stages, InstallOrchestrator};
//!
//! fn main() -> envstrap::Result<()> {
//!     let config = ProvisionConfig::default();
//!     let mut orchestrator = InstallOrchestrator::new(default_stages(&config)?)
//!         .with_cache_path(&config.cache_path);
//!
//!     let report = orchestrator.install(config.descriptor()?, false)?;
//!     println!("Ready: {}", report.environment.qualified_name());
//!     Ok(())
//! }
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use super::stage::{Stage, StageContext, StageReport};
use super::timeline::{EventType, StageTimeline};
use crate::config::{validate_environment_name, EnvironmentDescriptor};
use crate::environment::EnvironmentHandle;
use crate::error::{ProvisionError, Result};

/// What a successful run did, stage by stage.
#[derive(Debug)]
pub struct InstallReport {
    pub stages: Vec<(String, StageReport)>,
    pub environment: EnvironmentHandle,
    pub timeline: StageTimeline,
}

/// Sequences installation stages for an environment.
pub struct InstallOrchestrator {
    stages: Vec<Box<dyn Stage>>,
    cache_path: Option<PathBuf>,
    summary_out: Box<dyn Write>,
}

impl InstallOrchestrator {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            cache_path: None,
            summary_out: Box::new(io::stdout()),
        }
    }

    /// Where the stage table goes after each run; standard output by default.
    pub fn with_summary_output(mut self, out: impl Write + 'static) -> Self {
        self.summary_out = Box::new(out);
        self
    }

    /// Build cache removed together with the environment on a forced reinstall.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Provisions the environment described by `descriptor`.
    ///
    /// With `force_reinstall`, an existing environment and its build cache
    /// are deleted before any stage runs.
    pub fn install(
        &mut self,
        descriptor: EnvironmentDescriptor,
        force_reinstall: bool,
    ) -> Result<InstallReport> {
        if force_reinstall {
            self.remove_previous(&descriptor)?;
        }

        info!(
            "Provisioning environment '{}' in {}",
            descriptor.environment_name(),
            descriptor.install_path().display()
        );

        let mut ctx = StageContext::new(descriptor);
        let mut timeline = StageTimeline::new();
        let mut reports = Vec::with_capacity(self.stages.len());

        for stage in self.stages.iter_mut() {
            let name = stage.name().to_string();
            info!("==> {}", name);
            timeline.add_event(name.clone(), EventType::Started);

            match stage.run(&mut ctx) {
                Ok(report) => {
                    let event = match report {
                        StageReport::Done(_) => EventType::Completed,
                        StageReport::NothingToDo(_) => EventType::Satisfied,
                    };
                    info!("{}", report.message());
                    timeline.add_event(name.clone(), event);
                    reports.push((name, report));
                }
                Err(e) => {
                    error!("Stage '{}' failed", name);
                    timeline.add_event(name, EventType::Failed);
                    print_summary(&mut self.summary_out, &timeline);
                    return Err(e);
                }
            }
        }

        print_summary(&mut self.summary_out, &timeline);
        Ok(InstallReport {
            stages: reports,
            environment: ctx.environment_handle(),
            timeline,
        })
    }

    fn remove_previous(&self, descriptor: &EnvironmentDescriptor) -> Result<()> {
        validate_environment_name(descriptor.environment_name())?;
        remove_dir_if_present(&descriptor.environment_path())?;
        if let Some(cache) = &self.cache_path {
            remove_dir_if_present(cache)?;
        }
        Ok(())
    }
}

/// Stage table shown to the operator after every run.
fn print_summary(out: &mut dyn Write, timeline: &StageTimeline) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", timeline.summary());
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    warn!("Removing {}", path.display());
    fs::remove_dir_all(path)
        .map_err(|e| ProvisionError::io(format!("removing {}", path.display()), e))
}
