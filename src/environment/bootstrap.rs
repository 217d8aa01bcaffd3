//! Base Installation Bootstrap
//!
//! Installs the version-pinned meta-tools (lock engine, solver, helper
//! libraries) into the shared base installation. All pins go to the solver
//! in one request so it can satisfy them jointly.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info};

use super::micromamba::Micromamba;
use crate::error::{ProvisionError, Result};

/// Result of [`BaseBootstrapper::bootstrap_base`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Every pin was already installed at its pinned version.
    AlreadySatisfied,
    /// The listed specs were handed to the solver and installed.
    Installed { specs: Vec<String> },
}

/// Installs pinned meta-tools into a base installation.
#[derive(Debug, Clone)]
pub struct BaseBootstrapper {
    channels: Vec<String>,
}

impl BaseBootstrapper {
    pub fn new(channels: Vec<String>) -> Self {
        Self { channels }
    }

    /// Installs all `pins` into the base installation at `base`.
    pub fn bootstrap_base(
        &self,
        base: &Path,
        pins: &BTreeMap<String, String>,
    ) -> Result<BootstrapOutcome> {
        let runtime = Micromamba::at(base);
        let version = runtime.version().ok_or_else(|| ProvisionError::RuntimeMissing {
            path: runtime.binary().to_path_buf(),
        })?;
        debug!("Using micromamba {} at {}", version, runtime.binary().display());

        if pins.is_empty() {
            info!("No meta-tools pinned for {}", base.display());
            return Ok(BootstrapOutcome::AlreadySatisfied);
        }

        match runtime.list_packages(base) {
            Ok(installed) if pins_satisfied(pins, &installed) => {
                info!("All {} pinned meta-tools already installed", pins.len());
                return Ok(BootstrapOutcome::AlreadySatisfied);
            }
            Ok(_) => {}
            Err(e) => debug!("Could not list base packages, installing anyway: {}", e),
        }

        let specs = pin_specs(pins);
        runtime.install(base, &self.channels, &specs)?;

        info!("Installed meta-tools into {}", base.display());
        Ok(BootstrapOutcome::Installed { specs })
    }
}

/// Renders pins as `name=version` match specs.
fn pin_specs(pins: &BTreeMap<String, String>) -> Vec<String> {
    pins.iter()
        .map(|(tool, version)| format!("{}={}", tool, version))
        .collect()
}

fn pins_satisfied(pins: &BTreeMap<String, String>, installed: &BTreeMap<String, String>) -> bool {
    pins.iter()
        .all(|(tool, version)| installed.get(tool) == Some(version))
}
