//! Concrete Installation Stages
//!
//! Adapters from the provisioning components to [`Stage`], in the order a
//! full install runs them.

use std::fs;
use std::path::PathBuf;

use log::debug;

use super::shell::{HookOutcome, ShellIntegration};
use super::stage::{Stage, StageContext, StageReport};
use super::verify::{run_checks, VersionCheck};
use crate::config::ProvisionConfig;
use crate::environment::{
    BaseBootstrapper, BootstrapOutcome, BuildOutcome, EnvironmentHandle, LockedEnvironmentBuilder,
};
use crate::error::Result;
use crate::install::{HttpFetcher, ToolInstaller, ToolOutcome, ToolRelease};
use crate::platform::host_platform;

/// Installs the package-management runtime into the base installation.
pub struct RuntimeStage {
    installer: ToolInstaller,
    version: String,
    url: Option<String>,
}

impl RuntimeStage {
    pub fn new(installer: ToolInstaller, version: impl Into<String>) -> Self {
        Self {
            installer,
            version: version.into(),
            url: None,
        }
    }

    /// Downloads from a mirror instead of the release API.
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }
}

/// The micromamba release for the host, optionally fetched from `url`.
pub fn runtime_release(version: &str, url: Option<&str>) -> Result<ToolRelease> {
    let release = ToolRelease::micromamba(version, host_platform()?);
    Ok(match url {
        Some(url) => release.with_url(url),
        None => release,
    })
}

impl Stage for RuntimeStage {
    fn name(&self) -> &str {
        "runtime"
    }

    fn run(&mut self, ctx: &mut StageContext) -> Result<StageReport> {
        let release = runtime_release(&self.version, self.url.as_deref())?;

        match self.installer.ensure_tool(&release, &ctx.descriptor.runtime_path())? {
            ToolOutcome::AlreadySatisfied { version } => Ok(StageReport::NothingToDo(format!(
                "micromamba {} already installed",
                version.as_deref().unwrap_or("(unknown version)")
            ))),
            ToolOutcome::Installed { path } => Ok(StageReport::Done(format!(
                "Installed micromamba {} at {}",
                self.version,
                path.display()
            ))),
        }
    }
}

/// Installs the pinned meta-tools into the base installation.
pub struct BootstrapStage {
    bootstrapper: BaseBootstrapper,
}

impl BootstrapStage {
    pub fn new(bootstrapper: BaseBootstrapper) -> Self {
        Self { bootstrapper }
    }
}

impl Stage for BootstrapStage {
    fn name(&self) -> &str {
        "base"
    }

    fn run(&mut self, ctx: &mut StageContext) -> Result<StageReport> {
        let descriptor = &ctx.descriptor;
        match self
            .bootstrapper
            .bootstrap_base(descriptor.install_path(), descriptor.tool_version_pins())?
        {
            BootstrapOutcome::AlreadySatisfied => Ok(StageReport::NothingToDo(
                "Meta-tools already installed".to_string(),
            )),
            BootstrapOutcome::Installed { specs } => Ok(StageReport::Done(format!(
                "Installed {}",
                specs.join(", ")
            ))),
        }
    }
}

/// Builds the named environment from the lock artifact.
pub struct EnvironmentStage {
    builder: LockedEnvironmentBuilder,
    lock_file: PathBuf,
}

impl EnvironmentStage {
    pub fn new(builder: LockedEnvironmentBuilder, lock_file: impl Into<PathBuf>) -> Self {
        Self {
            builder,
            lock_file: lock_file.into(),
        }
    }
}

impl Stage for EnvironmentStage {
    fn name(&self) -> &str {
        "environment"
    }

    fn run(&mut self, ctx: &mut StageContext) -> Result<StageReport> {
        let name = ctx.descriptor.environment_name().to_string();
        let outcome = self.builder.build_environment(
            ctx.descriptor.install_path(),
            &name,
            &self.lock_file,
        )?;

        match outcome {
            BuildOutcome::AlreadyExists { prefix } => {
                let prefix = fs::canonicalize(&prefix).unwrap_or(prefix);
                let report = StageReport::NothingToDo(format!(
                    "Environment '{}' already exists at {}",
                    name,
                    prefix.display()
                ));
                ctx.environment = Some(EnvironmentHandle { name, prefix });
                Ok(report)
            }
            BuildOutcome::Built(handle) => {
                let report = StageReport::Done(format!(
                    "Created environment {}",
                    handle.qualified_name()
                ));
                ctx.environment = Some(handle);
                Ok(report)
            }
        }
    }
}

/// Runs the configured version-compatibility checks.
pub struct VersionCheckStage {
    checks: Vec<VersionCheck>,
}

impl VersionCheckStage {
    pub fn new(checks: Vec<VersionCheck>) -> Self {
        Self { checks }
    }
}

impl Stage for VersionCheckStage {
    fn name(&self) -> &str {
        "version checks"
    }

    fn run(&mut self, _ctx: &mut StageContext) -> Result<StageReport> {
        if self.checks.is_empty() {
            return Ok(StageReport::NothingToDo(
                "No version checks configured".to_string(),
            ));
        }

        run_checks(&self.checks)?;
        Ok(StageReport::Done(format!(
            "{} version checks passed",
            self.checks.len()
        )))
    }
}

/// Registers the activation hook for the built environment.
pub struct ShellIntegrationStage {
    integration: ShellIntegration,
}

impl ShellIntegrationStage {
    pub fn new(integration: ShellIntegration) -> Self {
        Self { integration }
    }
}

impl Stage for ShellIntegrationStage {
    fn name(&self) -> &str {
        "shell hook"
    }

    fn run(&mut self, ctx: &mut StageContext) -> Result<StageReport> {
        let handle = ctx.environment_handle();
        let descriptor = &ctx.descriptor;

        let outcome = self.integration.write_activation(
            &descriptor.runtime_path(),
            descriptor.install_path(),
            &handle.prefix,
        )?;

        let envrc = self.integration.envrc_path();
        Ok(match outcome {
            HookOutcome::Written => {
                StageReport::Done(format!("Activation hook written to {}", envrc.display()))
            }
            HookOutcome::Unchanged => {
                StageReport::NothingToDo(format!("Activation hook {} up to date", envrc.display()))
            }
        })
    }
}

/// The full install sequence for `config`.
pub fn default_stages(config: &ProvisionConfig) -> Result<Vec<Box<dyn Stage>>> {
    let fetcher = HttpFetcher::new(config.fetch_timeout())?;
    let installer = ToolInstaller::new(Box::new(fetcher))
        .with_cache_root(&config.cache_path)
        .with_strict_versions(config.strict_tool_versions);
    debug!(
        "Install sequence for '{}' with lock file {}",
        config.environment_name,
        config.lock_file.display()
    );

    Ok(vec![
        Box::new(
            RuntimeStage::new(installer, config.runtime_version.clone())
                .with_url(config.runtime_url.clone()),
        ),
        Box::new(BootstrapStage::new(BaseBootstrapper::new(config.channels.clone()))),
        Box::new(EnvironmentStage::new(
            LockedEnvironmentBuilder::new().with_pkgs_dir(config.cache_path.clone()),
            config.lock_file.clone(),
        )),
        Box::new(VersionCheckStage::new(config.version_checks.clone())),
        Box::new(ShellIntegrationStage::new(ShellIntegration::new(
            config.repo_root.clone(),
            config.activation_script.clone(),
        ))),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentDescriptor;
    use crate::error::ProvisionError;
    use crate::install::ArchiveKind;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::tempdir;

    fn context(base: &Path) -> StageContext {
        StageContext::new(EnvironmentDescriptor::new(base, "rgp", BTreeMap::new()))
    }

    #[test]
    fn test_default_stage_order() {
        let stages = default_stages(&ProvisionConfig::default()).unwrap();
        let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["runtime", "base", "environment", "version checks", "shell hook"]
        );
    }

    #[test]
    fn test_runtime_release_mirror_sets_archive_kind() {
        let release = runtime_release("1.5.8", None).unwrap();
        assert_eq!(release.kind, ArchiveKind::TarBz2);
        assert!(release.url.ends_with("/1.5.8"));

        let mirrored =
            runtime_release("1.5.8", Some("https://mirror.local/micromamba-1.5.8.tar.gz")).unwrap();
        assert_eq!(mirrored.url, "https://mirror.local/micromamba-1.5.8.tar.gz");
        assert_eq!(mirrored.kind, ArchiveKind::TarGz);
    }

    #[test]
    fn test_empty_version_checks_are_informational() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let report = VersionCheckStage::new(Vec::new()).run(&mut ctx).unwrap();
        assert!(matches!(report, StageReport::NothingToDo(_)));
    }

    #[test]
    fn test_environment_stage_requires_tools() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let mut stage = EnvironmentStage::new(LockedEnvironmentBuilder::new(), "conda-lock.yml");

        let err = stage.run(&mut ctx).unwrap_err();
        assert!(matches!(err, ProvisionError::ToolMissing { .. }));
        assert!(ctx.environment.is_none());
    }

    #[test]
    fn test_bootstrap_stage_requires_runtime() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let mut stage = BootstrapStage::new(BaseBootstrapper::new(vec!["conda-forge".into()]));

        assert!(matches!(
            stage.run(&mut ctx),
            Err(ProvisionError::RuntimeMissing { .. })
        ));
    }

    #[test]
    fn test_shell_stage_uses_descriptor_prefix() {
        let base = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let mut ctx = context(base.path());
        let mut stage = ShellIntegrationStage::new(
            ShellIntegration::new(repo.path(), "activate.sh").without_allow(),
        );

        let report = stage.run(&mut ctx).unwrap();
        assert!(matches!(report, StageReport::Done(_)));

        let script = fs::read_to_string(repo.path().join("activate.sh")).unwrap();
        assert!(script.contains(&base.path().join("envs").join("rgp").display().to_string()));

        let again = stage.run(&mut ctx).unwrap();
        assert!(matches!(again, StageReport::NothingToDo(_)));
    }
}
