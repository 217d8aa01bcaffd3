//! envstrap CLI Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Full install: runtime, meta-tools, environment, checks, shell hook
//! envstrap install --env-name rgp --lock-file conda-lock.yml
//!
//! # Rebuild from scratch
//! envstrap install --force
//!
//! # Individual stages
//! envstrap ensure-tool --version 1.5.8
//! envstrap bootstrap --pin conda-lock=2.5.7 --pin mamba=1.5.8
//! envstrap build-env --env-name rgp
//!
//! # Regenerate the lock file; exit 11 if it changed
//! envstrap lock --platform linux-64 --platform osx-arm64 --fail-on-drift
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::{debug, info};

use envstrap::config::ProvisionConfig;
use envstrap::environment::{
    tool_binary, BaseBootstrapper, BootstrapOutcome, BuildOutcome, LockedEnvironmentBuilder,
    LOCK_ENGINE,
};
use envstrap::install::{HttpFetcher, ToolInstaller, ToolOutcome, ToolRelease};
use envstrap::lock::{DriftCheck, DriftResult, LockDriftDetector, SourceSpecification};
use envstrap::pipeline::{default_stages, InstallOrchestrator, StageReport};
use envstrap::platform::{host_platform, PlatformSet};
use envstrap::report::{fail, report_success, report_warning};
use envstrap::{ProvisionError, Result, APP_NAME, VERSION};

#[derive(Parser, Debug)]
#[command(name = "envstrap", version, about = "Reproducible environment provisioning")]
struct Cli {
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// YAML file with provisioning settings; flags override it
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every install stage in order
    Install(InstallArgs),
    /// Install the micromamba runtime only
    EnsureTool(EnsureToolArgs),
    /// Install pinned meta-tools into the base installation
    Bootstrap(BootstrapArgs),
    /// Build the environment from the lock file
    BuildEnv(BuildEnvArgs),
    /// Regenerate the lock file and report drift
    Lock(LockArgs),
}

/// Where the base installation and environment live.
#[derive(Args, Debug, Default)]
struct TargetArgs {
    /// Root of the base installation
    #[arg(long, value_name = "PATH")]
    install_path: Option<PathBuf>,

    /// Package cache used while building
    #[arg(long, value_name = "PATH")]
    cache_path: Option<PathBuf>,

    /// Name of the environment to provision
    #[arg(long, value_name = "NAME")]
    env_name: Option<String>,
}

#[derive(Args, Debug)]
struct InstallArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Meta-tool version pin, e.g. conda-lock=2.5.7
    #[arg(long = "pin", value_name = "TOOL=VERSION")]
    pins: Vec<String>,

    #[arg(long, value_name = "FILE")]
    lock_file: Option<PathBuf>,

    /// Repository that receives the activation hook
    #[arg(long, value_name = "DIR")]
    repo_root: Option<PathBuf>,

    /// Delete the existing environment and package cache first
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct EnsureToolArgs {
    #[arg(long, value_name = "PATH")]
    install_path: Option<PathBuf>,

    /// micromamba version to install
    #[arg(long = "version", value_name = "VERSION")]
    runtime_version: Option<String>,

    /// Release platform, defaults to the host
    #[arg(long, value_name = "PLATFORM")]
    platform: Option<String>,

    /// Archive URL to download instead of the release API
    #[arg(long, value_name = "URL")]
    url: Option<String>,
}

#[derive(Args, Debug)]
struct BootstrapArgs {
    #[arg(long, value_name = "PATH")]
    install_path: Option<PathBuf>,

    #[arg(long = "pin", value_name = "TOOL=VERSION")]
    pins: Vec<String>,
}

#[derive(Args, Debug)]
struct BuildEnvArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long, value_name = "FILE")]
    lock_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct LockArgs {
    /// Source specification to lock
    #[arg(long, value_name = "FILE")]
    source_spec: Option<PathBuf>,

    /// Target platform; repeat for several
    #[arg(long = "platform", value_name = "PLATFORM")]
    platforms: Vec<String>,

    /// File receiving the lock engine's output
    #[arg(long = "log", value_name = "FILE")]
    log_path: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    lock_file: Option<PathBuf>,

    /// Decide drift by searching the engine log for TEXT instead of hashing
    #[arg(long, value_name = "TEXT")]
    marker: Option<String>,

    /// Exit with status 11 when the lock file changed
    #[arg(long)]
    fail_on_drift: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Reproducible Environment Provisioning");
    println!();
}

fn load_config(path: Option<&Path>) -> Result<ProvisionConfig> {
    match path {
        Some(path) => ProvisionConfig::load(path),
        None => Ok(ProvisionConfig::default()),
    }
}

impl TargetArgs {
    fn apply(self, config: &mut ProvisionConfig) {
        if let Some(path) = self.install_path {
            config.install_path = path;
        }
        if let Some(path) = self.cache_path {
            config.cache_path = path;
        }
        if let Some(name) = self.env_name {
            config.environment_name = name;
        }
    }
}

fn run_install(mut config: ProvisionConfig, args: InstallArgs) -> Result<u8> {
    args.target.apply(&mut config);
    config.apply_pins(&args.pins)?;
    if let Some(lock_file) = args.lock_file {
        config.lock_file = lock_file;
    }
    if let Some(repo_root) = args.repo_root {
        config.repo_root = repo_root;
    }

    let descriptor = config.descriptor()?;
    let mut orchestrator =
        InstallOrchestrator::new(default_stages(&config)?).with_cache_path(&config.cache_path);
    let report = orchestrator.install(descriptor, args.force)?;

    for (stage, outcome) in &report.stages {
        if let StageReport::NothingToDo(msg) = outcome {
            debug!("{}: {}", stage, msg);
        }
    }

    report_success(&format!(
        "Environment ready: micromamba activate {}",
        report.environment.qualified_name()
    ));
    Ok(0)
}

fn run_ensure_tool(mut config: ProvisionConfig, args: EnsureToolArgs) -> Result<u8> {
    if let Some(path) = args.install_path {
        config.install_path = path;
    }
    if let Some(version) = args.runtime_version {
        config.runtime_version = version;
    }
    if args.url.is_some() {
        config.runtime_url = args.url;
    }

    let platform = match args.platform {
        Some(platform) => platform,
        None => host_platform()?.to_string(),
    };
    let mut release = ToolRelease::micromamba(&config.runtime_version, &platform);
    if let Some(url) = &config.runtime_url {
        release = release.with_url(url);
    }
    let installer = ToolInstaller::new(Box::new(HttpFetcher::new(config.fetch_timeout())?))
        .with_cache_root(&config.cache_path)
        .with_strict_versions(config.strict_tool_versions);

    let target = config.descriptor()?.runtime_path();
    match installer.ensure_tool(&release, &target)? {
        ToolOutcome::AlreadySatisfied { version } => report_success(&format!(
            "micromamba {} already installed at {}; nothing to do",
            version.as_deref().unwrap_or("(unknown version)"),
            target.display()
        )),
        ToolOutcome::Installed { path } => report_success(&format!(
            "Installed micromamba {} at {}",
            config.runtime_version,
            path.display()
        )),
    }
    Ok(0)
}

fn run_bootstrap(mut config: ProvisionConfig, args: BootstrapArgs) -> Result<u8> {
    if let Some(path) = args.install_path {
        config.install_path = path;
    }
    config.apply_pins(&args.pins)?;

    let descriptor = config.descriptor()?;
    let outcome = BaseBootstrapper::new(config.channels.clone())
        .bootstrap_base(descriptor.install_path(), descriptor.tool_version_pins())?;

    match outcome {
        BootstrapOutcome::AlreadySatisfied => {
            report_success("Meta-tools already installed; nothing to do")
        }
        BootstrapOutcome::Installed { specs } => {
            report_success(&format!("Installed {}", specs.join(", ")))
        }
    }
    Ok(0)
}

fn run_build_env(mut config: ProvisionConfig, args: BuildEnvArgs) -> Result<u8> {
    args.target.apply(&mut config);
    if let Some(lock_file) = args.lock_file {
        config.lock_file = lock_file;
    }

    let descriptor = config.descriptor()?;
    let outcome = LockedEnvironmentBuilder::new()
        .with_pkgs_dir(&config.cache_path)
        .build_environment(
            descriptor.install_path(),
            descriptor.environment_name(),
            &config.lock_file,
        )?;

    match outcome {
        BuildOutcome::AlreadyExists { prefix } => report_success(&format!(
            "Environment already exists at {}; use install --force to rebuild",
            prefix.display()
        )),
        BuildOutcome::Built(handle) => report_success(&format!(
            "Created environment: micromamba activate {}",
            handle.qualified_name()
        )),
    }
    Ok(0)
}

/// The lock engine bundled in the base installation, else one found by `lookup`.
fn resolve_lock_engine(
    install_path: &Path,
    lookup: impl Fn(&str) -> Option<PathBuf>,
) -> Result<PathBuf> {
    let bundled = tool_binary(install_path, LOCK_ENGINE);
    if bundled.is_file() {
        return Ok(bundled);
    }

    lookup(LOCK_ENGINE).ok_or(ProvisionError::ToolMissing {
        tool: LOCK_ENGINE.to_string(),
        path: bundled,
    })
}

/// Platforms from the flags, else the source specification, else the host.
fn resolve_platforms(requested: Vec<String>, source_spec: &Path) -> Result<PlatformSet> {
    let platforms: PlatformSet = requested.into_iter().collect();
    if !platforms.is_empty() {
        return Ok(platforms);
    }

    let declared = SourceSpecification::load(source_spec)?.declared_platforms();
    if !declared.is_empty() {
        debug!("Using platforms declared in {}", source_spec.display());
        return Ok(declared);
    }

    let host = host_platform()?;
    info!("No platforms declared; locking for host platform {}", host);
    Ok(std::iter::once(host).collect())
}

fn run_lock(mut config: ProvisionConfig, args: LockArgs) -> Result<u8> {
    if let Some(path) = args.source_spec {
        config.source_spec = path;
    }
    if let Some(path) = args.log_path {
        config.log_path = path;
    }
    if let Some(path) = args.lock_file {
        config.lock_file = path;
    }
    if args.marker.is_some() {
        config.drift_marker = args.marker;
    }

    let engine = resolve_lock_engine(&config.install_path, |name| which::which(name).ok())?;

    let requested = if args.platforms.is_empty() {
        config.platforms.clone()
    } else {
        args.platforms
    };
    let platforms = resolve_platforms(requested, &config.source_spec)?;

    let mut detector = LockDriftDetector::new(engine, &config.lock_file);
    if let Some(marker) = config.drift_marker.clone() {
        detector = detector.with_check(DriftCheck::LogMarker(marker));
    }

    let result = detector.refresh_locks(&config.source_spec, &platforms, &config.log_path)?;
    match &result {
        DriftResult::Unchanged => report_success(&format!(
            "{} is up to date; nothing to do",
            config.lock_file.display()
        )),
        DriftResult::Regenerated { renderings } => {
            for rendering in renderings {
                info!("Rendered {}", rendering.display());
            }
            report_warning(&format!(
                "{} was regenerated; rebuild dependent environments with `{} install --force`",
                config.lock_file.display(),
                APP_NAME
            ));
        }
    }
    Ok(result.exit_code(args.fail_on_drift))
}

/// Main application entry point.
fn run(cli: Cli) -> Result<u8> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Install(args) => run_install(config, args),
        Commands::EnsureTool(args) => run_ensure_tool(config, args),
        Commands::Bootstrap(args) => run_bootstrap(config, args),
        Commands::BuildEnv(args) => run_build_env(config, args),
        Commands::Lock(args) => run_lock(config, args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose);
    print_banner();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => fail(&e.to_string()),
    }
}
