//! Lock Drift Detection
//!
//! Regenerates the unified lock artifact from the source specification in
//! a single lock engine call covering every declared platform, decides
//! whether the artifact changed, and on change re-renders the per-platform
//! explicit files so they never diverge from the artifact.
//!
//! Drift is decided by comparing SHA-256 digests of the lock artifact before
//! and after regeneration. Matching a marker string in the engine's log is
//! supported only when the caller names the marker explicitly.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use super::artifact::{check_rendering, LockArtifact, RenderedLock};
use crate::environment::builder::{LOCK_ENGINE, SOLVER};
use crate::error::{ProvisionError, Result};
use crate::platform::PlatformSet;

/// Exit status used by the CLI when drift is found in strict mode.
pub const DRIFT_EXIT_CODE: u8 = 11;

/// Baseline package manager used when the faster solver is unavailable.
pub const BASELINE_HELPER: &str = "conda";

/// Template the lock engine uses to name per-platform renderings.
const RENDER_TEMPLATE: &str = "conda-{platform}.lock";

/// How a regeneration is judged to have changed the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftCheck {
    /// Compare digests of the lock artifact before and after.
    ContentHash,
    /// Search the engine's log for this exact text.
    LogMarker(String),
}

/// Result of [`LockDriftDetector::refresh_locks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftResult {
    Unchanged,
    /// The artifact changed; dependents must rebuild their environments.
    Regenerated { renderings: Vec<PathBuf> },
}

impl DriftResult {
    /// Process exit status for this result; drift is a distinct status only
    /// when `fail_on_drift` is set.
    pub fn exit_code(&self, fail_on_drift: bool) -> u8 {
        match self {
            Self::Regenerated { .. } if fail_on_drift => DRIFT_EXIT_CODE,
            _ => 0,
        }
    }
}

/// Keeps a lock artifact synchronized with its source specification.
#[derive(Debug, Clone)]
pub struct LockDriftDetector {
    lock_engine: PathBuf,
    lock_file: PathBuf,
    check: DriftCheck,
}

impl LockDriftDetector {
    /// `lock_engine` may be a path or a bare name looked up on `PATH`.
    pub fn new(lock_engine: impl Into<PathBuf>, lock_file: impl Into<PathBuf>) -> Self {
        Self {
            lock_engine: lock_engine.into(),
            lock_file: lock_file.into(),
            check: DriftCheck::ContentHash,
        }
    }

    pub fn with_check(mut self, check: DriftCheck) -> Self {
        self.check = check;
        self
    }

    /// Regenerates the lock artifact for `platforms` and reports drift.
    pub fn refresh_locks(
        &self,
        source_spec: &Path,
        platforms: &PlatformSet,
        log_path: &Path,
    ) -> Result<DriftResult> {
        let lock_engine = resolve_tool(&self.lock_engine)?;

        if platforms.is_empty() {
            return Err(ProvisionError::Config(
                "no platforms declared for locking".to_string(),
            ));
        }
        for platform in platforms.unknown() {
            warn!("Platform '{}' is not a known conda platform", platform);
        }

        let helper = select_install_helper(&lock_engine)?;
        info!(
            "Locking {} for {} using {}",
            source_spec.display(),
            platforms,
            helper.display()
        );

        let before = digest_file(&self.lock_file)?;
        let log_offset = log_len(log_path);

        let mut cmd = Command::new(&lock_engine);
        cmd.arg("lock")
            .arg("--file")
            .arg(source_spec)
            .arg("--lockfile")
            .arg(&self.lock_file)
            .arg("--conda")
            .arg(&helper);
        for platform in platforms.iter() {
            cmd.arg("--platform").arg(platform);
        }
        run_logged(cmd, log_path).map_err(|detail| {
            warn!("{} lock failed: {}", LOCK_ENGINE, detail);
            ProvisionError::LockGenerationFailed {
                log: log_path.to_path_buf(),
            }
        })?;

        let changed = match &self.check {
            DriftCheck::ContentHash => digest_file(&self.lock_file)? != before,
            DriftCheck::LogMarker(marker) => log_contains(log_path, marker, log_offset)?,
        };

        if !changed {
            info!("Lock artifact {} is up to date", self.lock_file.display());
            return Ok(DriftResult::Unchanged);
        }

        info!("Lock artifact {} was regenerated", self.lock_file.display());
        let renderings = self.render(&lock_engine, platforms, log_path)?;
        Ok(DriftResult::Regenerated { renderings })
    }

    /// Re-renders every per-platform file in one call and checks each against
    /// the artifact.
    fn render(
        &self,
        lock_engine: &Path,
        platforms: &PlatformSet,
        log_path: &Path,
    ) -> Result<Vec<PathBuf>> {
        let render_dir = match self.lock_file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let lock_name = self
            .lock_file
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| ProvisionError::RenderFailed {
                detail: format!("invalid lock file path {}", self.lock_file.display()),
            })?;

        let mut cmd = Command::new(lock_engine);
        cmd.current_dir(&render_dir)
            .arg("render")
            .arg("--kind")
            .arg("explicit")
            .arg("--filename-template")
            .arg(RENDER_TEMPLATE);
        for platform in platforms.iter() {
            cmd.arg("--platform").arg(platform);
        }
        cmd.arg(&lock_name);

        run_logged(cmd, log_path).map_err(|detail| ProvisionError::RenderFailed { detail })?;

        let artifact = match LockArtifact::load(&self.lock_file) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!("Skipping rendering contents check: {}", e);
                None
            }
        };

        let mut renderings = Vec::with_capacity(platforms.len());
        for platform in platforms.iter() {
            let path = render_dir.join(RENDER_TEMPLATE.replace("{platform}", platform));
            if !path.is_file() {
                return Err(ProvisionError::RenderFailed {
                    detail: format!("expected rendering {} was not produced", path.display()),
                });
            }

            if let Some(artifact) = &artifact {
                let rendered = RenderedLock::load(&path)?;
                check_rendering(artifact, platform, &rendered)
                    .map_err(|detail| ProvisionError::RenderFailed { detail })?;
            }

            debug!("Rendered {}", path.display());
            renderings.push(path);
        }

        Ok(renderings)
    }
}

/// Prefers the faster solver installed next to the lock engine, falling
/// back to the baseline package manager.
pub fn select_install_helper(lock_engine: &Path) -> Result<PathBuf> {
    if let Some(dir) = lock_engine.parent() {
        for name in [SOLVER, BASELINE_HELPER] {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    which::which(SOLVER)
        .or_else(|_| which::which(BASELINE_HELPER))
        .map_err(|_| ProvisionError::ToolMissing {
            tool: BASELINE_HELPER.to_string(),
            path: lock_engine
                .parent()
                .map(|dir| dir.join(BASELINE_HELPER))
                .unwrap_or_else(|| PathBuf::from(BASELINE_HELPER)),
        })
}

/// Resolves a path or `PATH` name to a callable executable.
fn resolve_tool(tool: &Path) -> Result<PathBuf> {
    let missing = || ProvisionError::ToolMissing {
        tool: LOCK_ENGINE.to_string(),
        path: tool.to_path_buf(),
    };

    if tool.components().count() > 1 {
        return if tool.is_file() {
            Ok(tool.to_path_buf())
        } else {
            Err(missing())
        };
    }
    which::which(tool).map_err(|_| missing())
}

/// Runs `cmd` with stdout and stderr appended to `log_path`.
fn run_logged(mut cmd: Command, log_path: &Path) -> std::result::Result<(), String> {
    let log = File::options()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| format!("opening log {}: {}", log_path.display(), e))?;
    let log_err = log
        .try_clone()
        .map_err(|e| format!("opening log {}: {}", log_path.display(), e))?;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    debug!("Running {:?} (log: {})", cmd, log_path.display());

    let status = cmd.status().map_err(|e| format!("could not start: {}", e))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!(
            "exit status {:?}; see {}",
            status.code(),
            log_path.display()
        ))
    }
}

/// Current size of the log, so a run only searches what it appended.
fn log_len(log_path: &Path) -> u64 {
    fs::metadata(log_path).map(|meta| meta.len()).unwrap_or(0)
}

/// Whether `marker` appears in the log after byte `offset`.
fn log_contains(log_path: &Path, marker: &str, offset: u64) -> Result<bool> {
    let log = fs::read(log_path)
        .map_err(|e| ProvisionError::io(format!("reading {}", log_path.display()), e))?;
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    let appended = log.get(start..).unwrap_or(&[]);
    Ok(String::from_utf8_lossy(appended).contains(marker))
}

/// SHA-256 of a file, or `None` if it does not exist.
fn digest_file(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(hex::encode(Sha256::digest(&bytes)))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProvisionError::io(format!("reading {}", path.display()), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use tempfile::tempdir;

    /// Fake lock engine. `lock` writes a valid artifact whose single package
    /// version comes from the `x=` line of the source spec; `render` writes
    /// one explicit file per platform derived from it.
    const FAKE_ENGINE: &str = r#"
cmd="$1"; shift
file=""; lockfile=""; last=""; platforms=()
while [ $# -gt 0 ]; do
  case "$1" in
    --file) file="$2"; shift 2 ;;
    --lockfile) lockfile="$2"; shift 2 ;;
    --conda) echo "helper: $2"; shift 2 ;;
    --platform) platforms+=("$2"); shift 2 ;;
    --kind|--filename-template) shift 2 ;;
    *) last="$1"; shift ;;
  esac
done
if [ "$cmd" = "lock" ]; then
  version=$(sed -n 's/.*x=//p' "$file")
  {
    echo "version: 1"
    echo "package:"
    for p in "${platforms[@]}"; do
      echo "  - name: x"
      echo "    version: '$version'"
      echo "    manager: conda"
      echo "    platform: $p"
      echo "    url: https://conda.anaconda.org/conda-forge/$p/x-$version-h0_0.tar.bz2"
    done
  } > "$lockfile.new"
  if cmp -s "$lockfile.new" "$lockfile"; then
    rm "$lockfile.new"
    echo "Spec hash already locked"
  else
    mv "$lockfile.new" "$lockfile"
    echo "Lock updated"
  fi
elif [ "$cmd" = "render" ]; then
  [ -n "$FAIL_RENDER" ] && exit 3
  version=$(sed -n "s/.*version: '\(.*\)'/\1/p" "$last" | head -n 1)
  for p in "${platforms[@]}"; do
    printf '# platform: %s\n@EXPLICIT\nhttps://conda.anaconda.org/conda-forge/%s/x-%s-h0_0.tar.bz2#00\n' "$p" "$p" "$version" > "conda-$p.lock"
  done
fi
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        engine: PathBuf,
    }

    impl Fixture {
        fn new(engine_body: &str) -> Self {
            let dir = tempdir().unwrap();
            let engine = write_script(&dir.path().join("base/bin/conda-lock"), engine_body);
            write_script(&dir.path().join("base/bin/mamba"), "exit 0");
            Self { dir, engine }
        }

        fn spec(&self, version: &str) -> PathBuf {
            let path = self.dir.path().join("environment.yml");
            fs::write(&path, format!("dependencies:\n  - x={}\n", version)).unwrap();
            path
        }

        fn lock_file(&self) -> PathBuf {
            self.dir.path().join("conda-lock.yml")
        }

        fn log(&self) -> PathBuf {
            self.dir.path().join("conda-lock.log")
        }

        fn detector(&self) -> LockDriftDetector {
            LockDriftDetector::new(&self.engine, self.lock_file())
        }
    }

    fn linux() -> PlatformSet {
        ["linux-64"].into_iter().collect()
    }

    #[test]
    fn test_exit_codes() {
        let drift = DriftResult::Regenerated { renderings: vec![] };
        assert_eq!(drift.exit_code(true), DRIFT_EXIT_CODE);
        assert_eq!(drift.exit_code(false), 0);
        assert_eq!(DriftResult::Unchanged.exit_code(true), 0);
    }

    #[test]
    fn test_missing_lock_engine() {
        let dir = tempdir().unwrap();
        let detector = LockDriftDetector::new(dir.path().join("bin/conda-lock"), dir.path().join("lock.yml"));

        let result = detector.refresh_locks(&dir.path().join("environment.yml"), &linux(), &dir.path().join("log"));
        match result {
            Err(ProvisionError::ToolMissing { tool, .. }) => assert_eq!(tool, LOCK_ENGINE),
            other => panic!("expected ToolMissing, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_platform_set_rejected() {
        let fixture = Fixture::new(FAKE_ENGINE);
        let result = fixture
            .detector()
            .refresh_locks(&fixture.spec("1.2.3"), &PlatformSet::new(), &fixture.log());
        assert!(matches!(result, Err(ProvisionError::Config(_))));
    }

    #[test]
    fn test_helper_prefers_solver_next_to_engine() {
        let dir = tempdir().unwrap();
        let engine = write_script(&dir.path().join("bin/conda-lock"), "exit 0");
        write_script(&dir.path().join("bin/conda"), "exit 0");
        assert_eq!(select_install_helper(&engine).unwrap(), dir.path().join("bin/conda"));

        write_script(&dir.path().join("bin/mamba"), "exit 0");
        assert_eq!(select_install_helper(&engine).unwrap(), dir.path().join("bin/mamba"));
    }

    #[cfg(unix)]
    #[test]
    fn test_regenerated_then_unchanged() {
        let fixture = Fixture::new(FAKE_ENGINE);
        let spec = fixture.spec("1.2.3");
        let platforms: PlatformSet = ["linux-64", "osx-arm64"].into_iter().collect();

        let first = fixture
            .detector()
            .refresh_locks(&spec, &platforms, &fixture.log())
            .unwrap();
        let DriftResult::Regenerated { renderings } = first else {
            panic!("first refresh must regenerate");
        };
        assert_eq!(
            renderings,
            vec![
                fixture.dir.path().join("conda-linux-64.lock"),
                fixture.dir.path().join("conda-osx-arm64.lock"),
            ]
        );

        let artifact = LockArtifact::load(&fixture.lock_file()).unwrap();
        let linux: Vec<_> = artifact.packages_for("linux-64").collect();
        assert_eq!(linux.len(), 1);
        assert_eq!((linux[0].name.as_str(), linux[0].version.as_str()), ("x", "1.2.3"));

        let second = fixture
            .detector()
            .refresh_locks(&spec, &platforms, &fixture.log())
            .unwrap();
        assert_eq!(second, DriftResult::Unchanged);
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_called_once_for_all_platforms() {
        let fixture = Fixture::new(FAKE_ENGINE);
        let platforms: PlatformSet = ["linux-64", "osx-64", "osx-arm64"].into_iter().collect();

        fixture
            .detector()
            .refresh_locks(&fixture.spec("1.2.3"), &platforms, &fixture.log())
            .unwrap();

        let log = fs::read_to_string(fixture.log()).unwrap();
        assert_eq!(log.matches("Lock updated").count(), 1);
        assert!(log.contains(&format!("helper: {}", fixture.dir.path().join("base/bin/mamba").display())));
    }

    #[cfg(unix)]
    #[test]
    fn test_source_change_is_drift() {
        let fixture = Fixture::new(FAKE_ENGINE);
        fixture
            .detector()
            .refresh_locks(&fixture.spec("1.2.3"), &linux(), &fixture.log())
            .unwrap();

        let result = fixture
            .detector()
            .refresh_locks(&fixture.spec("1.2.4"), &linux(), &fixture.log())
            .unwrap();
        assert!(matches!(result, DriftResult::Regenerated { .. }));

        let rendered = RenderedLock::load(&fixture.dir.path().join("conda-linux-64.lock")).unwrap();
        assert!(rendered.urls[0].contains("x-1.2.4"));
    }

    #[cfg(unix)]
    #[test]
    fn test_log_marker_check() {
        let fixture = Fixture::new(FAKE_ENGINE);
        let spec = fixture.spec("1.2.3");
        let detector = fixture
            .detector()
            .with_check(DriftCheck::LogMarker("Lock updated".to_string()));

        let first = detector.refresh_locks(&spec, &linux(), &fixture.log()).unwrap();
        assert!(matches!(first, DriftResult::Regenerated { .. }));

        let second = detector.refresh_locks(&spec, &linux(), &fixture.log()).unwrap();
        assert_eq!(second, DriftResult::Unchanged);

        // Earlier runs stay in the log.
        let log = fs::read_to_string(fixture.log()).unwrap();
        assert!(log.contains("Lock updated"));
        assert!(log.contains("Spec hash already locked"));

        let third = detector
            .refresh_locks(&fixture.spec("1.2.4"), &linux(), &fixture.log())
            .unwrap();
        assert!(matches!(third, DriftResult::Regenerated { .. }));
    }

    #[test]
    fn test_log_marker_only_searches_new_output() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("conda-lock.log");
        fs::write(&log, "Lock updated\n").unwrap();
        let offset = log_len(&log);

        assert!(!log_contains(&log, "Lock updated", offset).unwrap());
        assert!(log_contains(&log, "Lock updated", 0).unwrap());
        assert!(!log_contains(&log, "Lock updated", offset + 100).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_failure_points_at_log() {
        let fixture = Fixture::new("echo 'ResolutionError: x=9.9' >&2\nexit 1");

        match fixture
            .detector()
            .refresh_locks(&fixture.spec("9.9"), &linux(), &fixture.log())
        {
            Err(ProvisionError::LockGenerationFailed { log }) => {
                assert_eq!(log, fixture.log());
                let contents = fs::read_to_string(log).unwrap();
                assert!(contents.contains("ResolutionError"));
            }
            other => panic!("expected LockGenerationFailed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_render_failure_is_fatal() {
        let body = format!("export FAIL_RENDER=1\n{}", FAKE_ENGINE);
        let fixture = Fixture::new(&body);

        let result = fixture
            .detector()
            .refresh_locks(&fixture.spec("1.2.3"), &linux(), &fixture.log());
        assert!(matches!(result, Err(ProvisionError::RenderFailed { .. })));
        assert!(fixture.lock_file().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_divergent_rendering_is_fatal() {
        let body = FAKE_ENGINE.replace("x-%s-h0_0", "x-0.0.0-h0_0%.0s");
        let fixture = Fixture::new(&body);

        let result = fixture
            .detector()
            .refresh_locks(&fixture.spec("1.2.3"), &linux(), &fixture.log());
        match result {
            Err(ProvisionError::RenderFailed { detail }) => assert!(detail.contains("diverges")),
            other => panic!("expected RenderFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_digest_missing_file() {
        assert_eq!(digest_file(Path::new("/nonexistent/conda-lock.yml")).unwrap(), None);
    }
}
