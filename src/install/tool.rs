//! Versioned Tool Installation
//!
//! Installs a single executable from a release archive into a target path.
//! Existing installs are checked (`<tool> --version`) on every call rather
//! than tracked in a registry, so repeated calls are cheap and idempotent.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use tar::Archive;

use super::fetch::ArchiveFetcher;
use super::workspace::with_workspace;
use crate::error::{ProvisionError, Result};

/// Base URL of the micromamba release API.
const MICROMAMBA_RELEASE_URL: &str = "https://micro.mamba.pm/api/micromamba";

/// Compression wrapped around a release tarball.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarBz2,
    TarGz,
}

impl ArchiveKind {
    /// Guesses the archive kind from a file name or URL.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// Where to get one version of a tool and which archive entry holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRelease {
    pub name: String,
    /// Version the installed binary must report; `None` accepts any.
    pub version: Option<String>,
    pub url: String,
    /// Path of the executable inside the archive.
    pub archive_entry: String,
    pub kind: ArchiveKind,
}

impl ToolRelease {
    /// The micromamba release for `platform` (e.g. `linux-64`).
    pub fn micromamba(version: &str, platform: &str) -> Self {
        let archive_entry = if platform.starts_with("win-") {
            "Library/bin/micromamba.exe"
        } else {
            "bin/micromamba"
        };

        Self {
            name: "micromamba".to_string(),
            version: Some(version.to_string()),
            url: format!("{}/{}/{}", MICROMAMBA_RELEASE_URL, platform, version),
            archive_entry: archive_entry.to_string(),
            kind: ArchiveKind::TarBz2,
        }
    }

    /// Fetches from `url` instead, taking the archive kind from its file
    /// name when it has a recognised extension.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        let path = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        if let Some(kind) = ArchiveKind::from_name(path) {
            self.kind = kind;
        }
        self
    }
}

/// Result of [`ToolInstaller::ensure_tool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// An install was already present; nothing was downloaded.
    AlreadySatisfied { version: Option<String> },
    /// The tool was downloaded and placed at `path`.
    Installed { path: PathBuf },
}

/// Downloads and installs single-binary tools.
pub struct ToolInstaller {
    fetcher: Box<dyn ArchiveFetcher>,
    cache_root: Option<PathBuf>,
    strict_versions: bool,
}

impl ToolInstaller {
    pub fn new(fetcher: Box<dyn ArchiveFetcher>) -> Self {
        Self {
            fetcher,
            cache_root: None,
            strict_versions: false,
        }
    }

    /// Creates cache workspaces under `root` instead of the system temp dir.
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    /// Treats an existing install reporting a different version as a conflict.
    pub fn with_strict_versions(mut self, strict: bool) -> Self {
        self.strict_versions = strict;
        self
    }

    /// Ensures `release` is installed at `install_path`.
    pub fn ensure_tool(&self, release: &ToolRelease, install_path: &Path) -> Result<ToolOutcome> {
        if let Some(outcome) = self.check_existing(release, install_path)? {
            return Ok(outcome);
        }

        info!(
            "Installing {} {} into {}",
            release.name,
            release.version.as_deref().unwrap_or("(any version)"),
            install_path.display()
        );

        with_workspace(self.cache_root.as_deref(), |workspace| {
            self.download_and_place(release, install_path, workspace)
        })?;

        info!("Installed {} at {}", release.name, install_path.display());
        Ok(ToolOutcome::Installed {
            path: install_path.to_path_buf(),
        })
    }

    fn check_existing(
        &self,
        release: &ToolRelease,
        install_path: &Path,
    ) -> Result<Option<ToolOutcome>> {
        if !install_path.exists() {
            return Ok(None);
        }

        let found = installed_version(install_path);
        debug!(
            "Found existing {} at {} reporting {:?}",
            release.name,
            install_path.display(),
            found
        );

        let Some(expected) = &release.version else {
            return Ok(Some(ToolOutcome::AlreadySatisfied { version: found }));
        };

        if found.as_deref() == Some(expected.as_str()) {
            return Ok(Some(ToolOutcome::AlreadySatisfied { version: found }));
        }

        let found = found.unwrap_or_else(|| "unknown".to_string());
        if self.strict_versions {
            return Err(ProvisionError::ConflictingInstall {
                path: install_path.to_path_buf(),
                expected: expected.clone(),
                found,
            });
        }

        warn!(
            "{} at {} reports version {} (wanted {}); leaving it in place",
            release.name,
            install_path.display(),
            found,
            expected
        );
        Ok(Some(ToolOutcome::AlreadySatisfied {
            version: Some(found),
        }))
    }

    fn download_and_place(
        &self,
        release: &ToolRelease,
        install_path: &Path,
        workspace: &Path,
    ) -> Result<()> {
        let archive_path = workspace.join(format!("{}.archive", release.name));
        let mut archive_file = File::create(&archive_path).map_err(|e| {
            ProvisionError::io(format!("creating {}", archive_path.display()), e)
        })?;
        self.fetcher.fetch(&release.url, &mut archive_file)?;
        drop(archive_file);

        let staged = workspace.join(&release.name);
        extract_entry(&archive_path, release.kind, &release.archive_entry, &staged)?;
        make_executable(&staged)?;
        place(&staged, install_path, &release.archive_entry)
    }
}

/// Runs `<path> --version` and returns the first line it prints.
pub fn installed_version(path: &Path) -> Option<String> {
    let output = match Command::new(path).arg("--version").output() {
        Ok(output) => output,
        Err(e) => {
            debug!("Could not run {} --version: {}", path.display(), e);
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Extracts the single archive entry `wanted` into the file `dest`.
fn extract_entry(archive: &Path, kind: ArchiveKind, wanted: &str, dest: &Path) -> Result<()> {
    let failed = |detail: String| ProvisionError::ExtractionFailed {
        entry: wanted.to_string(),
        detail,
    };

    let file = File::open(archive)
        .map_err(|e| failed(format!("opening {}: {}", archive.display(), e)))?;
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::TarBz2 => Box::new(BzDecoder::new(BufReader::new(file))),
        ArchiveKind::TarGz => Box::new(GzDecoder::new(BufReader::new(file))),
    };

    let wanted_path = normalize_entry(Path::new(wanted));
    let mut tar = Archive::new(reader);
    let entries = tar
        .entries()
        .map_err(|e| failed(format!("reading archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| failed(format!("reading archive: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| failed(format!("invalid entry path: {}", e)))?
            .into_owned();

        if normalize_entry(&path) != wanted_path {
            continue;
        }

        if let Err(e) = entry.unpack(dest) {
            let _ = fs::remove_file(dest);
            return Err(failed(format!("unpacking to {}: {}", dest.display(), e)));
        }
        debug!("Extracted {} to {}", wanted, dest.display());
        return Ok(());
    }

    Err(failed("entry not present in archive".to_string()))
}

fn normalize_entry(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| {
        ProvisionError::PermissionFailed {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Moves the staged binary into place through a sibling temp file, so the
/// install path never holds a partial copy.
fn place(staged: &Path, install_path: &Path, entry: &str) -> Result<()> {
    let failed = |detail: String| ProvisionError::ExtractionFailed {
        entry: entry.to_string(),
        detail,
    };

    if let Some(parent) = install_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| failed(format!("creating {}: {}", parent.display(), e)))?;
    }

    let file_name = install_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| failed(format!("invalid install path {}", install_path.display())))?;
    let partial = install_path.with_file_name(format!(".{}.partial", file_name));

    let result = fs::copy(staged, &partial)
        .and_then(|_| fs::rename(&partial, install_path))
        .map_err(|e| failed(format!("placing {}: {}", install_path.display(), e)));

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}
