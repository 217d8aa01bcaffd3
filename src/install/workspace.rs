//! Scoped Cache Workspaces
//!
//! A [`CacheWorkspace`] is a uniquely named temporary directory used for a
//! single download/extraction. It is removed when released or dropped; a
//! failed removal is logged and never turns a successful operation into a
//! failed one.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::{Builder, TempDir};

use crate::error::{ProvisionError, Result};

const WORKSPACE_PREFIX: &str = "envstrap-cache-";

/// Ephemeral directory owned by the operation that acquired it.
#[derive(Debug)]
pub struct CacheWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl CacheWorkspace {
    /// Creates a fresh directory under `root`, or the system temp dir.
    pub fn acquire(root: Option<&Path>) -> Result<Self> {
        let mut builder = Builder::new();
        builder.prefix(WORKSPACE_PREFIX);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| {
                    ProvisionError::io(format!("creating cache root {}", root.display()), e)
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| ProvisionError::io("creating cache workspace", e))?;

        let path = dir.path().to_path_buf();
        debug!("Acquired cache workspace: {}", path.display());

        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recursively deletes the workspace.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match dir.close() {
            Ok(()) => debug!("Released cache workspace: {}", self.path.display()),
            Err(e) => warn!(
                "Failed to remove cache workspace {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for CacheWorkspace {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Runs `op` inside a fresh workspace, releasing it on every exit path.
pub fn with_workspace<T>(
    root: Option<&Path>,
    op: impl FnOnce(&Path) -> Result<T>,
) -> Result<T> {
    let workspace = CacheWorkspace::acquire(root)?;
    let result = op(workspace.path());
    workspace.release();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_creates_unique_directories() {
        let root = tempdir().unwrap();
        let first = CacheWorkspace::acquire(Some(root.path())).unwrap();
        let second = CacheWorkspace::acquire(Some(root.path())).unwrap();

        assert!(first.path().is_dir());
        assert!(second.path().is_dir());
        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(root.path()));
    }

    #[test]
    fn test_release_removes_contents() {
        let workspace = CacheWorkspace::acquire(None).unwrap();
        let path = workspace.path().to_path_buf();
        fs::create_dir_all(path.join("nested")).unwrap();
        fs::write(path.join("nested/archive.tar.bz2"), b"data").unwrap();

        workspace.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let path = {
            let workspace = CacheWorkspace::acquire(None).unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_with_workspace_removes_on_error() {
        let mut seen = None;
        let result: Result<()> = with_workspace(None, |path| {
            seen = Some(path.to_path_buf());
            fs::write(path.join("partial"), b"x").unwrap();
            Err(ProvisionError::Config("boom".to_string()))
        });

        assert!(result.is_err());
        assert!(!seen.unwrap().exists());
    }

    #[test]
    fn test_with_workspace_returns_value() {
        let value = with_workspace(None, |path| Ok(path.is_dir())).unwrap();
        assert!(value);
    }

    #[test]
    fn test_acquire_creates_missing_root() {
        let parent = tempdir().unwrap();
        let root = parent.path().join("cache/downloads");
        let workspace = CacheWorkspace::acquire(Some(&root)).unwrap();
        assert!(workspace.path().starts_with(&root));
    }
}
