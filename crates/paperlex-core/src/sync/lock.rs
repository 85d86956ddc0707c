use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Cross-process guard against overlapping sync runs.
///
/// The file is created atomically and holds the owner's pid. It is removed
/// when the guard is dropped, including on early returns and errors.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Take the lock. `Ok(None)` when another run already holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Option<Self>> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory {}", parent.display()))?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                debug!(path = %path.display(), holder = holder.trim(), "Lock file already present");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create lock file {}", path.display()));
            }
        };

        // Constructed before writing so a failed write still removes the file
        let lock = Self { path };
        write!(file, "{}", std::process::id()).context("Failed to write lock file")?;
        Ok(Some(lock))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.lock");

        let lock = LockFile::acquire(&path).unwrap().expect("first acquire");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), std::process::id().to_string());
        assert!(LockFile::acquire(&path).unwrap().is_none());

        drop(lock);
        assert!(!path.exists());
        assert!(LockFile::acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_lock_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("paperlex.lock");

        let lock = LockFile::acquire(&path).unwrap().unwrap();
        assert_eq!(lock.path(), path.as_path());
        assert!(path.exists());
    }
}
