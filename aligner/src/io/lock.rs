//! Single-run lock around manifest-mutating commands.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::error::AlignError;

pub const LOCK_FILE: &str = ".aligner.lock";

/// Held for the whole alignment run; the lock file is removed on drop.
///
/// Advisory only: it excludes other `aligner` invocations, not arbitrary
/// writers of the manifest. A crashed run leaves the file behind and it has
/// to be removed by hand.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        Self::acquire_with(path.into(), |file| {
            writeln!(file, "{}", std::process::id())
        })
    }

    /// Create the lock and fill it with `write`; a failed write removes the
    /// file again.
    fn acquire_with(
        path: PathBuf,
        write: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(AlignError::RunLocked { path }.into());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("create lock {}", path.display()));
            }
        };
        if let Err(err) = write(&mut file) {
            drop(file);
            if let Err(remove_err) = fs::remove_file(&path) {
                warn!(path = %path.display(), err = %remove_err, "failed to remove partial run lock");
            }
            return Err(err).with_context(|| format!("write lock {}", path.display()));
        }
        debug!(path = %path.display(), "run lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), err = %err, "failed to release run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_released() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(LOCK_FILE);

        let lock = RunLock::acquire(&path).expect("first");
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::RunLocked { .. })
        ));

        drop(lock);
        assert!(!path.exists());
        RunLock::acquire(&path).expect("after release");
    }

    #[test]
    fn failed_write_leaves_no_lock_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(LOCK_FILE);

        let err = RunLock::acquire_with(path.clone(), |_| Err(io::Error::other("disk full")))
            .unwrap_err();
        assert!(format!("{err:#}").contains("disk full"));
        assert!(!path.exists());
        RunLock::acquire(&path).expect("lock is free");
    }
}
