//! File-backed manifest with backup, atomic commit and verified restore.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::core::manifest::{Manifest, parse_manifest, rewrite_manifest};
use crate::core::types::AlignmentPlan;
use crate::error::AlignError;

/// Proof of a backup taken before a commit.
///
/// Records the digest of the copied bytes so a restore can tell a usable
/// backup from a missing or altered one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHandle {
    path: PathBuf,
    sha256: String,
}

impl BackupHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
    backup_path: PathBuf,
}

impl ManifestStore {
    /// Store for `path`; the backup lives next to it as `<file name>.<backup_suffix>`.
    pub fn new(path: impl Into<PathBuf>, backup_suffix: &str) -> Self {
        let path = path.into();
        let backup_path = sibling_with_suffix(&path, backup_suffix);
        Self { path, backup_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// A backup left behind means an earlier commit never reached a verdict.
    pub fn has_backup(&self) -> bool {
        self.backup_path.exists()
    }

    pub fn load(&self) -> Result<Manifest> {
        let text = self.read_text()?;
        let manifest = parse_manifest(&text).map_err(|reason| AlignError::ManifestParse {
            path: self.path.clone(),
            reason,
        })?;
        debug!(
            path = %self.path.display(),
            dependencies = manifest.dependencies().len(),
            "manifest loaded"
        );
        Ok(manifest)
    }

    /// Copy the manifest byte for byte to the backup location.
    #[instrument(skip_all, fields(backup = %self.backup_path.display()))]
    pub fn backup(&self) -> Result<BackupHandle> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("read manifest {} for backup", self.path.display()))?;
        write_atomic(&self.backup_path, &bytes)
            .with_context(|| format!("write backup {}", self.backup_path.display()))?;
        let handle = BackupHandle {
            path: self.backup_path.clone(),
            sha256: sha256_hex(&bytes),
        };
        debug!(sha256 = %handle.sha256, "backup written");
        Ok(handle)
    }

    /// Rewrite the planned packages and nothing else.
    ///
    /// The whole document is edited in memory and replaced with a single
    /// rename, so a failure leaves the manifest as it was.
    #[instrument(skip_all, fields(manifest = %self.path.display(), packages = plan.len()))]
    pub fn commit(&self, plan: &AlignmentPlan) -> Result<Vec<String>> {
        let write_error = |reason: String| AlignError::ManifestWrite {
            path: self.path.clone(),
            reason,
        };
        let text = self.read_text().map_err(|err| write_error(format!("{err:#}")))?;
        let manifest = parse_manifest(&text).map_err(|reason| AlignError::ManifestParse {
            path: self.path.clone(),
            reason,
        })?;
        let (updated, applied) = rewrite_manifest(&text, &manifest, plan).map_err(write_error)?;
        write_atomic(&self.path, updated.as_bytes())
            .map_err(|err| write_error(format!("{err:#}")))?;
        info!(applied = ?applied, "manifest committed");
        Ok(applied)
    }

    /// Put the backed-up bytes back. Safe to call more than once.
    ///
    /// Fails with [`AlignError::BackupLost`] when the backup is gone or no
    /// longer matches the digest taken at backup time.
    #[instrument(skip_all, fields(backup = %handle.path.display()))]
    pub fn restore(&self, handle: &BackupHandle) -> Result<()> {
        let lost = |reason: String| AlignError::BackupLost {
            path: handle.path.clone(),
            reason,
        };
        let bytes = fs::read(&handle.path).map_err(|err| lost(format!("read failed: {err}")))?;
        let digest = sha256_hex(&bytes);
        if digest != handle.sha256 {
            return Err(lost(format!(
                "digest {digest} does not match {} recorded at backup time",
                handle.sha256
            ))
            .into());
        }
        write_atomic(&self.path, &bytes)
            .with_context(|| format!("restore manifest {}", self.path.display()))?;
        info!("manifest restored from backup");
        Ok(())
    }

    /// Drop the backup once the commit is confirmed (or rolled back).
    pub fn discard(&self, handle: BackupHandle) -> Result<()> {
        match fs::remove_file(&handle.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(backup = %handle.path.display(), "backup already gone");
                Ok(())
            }
            Err(err) => {
                Err(err).with_context(|| format!("remove backup {}", handle.path.display()))
            }
        }
    }

    /// Restore from a backup left by an interrupted run, then remove it.
    ///
    /// Returns `false` when there is no leftover backup.
    pub fn restore_leftover(&self) -> Result<bool> {
        if !self.has_backup() {
            return Ok(false);
        }
        let bytes = fs::read(&self.backup_path)
            .with_context(|| format!("read backup {}", self.backup_path.display()))?;
        let handle = BackupHandle {
            path: self.backup_path.clone(),
            sha256: sha256_hex(&bytes),
        };
        self.restore(&handle)?;
        self.discard(handle)?;
        Ok(true)
    }

    fn read_text(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("read manifest {}", self.path.display()))
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("manifest"));
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write via a sibling temp file and rename so readers never see partial content.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = sibling_with_suffix(path, "tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PlannedUpgrade;

    const PYPROJECT: &str = "[project]\nname = \"platform\"\ndependencies = [\n    \"numpy==2.2.1\",\n    \"pandas==2.2.3\",  # dataframes\n]\n";

    fn store_with(contents: &str) -> (tempfile::TempDir, ManifestStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pyproject.toml");
        fs::write(&path, contents).expect("write manifest");
        let store = ManifestStore::new(path, "bck");
        (temp, store)
    }

    fn numpy_plan() -> AlignmentPlan {
        let mut plan = AlignmentPlan::default();
        plan.insert(
            "numpy",
            PlannedUpgrade {
                package: "numpy".to_string(),
                from: "2.2.1".to_string(),
                to: "2.3.0".to_string(),
            },
        );
        plan
    }

    #[test]
    fn backup_sits_next_to_manifest() {
        let (temp, store) = store_with(PYPROJECT);
        assert_eq!(store.backup_path(), temp.path().join("pyproject.toml.bck"));
        let handle = store.backup().expect("backup");
        assert_eq!(fs::read_to_string(handle.path()).expect("read"), PYPROJECT);
        assert!(store.has_backup());
    }

    #[test]
    fn backup_of_missing_manifest_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ManifestStore::new(temp.path().join("pyproject.toml"), "bck");
        assert!(store.backup().is_err());
    }

    #[test]
    fn load_reports_parse_errors() {
        let (_temp, store) = store_with("[project]\ndependencies = [\"numpy>=2\"]\n");
        let err = store.load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::ManifestParse { .. })
        ));
    }

    #[test]
    fn commit_rewrites_only_planned_line() {
        let (_temp, store) = store_with(PYPROJECT);
        let applied = store.commit(&numpy_plan()).expect("commit");
        assert_eq!(applied, vec!["numpy==2.3.0"]);
        let text = fs::read_to_string(store.path()).expect("read");
        assert_eq!(text, PYPROJECT.replace("numpy==2.2.1", "numpy==2.3.0"));
        assert!(!store.path().with_file_name("pyproject.toml.tmp").exists());
    }

    #[test]
    fn failed_commit_leaves_manifest_untouched() {
        let (_temp, store) = store_with(PYPROJECT);
        let mut plan = AlignmentPlan::default();
        plan.insert(
            "numpy",
            PlannedUpgrade {
                package: "numpy".to_string(),
                from: "1.0.0".to_string(),
                to: "2.3.0".to_string(),
            },
        );
        let err = store.commit(&plan).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::ManifestWrite { .. })
        ));
        assert_eq!(fs::read_to_string(store.path()).expect("read"), PYPROJECT);
    }

    #[test]
    fn commit_then_restore_is_byte_identical() {
        let (_temp, store) = store_with(PYPROJECT);
        let before = fs::read(store.path()).expect("read");
        let handle = store.backup().expect("backup");
        store.commit(&numpy_plan()).expect("commit");
        assert_ne!(fs::read(store.path()).expect("read"), before);

        store.restore(&handle).expect("restore");
        assert_eq!(fs::read(store.path()).expect("read"), before);
        store.restore(&handle).expect("restore is idempotent");
        assert_eq!(fs::read(store.path()).expect("read"), before);

        store.discard(handle).expect("discard");
        assert!(!store.has_backup());
    }

    #[test]
    fn restore_detects_lost_or_altered_backup() {
        let (_temp, store) = store_with(PYPROJECT);
        let handle = store.backup().expect("backup");
        fs::write(handle.path(), "tampered").expect("tamper");
        let err = store.restore(&handle).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::BackupLost { .. })
        ));

        fs::remove_file(handle.path()).expect("remove");
        let err = store.restore(&handle).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::BackupLost { .. })
        ));
    }

    #[test]
    fn restore_leftover_recovers_interrupted_commit() {
        let (_temp, store) = store_with(PYPROJECT);
        assert!(!store.restore_leftover().expect("nothing to restore"));
        store.backup().expect("backup");
        store.commit(&numpy_plan()).expect("commit");

        assert!(store.restore_leftover().expect("restore"));
        assert_eq!(fs::read_to_string(store.path()).expect("read"), PYPROJECT);
        assert!(!store.has_backup());
    }
}
