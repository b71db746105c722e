//! Typed failures of an alignment run.
//!
//! Plumbing code reports through `anyhow`; the variants here are the ones a
//! caller is expected to branch on (via `downcast_ref::<AlignError>()`).

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Maximum number of bytes kept from a captured log when attaching it to an error.
pub const LOG_EXCERPT_BYTES: usize = 2_000;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("malformed manifest {}: {reason}", path.display())]
    ManifestParse { path: PathBuf, reason: String },

    #[error("cannot write manifest {}: {reason}", path.display())]
    ManifestWrite { path: PathBuf, reason: String },

    #[error("current version {package}=={version} is not in the upgrade catalog")]
    UnknownBaseline { package: String, version: String },

    #[error("invalid catalog entry for {package}: {reason}")]
    Catalog { package: String, reason: String },

    #[error("build recipe for {project}: {reason}")]
    Template { project: String, reason: String },

    #[error("project registry {}: {reason}", path.display())]
    Registry { path: PathBuf, reason: String },

    /// The full-system check rejected a committed manifest.
    #[error("full-system check rejected {applied:?}: {excerpt}")]
    CommitVerification { applied: Vec<String>, excerpt: String },

    /// No rollback is possible: the backup vanished or no longer matches.
    #[error("backup {} is unusable, manifest cannot be rolled back: {reason}", path.display())]
    BackupLost { path: PathBuf, reason: String },

    #[error(
        "leftover backup {} from an unfinished run (run `aligner restore` first)",
        path.display()
    )]
    StaleBackup { path: PathBuf },

    #[error("another alignment run holds the lock {}", path.display())]
    RunLocked { path: PathBuf },
}

/// Step of a verification attempt that decided its failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Build,
    Run,
    Logs,
    /// The container started but its log contains a failure marker.
    Marker,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureStage::Build => "build",
            FailureStage::Run => "run",
            FailureStage::Logs => "logs",
            FailureStage::Marker => "failure marker",
        };
        f.write_str(label)
    }
}

/// One failed verification attempt. Recovered by moving on to the next candidate,
/// so it travels inside a verification outcome rather than as an [`AlignError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{project}: {package}=={candidate} failed at {stage}: {excerpt}")]
pub struct VerificationFailure {
    pub project: String,
    pub package: String,
    pub candidate: String,
    pub stage: FailureStage,
    pub excerpt: String,
}

/// Keep the tail of `text`, where build and runtime errors usually end up.
pub fn log_excerpt(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= limit {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - limit;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("[...] {}", &trimmed[start..])
}
