//! Orchestration of one alignment run.
//!
//! ```text
//! Idle -> Planning -> NoChange
//!                  -> Committing -> Verifying -> Committed
//!                                             -> RolledBack
//! ```
//!
//! The manifest is only touched between `Committing` and the terminal state,
//! always with a verified backup to fall back on.

use std::fmt;

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::core::catalog::UpgradeCatalog;
use crate::core::types::PlanReport;
use crate::error::AlignError;
use crate::io::manifest_store::{BackupHandle, ManifestStore};
use crate::io::registry::ProjectRegistry;
use crate::io::system_check::{CheckOutcome, SystemCheck};
use crate::io::verifier::BuildVerifier;
use crate::plan::plan_alignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Planning,
    NoChange,
    Committing,
    Verifying,
    Committed,
    RolledBack,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Planning => "planning",
            Phase::NoChange => "no-change",
            Phase::Committing => "committing",
            Phase::Verifying => "verifying",
            Phase::Committed => "committed",
            Phase::RolledBack => "rolled-back",
        };
        f.write_str(label)
    }
}

/// Terminal state of a run that did not hit a fatal error.
#[derive(Debug)]
pub enum AlignOutcome {
    NoChange {
        report: PlanReport,
    },
    Committed {
        report: PlanReport,
        applied: Vec<String>,
    },
    /// The manifest was committed, rejected by the full-system check and
    /// restored to its exact previous bytes.
    RolledBack {
        report: PlanReport,
        applied: Vec<String>,
        cause: AlignError,
    },
}

impl AlignOutcome {
    pub fn phase(&self) -> Phase {
        match self {
            AlignOutcome::NoChange { .. } => Phase::NoChange,
            AlignOutcome::Committed { .. } => Phase::Committed,
            AlignOutcome::RolledBack { .. } => Phase::RolledBack,
        }
    }

    pub fn report(&self) -> &PlanReport {
        match self {
            AlignOutcome::NoChange { report }
            | AlignOutcome::Committed { report, .. }
            | AlignOutcome::RolledBack { report, .. } => report,
        }
    }
}

/// Collaborators of a run. Everything but the manifest is read-only.
pub struct Aligner<'a, R, V, C> {
    pub store: &'a ManifestStore,
    pub catalog: &'a UpgradeCatalog,
    pub registry: &'a R,
    pub verifier: &'a V,
    pub check: &'a C,
}

impl<R: ProjectRegistry, V: BuildVerifier, C: SystemCheck> Aligner<'_, R, V, C> {
    /// Plan only; never touches the manifest.
    pub fn plan(&self) -> Result<PlanReport> {
        enter(Phase::Planning);
        let manifest = self.store.load()?;
        if manifest.is_empty() {
            info!(manifest = %self.store.path().display(), "no dependencies declared");
            return Ok(PlanReport::default());
        }
        let projects = self.registry.list_projects()?;
        plan_alignment(&manifest, self.catalog, &projects, self.verifier)
    }

    /// Plan, commit and confirm, rolling back if the confirmation fails.
    ///
    /// Errors are either raised before the manifest was touched, or leave it
    /// restored. The one exception is [`AlignError::BackupLost`]: the backup
    /// could not be used and the manifest may still hold the rejected change.
    #[instrument(skip_all, fields(manifest = %self.store.path().display()))]
    pub fn run(&self) -> Result<AlignOutcome> {
        enter(Phase::Idle);
        if self.store.has_backup() {
            return Err(AlignError::StaleBackup {
                path: self.store.backup_path().to_path_buf(),
            }
            .into());
        }

        let report = self.plan()?;
        if report.plan.is_empty() {
            enter(Phase::NoChange);
            return Ok(AlignOutcome::NoChange { report });
        }

        enter(Phase::Committing);
        let handle = self.store.backup()?;
        let applied = match self.store.commit(&report.plan) {
            Ok(applied) => applied,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "commit failed, restoring backup");
                self.roll_back(handle)?;
                return Err(err);
            }
        };

        enter(Phase::Verifying);
        let cause = match self.check.run() {
            Ok(CheckOutcome::Pass) => {
                self.store.discard(handle).context(
                    "manifest committed and verified, but its backup could not be removed \
                     (delete it by hand; `aligner restore` would undo the upgrade)",
                )?;
                enter(Phase::Committed);
                info!(applied = ?applied, "alignment committed");
                return Ok(AlignOutcome::Committed { report, applied });
            }
            Ok(CheckOutcome::Fail { excerpt }) => AlignError::CommitVerification {
                applied: applied.clone(),
                excerpt,
            },
            Err(err) => AlignError::CommitVerification {
                applied: applied.clone(),
                excerpt: format!("{err:#}"),
            },
        };

        warn!(error = %cause, "full-system check rejected the commit, rolling back");
        self.roll_back(handle)?;
        enter(Phase::RolledBack);
        Ok(AlignOutcome::RolledBack {
            report,
            applied,
            cause,
        })
    }

    fn roll_back(&self, handle: BackupHandle) -> Result<()> {
        if let Err(err) = self.store.restore(&handle) {
            error!(error = %format!("{err:#}"), "rollback failed");
            return Err(err);
        }
        self.store.discard(handle)
    }
}

fn enter(phase: Phase) {
    info!(%phase, "alignment phase");
}
