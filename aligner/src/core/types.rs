//! Shared deterministic types for planning and orchestration.
//!
//! These types carry no I/O handles. Collections are ordered by normalized
//! package name so serialized reports stay stable across runs.

use std::collections::BTreeMap;

use serde::Serialize;

/// One package upgrade judged safe for every project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedUpgrade {
    /// Package name as declared in the manifest.
    pub package: String,
    pub from: String,
    pub to: String,
}

/// Package → chosen version. Only holds packages verified against all projects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct AlignmentPlan {
    upgrades: BTreeMap<String, PlannedUpgrade>,
}

impl AlignmentPlan {
    /// Insert an upgrade keyed by normalized package name.
    pub fn insert(&mut self, key: impl Into<String>, upgrade: PlannedUpgrade) {
        self.upgrades.insert(key.into(), upgrade);
    }

    pub fn get(&self, key: &str) -> Option<&PlannedUpgrade> {
        self.upgrades.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.upgrades.is_empty()
    }

    pub fn len(&self) -> usize {
        self.upgrades.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PlannedUpgrade)> {
        self.upgrades.iter().map(|(key, upgrade)| (key.as_str(), upgrade))
    }
}

/// Why a cataloged package did or did not make it into the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PackageDecision {
    Upgrade { to: String },
    /// No candidate newer than the current version.
    UpToDate,
    /// Cataloged, but the manifest does not declare it.
    NotInManifest,
    /// These projects failed every newer candidate.
    Unverified { projects: Vec<String> },
    /// Each project succeeded somewhere, never all on the same candidate.
    NoCommonCandidate,
    NoProjects,
}

/// One build+run+inspect cycle as seen by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub project: String,
    pub candidate: String,
    pub success: bool,
    /// Failure diagnostic, absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageReport {
    pub package: String,
    pub current: Option<String>,
    #[serde(flatten)]
    pub decision: PackageDecision,
    pub attempts: Vec<AttemptRecord>,
}

/// Planner output: the plan plus the per-package reasoning behind it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PlanReport {
    pub plan: AlignmentPlan,
    pub packages: Vec<PackageReport>,
}

impl PlanReport {
    pub fn attempts(&self) -> usize {
        self.packages.iter().map(|report| report.attempts.len()).sum()
    }
}
