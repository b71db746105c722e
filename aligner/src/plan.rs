//! Alignment planning: find, per cataloged package, one newer version that
//! verifies for every project.
//!
//! Planning is read-only with respect to the manifest. Verification failures
//! only eliminate a candidate; configuration-shape errors (unknown baseline,
//! broken recipe template) abort before any build runs or while building.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::catalog::UpgradeCatalog;
use crate::core::manifest::Manifest;
use crate::core::select::{AlignmentSearch, SearchResult, SearchStep};
use crate::core::types::{AttemptRecord, PackageDecision, PackageReport, PlanReport, PlannedUpgrade};
use crate::io::registry::Project;
use crate::io::verifier::{BuildVerifier, VerificationOutcome};

/// Compute the alignment plan for every package in `catalog`.
///
/// Packages the manifest does not declare are reported and never planned.
/// Every declared, cataloged package must have its current version in the
/// catalog; this is checked up front so a bad catalog fails before any build.
#[instrument(skip_all, fields(packages = catalog.entries().count(), projects = projects.len()))]
pub fn plan_alignment<V: BuildVerifier>(
    manifest: &Manifest,
    catalog: &UpgradeCatalog,
    projects: &[Project],
    verifier: &V,
) -> Result<PlanReport> {
    for (key, _) in catalog.entries() {
        if let Some(dep) = manifest.get(key) {
            catalog.candidates_after(key, &dep.version)?;
        }
    }
    if projects.is_empty() {
        warn!("no projects to verify against; nothing will be planned");
    }

    let mut report = PlanReport::default();
    for (key, entry) in catalog.entries() {
        let Some(dep) = manifest.get(key) else {
            debug!(package = %entry.name, "cataloged package not declared in manifest");
            report.packages.push(PackageReport {
                package: entry.name.clone(),
                current: None,
                decision: PackageDecision::NotInManifest,
                attempts: Vec::new(),
            });
            continue;
        };
        let candidates = catalog.candidates_after(key, &dep.version)?;
        let (decision, attempts) = if candidates.is_empty() {
            (PackageDecision::UpToDate, Vec::new())
        } else {
            search_package(&dep.name, candidates, projects, verifier)?
        };

        if let PackageDecision::Upgrade { to } = &decision {
            info!(package = %dep.name, from = %dep.version, to = %to, "aligned upgrade found");
            report.plan.insert(
                key,
                PlannedUpgrade {
                    package: dep.name.clone(),
                    from: dep.version.clone(),
                    to: to.clone(),
                },
            );
        } else {
            info!(package = %dep.name, decision = ?decision, "package left unchanged");
        }
        report.packages.push(PackageReport {
            package: dep.name.clone(),
            current: Some(dep.version.clone()),
            decision,
            attempts,
        });
    }
    Ok(report)
}

fn search_package<V: BuildVerifier>(
    package: &str,
    candidates: &[String],
    projects: &[Project],
    verifier: &V,
) -> Result<(PackageDecision, Vec<AttemptRecord>)> {
    let mut search = AlignmentSearch::new(projects.len(), candidates.len());
    let mut attempts = Vec::new();
    let result = loop {
        match search.next() {
            SearchStep::Trial(trial) => {
                let project = &projects[trial.project];
                let candidate = &candidates[trial.candidate];
                let outcome = verifier.verify(project, package, candidate)?;
                let detail = match &outcome {
                    VerificationOutcome::Success { .. } => None,
                    VerificationOutcome::Failure(failure) => {
                        debug!(error = %failure, "attempt failed");
                        Some(format!("{}: {}", failure.stage, failure.excerpt))
                    }
                };
                search.record(trial, outcome.is_success());
                attempts.push(AttemptRecord {
                    project: project.name.clone(),
                    candidate: candidate.clone(),
                    success: outcome.is_success(),
                    detail,
                });
            }
            SearchStep::Done(result) => break result,
        }
    };

    let decision = match result {
        SearchResult::Aligned { candidate } => PackageDecision::Upgrade {
            to: candidates[candidate].clone(),
        },
        SearchResult::Unreachable { projects: indices } => PackageDecision::Unverified {
            projects: indices
                .into_iter()
                .map(|idx| projects[idx].name.clone())
                .collect(),
        },
        SearchResult::NoCommonCandidate => PackageDecision::NoCommonCandidate,
        SearchResult::NoProjects => PackageDecision::NoProjects,
    };
    Ok((decision, attempts))
}
