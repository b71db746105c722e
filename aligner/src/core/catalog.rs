//! Curated upgrade candidates per package.
//!
//! The catalog is read-only for a run. Each package maps to its known-compatible
//! versions, oldest first; the manifest's current version must be one of them so
//! the search has a starting point.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::core::dependency::normalize_name;
use crate::core::version::compare_versions;
use crate::error::AlignError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Package name as configured.
    pub name: String,
    /// Strictly increasing candidate versions.
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpgradeCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl UpgradeCatalog {
    /// Build a catalog, rejecting empty, duplicated or non-increasing lists.
    pub fn new(table: &BTreeMap<String, Vec<String>>) -> Result<Self, AlignError> {
        let mut entries = BTreeMap::new();
        for (name, candidates) in table {
            validate_candidates(name, candidates)?;
            let key = normalize_name(name);
            let entry = CatalogEntry {
                name: name.clone(),
                candidates: candidates.clone(),
            };
            if entries.insert(key, entry).is_some() {
                return Err(AlignError::Catalog {
                    package: name.clone(),
                    reason: "listed twice under different spellings".to_string(),
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries keyed by normalized package name, in name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn get(&self, package: &str) -> Option<&CatalogEntry> {
        self.entries.get(&normalize_name(package))
    }

    /// Candidates strictly newer than `current`, oldest first.
    ///
    /// `current` itself is never returned. Fails when `current` is not listed,
    /// since there is then no position to search from.
    pub fn candidates_after(&self, package: &str, current: &str) -> Result<&[String], AlignError> {
        let unknown = || AlignError::UnknownBaseline {
            package: package.to_string(),
            version: current.to_string(),
        };
        let entry = self.get(package).ok_or_else(unknown)?;
        let idx = entry
            .candidates
            .iter()
            .position(|candidate| compare_versions(candidate, current) == Ordering::Equal)
            .ok_or_else(unknown)?;
        Ok(&entry.candidates[idx + 1..])
    }
}

/// The curated table shipped with the tool.
pub fn default_catalog_table() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 4] = [
        ("numpy", &["2.2.1", "2.3.0", "2.3.1"]),
        ("pandas", &["2.2.3", "2.3.0", "2.3.1"]),
        ("psutil", &["6.1.1", "7.0.0"]),
        ("structlog", &["24.4.0", "25.1.0", "25.2.0"]),
    ];
    table
        .into_iter()
        .map(|(name, versions)| {
            (
                name.to_string(),
                versions.iter().map(|v| v.to_string()).collect(),
            )
        })
        .collect()
}

fn validate_candidates(name: &str, candidates: &[String]) -> Result<(), AlignError> {
    let invalid = |reason: String| AlignError::Catalog {
        package: name.to_string(),
        reason,
    };
    if candidates.is_empty() {
        return Err(invalid("no candidate versions".to_string()));
    }
    for pair in candidates.windows(2) {
        if compare_versions(&pair[0], &pair[1]) != Ordering::Less {
            return Err(invalid(format!(
                "candidates must be strictly increasing ({} before {})",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}
