//! Project discovery and per-project build recipes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::manifest::Manifest;
use crate::core::recipe::RecipeRenderer;
use crate::error::AlignError;

/// An independently buildable sub-project. Immutable for the length of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub dir: PathBuf,
    /// Recipe text with the injection anchor, as read at discovery.
    pub recipe_template: String,
}

impl Project {
    /// Render this project's recipe with one install directive per override.
    pub fn render_build_recipe(
        &self,
        renderer: &RecipeRenderer,
        overrides: &BTreeMap<String, String>,
    ) -> Result<String, AlignError> {
        renderer.render(&self.name, &self.recipe_template, overrides)
    }
}

/// Source of the projects a candidate must be verified against.
pub trait ProjectRegistry {
    /// All projects, sorted by name.
    fn list_projects(&self) -> Result<Vec<Project>>;
}

/// Projects are the subdirectories of `root` with a multi-part (`a-b`) name.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
    recipe_file: String,
}

impl DirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>, recipe_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            recipe_file: recipe_file.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ProjectRegistry for DirectoryRegistry {
    fn list_projects(&self) -> Result<Vec<Project>> {
        let entries = fs::read_dir(&self.root).map_err(|err| AlignError::Registry {
            path: self.root.clone(),
            reason: format!("cannot read projects directory: {err}"),
        })?;

        let mut projects = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", self.root.display()))?;
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_project_name(&name) {
                debug!(name = %name, "skipping directory without multi-part name");
                continue;
            }
            let recipe_path = dir.join(&self.recipe_file);
            let recipe_template =
                fs::read_to_string(&recipe_path).map_err(|err| AlignError::Registry {
                    path: recipe_path.clone(),
                    reason: format!("project {name} has no readable build recipe: {err}"),
                })?;
            projects.push(Project {
                name,
                dir,
                recipe_template,
            });
        }
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        if projects.is_empty() {
            warn!(root = %self.root.display(), "no projects found");
        }
        Ok(projects)
    }
}

/// At least two non-empty hyphen-delimited segments (`server-one`).
pub fn is_project_name(name: &str) -> bool {
    let segments: Vec<&str> = name.split('-').collect();
    segments.len() >= 2 && segments.iter().all(|segment| !segment.is_empty())
}

/// Versions every project starts from. All projects share the manifest baseline.
pub fn current_dependency_versions(manifest: &Manifest) -> BTreeMap<String, String> {
    manifest
        .dependencies()
        .iter()
        .map(|dep| (dep.name.clone(), dep.version.clone()))
        .collect()
}
