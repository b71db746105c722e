//! Aligner configuration stored in `aligner.toml` at the repository root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::catalog::{UpgradeCatalog, default_catalog_table};
use crate::core::recipe::{DEFAULT_INSTALL_DIRECTIVE, DirectiveRenderer};

pub const CONFIG_FILE: &str = "aligner.toml";

/// Aligner configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the layout of a
/// repository with `pyproject.toml` at the root and one directory per service
/// under `apps/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AlignConfig {
    /// Manifest path, relative to the repository root.
    pub manifest: PathBuf,

    /// Extension appended to the manifest file name for its backup.
    pub backup_suffix: String,

    /// Directory whose multi-part (`a-b`) subdirectories are projects.
    pub projects_root: PathBuf,

    /// Build recipe file name inside each project directory.
    pub recipe_file: String,

    /// Prefix of the recipe line after which install directives are injected.
    pub anchor: String,

    /// minijinja template for one install directive (`package`, `version`, `extras`).
    pub install_directive: String,

    /// Extra packages installed next to each candidate.
    pub extra_packages: Vec<String>,

    pub verify: VerifyConfig,

    pub system_check: SystemCheckConfig,

    /// Package → candidate versions, oldest first.
    pub catalog: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Container CLI binary (`docker` or a compatible one).
    pub docker: String,

    /// Substrings of a container log that mark the attempt as failed.
    pub failure_markers: Vec<String>,

    pub build_timeout_secs: u64,

    /// Bound for `run`, `logs`, `stop` and `rmi` invocations.
    pub run_timeout_secs: u64,

    /// How long the container may run before its log is inspected.
    pub settle_secs: u64,

    /// Truncate captured tool output beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SystemCheckConfig {
    /// Command confirming the committed manifest (e.g. `["make","build-base"]`).
    pub command: Vec<String>,

    pub timeout_secs: u64,

    pub output_limit_bytes: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            docker: "docker".to_string(),
            failure_markers: vec!["Traceback".to_string(), "ERROR".to_string()],
            build_timeout_secs: 20 * 60,
            run_timeout_secs: 2 * 60,
            settle_secs: 5,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for SystemCheckConfig {
    fn default() -> Self {
        Self {
            command: vec!["make".to_string(), "build-base".to_string()],
            timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("pyproject.toml"),
            backup_suffix: "bck".to_string(),
            projects_root: PathBuf::from("apps"),
            recipe_file: "Dockerfile".to_string(),
            anchor: "FROM python-base".to_string(),
            install_directive: DEFAULT_INSTALL_DIRECTIVE.to_string(),
            extra_packages: vec!["pytest".to_string()],
            verify: VerifyConfig::default(),
            system_check: SystemCheckConfig::default(),
            catalog: default_catalog_table(),
        }
    }
}

impl AlignConfig {
    pub fn validate(&self) -> Result<()> {
        if self.manifest.as_os_str().is_empty() {
            return Err(anyhow!("manifest must be a non-empty path"));
        }
        if self.backup_suffix.trim().is_empty() {
            return Err(anyhow!("backup_suffix must be non-empty"));
        }
        if self.recipe_file.trim().is_empty() {
            return Err(anyhow!("recipe_file must be non-empty"));
        }
        if self.anchor.trim().is_empty() {
            return Err(anyhow!("anchor must be non-empty"));
        }
        if self.verify.docker.trim().is_empty() {
            return Err(anyhow!("verify.docker must be non-empty"));
        }
        if self.verify.build_timeout_secs == 0 || self.verify.run_timeout_secs == 0 {
            return Err(anyhow!("verify timeouts must be > 0"));
        }
        if self.verify.output_limit_bytes == 0 {
            return Err(anyhow!("verify.output_limit_bytes must be > 0"));
        }
        if self.verify.failure_markers.iter().any(|m| m.is_empty()) {
            return Err(anyhow!("verify.failure_markers must not contain empty strings"));
        }
        if self.system_check.command.is_empty() || self.system_check.command[0].trim().is_empty() {
            return Err(anyhow!("system_check.command must be a non-empty array"));
        }
        if self.system_check.timeout_secs == 0 {
            return Err(anyhow!("system_check.timeout_secs must be > 0"));
        }
        if self.system_check.output_limit_bytes == 0 {
            return Err(anyhow!("system_check.output_limit_bytes must be > 0"));
        }
        self.directive_renderer()?;
        self.upgrade_catalog()?;
        Ok(())
    }

    pub fn upgrade_catalog(&self) -> Result<UpgradeCatalog> {
        Ok(UpgradeCatalog::new(&self.catalog)?)
    }

    pub fn directive_renderer(&self) -> Result<DirectiveRenderer> {
        DirectiveRenderer::new(&self.install_directive, &self.extra_packages).map_err(|e| anyhow!(e))
    }

    pub fn manifest_path(&self, root: &Path) -> PathBuf {
        root.join(&self.manifest)
    }

    pub fn projects_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.projects_root)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AlignConfig::default()`.
pub fn load_config(path: &Path) -> Result<AlignConfig> {
    if !path.exists() {
        let cfg = AlignConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AlignConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AlignConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "projects_root = \"services\"\n\n[verify]\nsettle_secs = 0\n\n[catalog]\nnumpy = [\"2.2.1\", \"2.3.0\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.projects_root, PathBuf::from("services"));
        assert_eq!(cfg.verify.settle_secs, 0);
        assert_eq!(cfg.verify.docker, "docker");
        assert_eq!(cfg.catalog.len(), 1);
        assert_eq!(cfg.manifest, PathBuf::from("pyproject.toml"));
    }

    #[test]
    fn rejects_unordered_catalog() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[catalog]\nnumpy = [\"2.3.0\", \"2.2.1\"]\n").expect("write");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_empty_check_command() {
        let cfg = AlignConfig {
            system_check: SystemCheckConfig {
                command: Vec::new(),
                ..SystemCheckConfig::default()
            },
            ..AlignConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = AlignConfig::default();
        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: AlignConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed, cfg);
    }
}
