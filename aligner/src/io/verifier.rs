//! Build verifier: one isolated build+run+inspect cycle per candidate.
//!
//! Every attempt renders a recipe with a single version override, builds a
//! uniquely tagged image, runs it detached and scans its log for failure
//! markers. The recipe file, container and image are released on every exit
//! path, in that order, even when an earlier release step fails.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::core::recipe::RecipeRenderer;
use crate::error::{FailureStage, LOG_EXCERPT_BYTES, VerificationFailure, log_excerpt};
use crate::io::registry::Project;
use crate::io::toolchain::{ContainerToolchain, ToolResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The container ran and its log carries no failure marker.
    Success { log: String },
    Failure(VerificationFailure),
}

impl VerificationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationOutcome::Success { .. })
    }
}

/// Verifies one candidate version of one package against one project.
pub trait BuildVerifier {
    /// Tool failures come back as [`VerificationOutcome::Failure`]; `Err` is
    /// reserved for problems that invalidate the whole run (a recipe without
    /// an anchor, an unwritable project directory).
    fn verify(&self, project: &Project, package: &str, candidate: &str)
    -> Result<VerificationOutcome>;
}

#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Build context handed to the toolchain (the repository root).
    pub context_dir: PathBuf,
    /// Recipe file name; temp recipes are named after it.
    pub recipe_file: String,
    pub failure_markers: Vec<String>,
    /// Time the container gets before its log is read.
    pub settle: Duration,
}

/// [`BuildVerifier`] driving a [`ContainerToolchain`].
#[derive(Debug)]
pub struct ContainerVerifier<T> {
    toolchain: T,
    renderer: RecipeRenderer,
    settings: VerifierSettings,
    /// Distinguishes this run's image tags from concurrent or earlier runs.
    nonce: String,
}

impl<T: ContainerToolchain> ContainerVerifier<T> {
    pub fn new(toolchain: T, renderer: RecipeRenderer, settings: VerifierSettings) -> Self {
        Self::with_nonce(
            toolchain,
            renderer,
            settings,
            format!("{:08x}", rand::random::<u32>()),
        )
    }

    pub fn with_nonce(
        toolchain: T,
        renderer: RecipeRenderer,
        settings: VerifierSettings,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            toolchain,
            renderer,
            settings,
            nonce: nonce.into(),
        }
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    fn write_recipe(&self, project: &Project, recipe: &str) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}.", self.settings.recipe_file))
            .suffix(".align")
            .tempfile_in(&project.dir)
            .with_context(|| format!("create temp recipe in {}", project.dir.display()))?;
        let path = file.path().to_path_buf();
        file.write_all(recipe.as_bytes())
            .with_context(|| format!("write temp recipe {}", path.display()))?;
        file.flush()
            .with_context(|| format!("flush temp recipe {}", path.display()))?;
        Ok(file)
    }

    fn run_attempt(
        &self,
        resources: &mut AttemptResources<'_, T>,
        recipe_path: &Path,
        tag: &str,
        fail: &dyn Fn(FailureStage, String) -> VerificationOutcome,
    ) -> VerificationOutcome {
        let build = self
            .toolchain
            .build(recipe_path, &self.settings.context_dir, tag);
        match tool_failure(build) {
            Some(output) => return fail(FailureStage::Build, output),
            None => resources.image = Some(tag.to_string()),
        }

        // Recorded before `run`: a failed start can still leave a created container.
        let container = container_name(tag);
        resources.container = Some(container.clone());
        match self.toolchain.run_detached(tag, &container) {
            Ok(result) if result.ok => {
                debug!(container = %container, id = %result.output.trim(), "container started");
            }
            Ok(result) => return fail(FailureStage::Run, result.output),
            Err(err) => return fail(FailureStage::Run, format!("{err:#}")),
        }

        if !self.settings.settle.is_zero() {
            thread::sleep(self.settings.settle);
        }

        let logs = match self.toolchain.logs(&container) {
            Ok(result) if result.ok => result,
            Ok(result) => return fail(FailureStage::Logs, result.output),
            Err(err) => return fail(FailureStage::Logs, format!("{err:#}")),
        };
        if let Some(marker) = self
            .settings
            .failure_markers
            .iter()
            .find(|marker| logs.output.contains(marker.as_str()))
        {
            debug!(marker = %marker, "failure marker in container log");
            return fail(FailureStage::Marker, logs.output);
        }
        if logs.truncated {
            // The dropped head of the log may hold a marker.
            return fail(
                FailureStage::Logs,
                format!(
                    "{}\n[log exceeds the output limit; cannot rule out failure markers]",
                    logs.output
                ),
            );
        }
        VerificationOutcome::Success { log: logs.output }
    }
}

impl<T: ContainerToolchain> BuildVerifier for ContainerVerifier<T> {
    #[instrument(skip_all, fields(project = %project.name, package = %package, candidate = %candidate))]
    fn verify(
        &self,
        project: &Project,
        package: &str,
        candidate: &str,
    ) -> Result<VerificationOutcome> {
        let overrides = BTreeMap::from([(package.to_string(), candidate.to_string())]);
        let recipe = project.render_build_recipe(&self.renderer, &overrides)?;
        let recipe_file = self.write_recipe(project, &recipe)?;
        let recipe_path = recipe_file.path().to_path_buf();
        let tag = image_tag(&project.name, package, candidate, &self.nonce);

        let fail = |stage: FailureStage, output: String| {
            VerificationOutcome::Failure(VerificationFailure {
                project: project.name.clone(),
                package: package.to_string(),
                candidate: candidate.to_string(),
                stage,
                excerpt: log_excerpt(&output, LOG_EXCERPT_BYTES),
            })
        };

        let mut resources = AttemptResources {
            toolchain: &self.toolchain,
            recipe: Some(recipe_file),
            container: None,
            image: None,
        };
        let outcome = self.run_attempt(&mut resources, &recipe_path, &tag, &fail);
        resources.release();

        match &outcome {
            VerificationOutcome::Success { .. } => info!(tag = %tag, "candidate verified"),
            VerificationOutcome::Failure(failure) => {
                info!(tag = %tag, stage = %failure.stage, "candidate rejected");
            }
        }
        Ok(outcome)
    }
}

/// Transient resources of one attempt, released in acquisition order of
/// recipe, container, image. Dropping releases whatever is still held.
struct AttemptResources<'a, T: ContainerToolchain> {
    toolchain: &'a T,
    recipe: Option<NamedTempFile>,
    container: Option<String>,
    image: Option<String>,
}

impl<T: ContainerToolchain> AttemptResources<'_, T> {
    fn release(&mut self) {
        if let Some(recipe) = self.recipe.take() {
            let path = recipe.path().to_path_buf();
            if let Err(err) = recipe.close() {
                warn!(path = %path.display(), err = %err, "failed to remove temp recipe");
            }
        }
        if let Some(container) = self.container.take() {
            report_cleanup("stop container", &container, self.toolchain.stop_container(&container));
        }
        if let Some(image) = self.image.take() {
            report_cleanup("remove image", &image, self.toolchain.remove_image(&image));
        }
    }
}

impl<T: ContainerToolchain> Drop for AttemptResources<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}

fn report_cleanup(step: &str, id: &str, result: Result<ToolResult>) {
    match result {
        Ok(result) if result.ok => debug!(step, id, "cleanup done"),
        Ok(result) => warn!(step, id, output = %result.output.trim(), "cleanup failed"),
        Err(err) => warn!(step, id, err = %format!("{err:#}"), "cleanup failed"),
    }
}

/// `None` when the tool ran and succeeded, else its diagnostic text.
fn tool_failure(result: Result<ToolResult>) -> Option<String> {
    match result {
        Ok(result) if result.ok => None,
        Ok(result) => Some(result.output),
        Err(err) => Some(format!("{err:#}")),
    }
}

/// Image reference unique per (project, package, candidate, nonce).
pub fn image_tag(project: &str, package: &str, candidate: &str, nonce: &str) -> String {
    format!(
        "aligner-{}-{}:{}-{}",
        sanitize(project),
        sanitize(package),
        sanitize(candidate),
        sanitize(nonce)
    )
}

/// Container name for an image tag; names may not contain `:`.
pub fn container_name(tag: &str) -> String {
    tag.replace(':', "-")
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|ch| {
            let ch = ch.to_ascii_lowercase();
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    cleaned
        .trim_matches(|ch| matches!(ch, '.' | '_' | '-'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::recipe::{DEFAULT_INSTALL_DIRECTIVE, DirectiveRenderer};
    use crate::test_support::{FakeBehavior, FakeToolchain};

    fn project(dir: &Path) -> Project {
        let project_dir = dir.join("server-one");
        fs::create_dir_all(&project_dir).expect("mkdir");
        Project {
            name: "server-one".to_string(),
            dir: project_dir,
            recipe_template: "FROM python-base\nCMD [\"python\", \"app.py\"]\n".to_string(),
        }
    }

    fn verifier(root: &Path, behavior: FakeBehavior) -> ContainerVerifier<FakeToolchain> {
        let renderer = RecipeRenderer::new(
            "FROM python-base",
            DirectiveRenderer::new(DEFAULT_INSTALL_DIRECTIVE, &["pytest".to_string()])
                .expect("directives"),
        );
        ContainerVerifier::with_nonce(
            FakeToolchain::new(behavior),
            renderer,
            VerifierSettings {
                context_dir: root.to_path_buf(),
                recipe_file: "Dockerfile".to_string(),
                failure_markers: vec!["Traceback".to_string(), "ERROR".to_string()],
                settle: Duration::ZERO,
            },
            "run1",
        )
    }

    fn assert_clean(verifier: &ContainerVerifier<FakeToolchain>, project: &Project) {
        assert!(verifier.toolchain().live_images().is_empty());
        assert!(verifier.toolchain().live_containers().is_empty());
        let leftovers: Vec<_> = fs::read_dir(&project.dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert!(leftovers.is_empty(), "temp recipes left: {leftovers:?}");
    }

    #[test]
    fn tags_are_unique_and_valid() {
        assert_eq!(
            image_tag("server-one", "numpy", "2.3.0", "run1"),
            "aligner-server-one-numpy:2.3.0-run1"
        );
        assert_eq!(
            image_tag("Server_One", "zope.Interface", "1.0+local", "x"),
            "aligner-server_one-zope.interface:1.0-local-x"
        );
        assert_eq!(
            container_name("aligner-server-one-numpy:2.3.0-run1"),
            "aligner-server-one-numpy-2.3.0-run1"
        );
    }

    #[test]
    fn success_builds_candidate_recipe_and_cleans_up() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = project(temp.path());
        let verifier = verifier(temp.path(), FakeBehavior::passing("server started\n"));

        let outcome = verifier.verify(&project, "numpy", "2.3.0").expect("verify");
        assert_eq!(
            outcome,
            VerificationOutcome::Success {
                log: "server started\n".to_string()
            }
        );

        let recipes = verifier.toolchain().built_recipes();
        assert_eq!(recipes.len(), 1);
        assert_eq!(
            recipes[0],
            "FROM python-base\nRUN pip install numpy==2.3.0 pytest\nCMD [\"python\", \"app.py\"]\n"
        );
        assert_eq!(
            verifier.toolchain().calls(),
            vec![
                "build aligner-server-one-numpy:2.3.0-run1",
                "run aligner-server-one-numpy:2.3.0-run1 as aligner-server-one-numpy-2.3.0-run1",
                "logs aligner-server-one-numpy-2.3.0-run1",
                "stop aligner-server-one-numpy-2.3.0-run1",
                "rmi aligner-server-one-numpy:2.3.0-run1",
            ]
        );
        assert_clean(&verifier, &project);
    }

    #[test]
    fn failure_marker_in_log_fails_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = project(temp.path());
        let verifier = verifier(
            temp.path(),
            FakeBehavior::passing("Traceback (most recent call last):\nImportError\n"),
        );

        let outcome = verifier.verify(&project, "numpy", "2.3.0").expect("verify");
        let VerificationOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.stage, FailureStage::Marker);
        assert!(failure.excerpt.contains("ImportError"));
        assert_clean(&verifier, &project);
    }

    #[test]
    fn build_failure_skips_run_and_cleans_recipe() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = project(temp.path());
        let verifier = verifier(
            temp.path(),
            FakeBehavior {
                build_ok: false,
                ..FakeBehavior::passing("")
            },
        );

        let outcome = verifier.verify(&project, "numpy", "2.3.1").expect("verify");
        assert!(matches!(
            outcome,
            VerificationOutcome::Failure(VerificationFailure {
                stage: FailureStage::Build,
                ..
            })
        ));
        assert_eq!(
            verifier.toolchain().calls(),
            vec!["build aligner-server-one-numpy:2.3.1-run1"]
        );
        assert_clean(&verifier, &project);
    }

    #[test]
    fn run_failure_still_removes_image() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = project(temp.path());
        let verifier = verifier(
            temp.path(),
            FakeBehavior {
                run_ok: false,
                ..FakeBehavior::passing("")
            },
        );

        let outcome = verifier.verify(&project, "numpy", "2.3.0").expect("verify");
        assert!(!outcome.is_success());
        assert_eq!(
            verifier.toolchain().calls().last().map(String::as_str),
            Some("rmi aligner-server-one-numpy:2.3.0-run1")
        );
        assert_clean(&verifier, &project);
    }

    #[test]
    fn container_created_by_failed_start_is_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = project(temp.path());
        let verifier = verifier(
            temp.path(),
            FakeBehavior {
                run_ok: false,
                run_leaves_container: true,
                ..FakeBehavior::passing("")
            },
        );

        let outcome = verifier.verify(&project, "numpy", "2.3.0").expect("verify");
        assert!(matches!(
            outcome,
            VerificationOutcome::Failure(VerificationFailure {
                stage: FailureStage::Run,
                ..
            })
        ));
        let calls = verifier.toolchain().calls();
        assert_eq!(&calls[calls.len() - 2..], [
            "stop aligner-server-one-numpy-2.3.0-run1".to_string(),
            "rmi aligner-server-one-numpy:2.3.0-run1".to_string(),
        ]);
        assert_clean(&verifier, &project);
    }

    #[test]
    fn marker_at_end_of_long_log_fails_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = project(temp.path());
        let log = format!(
            "{}Traceback (most recent call last):\nMemoryError\n",
            "INFO serving request\n".repeat(5_000)
        );
        let verifier = verifier(
            temp.path(),
            FakeBehavior {
                log_truncated: true,
                ..FakeBehavior::passing(&log)
            },
        );

        let outcome = verifier.verify(&project, "numpy", "2.3.0").expect("verify");
        let VerificationOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.stage, FailureStage::Marker);
        assert!(failure.excerpt.ends_with("MemoryError"));
        assert!(failure.excerpt.len() <= LOG_EXCERPT_BYTES + "[...] ".len());
        assert_clean(&verifier, &project);
    }

    #[test]
    fn truncated_log_without_marker_is_not_a_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = project(temp.path());
        let verifier = verifier(
            temp.path(),
            FakeBehavior {
                log_truncated: true,
                ..FakeBehavior::passing("INFO serving request\n")
            },
        );

        let outcome = verifier.verify(&project, "numpy", "2.3.0").expect("verify");
        let VerificationOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.stage, FailureStage::Logs);
        assert!(failure.excerpt.contains("output limit"));
        assert_clean(&verifier, &project);
    }

    #[test]
    fn failed_container_stop_does_not_skip_image_removal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = project(temp.path());
        let verifier = verifier(
            temp.path(),
            FakeBehavior {
                stop_ok: false,
                ..FakeBehavior::passing("ok\n")
            },
        );

        let outcome = verifier.verify(&project, "numpy", "2.3.0").expect("verify");
        assert!(outcome.is_success());
        let calls = verifier.toolchain().calls();
        assert_eq!(&calls[calls.len() - 2..], [
            "stop aligner-server-one-numpy-2.3.0-run1".to_string(),
            "rmi aligner-server-one-numpy:2.3.0-run1".to_string(),
        ]);
        assert!(verifier.toolchain().live_images().is_empty());
    }

    #[test]
    fn missing_anchor_is_fatal_not_a_failed_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut project = project(temp.path());
        project.recipe_template = "FROM alpine\n".to_string();
        let verifier = verifier(temp.path(), FakeBehavior::passing(""));

        let err = verifier.verify(&project, "numpy", "2.3.0").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::AlignError>(),
            Some(crate::error::AlignError::Template { .. })
        ));
        assert!(verifier.toolchain().calls().is_empty());
    }
}
