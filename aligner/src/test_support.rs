//! Test doubles for the toolchain, verifier, registry and system check, plus
//! a throwaway repository layout.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::error::{FailureStage, VerificationFailure};
use crate::io::registry::{Project, ProjectRegistry};
use crate::io::system_check::{CheckOutcome, SystemCheck};
use crate::io::toolchain::{ContainerToolchain, ToolResult};
use crate::io::verifier::{BuildVerifier, VerificationOutcome};

/// Project with a minimal recipe under a relative `apps/` directory.
pub fn project(name: &str) -> Project {
    Project {
        name: name.to_string(),
        dir: PathBuf::from("apps").join(name),
        recipe_template: "FROM python-base\nCMD [\"python\", \"app.py\"]\n".to_string(),
    }
}

/// How a [`FakeToolchain`] answers each step.
#[derive(Debug, Clone)]
pub struct FakeBehavior {
    pub build_ok: bool,
    pub run_ok: bool,
    /// A failing `run` still leaves a created container behind.
    pub run_leaves_container: bool,
    pub stop_ok: bool,
    /// Returned by every `logs` call.
    pub log: String,
    /// `logs` reports that the start of the log was dropped.
    pub log_truncated: bool,
}

impl FakeBehavior {
    pub fn passing(log: &str) -> Self {
        Self {
            build_ok: true,
            run_ok: true,
            run_leaves_container: false,
            stop_ok: true,
            log: log.to_string(),
            log_truncated: false,
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<String>,
    recipes: Vec<String>,
    images: BTreeSet<String>,
    containers: BTreeSet<String>,
}

/// In-memory container toolchain that records every call and tracks which
/// images and containers are still alive.
#[derive(Debug)]
pub struct FakeToolchain {
    behavior: FakeBehavior,
    state: RefCell<FakeState>,
}

impl FakeToolchain {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            state: RefCell::new(FakeState::default()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Recipe contents as they were on disk when each build started.
    pub fn built_recipes(&self) -> Vec<String> {
        self.state.borrow().recipes.clone()
    }

    pub fn live_images(&self) -> Vec<String> {
        self.state.borrow().images.iter().cloned().collect()
    }

    pub fn live_containers(&self) -> Vec<String> {
        self.state.borrow().containers.iter().cloned().collect()
    }
}

impl ContainerToolchain for FakeToolchain {
    fn build(&self, recipe: &Path, _context: &Path, tag: &str) -> Result<ToolResult> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("build {tag}"));
        state.recipes.push(fs::read_to_string(recipe)?);
        if !self.behavior.build_ok {
            return Ok(ToolResult::failed("ERROR: failed to solve: pip install exited 1"));
        }
        state.images.insert(tag.to_string());
        Ok(ToolResult::ok(""))
    }

    fn run_detached(&self, tag: &str, name: &str) -> Result<ToolResult> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("run {tag} as {name}"));
        if self.behavior.run_ok || self.behavior.run_leaves_container {
            state.containers.insert(name.to_string());
        }
        if !self.behavior.run_ok {
            return Ok(ToolResult::failed("container exited before start"));
        }
        Ok(ToolResult::ok(format!("{name}-id")))
    }

    fn logs(&self, container: &str) -> Result<ToolResult> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("logs {container}"));
        Ok(ToolResult {
            truncated: self.behavior.log_truncated,
            ..ToolResult::ok(self.behavior.log.clone())
        })
    }

    fn stop_container(&self, container: &str) -> Result<ToolResult> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("stop {container}"));
        if !self.behavior.stop_ok {
            return Ok(ToolResult::failed("daemon not responding"));
        }
        state.containers.remove(container);
        Ok(ToolResult::ok(""))
    }

    fn remove_image(&self, tag: &str) -> Result<ToolResult> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("rmi {tag}"));
        state.images.remove(tag);
        Ok(ToolResult::ok(""))
    }
}

/// Verifier answering from a fixed table; unlisted attempts fail.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    passes: BTreeSet<(String, String, String)>,
    pass_all: bool,
    calls: RefCell<Vec<String>>,
}

impl ScriptedVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn passing_everything() -> Self {
        Self {
            pass_all: true,
            ..Self::default()
        }
    }

    pub fn pass(mut self, project: &str, package: &str, candidate: &str) -> Self {
        self.passes.insert((
            project.to_string(),
            package.to_string(),
            candidate.to_string(),
        ));
        self
    }

    /// Attempts in order, as `"<project> <package>==<candidate>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl BuildVerifier for ScriptedVerifier {
    fn verify(
        &self,
        project: &Project,
        package: &str,
        candidate: &str,
    ) -> Result<VerificationOutcome> {
        self.calls
            .borrow_mut()
            .push(format!("{} {package}=={candidate}", project.name));
        let key = (
            project.name.clone(),
            package.to_string(),
            candidate.to_string(),
        );
        if self.pass_all || self.passes.contains(&key) {
            return Ok(VerificationOutcome::Success { log: String::new() });
        }
        Ok(VerificationOutcome::Failure(VerificationFailure {
            project: project.name.clone(),
            package: package.to_string(),
            candidate: candidate.to_string(),
            stage: FailureStage::Marker,
            excerpt: "Traceback: scripted failure".to_string(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct StaticRegistry {
    projects: Vec<Project>,
}

impl StaticRegistry {
    pub fn new(projects: Vec<Project>) -> Self {
        Self { projects }
    }
}

impl ProjectRegistry for StaticRegistry {
    fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.projects.clone())
    }
}

enum CheckScript {
    Pass,
    Fail(String),
    Error(String),
}

/// System check with a fixed answer and an optional side effect run first.
pub struct ScriptedCheck {
    script: CheckScript,
    hook: Option<Box<dyn Fn()>>,
    runs: Cell<usize>,
}

impl ScriptedCheck {
    fn with(script: CheckScript) -> Self {
        Self {
            script,
            hook: None,
            runs: Cell::new(0),
        }
    }

    pub fn passing() -> Self {
        Self::with(CheckScript::Pass)
    }

    pub fn failing(excerpt: &str) -> Self {
        Self::with(CheckScript::Fail(excerpt.to_string()))
    }

    /// The check cannot even be started.
    pub fn erroring(message: &str) -> Self {
        Self::with(CheckScript::Error(message.to_string()))
    }

    pub fn on_run(mut self, hook: impl Fn() + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn runs(&self) -> usize {
        self.runs.get()
    }
}

impl SystemCheck for ScriptedCheck {
    fn run(&self) -> Result<CheckOutcome> {
        self.runs.set(self.runs.get() + 1);
        if let Some(hook) = &self.hook {
            hook();
        }
        match &self.script {
            CheckScript::Pass => Ok(CheckOutcome::Pass),
            CheckScript::Fail(excerpt) => Ok(CheckOutcome::Fail {
                excerpt: excerpt.clone(),
            }),
            CheckScript::Error(message) => Err(anyhow!(message.clone())),
        }
    }
}

/// Temporary repository: a manifest at the root and projects under `apps/`.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new(manifest: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("pyproject.toml"), manifest).expect("write manifest");
        fs::create_dir_all(dir.path().join("apps")).expect("create apps");
        Self { dir }
    }

    pub fn add_project(&self, name: &str, recipe: &str) -> PathBuf {
        let project_dir = self.projects_dir().join(name);
        fs::create_dir_all(&project_dir).expect("create project");
        fs::write(project_dir.join("Dockerfile"), recipe).expect("write recipe");
        project_dir
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root().join("apps")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root().join("pyproject.toml")
    }

    pub fn read_manifest(&self) -> String {
        fs::read_to_string(self.manifest_path()).expect("read manifest")
    }
}
