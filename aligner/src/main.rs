//! Cross-project dependency aligner.
//!
//! Upgrades the pins of `pyproject.toml` only to versions that every service
//! under `apps/` builds and runs with, then confirms the result with the
//! repository's full build before keeping it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aligner::align::{AlignOutcome, Aligner};
use aligner::core::recipe::RecipeRenderer;
use aligner::core::types::{PackageDecision, PlanReport};
use aligner::error::AlignError;
use aligner::exit_codes;
use aligner::io::config::{AlignConfig, CONFIG_FILE, load_config};
use aligner::io::lock::{LOCK_FILE, RunLock};
use aligner::io::manifest_store::ManifestStore;
use aligner::io::registry::{DirectoryRegistry, ProjectRegistry, current_dependency_versions};
use aligner::io::system_check::CommandCheck;
use aligner::io::toolchain::DockerCli;
use aligner::io::verifier::{ContainerVerifier, VerifierSettings};
use aligner::logging;
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

const STATE_DIR: &str = ".aligner";
const CHECK_LOG: &str = "system-check.log";

#[derive(Parser)]
#[command(
    name = "aligner",
    version,
    about = "Align shared dependency pins across every project of a repository"
)]
struct Cli {
    /// Repository root holding the manifest and the projects directory.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `<root>/aligner.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress at info level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List discovered projects.
    Projects,
    /// Print a project's build recipe with the manifest's current pins injected.
    Render {
        /// Project directory name.
        project: String,
    },
    /// Verify candidates and print the plan without touching the manifest.
    Plan {
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Plan, commit, run the full-system check, and roll back on failure.
    Apply,
    /// Restore the manifest from a backup left by an interrupted run.
    Restore,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AlignError>() {
        Some(AlignError::BackupLost { .. }) => exit_codes::BACKUP_LOST,
        _ => exit_codes::INVALID,
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join(CONFIG_FILE));
    let cfg = load_config(&config_path)?;
    let root = cli.root.as_path();

    match cli.command {
        Command::Projects => cmd_projects(root, &cfg),
        Command::Render { project } => cmd_render(root, &cfg, &project),
        Command::Plan { json } => cmd_plan(root, &cfg, json),
        Command::Apply => cmd_apply(root, &cfg),
        Command::Restore => cmd_restore(root, &cfg),
    }
}

fn registry(root: &Path, cfg: &AlignConfig) -> DirectoryRegistry {
    DirectoryRegistry::new(cfg.projects_dir(root), cfg.recipe_file.clone())
}

fn store(root: &Path, cfg: &AlignConfig) -> ManifestStore {
    ManifestStore::new(cfg.manifest_path(root), &cfg.backup_suffix)
}

fn renderer(cfg: &AlignConfig) -> Result<RecipeRenderer> {
    Ok(RecipeRenderer::new(
        cfg.anchor.clone(),
        cfg.directive_renderer()?,
    ))
}

fn verifier(root: &Path, cfg: &AlignConfig) -> Result<ContainerVerifier<DockerCli>> {
    Ok(ContainerVerifier::new(
        DockerCli::from_config(&cfg.verify),
        renderer(cfg)?,
        VerifierSettings {
            context_dir: root.to_path_buf(),
            recipe_file: cfg.recipe_file.clone(),
            failure_markers: cfg.verify.failure_markers.clone(),
            settle: Duration::from_secs(cfg.verify.settle_secs),
        },
    ))
}

fn cmd_projects(root: &Path, cfg: &AlignConfig) -> Result<i32> {
    for project in registry(root, cfg).list_projects()? {
        println!("{}", project.name);
    }
    Ok(exit_codes::OK)
}

fn cmd_render(root: &Path, cfg: &AlignConfig, name: &str) -> Result<i32> {
    let manifest = store(root, cfg).load()?;
    let project = registry(root, cfg)
        .list_projects()?
        .into_iter()
        .find(|project| project.name == name)
        .ok_or_else(|| anyhow!("no project named {name:?}"))?;
    let recipe = project.render_build_recipe(
        &renderer(cfg)?,
        &current_dependency_versions(&manifest),
    )?;
    print!("{recipe}");
    Ok(exit_codes::OK)
}

fn cmd_plan(root: &Path, cfg: &AlignConfig, json: bool) -> Result<i32> {
    let store = store(root, cfg);
    let catalog = cfg.upgrade_catalog()?;
    let verifier = verifier(root, cfg)?;
    let check = system_check(root, cfg);
    let aligner = Aligner {
        store: &store,
        catalog: &catalog,
        registry: &registry(root, cfg),
        verifier: &verifier,
        check: &check,
    };
    let report = aligner.plan()?;
    if json {
        let mut payload = serde_json::to_string_pretty(&report).context("serialize plan")?;
        payload.push('\n');
        print!("{payload}");
    } else {
        print_report(&report);
    }
    Ok(exit_codes::OK)
}

fn cmd_apply(root: &Path, cfg: &AlignConfig) -> Result<i32> {
    let _lock = RunLock::acquire(root.join(LOCK_FILE))?;
    let store = store(root, cfg);
    let catalog = cfg.upgrade_catalog()?;
    let verifier = verifier(root, cfg)?;
    let check = system_check(root, cfg);
    let aligner = Aligner {
        store: &store,
        catalog: &catalog,
        registry: &registry(root, cfg),
        verifier: &verifier,
        check: &check,
    };

    let outcome = aligner.run()?;
    print_report(outcome.report());
    match outcome {
        AlignOutcome::NoChange { .. } => {
            println!("no change: {}", store.path().display());
            Ok(exit_codes::OK)
        }
        AlignOutcome::Committed { applied, .. } => {
            println!("committed {}: {}", store.path().display(), applied.join(", "));
            Ok(exit_codes::OK)
        }
        AlignOutcome::RolledBack { cause, .. } => {
            eprintln!("{cause}");
            println!(
                "rolled back {} (full-system log: {})",
                store.path().display(),
                root.join(STATE_DIR).join(CHECK_LOG).display()
            );
            Ok(exit_codes::ROLLED_BACK)
        }
    }
}

fn cmd_restore(root: &Path, cfg: &AlignConfig) -> Result<i32> {
    let _lock = RunLock::acquire(root.join(LOCK_FILE))?;
    let store = store(root, cfg);
    if store.restore_leftover()? {
        println!("restored {} from {}", store.path().display(), store.backup_path().display());
    } else {
        println!("no leftover backup at {}", store.backup_path().display());
    }
    Ok(exit_codes::OK)
}

fn system_check(root: &Path, cfg: &AlignConfig) -> CommandCheck {
    CommandCheck::from_config(
        &cfg.system_check,
        root,
        Some(root.join(STATE_DIR).join(CHECK_LOG)),
    )
}

fn print_report(report: &PlanReport) {
    for package in &report.packages {
        let current = package.current.as_deref().unwrap_or("-");
        let line = match &package.decision {
            PackageDecision::Upgrade { to } => format!("{current} -> {to}"),
            PackageDecision::UpToDate => format!("{current} (up to date)"),
            PackageDecision::NotInManifest => "not declared in manifest".to_string(),
            PackageDecision::Unverified { projects } => {
                format!("{current} kept: no passing candidate for {}", projects.join(", "))
            }
            PackageDecision::NoCommonCandidate => {
                format!("{current} kept: no candidate passes in every project")
            }
            PackageDecision::NoProjects => format!("{current} kept: no projects found"),
        };
        println!("{}: {line}", package.package);
    }
    println!("{} upgrade(s) after {} attempt(s)", report.plan.len(), report.attempts());
}
