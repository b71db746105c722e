//! Full-system check confirming a committed manifest (e.g. `make build-base`).

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::error::{LOG_EXCERPT_BYTES, log_excerpt};
use crate::io::config::SystemCheckConfig;
use crate::io::process::run_with_timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    /// The check failed or timed out; `excerpt` is the tail of its output.
    Fail { excerpt: String },
}

/// The repository's end-to-end entry point. Takes no arguments.
pub trait SystemCheck {
    fn run(&self) -> Result<CheckOutcome>;
}

/// Runs a configured command in the repository root.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Where the full output of the last check is written, if anywhere.
    pub log_path: Option<PathBuf>,
}

impl CommandCheck {
    pub fn from_config(cfg: &SystemCheckConfig, workdir: &Path, log_path: Option<PathBuf>) -> Self {
        Self {
            command: cfg.command.clone(),
            workdir: workdir.to_path_buf(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
            log_path,
        }
    }
}

impl SystemCheck for CommandCheck {
    fn run(&self) -> Result<CheckOutcome> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("system check command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        info!(command = ?self.command, "running full-system check");

        let output = run_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .context("run full-system check")?;
        let text = output.combined_text();
        if let Some(path) = &self.log_path
            && let Err(err) = write_check_log(path, &text)
        {
            // The log is diagnostic only; the exit status decides.
            warn!(path = %path.display(), err = %format!("{err:#}"), "failed to write check log");
        }

        if output.succeeded() {
            info!("full-system check passed");
            Ok(CheckOutcome::Pass)
        } else {
            warn!(
                exit_code = ?output.status.code(),
                timed_out = output.timed_out,
                "full-system check failed"
            );
            Ok(CheckOutcome::Fail {
                excerpt: log_excerpt(&text, LOG_EXCERPT_BYTES),
            })
        }
    }
}

fn write_check_log(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create check log dir {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("write check log {}", path.display()))
}
