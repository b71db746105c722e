//! Container build/run toolchain adapter.
//!
//! The [`ContainerToolchain`] trait decouples verification from the actual
//! container CLI. Tests use a recording fake that never spawns processes.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::io::config::VerifyConfig;
use crate::io::process::run_with_timeout;

/// Outcome of one toolchain call that could be invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub ok: bool,
    /// Combined stdout/stderr (for `run`, stdout carries the container id).
    pub output: String,
    /// The start of `output` was dropped to respect the output limit.
    pub truncated: bool,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
            truncated: false,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: output.into(),
            truncated: false,
        }
    }
}

/// Operations consumed from the container toolchain.
///
/// `Err` means the tool could not be invoked at all; a tool that ran and
/// failed returns `Ok` with `ok == false`.
pub trait ContainerToolchain {
    /// Build `recipe` with `context` as build context, tagging the image `tag`.
    fn build(&self, recipe: &Path, context: &Path, tag: &str) -> Result<ToolResult>;
    /// Start `tag` detached as container `name`; on success `output` is the
    /// container id. The container may exist even when this fails.
    fn run_detached(&self, tag: &str, name: &str) -> Result<ToolResult>;
    fn logs(&self, container: &str) -> Result<ToolResult>;
    /// Stop and remove a container.
    fn stop_container(&self, container: &str) -> Result<ToolResult>;
    fn remove_image(&self, tag: &str) -> Result<ToolResult>;
}

/// Toolchain backed by the `docker` CLI (or a compatible binary).
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    build_timeout: Duration,
    run_timeout: Duration,
    output_limit_bytes: usize,
}

impl DockerCli {
    pub fn from_config(cfg: &VerifyConfig) -> Self {
        Self {
            binary: cfg.docker.clone(),
            build_timeout: Duration::from_secs(cfg.build_timeout_secs),
            run_timeout: Duration::from_secs(cfg.run_timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn invoke(&self, args: &[&str], timeout: Duration, stdout_only: bool) -> Result<ToolResult> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        let output = run_with_timeout(cmd, timeout, self.output_limit_bytes)?;
        debug!(
            args = ?args,
            exit_code = ?output.status.code(),
            timed_out = output.timed_out,
            "docker finished"
        );
        let ok = output.succeeded();
        let text = if ok && stdout_only {
            output.stdout_text().trim().to_string()
        } else {
            output.combined_text()
        };
        Ok(ToolResult {
            ok,
            output: text,
            truncated: output.truncated > 0,
        })
    }
}

impl ContainerToolchain for DockerCli {
    fn build(&self, recipe: &Path, context: &Path, tag: &str) -> Result<ToolResult> {
        let recipe = recipe.to_string_lossy();
        let context = context.to_string_lossy();
        self.invoke(
            &["build", "-f", &recipe, "-t", tag, &context],
            self.build_timeout,
            false,
        )
    }

    fn run_detached(&self, tag: &str, name: &str) -> Result<ToolResult> {
        self.invoke(&["run", "-d", "--name", name, tag], self.run_timeout, true)
    }

    fn logs(&self, container: &str) -> Result<ToolResult> {
        // Container output arrives on both streams; keep both.
        self.invoke(&["logs", container], self.run_timeout, false)
    }

    fn stop_container(&self, container: &str) -> Result<ToolResult> {
        self.invoke(&["rm", "--force", container], self.run_timeout, false)
    }

    fn remove_image(&self, tag: &str) -> Result<ToolResult> {
        self.invoke(&["rmi", "--force", tag], self.run_timeout, false)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn cli(binary: &str) -> DockerCli {
        DockerCli::from_config(&VerifyConfig {
            docker: binary.to_string(),
            ..VerifyConfig::default()
        })
    }

    #[test]
    fn run_returns_trimmed_stdout() {
        // `echo` stands in for the CLI: its stdout is what `run -d` would print.
        let docker = cli("echo");
        assert_eq!(
            docker.run_detached("img:1", "img-1").expect("run"),
            ToolResult::ok("run -d --name img-1 img:1")
        );
    }

    #[test]
    fn build_passes_recipe_tag_and_context() {
        let docker = cli("echo");
        let result = docker
            .build(Path::new("apps/a-b/Dockerfile.x"), Path::new("/repo"), "img:1")
            .expect("build invoked");
        assert!(result.ok);
        assert_eq!(result.output.trim(), "build -f apps/a-b/Dockerfile.x -t img:1 /repo");
    }

    #[test]
    fn failing_tool_is_not_ok() {
        let docker = cli("false");
        let result = docker.remove_image("img:1").expect("rmi invoked");
        assert!(!result.ok);
    }

    #[test]
    fn cleanup_commands_force_removal() {
        let docker = cli("echo");
        assert_eq!(
            docker.stop_container("abc123").expect("stop").output.trim(),
            "rm --force abc123"
        );
        assert_eq!(
            docker.remove_image("img:1").expect("rmi").output.trim(),
            "rmi --force img:1"
        );
    }

    #[test]
    fn oversized_output_is_flagged_and_keeps_its_tail() {
        let docker = DockerCli::from_config(&VerifyConfig {
            docker: "echo".to_string(),
            output_limit_bytes: 7,
            ..VerifyConfig::default()
        });
        let result = docker.logs("abc123").expect("logs");
        assert!(result.ok);
        assert!(result.truncated);
        assert!(result.output.ends_with("abc123\n"));
        assert!(!docker.logs("a").expect("logs").truncated);
    }

    #[test]
    fn missing_binary_is_an_invocation_error() {
        let docker = cli("/nonexistent/docker-binary");
        assert!(docker.logs("abc123").is_err());
    }
}
