//! Container runtime access.
//!
//! `DockerCli` shells out to the docker CLI (`docker compose` for the
//! container set, `docker ps` / `docker logs` for inspection). Every
//! command runs with a timeout and is killed if the caller goes away.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::LifecycleConfig;

/// stderr fragments meaning the CLI ran but the daemon is out of reach.
const DAEMON_UNREACHABLE: &[&str] = &[
    "Cannot connect to the Docker daemon",
    "error during connect",
    "permission denied while trying to connect",
];

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Container runtime unreachable: {0}")]
    Unreachable(String),
    #[error("`{command}` failed (exit {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("`{command}` did not finish within {after:?}")]
    TimedOut { command: String, after: Duration },
    #[error("Unexpected runtime output: {0}")]
    MalformedOutput(String),
}

/// The engine's containers: selected by label, managed through one
/// compose file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSet {
    pub label: String,
    pub compose_file: PathBuf,
}

impl ContainerSet {
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            label: config.container_label.clone(),
            compose_file: config.compose_file.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerState {
    pub name: String,
    /// Runtime state word (`running`, `exited`, `restarting`, ...).
    pub state: String,
    /// Human-readable status (`Up 3 minutes`).
    pub status: String,
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Containers in the set, running or not.
    async fn list(&self, set: &ContainerSet) -> Result<Vec<ContainerState>, RuntimeError>;
    async fn start(&self, set: &ContainerSet) -> Result<(), RuntimeError>;
    async fn stop(&self, set: &ContainerSet) -> Result<(), RuntimeError>;
    /// Stop then start the whole set.
    async fn restart(&self, set: &ContainerSet) -> Result<(), RuntimeError>;
    /// Last `lines` lines of one container's output.
    async fn logs(&self, container: &str, lines: u32) -> Result<String, RuntimeError>;
}

// ═══════════════════════════════════════════════════════════
// DockerCli
// ═══════════════════════════════════════════════════════════

pub struct DockerCli {
    binary: String,
    command_timeout: Duration,
    settle: Duration,
}

/// One line of `docker ps --format '{{json .}}'`.
#[derive(Deserialize)]
struct PsLine {
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
}

impl DockerCli {
    pub fn new(binary: &str, command_timeout: Duration, settle: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            command_timeout,
            settle,
        }
    }

    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::new(
            &config.docker_bin,
            config.command_timeout(),
            config.restart_settle(),
        )
    }

    async fn output(&self, args: &[&str], cwd: Option<&Path>) -> Result<Output, RuntimeError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!(%command, "Running container command");
        let output = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Err(_) => {
                return Err(RuntimeError::TimedOut {
                    command,
                    after: self.command_timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(RuntimeError::Unreachable(format!(
                    "cannot run {}: {e}",
                    self.binary
                )))
            }
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if DAEMON_UNREACHABLE.iter().any(|m| stderr.contains(m)) {
            return Err(RuntimeError::Unreachable(stderr));
        }
        Err(RuntimeError::CommandFailed {
            command,
            code: output.status.code(),
            stderr,
        })
    }

    async fn compose(&self, set: &ContainerSet, action: &[&str]) -> Result<(), RuntimeError> {
        // Run from the compose file's directory so relative paths inside it resolve
        let dir = set.compose_file.parent().filter(|d| d.is_dir());
        let file = match (dir, set.compose_file.file_name()) {
            (Some(_), Some(name)) => name.to_string_lossy(),
            _ => set.compose_file.to_string_lossy(),
        };
        let mut args = vec!["compose", "-f", file.as_ref()];
        args.extend_from_slice(action);
        self.output(&args, dir).await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list(&self, set: &ContainerSet) -> Result<Vec<ContainerState>, RuntimeError> {
        let filter = format!("label={}", set.label);
        let output = self
            .output(&["ps", "-a", "--filter", &filter, "--format", "{{json .}}"], None)
            .await?;
        parse_ps(&String::from_utf8_lossy(&output.stdout))
    }

    async fn start(&self, set: &ContainerSet) -> Result<(), RuntimeError> {
        self.compose(set, &["up", "-d"]).await
    }

    async fn stop(&self, set: &ContainerSet) -> Result<(), RuntimeError> {
        self.compose(set, &["down"]).await
    }

    async fn restart(&self, set: &ContainerSet) -> Result<(), RuntimeError> {
        self.stop(set).await?;
        tokio::time::sleep(self.settle).await;
        self.start(set).await
    }

    async fn logs(&self, container: &str, lines: u32) -> Result<String, RuntimeError> {
        let tail = lines.to_string();
        let output = self
            .output(&["logs", "--tail", &tail, container], None)
            .await?;
        // Containers write to both streams; docker splits them back out
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

fn parse_ps(stdout: &str) -> Result<Vec<ContainerState>, RuntimeError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let row: PsLine = serde_json::from_str(line)
                .map_err(|e| RuntimeError::MalformedOutput(format!("{e}: {line}")))?;
            Ok(ContainerState {
                name: row.names,
                state: row.state,
                status: row.status,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> ContainerSet {
        ContainerSet {
            label: "frontdoor.role=engine".into(),
            compose_file: PathBuf::from("docker/docker-compose.yml"),
        }
    }

    #[test]
    fn parses_ps_json_lines() {
        let stdout = r#"{"Names":"grobid-1","State":"running","Status":"Up 3 minutes","Image":"grobid"}
{"Names":"grobid-2","State":"exited","Status":"Exited (137) 1 minute ago"}

"#;
        let containers = parse_ps(stdout).unwrap();
        assert_eq!(containers.len(), 2);
        assert!(containers[0].is_running());
        assert_eq!(containers[1].name, "grobid-2");
        assert!(!containers[1].is_running());
    }

    #[test]
    fn empty_ps_output_is_no_containers() {
        assert!(parse_ps("\n").unwrap().is_empty());
    }

    #[test]
    fn garbage_ps_output_is_malformed() {
        let err = parse_ps("CONTAINER ID   IMAGE").unwrap_err();
        assert!(matches!(err, RuntimeError::MalformedOutput(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_unreachable() {
        let cli = DockerCli::new("/nonexistent/docker", Duration::from_secs(5), Duration::ZERO);
        let err = cli.list(&set()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unreachable(_)), "got {err:?}");

        let err = cli.logs("grobid-1", 50).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unreachable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        // `false` accepts any arguments and exits 1
        let cli = DockerCli::new("false", Duration::from_secs(5), Duration::ZERO);
        let err = cli.start(&set()).await.unwrap_err();
        assert!(
            matches!(err, RuntimeError::CommandFailed { code: Some(1), .. }),
            "got {err:?}"
        );
    }
}
