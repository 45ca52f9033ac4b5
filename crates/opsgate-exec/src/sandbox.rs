//! Sandbox backend — runs commands inside one long-lived container.
//!
//! The driver is the container engine's CLI: one `run -d` at init creates a
//! container that idles on `sleep infinity` with the configured bind mounts
//! (one per codebase, plus a read-only credentials mount) and environment;
//! every call afterwards is an `exec` against that container. The container
//! is the reused resource; nothing is created per command.

use crate::config::SandboxConfig;
use crate::{ExecError, ExecResult, ExecutionBackend, timeout_result};
use async_trait::async_trait;
use opsgate_core::ExecutionResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;

/// Which isolation driver runs the sandbox.
///
/// Both current drivers are container engines addressed over their CLI; an
/// alternative isolation technology would be a new variant here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxEngine {
    /// Docker CLI.
    #[default]
    Docker,
    /// Podman CLI (docker-compatible argument surface).
    Podman,
}

impl SandboxEngine {
    /// The CLI binary for this engine.
    #[must_use]
    pub fn binary(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

/// Runs commands inside one idling container via the engine CLI.
pub struct SandboxBackend {
    engine: SandboxEngine,
    container_id: String,
    timeout: Duration,
}

impl SandboxBackend {
    /// Start the sandbox container and return the backend bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Sandbox`] when the engine CLI cannot start the
    /// container (daemon unreachable, image missing, bad mounts).
    pub async fn start(config: &SandboxConfig) -> ExecResult<Self> {
        let args = run_args(config);
        tracing::info!(engine = config.engine.binary(), image = %config.image, "starting sandbox container");

        let output = Command::new(config.engine.binary())
            .args(&args)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ExecError::Sandbox(format!(
                "failed to start container: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(ExecError::Sandbox(
                "engine reported no container id".to_string(),
            ));
        }
        tracing::debug!(%container_id, "sandbox container running");

        Ok(Self {
            engine: config.engine,
            container_id,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Tear the container down.
    pub async fn stop(&self) -> ExecResult<()> {
        let output = Command::new(self.engine.binary())
            .args(["rm", "-f", &self.container_id])
            .output()
            .await?;
        if !output.status.success() {
            return Err(ExecError::Sandbox(format!(
                "failed to remove container: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Run an `exec` in the container, mapping the outcome like the host
    /// backend does.
    async fn exec_in_container(&self, argv: Vec<String>) -> ExecResult<ExecutionResult> {
        let run = async {
            let output = Command::new(self.engine.binary())
                .args(&argv)
                .output()
                .await?;
            std::io::Result::Ok(ExecutionResult {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
            })
        };
        match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result.map_err(ExecError::Io),
            Err(_elapsed) => {
                tracing::warn!(timeout = ?self.timeout, "sandbox command timed out");
                Ok(timeout_result(String::new(), self.timeout))
            },
        }
    }
}

#[async_trait]
impl ExecutionBackend for SandboxBackend {
    async fn execute(&self, command: &str) -> ExecResult<ExecutionResult> {
        self.exec_in_container(exec_args(&self.container_id, command))
            .await
    }

    async fn read_file(&self, path: &str) -> ExecResult<Vec<u8>> {
        let argv = vec![
            "exec".to_string(),
            self.container_id.clone(),
            "cat".to_string(),
            "--".to_string(),
            path.to_string(),
        ];
        let result = self.exec_in_container(argv).await?;
        if result.is_success() {
            Ok(result.stdout.into_bytes())
        } else {
            Err(ExecError::Sandbox(result.stderr.trim().to_string()))
        }
    }

    async fn list_dir(&self, path: &str) -> ExecResult<Vec<String>> {
        let argv = vec![
            "exec".to_string(),
            self.container_id.clone(),
            "ls".to_string(),
            "-1A".to_string(),
            "--".to_string(),
            path.to_string(),
        ];
        let result = self.exec_in_container(argv).await?;
        if result.is_success() {
            Ok(result
                .stdout
                .lines()
                .map(ToString::to_string)
                .collect())
        } else {
            Err(ExecError::Sandbox(result.stderr.trim().to_string()))
        }
    }
}

/// Build the `run` argument vector that creates the idling container.
fn run_args(config: &SandboxConfig) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--rm".to_string(),
    ];
    for mount in &config.mounts {
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            mount.host_path.display(),
            mount.guest_path
        ));
    }
    if let Some(credentials) = &config.credentials {
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:ro",
            credentials.host_path.display(),
            credentials.guest_path
        ));
    }
    for (key, value) in &config.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(config.image.clone());
    args.push("sleep".to_string());
    args.push("infinity".to_string());
    args
}

/// Build the `exec` argument vector for one command.
fn exec_args(container_id: &str, command: &str) -> Vec<String> {
    vec![
        "exec".to_string(),
        container_id.to_string(),
        "bash".to_string(),
        "-c".to_string(),
        command.to_string(),
    ]
}
