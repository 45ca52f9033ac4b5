#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Execution backends for the opsgate command gateway.
//!
//! A backend turns a command string into an [`ExecutionResult`] and offers
//! two file primitives (`read_file`, `list_dir`). Which backend runs is a
//! configuration-time choice, never per-call:
//!
//! - [`HostBackend`] — runs directly on the local host in a fixed working
//!   directory. Lowest latency, no containment.
//! - [`SandboxBackend`] — runs inside one long-lived container with declared
//!   bind mounts, driven over the container engine's CLI.
//! - [`RemoteShellBackend`] — runs over one persistent authenticated SSH
//!   connection, framing command boundaries and exit codes with random
//!   markers; files go over a dedicated SFTP channel.
//!
//! Timeouts produce a structured result (synthetic exit code
//! [`TIMEOUT_EXIT_CODE`], explanatory stderr), never an error: only setup
//! bugs ([`ExecError::NotConfigured`]) and dead connections are errors.

pub mod config;
mod host;
mod remote;
mod sandbox;
mod shell;

pub use config::{
    BackendConfig, ConfigError, GatewayConfig, HostConfig, MountSpec, RemoteConfig, SandboxConfig,
};
pub use host::HostBackend;
pub use remote::RemoteShellBackend;
pub use sandbox::{SandboxBackend, SandboxEngine};
pub use shell::MarkerShell;

use async_trait::async_trait;
use opsgate_core::ExecutionResult;
use std::sync::Arc;
use std::time::Duration;

/// Synthetic exit code reported when a command exceeds its timeout
/// (the GNU `timeout(1)` convention).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Errors from backend setup and execution.
///
/// Command *failures* (non-zero exit, timeout) are not errors — they come
/// back as an [`ExecutionResult`]. Errors mean the backend itself is
/// unusable: misconfiguration, a dead connection, a broken driver.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The backend configuration is unusable. Indicates a setup bug.
    #[error("backend not configured: {0}")]
    NotConfigured(String),

    /// I/O error talking to the local system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote connection is gone. Terminal for the session: the caller
    /// must rebuild the backend rather than retry per-command.
    #[error("connection error: {0}")]
    Connection(String),

    /// The sandbox driver failed to start or run a command.
    #[error("sandbox driver error: {0}")]
    Sandbox(String),
}

/// Result type for backend operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// Uniform contract across the three backends.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run a command and capture its output and exit code.
    async fn execute(&self, command: &str) -> ExecResult<ExecutionResult>;

    /// Read a file's bytes from the execution environment.
    async fn read_file(&self, path: &str) -> ExecResult<Vec<u8>>;

    /// List the entry names of a directory in the execution environment.
    async fn list_dir(&self, path: &str) -> ExecResult<Vec<String>>;
}

/// Materialize the configured backend.
///
/// Called once at startup; the returned backend is shared for the process
/// lifetime. Sandbox and remote backends do their one-time initialization
/// (container start, SSH handshake) here.
///
/// # Errors
///
/// Returns [`ExecError::NotConfigured`] for an unusable configuration, or
/// the underlying driver/connection error when initialization fails.
pub async fn backend_from_config(config: &BackendConfig) -> ExecResult<Arc<dyn ExecutionBackend>> {
    config.validate().map_err(ExecError::NotConfigured)?;
    match config {
        BackendConfig::Host(host) => Ok(Arc::new(HostBackend::new(
            host.workdir.clone(),
            Duration::from_secs(host.timeout_secs),
        ))),
        BackendConfig::Sandbox(sandbox) => Ok(Arc::new(SandboxBackend::start(sandbox).await?)),
        BackendConfig::Remote(remote) => Ok(Arc::new(RemoteShellBackend::connect(remote).await?)),
    }
}

/// The structured result every backend returns when a command exceeds its
/// deadline: whatever output was captured so far, the synthetic exit code,
/// and an explanatory stderr.
pub(crate) fn timeout_result(partial_stdout: String, timeout: Duration) -> ExecutionResult {
    ExecutionResult {
        stdout: partial_stdout,
        stderr: format!(
            "command timed out after {}ms; the underlying process may still be running",
            timeout.as_millis()
        ),
        exit_code: TIMEOUT_EXIT_CODE,
    }
}
