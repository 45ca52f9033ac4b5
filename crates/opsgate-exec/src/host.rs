//! Host backend — runs commands directly on the local machine.

use crate::{ExecError, ExecResult, ExecutionBackend, timeout_result};
use async_trait::async_trait;
use opsgate_core::ExecutionResult;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Runs commands with `bash -c` in a fixed working directory, using the
/// local process environment. No isolation; lowest latency.
#[derive(Debug, Clone)]
pub struct HostBackend {
    workdir: PathBuf,
    timeout: Duration,
}

impl HostBackend {
    /// Create a host backend rooted at `workdir`.
    #[must_use]
    pub fn new(workdir: PathBuf, timeout: Duration) -> Self {
        Self { workdir, timeout }
    }

    /// Resolve a possibly-relative path against the working directory.
    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

#[async_trait]
impl ExecutionBackend for HostBackend {
    async fn execute(&self, command: &str) -> ExecResult<ExecutionResult> {
        tracing::debug!(workdir = %self.workdir.display(), "executing on host");
        match tokio::time::timeout(self.timeout, run_bash(command, &self.workdir)).await {
            Ok(result) => result.map_err(ExecError::Io),
            Err(_elapsed) => {
                tracing::warn!(timeout = ?self.timeout, "host command timed out");
                Ok(timeout_result(String::new(), self.timeout))
            },
        }
    }

    async fn read_file(&self, path: &str) -> ExecResult<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve(path)).await?)
    }

    async fn list_dir(&self, path: &str) -> ExecResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(self.resolve(path)).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

/// Run a bash command and capture stdout, stderr, and exit code.
async fn run_bash(command: &str, workdir: &Path) -> std::io::Result<ExecutionResult> {
    let output = Command::new("bash")
        .arg("-c")
        .arg(command)
        .current_dir(workdir)
        .output()
        .await?;

    Ok(ExecutionResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
