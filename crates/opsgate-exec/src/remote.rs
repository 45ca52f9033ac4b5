//! Remote shell backend — one persistent SSH session per backend.
//!
//! Exactly one authenticated connection is established at construction,
//! carrying one interactive shell channel (wrapped in [`MarkerShell`]) and
//! one SFTP channel. Both persist for the backend's lifetime.
//!
//! A connection error is terminal for the session: callers rebuild the
//! backend with [`RemoteShellBackend::connect`] rather than expecting
//! per-command reconnection.

use crate::config::RemoteConfig;
use crate::shell::MarkerShell;
use crate::{ExecError, ExecResult, ExecutionBackend};
use async_trait::async_trait;
use opsgate_core::ExecutionResult;
use russh::client;
use russh_sftp::client::SftpSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

/// SSH client event handler.
///
/// Host keys are accepted without verification, mirroring the trust model:
/// the backend talks to hosts the operator configured, and the threat being
/// gated is the unsupervised agent, not the network path.
struct Client;

#[async_trait]
impl client::Handler for Client {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Executes commands over one persistent authenticated SSH session.
///
/// The shell channel processes one command at a time: concurrent `execute`
/// calls serialize on the internal mutex. Interleaved writes would corrupt
/// the marker framing across commands.
pub struct RemoteShellBackend {
    session: client::Handle<Client>,
    shell: Mutex<MarkerShell<russh::ChannelStream<client::Msg>>>,
    sftp: SftpSession,
    timeout: Duration,
}

impl RemoteShellBackend {
    /// Establish the session: connect, authenticate, open the shell and
    /// SFTP channels.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::NotConfigured`] when the key file or SSH agent
    /// is unusable, and [`ExecError::Connection`] for everything the remote
    /// side refuses.
    pub async fn connect(config: &RemoteConfig) -> ExecResult<Self> {
        tracing::info!(host = %config.host, port = config.port, user = %config.user, "connecting remote shell backend");

        let ssh_config = Arc::new(client::Config::default());
        let mut session =
            client::connect(ssh_config, (config.host.as_str(), config.port), Client)
                .await
                .map_err(conn_err)?;

        let authenticated = match &config.key_path {
            Some(path) => {
                let key = russh_keys::load_secret_key(path, None).map_err(|e| {
                    ExecError::NotConfigured(format!(
                        "cannot load key {}: {e}",
                        path.display()
                    ))
                })?;
                session
                    .authenticate_publickey(config.user.clone(), Arc::new(key))
                    .await
                    .map_err(conn_err)?
            },
            None => authenticate_via_agent(&mut session, &config.user).await?,
        };
        if !authenticated {
            return Err(ExecError::Connection(format!(
                "authentication failed for {}@{}",
                config.user, config.host
            )));
        }

        let mut shell_channel = session.channel_open_session().await.map_err(conn_err)?;
        shell_channel
            .request_pty(false, "dumb", 200, 50, 0, 0, &[])
            .await
            .map_err(conn_err)?;
        shell_channel.request_shell(true).await.map_err(conn_err)?;
        let shell = MarkerShell::new(shell_channel.into_stream());

        let mut sftp_channel = session.channel_open_session().await.map_err(conn_err)?;
        sftp_channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(conn_err)?;
        let sftp = SftpSession::new(sftp_channel.into_stream())
            .await
            .map_err(conn_err)?;

        tracing::debug!(host = %config.host, "remote session established");
        Ok(Self {
            session,
            shell: Mutex::new(shell),
            sftp,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Tear the session down explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Connection`] when the disconnect message cannot
    /// be sent; the session is unusable either way.
    pub async fn close(&self) -> ExecResult<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "session closed", "en")
            .await
            .map_err(conn_err)
    }
}

#[async_trait]
impl ExecutionBackend for RemoteShellBackend {
    async fn execute(&self, command: &str) -> ExecResult<ExecutionResult> {
        // One command in flight per session; later callers queue here.
        let mut shell = self.shell.lock().await;
        shell.execute(command, self.timeout).await
    }

    async fn read_file(&self, path: &str) -> ExecResult<Vec<u8>> {
        let mut file = self.sftp.open(path).await.map_err(conn_err)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }

    async fn list_dir(&self, path: &str) -> ExecResult<Vec<String>> {
        let entries = self.sftp.read_dir(path).await.map_err(conn_err)?;
        let mut names: Vec<String> = entries.map(|entry| entry.file_name()).collect();
        names.sort();
        Ok(names)
    }
}

/// Try every identity the local SSH agent offers.
async fn authenticate_via_agent(
    session: &mut client::Handle<Client>,
    user: &str,
) -> ExecResult<bool> {
    let mut agent = russh_keys::agent::client::AgentClient::connect_env()
        .await
        .map_err(|e| ExecError::NotConfigured(format!("ssh agent unavailable: {e}")))?;
    let identities = agent
        .request_identities()
        .await
        .map_err(|e| ExecError::Connection(e.to_string()))?;

    for key in identities {
        let (returned, result) = session.authenticate_future(user, key, agent).await;
        agent = returned;
        if matches!(result, Ok(true)) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn conn_err(error: impl std::fmt::Display) -> ExecError {
    ExecError::Connection(error.to_string())
}
