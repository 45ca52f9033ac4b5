//! Backend configuration types.
//!
//! Backend selection is a configuration-time choice: the TOML config names
//! one backend kind and its parameters, [`backend_from_config`] materializes
//! it once, and every gateway call goes through that instance.
//!
//! ```toml
//! [backend]
//! kind = "sandbox"
//! engine = "docker"
//! image = "ops-tools:latest"
//! timeout_secs = 120
//!
//! [[backend.mounts]]
//! host_path = "/srv/checkouts/payments"
//! guest_path = "/workspace/payments"
//!
//! [backend.credentials]
//! host_path = "/home/oncall/.kube"
//! guest_path = "/creds"
//! ```
//!
//! [`backend_from_config`]: crate::backend_from_config

use crate::sandbox::SandboxEngine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Could not read the config file.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level gateway configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// The one configured execution backend.
    pub backend: BackendConfig,
}

impl GatewayConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text does not match the
    /// schema.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read and
    /// [`ConfigError::Parse`] when it does not match the schema.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }
}

/// Which backend runs commands, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Direct execution on the local host.
    Host(HostConfig),
    /// Execution inside one long-lived container.
    Sandbox(SandboxConfig),
    /// Execution over one persistent SSH session.
    Remote(RemoteConfig),
}

impl BackendConfig {
    /// Check the configuration for setup bugs before materializing it.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Host(host) => {
                if host.workdir.as_os_str().is_empty() {
                    return Err("host backend: workdir must not be empty".to_string());
                }
            },
            Self::Sandbox(sandbox) => {
                if sandbox.image.is_empty() {
                    return Err("sandbox backend: image must not be empty".to_string());
                }
                for mount in sandbox
                    .mounts
                    .iter()
                    .chain(sandbox.credentials.as_ref())
                {
                    if mount.host_path.as_os_str().is_empty() || mount.guest_path.is_empty() {
                        return Err("sandbox backend: mount paths must not be empty".to_string());
                    }
                }
            },
            Self::Remote(remote) => {
                if remote.host.is_empty() {
                    return Err("remote backend: host must not be empty".to_string());
                }
                if remote.user.is_empty() {
                    return Err("remote backend: user must not be empty".to_string());
                }
            },
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_port() -> u16 {
    22
}

/// Parameters for [`HostBackend`](crate::HostBackend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Fixed working directory commands run in.
    pub workdir: PathBuf,
    /// Per-command timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// One host-directory-to-guest-path bind mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Directory on the host.
    pub host_path: PathBuf,
    /// Where it appears inside the sandbox.
    pub guest_path: String,
}

/// Parameters for [`SandboxBackend`](crate::SandboxBackend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Which isolation driver runs the sandbox.
    #[serde(default)]
    pub engine: SandboxEngine,
    /// Container image to run.
    pub image: String,
    /// One bind mount per configured codebase.
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    /// Credentials directory, mounted read-only.
    #[serde(default)]
    pub credentials: Option<MountSpec>,
    /// Environment variables set inside the sandbox.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Per-command timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Parameters for [`RemoteShellBackend`](crate::RemoteShellBackend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote host name or address.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Private key file; `None` authenticates via the local SSH agent.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Per-command timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_from_toml() {
        let config = GatewayConfig::from_toml(
            r#"
            [backend]
            kind = "host"
            workdir = "/srv/checkout"
            "#,
        )
        .unwrap();

        let BackendConfig::Host(host) = &config.backend else {
            panic!("expected host backend");
        };
        assert_eq!(host.workdir, PathBuf::from("/srv/checkout"));
        // Default applied.
        assert_eq!(host.timeout_secs, 120);
        assert!(config.backend.validate().is_ok());
    }

    #[test]
    fn test_sandbox_config_from_toml() {
        let config = GatewayConfig::from_toml(
            r#"
            [backend]
            kind = "sandbox"
            engine = "podman"
            image = "ops-tools:latest"
            timeout_secs = 30

            [[backend.mounts]]
            host_path = "/srv/checkouts/payments"
            guest_path = "/workspace/payments"

            [backend.credentials]
            host_path = "/home/oncall/.kube"
            guest_path = "/creds"

            [backend.env]
            KUBECONFIG = "/creds/config"
            "#,
        )
        .unwrap();

        let BackendConfig::Sandbox(sandbox) = &config.backend else {
            panic!("expected sandbox backend");
        };
        assert_eq!(sandbox.engine, SandboxEngine::Podman);
        assert_eq!(sandbox.mounts.len(), 1);
        assert_eq!(sandbox.mounts[0].guest_path, "/workspace/payments");
        assert_eq!(
            sandbox.credentials.as_ref().unwrap().guest_path,
            "/creds"
        );
        assert_eq!(sandbox.env["KUBECONFIG"], "/creds/config");
        assert_eq!(sandbox.timeout_secs, 30);
        assert!(config.backend.validate().is_ok());
    }

    #[test]
    fn test_remote_config_from_toml() {
        let config = GatewayConfig::from_toml(
            r#"
            [backend]
            kind = "remote"
            host = "bastion.internal"
            user = "oncall"
            key_path = "/home/oncall/.ssh/id_ed25519"
            "#,
        )
        .unwrap();

        let BackendConfig::Remote(remote) = &config.backend else {
            panic!("expected remote backend");
        };
        assert_eq!(remote.host, "bastion.internal");
        assert_eq!(remote.port, 22);
        assert_eq!(remote.user, "oncall");
        assert!(remote.key_path.is_some());
    }

    #[test]
    fn test_validate_rejects_empty_image() {
        let config = BackendConfig::Sandbox(SandboxConfig {
            engine: SandboxEngine::Docker,
            image: String::new(),
            mounts: Vec::new(),
            credentials: None,
            env: BTreeMap::new(),
            timeout_secs: 120,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_remote_host() {
        let config = BackendConfig::Remote(RemoteConfig {
            host: String::new(),
            port: 22,
            user: "oncall".to_string(),
            key_path: None,
            timeout_secs: 120,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = GatewayConfig {
            backend: BackendConfig::Host(HostConfig {
                workdir: PathBuf::from("/work"),
                timeout_secs: 60,
            }),
        };
        let text = toml::to_string(&config).unwrap();
        let back = GatewayConfig::from_toml(&text).unwrap();
        assert_eq!(back, config);
    }
}
