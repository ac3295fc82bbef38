//! The shell transport seam.
//!
//! [`Transport`] abstracts "run this command on that host"; [`SshTransport`]
//! implements it over a persistent `openssh` multiplexed session. Commands
//! run through `bash -c` so redirections and heredocs behave the same on
//! every host, and are wrapped in `sudo` when root is required but the login
//! user is not root.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openssh::{KnownHosts, Session};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::RemoteError;
use crate::Result;

/// Default per-command timeout for SSH execution.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured result of a remote command.
#[derive(Clone, Debug, Default)]
pub struct CmdOutput {
    /// Whether the command exited zero.
    pub ok: bool,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Executes shell commands on one remote host.
///
/// Non-zero exits are reported in [`CmdOutput::ok`]; `Err` is reserved for
/// the transport itself failing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The host this transport talks to, for logging and reporting.
    fn host(&self) -> &str;

    /// Whether the login user is root (commands then skip `sudo`).
    fn is_root(&self) -> bool;

    /// Runs `cmd` through the remote shell, escalating with `sudo` when
    /// `root` is requested and the login user is not root.
    async fn run(&self, cmd: &str, root: bool) -> Result<CmdOutput>;
}

/// SSH connection declaration for one node.
///
/// Either a plain destination string (`host`, `user@host`,
/// `ssh://user@host:port`) or a structured record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SshSpec {
    /// Destination string, passed to `ssh` as-is.
    Target(String),
    /// Structured connection record.
    Opts {
        /// Remote host name or address.
        host: String,
        /// Login user; the local default applies when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        /// SSH port; 22 when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
}

impl SshSpec {
    /// The bare host name, without user or port.
    #[must_use]
    pub fn host(&self) -> &str {
        match self {
            Self::Target(target) => {
                let target = target.strip_prefix("ssh://").unwrap_or(target);
                let target = target.rsplit_once('@').map_or(target, |(_, host)| host);
                target.split_once(':').map_or(target, |(host, _)| host)
            }
            Self::Opts { host, .. } => host,
        }
    }

    /// The explicit login user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::Target(target) => {
                let target = target.strip_prefix("ssh://").unwrap_or(target);
                target.rsplit_once('@').map(|(user, _)| user)
            }
            Self::Opts { user, .. } => user.as_deref(),
        }
    }

    /// Whether commands on this host already run as root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.user() == Some("root")
    }

    /// The destination string handed to the SSH layer.
    #[must_use]
    pub fn destination(&self) -> String {
        match self {
            Self::Target(target) => target.clone(),
            Self::Opts { host, user, port } => match (user, port) {
                (Some(user), Some(port)) => format!("ssh://{user}@{host}:{port}"),
                (Some(user), None) => format!("{user}@{host}"),
                (None, Some(port)) => format!("ssh://{host}:{port}"),
                (None, None) => host.clone(),
            },
        }
    }
}

struct SshInner {
    spec: SshSpec,
    timeout: Duration,
    session: OnceCell<Session>,
}

/// A [`Transport`] over one persistent, lazily-established SSH session.
#[derive(Clone)]
pub struct SshTransport {
    inner: Arc<SshInner>,
}

impl SshTransport {
    /// Creates a transport for the given connection declaration.
    ///
    /// The session is established on first use and reused afterwards.
    #[must_use]
    pub fn new(spec: SshSpec) -> Self {
        Self::with_timeout(spec, DEFAULT_COMMAND_TIMEOUT)
    }

    /// Creates a transport with a custom per-command timeout.
    #[must_use]
    pub fn with_timeout(spec: SshSpec, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SshInner {
                spec,
                timeout,
                session: OnceCell::new(),
            }),
        }
    }

    async fn session(&self) -> Result<&Session> {
        self.inner
            .session
            .get_or_try_init(|| async {
                let destination = self.inner.spec.destination();
                debug!("connecting to {destination}");
                Session::connect_mux(&destination, KnownHosts::Add)
                    .await
                    .map_err(|e| RemoteError::Ssh(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn host(&self) -> &str {
        self.inner.spec.host()
    }

    fn is_root(&self) -> bool {
        self.inner.spec.is_root()
    }

    async fn run(&self, cmd: &str, root: bool) -> Result<CmdOutput> {
        let session = self.session().await?;

        let mut command = if root && !self.is_root() {
            let mut command = session.command("sudo");
            command.arg("bash");
            command
        } else {
            session.command("bash")
        };
        command.arg("-c").arg(cmd);

        let output = tokio::time::timeout(self.inner.timeout, command.output())
            .await
            .map_err(|_| RemoteError::Timeout {
                seconds: self.inner.timeout.as_secs(),
                command: cmd.to_string(),
            })?
            .map_err(|e| RemoteError::Ssh(e.to_string()))?;

        Ok(CmdOutput {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Opens a [`Transport`] for a node's SSH declaration.
///
/// The mesh is generic over this seam so tests can hand out in-memory
/// transports instead of real sessions.
#[async_trait]
pub trait Dial: Send + Sync {
    /// The transport this dialer produces.
    type Transport: Transport + Clone + Send + Sync + 'static;

    /// Produces a transport for the given declaration.
    async fn dial(&self, ssh: &SshSpec) -> Result<Self::Transport>;
}

/// Production dialer producing [`SshTransport`]s.
#[derive(Clone, Debug)]
pub struct SshDialer {
    /// Per-command timeout applied to every produced transport.
    pub timeout: Duration,
}

impl Default for SshDialer {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

#[async_trait]
impl Dial for SshDialer {
    type Transport = SshTransport;

    async fn dial(&self, ssh: &SshSpec) -> Result<SshTransport> {
        Ok(SshTransport::with_timeout(ssh.clone(), self.timeout))
    }
}
