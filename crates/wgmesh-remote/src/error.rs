//! Error types for remote execution.

use thiserror::Error;

/// Errors from the SSH layer or the remote config file handling.
///
/// A command that merely exits non-zero is *not* an error at this level; it
/// is reported through [`crate::CmdOutput::ok`]. `RemoteError` means the
/// transport itself failed or a contract was violated.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The SSH session could not be established or died mid-command.
    #[error("ssh: {0}")]
    Ssh(String),

    /// The command did not finish within the transport timeout.
    #[error("command timed out after {seconds}s: {command}")]
    Timeout {
        /// Configured timeout.
        seconds: u64,
        /// The command that was running.
        command: String,
    },

    /// A spawned transport task could not be joined.
    #[error("task join failed: {0}")]
    Join(String),

    /// A command that must succeed exited non-zero.
    #[error("remote command failed: {detail}")]
    CommandFailed {
        /// Captured stderr (or stdout) of the failing command.
        detail: String,
    },

    /// The remote config file exists but could not be parsed.
    #[error(transparent)]
    Config(#[from] wgmesh_config::ConfigError),

    /// Refusing to remove a config while its interface is still up.
    #[error("cannot remove config while {interface} is up")]
    InterfaceUp {
        /// The live interface.
        interface: String,
    },
}

/// Failure of a `wg-quick`/`wg` invocation, carried as a value.
///
/// [`crate::WireguardRemote::up`] and friends return
/// `Result<String, ShellError>` so callers branch on the outcome instead of
/// unwinding; the `Command` variant carries the combined stdout+stderr the
/// tool printed.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The remote tool ran and exited non-zero.
    #[error("{output}")]
    Command {
        /// Combined stdout+stderr of the failed invocation.
        output: String,
    },

    /// The transport failed before the tool could report anything.
    #[error(transparent)]
    Transport(#[from] RemoteError),
}
