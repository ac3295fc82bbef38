//! Remote execution for wgmesh.
//!
//! Every mesh verb ultimately turns into shell commands on the member hosts.
//! This crate provides the [`Transport`] seam those commands travel through:
//! a production [`SshTransport`] backed by a persistent `openssh` session,
//! and an in-memory [`lab`] fleet used by tests. On top of the transport sits
//! [`WireguardRemote`], the controller for one remote WireGuard interface and
//! its `/etc/wireguard` config file.

pub mod error;
pub mod lab;
pub mod transport;
pub mod wireguard;

pub use error::{RemoteError, ShellError};
pub use lab::{FakeTransport, Lab};
pub use transport::{CmdOutput, Dial, SshDialer, SshSpec, SshTransport, Transport};
pub use wireguard::WireguardRemote;

/// Crate-wide result alias.
pub type Result<T, E = RemoteError> = std::result::Result<T, E>;
