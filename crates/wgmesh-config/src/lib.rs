//! WireGuard configuration model for the wgmesh tools.
//!
//! Provides Curve25519 key types, endpoint parsing, and the wg-quick
//! configuration format (generation and parsing) used to describe each mesh
//! member's tunnel interface, including `PostUp`/`PreDown` shell fragments
//! and `# friendly_name` / `# friendly_json` peer metadata comments.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod keys;

pub use config::{InterfaceConfig, PeerConfig};
pub use endpoint::{Endpoint, Host, DEFAULT_PORT};
pub use error::ConfigError;
pub use keys::{PresharedKey, PrivateKey, PublicKey, KEY_LEN};

/// Crate-wide result alias.
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;
