//! Mesh compiler and convergence engine.
//!
//! A mesh is declared as a set of nodes, each with an SSH endpoint, a public
//! WireGuard endpoint, and a bridge address inside the shared overlay
//! network. This crate compiles that declaration into per-node WireGuard
//! configs — peers, preshared keys, and the `PostUp`/`PreDown` fragments
//! that stitch GRETAP tunnels into a per-node bridge — and drives every
//! remote host toward the declared state, with rollback when a bring-up
//! fails partway.

pub mod addr;
pub mod document;
pub mod error;
pub mod gretap;
pub mod mesh;
pub mod node;
pub mod toggle;

pub use document::{MeshSpec, NodeSpec};
pub use error::MeshError;
pub use mesh::{Mesh, MeshInfo, NodeInfo};
pub use node::MeshNode;
pub use toggle::Toggle;

/// Crate-wide result alias.
pub type Result<T, E = MeshError> = std::result::Result<T, E>;
