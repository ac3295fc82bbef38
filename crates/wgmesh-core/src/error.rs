//! Error types for mesh validation and peering.

use ipnet::IpNet;
use thiserror::Error;

/// Errors raised by mesh construction, validation, and peering.
///
/// Validation errors fire before any remote side effect; peering errors
/// abort the operation in flight. Per-node convergence failures are *not*
/// errors — they are reported through the boolean operation results and
/// trigger rollback at the mesh level.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Mesh name carries characters unusable in interface names.
    #[error("mesh name {name:?} must match [a-z0-9-]")]
    InvalidMeshName {
        /// The offending name.
        name: String,
    },

    /// The overlay network has no host addresses.
    #[error("mesh network {network} has no host addresses")]
    TrivialNetwork {
        /// The offending network.
        network: IpNet,
    },

    /// A node was declared with an empty name.
    #[error("node names must be non-empty")]
    EmptyNodeName,

    /// A node's explicit name disagrees with its key in the node map.
    #[error("node name {name:?} does not match its key {key:?}")]
    NodeNameMismatch {
        /// The declared name.
        name: String,
        /// The map key.
        key: String,
    },

    /// A node's bridge address lies outside the mesh network.
    #[error("node {node}: address {addr} is not in the mesh network {network}")]
    AddrOutsideNetwork {
        /// The node.
        node: String,
        /// Its declared address.
        addr: IpNet,
        /// The mesh network.
        network: IpNet,
    },

    /// Two nodes share a bridge address.
    #[error("duplicate node address {addr}")]
    DuplicateAddr {
        /// The shared address.
        addr: IpNet,
    },

    /// A node's bridge priority offset is outside [-8, 7].
    #[error("node {node}: prio {prio} out of range [-8, 7]")]
    PrioOutOfRange {
        /// The node.
        node: String,
        /// The declared offset.
        prio: i8,
    },

    /// Two nodes resolved to the same WireGuard identity.
    #[error("cannot peer a node with itself")]
    SelfPeering,

    /// A pre-existing peer record carries the wrong tunnel address.
    #[error("existing peering WireGuard addresses do not match")]
    PeerAddressMismatch,

    /// Too few subnets or hosts available for an address plan.
    #[error("cannot derive {count} addresses from {network}")]
    AddressPlanExhausted {
        /// Requested count.
        count: usize,
        /// Source network.
        network: IpNet,
    },

    /// A remote config could not be parsed.
    #[error(transparent)]
    Config(#[from] wgmesh_config::ConfigError),

    /// The transport failed.
    #[error(transparent)]
    Remote(#[from] wgmesh_remote::RemoteError),
}
