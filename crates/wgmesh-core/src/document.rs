//! The declarative mesh document.
//!
//! Operators describe a mesh as a YAML or JSON document: the overlay
//! network, a full/partial peering policy, and one entry per node. This
//! module is the serde model of that document plus its validation, which
//! runs before any remote call.

use std::collections::BTreeMap;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use wgmesh_config::Endpoint;
use wgmesh_remote::SshSpec;

use crate::error::MeshError;
use crate::Result;

/// One declared mesh member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node name; defaults to the key in the mesh's node map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Bridge address on the overlay, in interface form (`a.b.c.d/p`).
    /// Its network must equal the mesh network.
    pub addr: IpNet,

    /// SSH connection to the node.
    pub ssh: SshSpec,

    /// Public (or mesh-reachable) WireGuard endpoint.
    pub endpoint: Endpoint,

    /// WireGuard listen port; 51820 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,

    /// Bridge STP priority offset in [-8, 7]; derived from the node index
    /// when absent. Any spread between nodes keeps root-bridge election
    /// deterministic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prio: Option<i8>,

    /// Opaque metadata stamped into every peer entry as friendly JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

/// The declared mesh: overlay network, peering policy, and members.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshSpec {
    /// Mesh name; prefixes every `wg-`, `gt-`, and `br-` interface.
    pub name: String,

    /// The overlay network shared by all node bridges.
    pub network: IpNet,

    /// Peer every pair unconditionally; when false, pairs are gated by a
    /// UDP reachability probe.
    #[serde(default = "default_full")]
    pub full: bool,

    /// Mesh members, keyed by node name.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeSpec>,
}

fn default_full() -> bool {
    true
}

impl MeshSpec {
    /// Validates the declaration.
    ///
    /// # Errors
    ///
    /// Rejects malformed mesh names, trivial networks, addresses outside
    /// the mesh network, duplicate addresses, out-of-range priorities, and
    /// node names that disagree with their map key.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(MeshError::InvalidMeshName {
                name: self.name.clone(),
            });
        }

        if self.network.prefix_len() >= self.network.max_prefix_len() {
            return Err(MeshError::TrivialNetwork {
                network: self.network,
            });
        }

        let network = self.network.trunc();
        let mut seen = std::collections::BTreeSet::new();

        for (key, node) in &self.nodes {
            if key.is_empty() {
                return Err(MeshError::EmptyNodeName);
            }
            if let Some(ref name) = node.name {
                if name != key {
                    return Err(MeshError::NodeNameMismatch {
                        name: name.clone(),
                        key: key.clone(),
                    });
                }
            }
            if node.addr.trunc() != network {
                return Err(MeshError::AddrOutsideNetwork {
                    node: key.clone(),
                    addr: node.addr,
                    network,
                });
            }
            if !seen.insert(node.addr.addr()) {
                return Err(MeshError::DuplicateAddr { addr: node.addr });
            }
            if let Some(prio) = node.prio {
                if !(-8..=7).contains(&prio) {
                    return Err(MeshError::PrioOutOfRange {
                        node: key.clone(),
                        prio,
                    });
                }
            }
        }

        Ok(())
    }
}
