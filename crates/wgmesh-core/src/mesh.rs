//! The mesh: a name-ordered collection of nodes and the orchestrated verbs.
//!
//! Nodes are held sorted by name, and `pairs` enumeration is lexicographic,
//! so peer insertion order — and therefore every generated config — is
//! reproducible across runs with identical input. That stability is what
//! makes diff-based sync converge.

use std::collections::BTreeMap;

use ipnet::IpNet;
use serde::Serialize;
use tracing::debug;

use wgmesh_remote::{Dial, Transport};

use crate::document::MeshSpec;
use crate::error::MeshError;
use crate::node::MeshNode;
use crate::toggle::Toggle;
use crate::Result;

/// Snapshot of one node's observed state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeInfo {
    /// SSH host the node lives on.
    pub host: String,
    /// Whether the WireGuard interface is live.
    pub is_up: bool,
    /// Whether the config file exists on disk.
    pub config_exists: bool,
    /// Bridge address on the overlay.
    pub address: String,
    /// Friendly names of configured peers.
    pub peers: Vec<String>,
}

/// Snapshot of the whole mesh: fractional health plus per-node detail.
#[derive(Clone, Debug, Serialize)]
pub struct MeshInfo {
    /// Mesh name.
    pub name: String,
    /// Overlay network.
    pub network: String,
    /// Fraction of nodes whose interface is live.
    pub is_up: f64,
    /// Fraction of nodes with a config on disk.
    pub config_exists: f64,
    /// Per-node snapshots, keyed by node name.
    pub nodes: BTreeMap<String, NodeInfo>,
}

/// A realized mesh.
#[derive(Debug)]
pub struct Mesh<T> {
    name: String,
    network: IpNet,
    full: bool,
    nodes: Vec<MeshNode<T>>,
}

impl<T: Transport + Clone + Send + Sync + 'static> Mesh<T> {
    /// Opens a declared mesh: validates it, dials every node, and attaches
    /// each one (adopting any config already on its host).
    pub async fn open<D>(spec: MeshSpec, dialer: &D) -> Result<Self>
    where
        D: Dial<Transport = T>,
    {
        spec.validate()?;
        let MeshSpec {
            name,
            network,
            full,
            nodes: node_specs,
        } = spec;
        let network = network.trunc();

        let mut nodes = Vec::with_capacity(node_specs.len());
        for (node_name, node_spec) in node_specs {
            let transport = dialer.dial(&node_spec.ssh).await?;
            nodes.push(
                MeshNode::attach(node_name, node_spec, &name, &network, full, transport).await?,
            );
        }

        Ok(Self {
            name,
            network,
            full,
            nodes,
        })
    }

    /// Mesh name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overlay network.
    #[must_use]
    pub fn network(&self) -> &IpNet {
        &self.network
    }

    /// Whether every pair is peered unconditionally.
    #[must_use]
    pub fn full(&self) -> bool {
        self.full
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the mesh has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, sorted by name.
    #[must_use]
    pub fn nodes(&self) -> &[MeshNode<T>] {
        &self.nodes
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&MeshNode<T>> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// The declared document, as canonicalized by this mesh.
    #[must_use]
    pub fn to_spec(&self) -> MeshSpec {
        MeshSpec {
            name: self.name.clone(),
            network: self.network,
            full: self.full,
            nodes: self
                .nodes
                .iter()
                .map(|n| (n.name().to_string(), n.spec().clone()))
                .collect(),
        }
    }

    /// Peers every unordered pair, in lexicographic order.
    pub async fn peer_all(&mut self) -> Result<()> {
        for i in 0..self.nodes.len() {
            for j in i + 1..self.nodes.len() {
                let (head, tail) = self.nodes.split_at_mut(j);
                head[i].peer_with(&mut tail[0]).await?;
            }
        }
        Ok(())
    }

    async fn needs_peering(&self) -> Result<bool> {
        for node in &self.nodes {
            if node.config().peers.is_empty() || !node.remote().config_exists().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Brings the whole mesh up.
    ///
    /// Peer lists are completed first when writing is allowed and any node
    /// is missing its config or peers. Nodes come up in name order; on the
    /// first failure every node already up is compensated with
    /// `down(remove=write)` in reverse order and the verb reports `false`.
    /// An empty mesh reports `None`.
    pub async fn up(&mut self, write: Toggle) -> Result<Option<bool>> {
        if !write.skip() && self.needs_peering().await? {
            self.peer_all().await?;
        }

        let mut up_nodes: Vec<usize> = Vec::new();
        for i in 0..self.nodes.len() {
            if self.nodes[i].up(write).await {
                up_nodes.push(i);
            } else {
                for &k in up_nodes.iter().rev() {
                    debug!("[{}] [up] rolling back", self.nodes[k].name());
                    let _ = self.nodes[k].down(write).await;
                }
                return Ok(Some(false));
            }
        }

        Ok(if up_nodes.is_empty() { None } else { Some(true) })
    }

    /// Takes every node down, best-effort; true only when all succeed.
    pub async fn down(&self, remove: Toggle) -> bool {
        let mut ok = true;
        for node in &self.nodes {
            ok &= node.down(remove).await;
        }
        ok
    }

    /// Syncs every node, best-effort; true only when every node changed.
    pub async fn sync(&self, up: Toggle) -> bool {
        let mut changed = true;
        for node in &self.nodes {
            changed &= node.sync(up).await;
        }
        changed
    }

    /// Writes every node's config.
    pub async fn config_write_all(&self) -> Result<()> {
        for node in &self.nodes {
            node.remote().config_write(node.config()).await?;
        }
        Ok(())
    }

    /// Removes every node's config.
    pub async fn config_remove_all(&self) -> Result<()> {
        for node in &self.nodes {
            node.remote().config_remove().await?;
        }
        Ok(())
    }

    /// Fraction of nodes whose interface is live.
    pub async fn is_up(&self) -> f64 {
        self.fraction(|up, _| up).await
    }

    /// Fraction of nodes with a config on disk.
    pub async fn config_exists(&self) -> f64 {
        self.fraction(|_, exists| exists).await
    }

    async fn fraction(&self, pick: impl Fn(bool, bool) -> bool) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let mut count = 0usize;
        for node in &self.nodes {
            let up = node.remote().is_up().await.unwrap_or(false);
            let exists = node.remote().config_exists().await.unwrap_or(false);
            if pick(up, exists) {
                count += 1;
            }
        }
        count as f64 / self.nodes.len() as f64
    }

    /// Structured snapshot of the mesh and every node.
    pub async fn info(&self) -> MeshInfo {
        let mut nodes = BTreeMap::new();
        let mut up_count = 0usize;
        let mut exists_count = 0usize;

        for node in &self.nodes {
            let is_up = node.remote().is_up().await.unwrap_or(false);
            let config_exists = node.remote().config_exists().await.unwrap_or(false);
            up_count += usize::from(is_up);
            exists_count += usize::from(config_exists);
            nodes.insert(
                node.name().to_string(),
                NodeInfo {
                    host: node.host().to_string(),
                    is_up,
                    config_exists,
                    address: node.spec().addr.addr().to_string(),
                    peers: node.peers(),
                },
            );
        }

        let total = self.nodes.len().max(1) as f64;
        MeshInfo {
            name: self.name.clone(),
            network: self.network.to_string(),
            is_up: up_count as f64 / total,
            config_exists: exists_count as f64 / total,
            nodes,
        }
    }

    /// `wg show` for every node, concatenated.
    pub async fn show(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let status = match node.remote().show().await {
                Ok(text) => text,
                Err(e) => e.to_string(),
            };
            out.push_str(node.name());
            out.push('\n');
            out.push_str(&status);
            out.push_str("\n\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NodeSpec;
    use wgmesh_remote::{Lab, SshSpec};

    fn node_spec(addr: &str, endpoint: &str, host: &str) -> NodeSpec {
        NodeSpec {
            name: None,
            addr: addr.parse().expect("valid cidr"),
            ssh: SshSpec::Target(format!("root@{host}")),
            endpoint: endpoint.parse().expect("valid endpoint"),
            listen_port: None,
            prio: None,
            json: None,
        }
    }

    fn three_node_spec() -> MeshSpec {
        let mut nodes = BTreeMap::new();
        nodes.insert("a".to_string(), node_spec("10.0.0.1/24", "203.0.113.1", "mesh-a"));
        nodes.insert("b".to_string(), node_spec("10.0.0.2/24", "203.0.113.2", "mesh-b"));
        nodes.insert("c".to_string(), node_spec("10.0.0.3/24", "203.0.113.3", "mesh-c"));
        MeshSpec {
            name: "m".to_string(),
            network: "10.0.0.0/24".parse().expect("valid network"),
            full: true,
            nodes,
        }
    }

    #[tokio::test]
    async fn open_sorts_nodes_by_name() {
        let lab = Lab::new();
        let mesh = Mesh::open(three_node_spec(), &lab).await.expect("open");
        let names: Vec<&str> = mesh.nodes().iter().map(MeshNode::name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(mesh.len(), 3);
    }

    #[tokio::test]
    async fn peer_all_builds_complete_graph() {
        let lab = Lab::new();
        let mut mesh = Mesh::open(three_node_spec(), &lab).await.expect("open");
        mesh.peer_all().await.expect("peer_all");

        for node in mesh.nodes() {
            assert_eq!(node.config().peers.len(), 2);
            // one GRETAP fragment set (4 up lines, 3 down lines) per peer
            assert_eq!(node.config().postup.len(), 8);
            assert_eq!(node.config().predown.len(), 6);
        }
    }

    #[tokio::test]
    async fn peer_all_is_idempotent() {
        let lab = Lab::new();
        let mut mesh = Mesh::open(three_node_spec(), &lab).await.expect("open");
        mesh.peer_all().await.expect("first");
        let configs: Vec<_> = mesh.nodes().iter().map(|n| n.config().clone()).collect();

        mesh.peer_all().await.expect("second");
        let again: Vec<_> = mesh.nodes().iter().map(|n| n.config().clone()).collect();
        assert_eq!(configs, again);
    }

    #[tokio::test]
    async fn empty_mesh_up_reports_none() {
        let lab = Lab::new();
        let spec = MeshSpec {
            name: "m".to_string(),
            network: "10.0.0.0/24".parse().expect("valid network"),
            full: true,
            nodes: BTreeMap::new(),
        };
        let mut mesh = Mesh::open(spec, &lab).await.expect("open");
        assert_eq!(mesh.up(Toggle::Auto).await.expect("up"), None);
        assert!((mesh.is_up().await - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn to_spec_roundtrips_the_document() {
        let lab = Lab::new();
        let spec = three_node_spec();
        let mesh = Mesh::open(spec.clone(), &lab).await.expect("open");
        assert_eq!(mesh.to_spec(), spec);
    }
}
