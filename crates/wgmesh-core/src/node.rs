//! One mesh member.
//!
//! A [`MeshNode`] pairs the declared identity (name, bridge address, SSH and
//! WireGuard endpoints) with the realized tunnel config. On attachment it
//! either adopts the config already on the remote host — the on-disk private
//! key, tunnel address, and listen port win over anything freshly generated —
//! or synthesizes a new one. Peering mutates two nodes symmetrically;
//! convergence (`up`/`down`/`sync`) drives the remote interface toward the
//! in-memory config.

use ipnet::IpNet;
use serde_json::Value;
use tracing::{error, info};

use wgmesh_config::{
    Endpoint, InterfaceConfig, PeerConfig, PresharedKey, PrivateKey, PublicKey, DEFAULT_PORT,
};
use wgmesh_remote::{Transport, WireguardRemote};

use crate::addr;
use crate::document::NodeSpec;
use crate::error::MeshError;
use crate::gretap::{gretap_down, gretap_up};
use crate::toggle::Toggle;
use crate::Result;

/// A realized mesh member: declared identity plus its WireGuard config and
/// remote controller.
#[derive(Debug)]
pub struct MeshNode<T> {
    name: String,
    spec: NodeSpec,
    index: u128,
    mesh_name: String,
    full: bool,
    remote: WireguardRemote<T>,
    config: InterfaceConfig,
}

impl<T: Transport + Clone + Send + Sync + 'static> MeshNode<T> {
    /// Attaches a declared node to a mesh: reads the remote config and
    /// adopts it, or synthesizes a fresh one.
    pub(crate) async fn attach(
        name: String,
        mut spec: NodeSpec,
        mesh_name: &str,
        network: &IpNet,
        full: bool,
        transport: T,
    ) -> Result<Self> {
        let index = addr::ip_index(spec.addr.addr(), network);
        let remote = WireguardRemote::new(transport, format!("wg-{mesh_name}{index}"));

        let config = match remote.config().await? {
            Some(mut config) => {
                // The on-disk identity wins: keep its key, tunnel address,
                // and (when the declaration is silent) its listen port.
                if config.addresses.is_empty() {
                    config.addresses.push(addr::random_ula_net());
                }
                if let (Some(port), None) = (config.listen_port, spec.listen_port) {
                    if port != DEFAULT_PORT {
                        spec.listen_port = Some(port);
                    }
                }
                config
            }
            None => InterfaceConfig::new(PrivateKey::generate())
                .with_address(addr::random_ula_net())
                .with_listen_port(spec.listen_port.unwrap_or(DEFAULT_PORT)),
        };

        Ok(Self {
            name,
            spec,
            index,
            mesh_name: mesh_name.to_string(),
            full,
            remote,
            config,
        })
    }

    /// The node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared node record, including any adopted listen port or
    /// friendly metadata.
    #[must_use]
    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    /// Offset of the bridge address within the mesh network; keys the
    /// deterministic interface naming.
    #[must_use]
    pub fn index(&self) -> u128 {
        self.index
    }

    /// The remote host this node lives on.
    #[must_use]
    pub fn host(&self) -> &str {
        self.remote.host()
    }

    /// The remote interface controller.
    #[must_use]
    pub fn remote(&self) -> &WireguardRemote<T> {
        &self.remote
    }

    /// The desired WireGuard config.
    #[must_use]
    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    /// The node's WireGuard tunnel address (a ULA /128 used only as a
    /// GRETAP endpoint).
    #[must_use]
    pub fn wg_addr(&self) -> &IpNet {
        &self.config.addresses[0]
    }

    /// Friendly names of all configured peers.
    #[must_use]
    pub fn peers(&self) -> Vec<String> {
        self.config
            .peers
            .iter()
            .map(|p| {
                p.friendly_name
                    .clone()
                    .unwrap_or_else(|| p.public_key.to_base64())
            })
            .collect()
    }

    /// The node's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.config.private_key.public_key()
    }

    fn listen_port(&self) -> u16 {
        self.spec.listen_port.unwrap_or(DEFAULT_PORT)
    }

    fn bridge_name(&self) -> String {
        format!("br-{}", self.mesh_name)
    }

    /// Bridge STP priority: `32768 + 4096 * prio`, with the offset derived
    /// from the node index when not declared.
    #[must_use]
    pub fn bridge_priority(&self) -> u32 {
        let prio = self
            .spec
            .prio
            .map_or_else(|| -8 + ((self.index + 15) % 16) as i64, i64::from);
        (32768 + 4096 * prio) as u32
    }

    /// This node rendered as a peer record for the other side.
    fn as_peer(&self, preshared_key: PresharedKey) -> PeerConfig {
        PeerConfig {
            public_key: self.public_key(),
            preshared_key: Some(preshared_key),
            allowed_ips: vec![*self.wg_addr()],
            endpoint: Some(Endpoint::new(
                self.spec.endpoint.host.clone(),
                Some(self.spec.endpoint.port_or_default()),
            )),
            friendly_name: Some(self.name.clone()),
            friendly_json: self.spec.json.clone(),
        }
    }

    /// Probes whether this pair can exchange WireGuard traffic in at least
    /// one direction.
    ///
    /// Uses the declared endpoints and listen ports, so it is only reliable
    /// while WireGuard is down on the probed side.
    pub async fn can_peer(&self, other: &Self) -> Result<bool> {
        info!("[{}] [can_peer] {}", self.name, other.name);

        if !self.remote.is_up().await?
            && self
                .remote
                .udping_from(
                    self.listen_port(),
                    &self.spec.endpoint.host,
                    self.spec.endpoint.port_or_default(),
                    other.remote(),
                )
                .await?
        {
            return Ok(true);
        }

        Ok(!other.remote.is_up().await?
            && other
                .remote
                .udping_from(
                    other.listen_port(),
                    &other.spec.endpoint.host,
                    other.spec.endpoint.port_or_default(),
                    self.remote(),
                )
                .await?)
    }

    /// Peers this node with another.
    ///
    /// An already-peered pair is refreshed: the stored tunnel addresses are
    /// validated and the friendly metadata reconciled. A new pair gets one
    /// shared preshared key, symmetric peer records, and the GRETAP
    /// fragments that extend each side's bridge to the other. In a partial
    /// mesh, new pairs are skipped unless the reachability probe passes.
    ///
    /// # Errors
    ///
    /// [`MeshError::SelfPeering`] when both sides hold the same key;
    /// [`MeshError::PeerAddressMismatch`] when an existing peer record
    /// disagrees with a tunnel address.
    pub async fn peer_with(&mut self, other: &mut Self) -> Result<()> {
        let this_pubkey = self.public_key();
        let that_pubkey = other.public_key();

        if this_pubkey == that_pubkey {
            return Err(MeshError::SelfPeering);
        }

        if other.config.peer(&this_pubkey).is_some() && self.config.peer(&that_pubkey).is_some() {
            {
                let this_peer = other.config.peer(&this_pubkey);
                let that_peer = self.config.peer(&that_pubkey);
                let this_ok = this_peer
                    .is_some_and(|p| p.allowed_ips.first() == Some(self.wg_addr()));
                let that_ok = that_peer
                    .is_some_and(|p| p.allowed_ips.first() == Some(other.wg_addr()));
                if !this_ok || !that_ok {
                    return Err(MeshError::PeerAddressMismatch);
                }
            }

            if let Some(peer) = other.config.peer_mut(&this_pubkey) {
                reconcile_peer_meta(&self.name, &mut self.spec.json, peer);
            }
            if let Some(peer) = self.config.peer_mut(&that_pubkey) {
                reconcile_peer_meta(&other.name, &mut other.spec.json, peer);
            }
            return Ok(());
        }

        if !self.full && !self.can_peer(other).await? {
            return Ok(());
        }

        // One key for both directions, generated on the side that creates
        // the peering.
        let preshared_key = PresharedKey::generate();
        let this_peer = self.as_peer(preshared_key.clone());
        let that_peer = other.as_peer(preshared_key);

        let this_addr = self.wg_addr().addr();
        let that_addr = other.wg_addr().addr();

        self.config.add_peer(that_peer);
        other.config.add_peer(this_peer);

        let this_gretap = format!("gt-{}{}", self.mesh_name, other.index);
        let that_gretap = format!("gt-{}{}", other.mesh_name, self.index);

        self.config.postup.extend(gretap_up(
            &this_gretap,
            &self.bridge_name(),
            self.bridge_priority(),
            this_addr,
            that_addr,
            &self.spec.addr,
        ));
        other.config.postup.extend(gretap_up(
            &that_gretap,
            &other.bridge_name(),
            other.bridge_priority(),
            that_addr,
            this_addr,
            &other.spec.addr,
        ));

        self.config
            .predown
            .extend(gretap_down(&this_gretap, &self.bridge_name(), true));
        other
            .config
            .predown
            .extend(gretap_down(&that_gretap, &other.bridge_name(), true));

        Ok(())
    }

    /// Drives the interface up.
    ///
    /// `write` decides whether the desired config is pushed first: `Force`
    /// always, `Skip` never, `Auto` when the remote config is missing or
    /// differs. A failed `wg-quick up` after a fresh write removes the
    /// written config again, so a failed node leaves no half-state behind.
    pub async fn up(&self, write: Toggle) -> bool {
        let iface = self.remote.interface();

        let write = match write {
            Toggle::Force => true,
            Toggle::Skip => false,
            Toggle::Auto => match self.remote.config().await {
                Ok(remote_config) => remote_config.as_ref() != Some(&self.config),
                Err(e) => {
                    error!("[{}] [up] !! {iface}: {e}", self.name);
                    return false;
                }
            },
        };

        if write {
            if let Err(e) = self.remote.config_write(&self.config).await {
                error!("[{}] [up] !! config_write failed: {e}", self.name);
                return false;
            }
        }

        match self.remote.is_up().await {
            Ok(true) => {
                if !write {
                    return true;
                }
                // Bounce so wg-quick re-reads the config we just wrote.
                let _ = self.remote.down().await;
            }
            Ok(false) => {}
            Err(e) => {
                error!("[{}] [up] !! {iface}: {e}", self.name);
                return false;
            }
        }

        match self.remote.up().await {
            Ok(out) => {
                info!("[{}] [up] ++ {iface}:\n{out}", self.name);
                true
            }
            Err(e) => {
                error!("[{}] [up] !! {iface}:\n{e}", self.name);
                if write {
                    if let Err(e) = self.remote.config_remove().await {
                        error!("[{}] [up] !! config_remove failed: {e}", self.name);
                    }
                }
                false
            }
        }
    }

    /// Takes the interface down.
    ///
    /// `remove` decides whether the config file goes too: `Force` always,
    /// `Skip` never, `Auto` when a config exists. Failures are logged and
    /// reported through the return value; tear-down never unwinds.
    pub async fn down(&self, remove: Toggle) -> bool {
        let iface = self.remote.interface();

        match self.remote.is_up().await {
            Ok(true) => match self.remote.down().await {
                Ok(out) => info!("[{}] [down] -- {iface}:\n{out}", self.name),
                Err(e) => {
                    error!("[{}] [down] !! {iface}:\n{e}", self.name);
                    let now_down = matches!(self.remote.is_up().await, Ok(false));
                    if now_down && remove.force() {
                        if let Err(e) = self.remote.config_remove().await {
                            error!("[{}] [down] !! config_remove failed: {e}", self.name);
                        }
                    }
                    return false;
                }
            },
            Ok(false) => {}
            Err(e) => {
                error!("[{}] [down] !! {iface}: {e}", self.name);
                return false;
            }
        }

        let remove = match remove {
            Toggle::Force => true,
            Toggle::Skip => false,
            Toggle::Auto => match self.remote.config_exists().await {
                Ok(exists) => exists,
                Err(e) => {
                    error!("[{}] [down] !! {iface}: {e}", self.name);
                    return false;
                }
            },
        };

        if remove {
            if let Err(e) = self.remote.config_remove().await {
                error!("[{}] [down] !! config_remove failed: {e}", self.name);
                return false;
            }
        }

        true
    }

    /// Reconciles the remote config with the desired one.
    ///
    /// Returns whether anything changed. When the configs differ, the
    /// interface is restarted if `up` forces it (or `Auto` finds it live);
    /// otherwise only the config file is rewritten.
    pub async fn sync(&self, up: Toggle) -> bool {
        let iface = self.remote.interface();

        let remote_config = match self.remote.config().await {
            Ok(config) => config,
            Err(e) => {
                error!("[{}] [sync] !! {iface}: {e}", self.name);
                return false;
            }
        };

        if remote_config.as_ref() != Some(&self.config) {
            let bring_up = match up {
                Toggle::Force => true,
                Toggle::Skip => false,
                Toggle::Auto => matches!(self.remote.is_up().await, Ok(true)),
            };

            if bring_up {
                return self.up(Toggle::Force).await;
            }

            if let Err(e) = self.remote.config_write(&self.config).await {
                error!("[{}] [sync] !! config_write failed: {e}", self.name);
                return false;
            }
            info!("[{}] [sync] ++ {iface}", self.name);
            return true;
        }

        false
    }
}

/// Reconciles a node's declared metadata with the peer record the other
/// side stores for it: adopt the stored metadata when the node has none,
/// overwrite the stored copy when the node's differs, and refresh the
/// friendly name.
fn reconcile_peer_meta(name: &str, json: &mut Option<Value>, peer: &mut PeerConfig) {
    match (json.as_ref(), peer.friendly_json.as_ref()) {
        (None, Some(peer_json)) => *json = Some(peer_json.clone()),
        (Some(node_json), peer_json) if peer_json != Some(node_json) => {
            peer.friendly_json = json.clone();
        }
        _ => {}
    }

    if peer.friendly_name.as_deref() != Some(name) {
        peer.friendly_name = Some(name.to_string());
    }
}
