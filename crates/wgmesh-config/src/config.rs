//! wg-quick configuration generation and parsing.
//!
//! The on-disk format is the INI-style file consumed by `wg-quick(8)`:
//! an `[Interface]` section carrying the private key, tunnel address, listen
//! port and `PostUp`/`PreDown` hook lines, followed by one `[Peer]` section
//! per peer. Peer metadata rides along as `# friendly_name` and
//! `# friendly_json` comments, which survive a parse/serialize round trip.

use std::fmt::Write as FmtWrite;

use ipnet::IpNet;

use crate::endpoint::Endpoint;
use crate::error::ConfigError;
use crate::keys::{PresharedKey, PrivateKey, PublicKey};
use crate::Result;

/// Configuration for one WireGuard interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// The interface's private key.
    pub private_key: PrivateKey,
    /// Addresses assigned to the interface.
    pub addresses: Vec<IpNet>,
    /// UDP listen port.
    pub listen_port: Option<u16>,
    /// Configured peers, in insertion order.
    pub peers: Vec<PeerConfig>,
    /// Shell lines run by `wg-quick` after the interface comes up.
    pub postup: Vec<String>,
    /// Shell lines run by `wg-quick` before the interface goes down.
    pub predown: Vec<String>,
}

impl InterfaceConfig {
    /// Creates a new interface configuration with the given private key.
    #[must_use]
    pub fn new(private_key: PrivateKey) -> Self {
        Self {
            private_key,
            addresses: Vec::new(),
            listen_port: None,
            peers: Vec::new(),
            postup: Vec::new(),
            predown: Vec::new(),
        }
    }

    /// Adds an address.
    #[must_use]
    pub fn with_address(mut self, address: IpNet) -> Self {
        self.addresses.push(address);
        self
    }

    /// Sets the listen port.
    #[must_use]
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    /// Looks up a peer by public key.
    #[must_use]
    pub fn peer(&self, public_key: &PublicKey) -> Option<&PeerConfig> {
        self.peers.iter().find(|p| &p.public_key == public_key)
    }

    /// Looks up a peer by public key, mutably.
    pub fn peer_mut(&mut self, public_key: &PublicKey) -> Option<&mut PeerConfig> {
        self.peers.iter_mut().find(|p| &p.public_key == public_key)
    }

    /// Inserts a peer, replacing any existing entry with the same public key.
    pub fn add_peer(&mut self, peer: PeerConfig) {
        match self.peer_mut(&peer.public_key) {
            Some(existing) => *existing = peer,
            None => self.peers.push(peer),
        }
    }

    /// Serializes to wg-quick format.
    #[must_use]
    pub fn to_wgquick(&self) -> String {
        let mut output = String::new();

        output.push_str("[Interface]\n");
        let _ = writeln!(output, "PrivateKey = {}", self.private_key.to_base64());
        for addr in &self.addresses {
            let _ = writeln!(output, "Address = {addr}");
        }
        if let Some(port) = self.listen_port {
            let _ = writeln!(output, "ListenPort = {port}");
        }
        for line in &self.postup {
            let _ = writeln!(output, "PostUp = {line}");
        }
        for line in &self.predown {
            let _ = writeln!(output, "PreDown = {line}");
        }

        for peer in &self.peers {
            output.push('\n');
            output.push_str(&peer.to_wgquick());
        }

        output
    }

    /// Parses a wg-quick config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] with the offending line number on
    /// malformed input, unknown sections, or a missing `PrivateKey`.
    pub fn parse_wgquick(config_str: &str) -> Result<Self> {
        let mut section = Section::None;
        let mut private_key: Option<PrivateKey> = None;
        let mut addresses: Vec<IpNet> = Vec::new();
        let mut listen_port: Option<u16> = None;
        let mut postup: Vec<String> = Vec::new();
        let mut predown: Vec<String> = Vec::new();
        let mut peers: Vec<PeerConfig> = Vec::new();
        let mut current_peer: Option<ParsedPeer> = None;

        for (line_num, raw_line) in config_str.lines().enumerate() {
            let line = raw_line.trim();
            let line_number = line_num + 1;

            if line.is_empty() {
                continue;
            }

            if let Some(comment) = line.strip_prefix('#') {
                // Friendly metadata comments belong to the open peer section;
                // everything else commented is noise.
                if let (Section::Peer, Some(peer)) = (section, current_peer.as_mut()) {
                    peer.parse_comment(comment, line_number)?;
                }
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                if let Some(peer) = current_peer.take() {
                    peers.push(peer.build(line_number)?);
                }

                let section_name = &line[1..line.len() - 1];
                section = match section_name {
                    "Interface" => Section::Interface,
                    "Peer" => {
                        current_peer = Some(ParsedPeer::default());
                        Section::Peer
                    }
                    _ => {
                        return Err(ConfigError::ParseError {
                            line: line_number,
                            message: format!("unknown section: {section_name}"),
                        });
                    }
                };
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_number,
                    message: format!("invalid line format: {line}"),
                });
            };

            let key = key.trim();
            let value = value.trim();

            match section {
                Section::None => {
                    return Err(ConfigError::ParseError {
                        line: line_number,
                        message: "key-value pair outside of section".to_string(),
                    });
                }
                Section::Interface => match key {
                    "PrivateKey" => {
                        private_key = Some(value.parse::<PrivateKey>().map_err(|_| {
                            ConfigError::ParseError {
                                line: line_number,
                                message: "invalid PrivateKey".to_string(),
                            }
                        })?);
                    }
                    "Address" => {
                        for addr in value.split(',') {
                            addresses.push(addr.trim().parse().map_err(|_| {
                                ConfigError::ParseError {
                                    line: line_number,
                                    message: format!("invalid Address: {addr}"),
                                }
                            })?);
                        }
                    }
                    "ListenPort" => {
                        listen_port =
                            Some(value.parse().map_err(|_| ConfigError::ParseError {
                                line: line_number,
                                message: "invalid ListenPort".to_string(),
                            })?);
                    }
                    "PostUp" => postup.push(value.to_string()),
                    "PreDown" => predown.push(value.to_string()),
                    _ => {}
                },
                Section::Peer => {
                    if let Some(ref mut peer) = current_peer {
                        peer.parse_key(key, value, line_number)?;
                    }
                }
            }
        }

        if let Some(peer) = current_peer {
            let last_line = config_str.lines().count();
            peers.push(peer.build(last_line)?);
        }

        let private_key = private_key.ok_or(ConfigError::ParseError {
            line: 0,
            message: "missing PrivateKey in [Interface] section".to_string(),
        })?;

        Ok(Self {
            private_key,
            addresses,
            listen_port,
            peers,
            postup,
            predown,
        })
    }
}

/// Configuration for one WireGuard peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    /// The peer's public key.
    pub public_key: PublicKey,
    /// Preshared key shared with this peer.
    pub preshared_key: Option<PresharedKey>,
    /// Networks routed to this peer.
    pub allowed_ips: Vec<IpNet>,
    /// The peer's reachable endpoint.
    pub endpoint: Option<Endpoint>,
    /// Human-readable peer name, carried as a config comment.
    pub friendly_name: Option<String>,
    /// Opaque structured metadata, carried as a config comment.
    pub friendly_json: Option<serde_json::Value>,
}

impl PeerConfig {
    /// Creates a new peer config with the given public key.
    #[must_use]
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            preshared_key: None,
            allowed_ips: Vec::new(),
            endpoint: None,
            friendly_name: None,
            friendly_json: None,
        }
    }

    fn to_wgquick(&self) -> String {
        let mut output = String::new();
        output.push_str("[Peer]\n");
        if let Some(ref name) = self.friendly_name {
            let _ = writeln!(output, "# friendly_name = {name}");
        }
        if let Some(ref json) = self.friendly_json {
            let _ = writeln!(output, "# friendly_json = {json}");
        }
        let _ = writeln!(output, "PublicKey = {}", self.public_key.to_base64());
        if let Some(ref psk) = self.preshared_key {
            let _ = writeln!(output, "PresharedKey = {}", psk.to_base64());
        }
        if !self.allowed_ips.is_empty() {
            let ips: Vec<String> = self.allowed_ips.iter().map(ToString::to_string).collect();
            let _ = writeln!(output, "AllowedIPs = {}", ips.join(", "));
        }
        if let Some(ref endpoint) = self.endpoint {
            let _ = writeln!(output, "Endpoint = {endpoint}");
        }
        output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Interface,
    Peer,
}

/// Peer accumulator used during parsing.
#[derive(Default)]
struct ParsedPeer {
    public_key: Option<PublicKey>,
    preshared_key: Option<PresharedKey>,
    allowed_ips: Vec<IpNet>,
    endpoint: Option<Endpoint>,
    friendly_name: Option<String>,
    friendly_json: Option<serde_json::Value>,
}

impl ParsedPeer {
    fn parse_comment(&mut self, comment: &str, line_number: usize) -> Result<()> {
        let Some((key, value)) = comment.split_once('=') else {
            return Ok(());
        };
        match key.trim() {
            "friendly_name" => self.friendly_name = Some(value.trim().to_string()),
            "friendly_json" => {
                self.friendly_json =
                    Some(serde_json::from_str(value.trim()).map_err(|e| {
                        ConfigError::ParseError {
                            line: line_number,
                            message: format!("invalid friendly_json: {e}"),
                        }
                    })?);
            }
            _ => {}
        }
        Ok(())
    }

    fn parse_key(&mut self, key: &str, value: &str, line_number: usize) -> Result<()> {
        match key {
            "PublicKey" => {
                self.public_key =
                    Some(value.parse::<PublicKey>().map_err(|_| ConfigError::ParseError {
                        line: line_number,
                        message: "invalid PublicKey".to_string(),
                    })?);
            }
            "PresharedKey" => {
                self.preshared_key =
                    Some(value.parse::<PresharedKey>().map_err(|_| ConfigError::ParseError {
                        line: line_number,
                        message: "invalid PresharedKey".to_string(),
                    })?);
            }
            "AllowedIPs" => {
                for ip in value.split(',') {
                    self.allowed_ips
                        .push(ip.trim().parse().map_err(|_| ConfigError::ParseError {
                            line: line_number,
                            message: format!("invalid AllowedIPs: {ip}"),
                        })?);
                }
            }
            "Endpoint" => {
                self.endpoint = Some(value.parse().map_err(|_| ConfigError::ParseError {
                    line: line_number,
                    message: format!("invalid Endpoint: {value}"),
                })?);
            }
            _ => {}
        }
        Ok(())
    }

    fn build(self, line_number: usize) -> Result<PeerConfig> {
        let public_key = self.public_key.ok_or(ConfigError::ParseError {
            line: line_number,
            message: "missing PublicKey in [Peer] section".to_string(),
        })?;

        Ok(PeerConfig {
            public_key,
            preshared_key: self.preshared_key,
            allowed_ips: self.allowed_ips,
            endpoint: self.endpoint,
            friendly_name: self.friendly_name,
            friendly_json: self.friendly_json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LEN;

    fn test_private_key() -> PrivateKey {
        PrivateKey::from_bytes([1u8; KEY_LEN])
    }

    fn test_public_key() -> PublicKey {
        PublicKey::from_bytes([2u8; KEY_LEN])
    }

    fn test_peer() -> PeerConfig {
        let mut peer = PeerConfig::new(test_public_key());
        peer.allowed_ips.push("fd00::2/128".parse().expect("valid cidr"));
        peer.endpoint = Some("203.0.113.2:51820".parse().expect("valid endpoint"));
        peer.friendly_name = Some("b".to_string());
        peer
    }

    #[test]
    fn generate_minimal() {
        let config = InterfaceConfig::new(test_private_key());
        let output = config.to_wgquick();
        assert!(output.starts_with("[Interface]\n"));
        assert!(output.contains("PrivateKey = "));
    }

    #[test]
    fn generate_with_interface_fields() {
        let config = InterfaceConfig::new(test_private_key())
            .with_address("fd00::1/128".parse().expect("valid cidr"))
            .with_listen_port(51820);
        let output = config.to_wgquick();
        assert!(output.contains("Address = fd00::1/128"));
        assert!(output.contains("ListenPort = 51820"));
    }

    #[test]
    fn generate_with_hooks_and_peer() {
        let mut config = InterfaceConfig::new(test_private_key());
        config.postup.push("ip link add dev gt-m2 type ip6gretap local fd00::1 remote fd00::2".to_string());
        config.predown.push("ip link del dev gt-m2 || true".to_string());
        config.add_peer(test_peer());

        let output = config.to_wgquick();
        assert!(output.contains("PostUp = ip link add dev gt-m2"));
        assert!(output.contains("PreDown = ip link del dev gt-m2 || true"));
        assert!(output.contains("[Peer]"));
        assert!(output.contains("# friendly_name = b"));
        assert!(output.contains("AllowedIPs = fd00::2/128"));
        assert!(output.contains("Endpoint = 203.0.113.2:51820"));
    }

    #[test]
    fn add_peer_replaces_same_key() {
        let mut config = InterfaceConfig::new(test_private_key());
        config.add_peer(test_peer());
        let mut replacement = test_peer();
        replacement.friendly_name = Some("renamed".to_string());
        config.add_peer(replacement);

        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].friendly_name.as_deref(), Some("renamed"));
    }

    #[test]
    fn parse_reserialize_is_byte_equal() {
        let private = PrivateKey::generate();
        let peer_public = PrivateKey::generate().public_key();

        let mut peer = PeerConfig::new(peer_public);
        peer.preshared_key = Some(PresharedKey::generate());
        peer.allowed_ips.push("fd00::2/128".parse().expect("valid cidr"));
        peer.endpoint = Some("vpn.example.org:51999".parse().expect("valid endpoint"));
        peer.friendly_name = Some("b".to_string());
        peer.friendly_json = Some(serde_json::json!({"rack": 3}));

        let mut config = InterfaceConfig::new(private)
            .with_address("fd00::1/128".parse().expect("valid cidr"))
            .with_listen_port(51820);
        config.postup.push("ip link set dev gt-m2 up".to_string());
        config.predown.push("ip link del dev gt-m2 || true".to_string());
        config.add_peer(peer);

        let text = config.to_wgquick();
        let parsed = InterfaceConfig::parse_wgquick(&text).expect("parses");
        assert_eq!(parsed, config);
        assert_eq!(parsed.to_wgquick(), text);
    }

    #[test]
    fn parse_ignores_unknown_keys_and_comments() {
        let text = format!(
            "[Interface]\n# a stray comment\nPrivateKey = {}\nMTU = 1420\n",
            test_private_key().to_base64()
        );
        let parsed = InterfaceConfig::parse_wgquick(&text).expect("parses");
        assert!(parsed.peers.is_empty());
    }

    #[test]
    fn parse_missing_private_key_fails() {
        let result = InterfaceConfig::parse_wgquick("[Interface]\nListenPort = 51820\n");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn parse_unknown_section_fails() {
        let result = InterfaceConfig::parse_wgquick("[Bogus]\n");
        assert!(matches!(result, Err(ConfigError::ParseError { line: 1, .. })));
    }

    #[test]
    fn parse_key_value_outside_section_fails() {
        let result = InterfaceConfig::parse_wgquick("PrivateKey = x\n");
        assert!(matches!(result, Err(ConfigError::ParseError { line: 1, .. })));
    }

    #[test]
    fn parse_peer_missing_public_key_fails() {
        let text = format!(
            "[Interface]\nPrivateKey = {}\n\n[Peer]\nAllowedIPs = fd00::2/128\n",
            test_private_key().to_base64()
        );
        assert!(InterfaceConfig::parse_wgquick(&text).is_err());
    }

    #[test]
    fn friendly_json_survives_roundtrip() {
        let text = format!(
            "[Interface]\nPrivateKey = {}\n\n[Peer]\n# friendly_name = a\n# friendly_json = {{\"site\":\"fra\"}}\nPublicKey = {}\n",
            test_private_key().to_base64(),
            test_public_key().to_base64()
        );
        let parsed = InterfaceConfig::parse_wgquick(&text).expect("parses");
        assert_eq!(parsed.peers[0].friendly_name.as_deref(), Some("a"));
        assert_eq!(
            parsed.peers[0].friendly_json,
            Some(serde_json::json!({"site": "fra"}))
        );
    }
}
