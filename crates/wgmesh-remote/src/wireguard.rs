//! Remote WireGuard interface control.
//!
//! One [`WireguardRemote`] owns a single interface on a single host: the
//! `/etc/wireguard/<iface>.conf` file and the `wg-quick`/`wg` lifecycle
//! around it. The config file is written atomically via a quoted heredoc
//! (piped through `sudo tee` when the login user is not root), and is never
//! removed while the interface is live.

use std::time::Duration;

use wgmesh_config::{Host, InterfaceConfig};

use crate::error::{RemoteError, ShellError};
use crate::transport::Transport;
use crate::Result;

/// UDP reachability probe timeout in seconds.
pub const UDPING_TIMEOUT_SECS: u64 = 1;

/// Controller for one WireGuard interface on one remote host.
#[derive(Clone, Debug)]
pub struct WireguardRemote<T> {
    transport: T,
    interface: String,
}

impl<T: Transport + Clone + Send + Sync + 'static> WireguardRemote<T> {
    /// Creates a controller for `interface` behind the given transport.
    #[must_use]
    pub fn new(transport: T, interface: impl Into<String>) -> Self {
        Self {
            transport,
            interface: interface.into(),
        }
    }

    /// The controlled interface name.
    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// The remote host, for logging and reporting.
    #[must_use]
    pub fn host(&self) -> &str {
        self.transport.host()
    }

    fn config_path(&self) -> String {
        format!("/etc/wireguard/{}.conf", self.interface)
    }

    /// Reads the raw config file, or `None` if it does not exist.
    pub async fn config_text(&self) -> Result<Option<String>> {
        let out = self
            .transport
            .run(&format!("cat {}", self.config_path()), true)
            .await?;
        Ok(out.ok.then(|| out.stdout.trim().to_string()))
    }

    /// Reads and parses the remote config, or `None` if it does not exist.
    pub async fn config(&self) -> Result<Option<InterfaceConfig>> {
        match self.config_text().await? {
            Some(text) => Ok(Some(InterfaceConfig::parse_wgquick(&text)?)),
            None => Ok(None),
        }
    }

    /// Whether the config file exists on disk.
    pub async fn config_exists(&self) -> Result<bool> {
        let out = self
            .transport
            .run(&format!("test -f {}", self.config_path()), true)
            .await?;
        Ok(out.ok)
    }

    /// Writes the config file, replacing any previous contents.
    pub async fn config_write(&self, config: &InterfaceConfig) -> Result<()> {
        let body = config.to_wgquick();
        let body = body.trim_end();
        let path = self.config_path();
        let script = if self.transport.is_root() {
            format!("cat > {path} <<'EOF'\n{body}\nEOF")
        } else {
            format!("cat <<'EOF' | sudo tee {path} >/dev/null\n{body}\nEOF")
        };

        let out = self.transport.run(&script, false).await?;
        if !out.ok {
            return Err(RemoteError::CommandFailed {
                detail: if out.stderr.is_empty() { out.stdout } else { out.stderr },
            });
        }
        Ok(())
    }

    /// Removes the config file.
    ///
    /// # Errors
    ///
    /// Refuses with [`RemoteError::InterfaceUp`] while the interface is
    /// live, so the on-disk state never diverges from the kernel.
    pub async fn config_remove(&self) -> Result<()> {
        if self.is_up().await? {
            return Err(RemoteError::InterfaceUp {
                interface: self.interface.clone(),
            });
        }
        self.transport
            .run(&format!("rm -f {}", self.config_path()), true)
            .await?;
        Ok(())
    }

    /// Whether the interface is present in the kernel.
    pub async fn is_up(&self) -> Result<bool> {
        let out = self
            .transport
            .run(&format!("wg show {}", self.interface), true)
            .await?;
        Ok(out.ok)
    }

    async fn wg_quick(&self, verb: &str) -> std::result::Result<String, ShellError> {
        let out = self
            .transport
            .run(&format!("wg-quick {verb} {} 2>&1", self.interface), true)
            .await?;
        let text = out.stdout.trim().to_string();
        if out.ok {
            Ok(text)
        } else {
            Err(ShellError::Command { output: text })
        }
    }

    /// Brings the interface up with `wg-quick up`.
    pub async fn up(&self) -> std::result::Result<String, ShellError> {
        self.wg_quick("up").await
    }

    /// Takes the interface down with `wg-quick down`.
    pub async fn down(&self) -> std::result::Result<String, ShellError> {
        self.wg_quick("down").await
    }

    /// Bounces the interface: `wg-quick down && wg-quick up`.
    pub async fn restart(&self) -> std::result::Result<String, ShellError> {
        let out = self
            .transport
            .run(
                &format!(
                    "wg-quick down {iface} 2>&1 && wg-quick up {iface} 2>&1",
                    iface = self.interface
                ),
                true,
            )
            .await?;
        let text = out.stdout.trim().to_string();
        if out.ok {
            Ok(text)
        } else {
            Err(ShellError::Command { output: text })
        }
    }

    /// Human-readable `wg show` status.
    pub async fn show(&self) -> std::result::Result<String, ShellError> {
        let out = self
            .transport
            .run(&format!("wg show {} 2>&1", self.interface), true)
            .await?;
        let text = out.stdout.trim().to_string();
        if out.ok {
            Ok(text)
        } else {
            Err(ShellError::Command { output: text })
        }
    }

    /// Sends one UDP datagram from this host to `host:port`.
    pub async fn udping_send(&self, host: &Host, port: u16) -> Result<bool> {
        let out = self
            .transport
            .run(&format!("echo -n '1' > /dev/udp/{host}/{port}"), false)
            .await?;
        Ok(out.ok)
    }

    /// Starts a one-shot UDP listener on `listen_port`, as a task.
    fn udping_recv(&self, listen_port: u16) -> tokio::task::JoinHandle<Result<bool>> {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let out = transport
                .run(
                    &format!("timeout {UDPING_TIMEOUT_SECS} nc -u -l -W 1 0 {listen_port}"),
                    true,
                )
                .await?;
            Ok(out.ok)
        })
    }

    /// Probes whether a UDP datagram sent from `sender` to
    /// `endpoint_host:endpoint_port` arrives at this host's `listen_port`.
    ///
    /// Validates that NAT and firewalling permit WireGuard traffic toward
    /// this host; only reliable while the interface is down.
    pub async fn udping_from(
        &self,
        listen_port: u16,
        endpoint_host: &Host,
        endpoint_port: u16,
        sender: &Self,
    ) -> Result<bool> {
        let listener = self.udping_recv(listen_port);
        // Give the listener time to bind before the single datagram flies.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = sender.udping_send(endpoint_host, endpoint_port).await;
        listener
            .await
            .map_err(|e| RemoteError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::Lab;
    use crate::transport::{Dial, SshSpec};
    use wgmesh_config::PrivateKey;

    fn test_config() -> InterfaceConfig {
        InterfaceConfig::new(PrivateKey::from_bytes([7u8; 32]))
            .with_address("fd00::1/128".parse().expect("valid cidr"))
            .with_listen_port(51820)
    }

    async fn remote(lab: &Lab, host: &str) -> WireguardRemote<crate::FakeTransport> {
        let transport = lab
            .dial(&SshSpec::Target(host.to_string()))
            .await
            .expect("dial");
        WireguardRemote::new(transport, "wg-t1")
    }

    #[tokio::test]
    async fn config_roundtrip_over_transport() {
        let lab = Lab::new();
        let remote = remote(&lab, "a").await;

        assert_eq!(remote.config().await.expect("config"), None);
        assert!(!remote.config_exists().await.expect("exists"));

        let config = test_config();
        remote.config_write(&config).await.expect("write");

        assert!(remote.config_exists().await.expect("exists"));
        let read = remote.config().await.expect("config").expect("present");
        assert_eq!(read, config);
    }

    #[tokio::test]
    async fn up_requires_config() {
        let lab = Lab::new();
        let remote = remote(&lab, "a").await;

        assert!(matches!(remote.up().await, Err(ShellError::Command { .. })));
    }

    #[tokio::test]
    async fn up_down_lifecycle() {
        let lab = Lab::new();
        let remote = remote(&lab, "a").await;
        remote.config_write(&test_config()).await.expect("write");

        assert!(!remote.is_up().await.expect("is_up"));
        remote.up().await.expect("up");
        assert!(remote.is_up().await.expect("is_up"));
        assert!(remote.show().await.is_ok());

        remote.down().await.expect("down");
        assert!(!remote.is_up().await.expect("is_up"));
        assert!(matches!(remote.down().await, Err(ShellError::Command { .. })));
    }

    #[tokio::test]
    async fn config_remove_refused_while_up() {
        let lab = Lab::new();
        let remote = remote(&lab, "a").await;
        remote.config_write(&test_config()).await.expect("write");
        remote.up().await.expect("up");

        assert!(matches!(
            remote.config_remove().await,
            Err(RemoteError::InterfaceUp { .. })
        ));

        remote.down().await.expect("down");
        remote.config_remove().await.expect("remove");
        assert!(!remote.config_exists().await.expect("exists"));
    }

    #[tokio::test]
    async fn restart_bounces_interface() {
        let lab = Lab::new();
        let remote = remote(&lab, "a").await;
        remote.config_write(&test_config()).await.expect("write");
        remote.up().await.expect("up");

        remote.restart().await.expect("restart");
        assert!(remote.is_up().await.expect("is_up"));
    }

    #[tokio::test]
    async fn udping_delivers_when_reachable() {
        let lab = Lab::new();
        lab.map_endpoint("203.0.113.1", "a");
        let receiver = remote(&lab, "a").await;
        let sender = remote(&lab, "b").await;

        let host: Host = "203.0.113.1".parse().expect("host");
        let ok = receiver
            .udping_from(51820, &host, 51820, &sender)
            .await
            .expect("probe");
        assert!(ok);
    }

    #[tokio::test]
    async fn udping_fails_when_blocked() {
        let lab = Lab::new();
        lab.map_endpoint("203.0.113.1", "a");
        lab.block("b", "a");
        let receiver = remote(&lab, "a").await;
        let sender = remote(&lab, "b").await;

        let host: Host = "203.0.113.1".parse().expect("host");
        let ok = receiver
            .udping_from(51820, &host, 51820, &sender)
            .await
            .expect("probe");
        assert!(!ok);
    }
}
