//! In-memory fake fleet for tests.
//!
//! A [`Lab`] models a set of hosts with files, live interfaces, and UDP
//! reachability, and hands out [`FakeTransport`]s that interpret the exact
//! command set [`crate::WireguardRemote`] issues. Tests script failures
//! (`wg-quick up` refusing, probe datagrams dropped) and inspect the
//! resulting state without touching a real kernel or SSH.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::transport::{CmdOutput, Dial, SshSpec, Transport};
use crate::Result;

#[derive(Default)]
struct HostState {
    files: BTreeMap<String, String>,
    up: BTreeSet<String>,
}

#[derive(Default)]
struct LabState {
    hosts: HashMap<String, HostState>,
    /// Endpoint host (IP or DNS name) to lab hostname.
    endpoints: HashMap<String, String>,
    /// Directed (sender, receiver) pairs whose datagrams are dropped.
    blocked: HashSet<(String, String)>,
    /// Hosts whose `wg-quick up` fails.
    fail_up: HashSet<String>,
    /// Hostname to a waiting one-shot UDP listener.
    listeners: HashMap<String, oneshot::Sender<()>>,
    /// Every command run, per host.
    log: Vec<(String, String)>,
}

/// An in-memory fleet of fake hosts.
#[derive(Clone, Default)]
pub struct Lab {
    state: Arc<Mutex<LabState>>,
}

impl Lab {
    /// Creates an empty lab.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LabState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Maps an endpoint host (IP or DNS name) onto a lab hostname, so probe
    /// datagrams sent to it are delivered there.
    pub fn map_endpoint(&self, endpoint_host: &str, hostname: &str) {
        self.lock()
            .endpoints
            .insert(endpoint_host.to_string(), hostname.to_string());
    }

    /// Drops all probe datagrams sent from `sender` to `receiver`.
    pub fn block(&self, sender: &str, receiver: &str) {
        self.lock()
            .blocked
            .insert((sender.to_string(), receiver.to_string()));
    }

    /// Drops probe datagrams between two hosts in both directions.
    pub fn block_pair(&self, a: &str, b: &str) {
        self.block(a, b);
        self.block(b, a);
    }

    /// Makes `wg-quick up` fail on the given host.
    pub fn fail_wg_quick_up(&self, hostname: &str) {
        self.lock().fail_up.insert(hostname.to_string());
    }

    /// Pre-seeds a file on a host.
    pub fn write_file(&self, hostname: &str, path: &str, contents: &str) {
        self.lock()
            .hosts
            .entry(hostname.to_string())
            .or_default()
            .files
            .insert(path.to_string(), contents.to_string());
    }

    /// Reads a file from a host, if present.
    #[must_use]
    pub fn read_file(&self, hostname: &str, path: &str) -> Option<String> {
        self.lock().hosts.get(hostname)?.files.get(path).cloned()
    }

    /// Whether an interface is live on a host.
    #[must_use]
    pub fn interface_up(&self, hostname: &str, interface: &str) -> bool {
        self.lock()
            .hosts
            .get(hostname)
            .is_some_and(|h| h.up.contains(interface))
    }

    /// Live interfaces on a host.
    #[must_use]
    pub fn up_interfaces(&self, hostname: &str) -> Vec<String> {
        self.lock()
            .hosts
            .get(hostname)
            .map(|h| h.up.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// How many config writes a host has seen.
    #[must_use]
    pub fn write_count(&self, hostname: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|(host, cmd)| {
                host == hostname && (cmd.starts_with("cat > ") || cmd.contains("| sudo tee "))
            })
            .count()
    }

    /// Every command a host has run, in order.
    #[must_use]
    pub fn command_log(&self, hostname: &str) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|(host, _)| host == hostname)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }
}

#[async_trait]
impl Dial for Lab {
    type Transport = FakeTransport;

    async fn dial(&self, ssh: &SshSpec) -> Result<FakeTransport> {
        let hostname = ssh.host().to_string();
        self.lock().hosts.entry(hostname.clone()).or_default();
        Ok(FakeTransport {
            lab: self.clone(),
            hostname,
            root: ssh.is_root(),
        })
    }
}

/// A [`Transport`] bound to one fake host in a [`Lab`].
#[derive(Clone)]
pub struct FakeTransport {
    lab: Lab,
    hostname: String,
    root: bool,
}

impl FakeTransport {
    fn ok(stdout: impl Into<String>) -> CmdOutput {
        CmdOutput {
            ok: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    fn fail(text: impl Into<String>) -> CmdOutput {
        CmdOutput {
            ok: false,
            stdout: text.into(),
            stderr: String::new(),
        }
    }

    fn write_file(&self, path: &str, body: &str) -> CmdOutput {
        let mut state = self.lab.lock();
        state
            .hosts
            .entry(self.hostname.clone())
            .or_default()
            .files
            .insert(path.to_string(), format!("{body}\n"));
        Self::ok("")
    }

    fn wg_quick(&self, verb: &str, interface: &str) -> CmdOutput {
        let mut state = self.lab.lock();
        let fails = state.fail_up.contains(&self.hostname);
        let host = state.hosts.entry(self.hostname.clone()).or_default();
        let path = format!("/etc/wireguard/{interface}.conf");

        match verb {
            "up" => {
                if !host.files.contains_key(&path) {
                    return Self::fail(format!("wg-quick: `{interface}' does not exist"));
                }
                if host.up.contains(interface) {
                    return Self::fail(format!("wg-quick: `{interface}' already exists"));
                }
                if fails {
                    return Self::fail("RTNETLINK answers: Operation not supported");
                }
                host.up.insert(interface.to_string());
                Self::ok(format!("[#] ip link add {interface} type wireguard"))
            }
            "down" => {
                if !host.up.remove(interface) {
                    return Self::fail(format!(
                        "wg-quick: `{interface}' is not a WireGuard interface"
                    ));
                }
                Self::ok(format!("[#] ip link delete dev {interface}"))
            }
            _ => Self::fail(format!("Usage: wg-quick [ up | down ] [ {interface} ]")),
        }
    }

    async fn udp_listen(&self, cmd: &str) -> CmdOutput {
        let tokens: Vec<&str> = cmd.split_whitespace().collect();
        let secs: f64 = tokens
            .get(1)
            .and_then(|t| t.parse().ok())
            .unwrap_or(1.0);

        let (tx, rx) = oneshot::channel();
        self.lab.lock().listeners.insert(self.hostname.clone(), tx);

        match tokio::time::timeout(Duration::from_secs_f64(secs), rx).await {
            Ok(Ok(())) => Self::ok("1"),
            _ => {
                self.lab.lock().listeners.remove(&self.hostname);
                Self::fail("")
            }
        }
    }

    fn udp_send(&self, cmd: &str) -> CmdOutput {
        // echo -n '1' > /dev/udp/<host>/<port>
        let Some(target) = cmd.split("/dev/udp/").nth(1) else {
            return Self::fail("bad udp target");
        };
        let Some((endpoint_host, _port)) = target.split_once('/') else {
            return Self::fail("bad udp target");
        };

        let mut state = self.lab.lock();
        let receiver = state
            .endpoints
            .get(endpoint_host)
            .cloned()
            .unwrap_or_else(|| endpoint_host.to_string());
        let dropped = state
            .blocked
            .contains(&(self.hostname.clone(), receiver.clone()));
        if !dropped {
            if let Some(tx) = state.listeners.remove(&receiver) {
                let _ = tx.send(());
            }
        }
        // A UDP write succeeds locally whether or not anyone hears it.
        Self::ok("")
    }

    async fn dispatch(&self, cmd: &str) -> CmdOutput {
        if let Some(rest) = cmd.strip_prefix("cat > ") {
            if let Some((path, body)) = parse_heredoc(rest, " <<'EOF'") {
                return self.write_file(path, body);
            }
            return Self::fail("bash: syntax error");
        }

        if let Some(rest) = cmd.strip_prefix("cat <<'EOF' | sudo tee ") {
            if let Some((path, body)) = parse_heredoc(rest, " >/dev/null") {
                return self.write_file(path, body);
            }
            return Self::fail("bash: syntax error");
        }

        if let Some(path) = cmd.strip_prefix("cat ") {
            let state = self.lab.lock();
            return match state.hosts.get(&self.hostname).and_then(|h| h.files.get(path)) {
                Some(contents) => Self::ok(contents.clone()),
                None => Self::fail(format!("cat: {path}: No such file or directory")),
            };
        }

        if let Some(path) = cmd.strip_prefix("test -f ") {
            let state = self.lab.lock();
            let exists = state
                .hosts
                .get(&self.hostname)
                .is_some_and(|h| h.files.contains_key(path));
            return if exists { Self::ok("") } else { Self::fail("") };
        }

        if let Some(path) = cmd.strip_prefix("rm -f ") {
            let mut state = self.lab.lock();
            if let Some(host) = state.hosts.get_mut(&self.hostname) {
                host.files.remove(path);
            }
            return Self::ok("");
        }

        if let Some(rest) = cmd.strip_prefix("wg show ") {
            let interface = rest.split_whitespace().next().unwrap_or_default();
            let up = self.lab.interface_up(&self.hostname, interface);
            return if up {
                Self::ok(format!("interface: {interface}\n  peers: configured"))
            } else {
                Self::fail("Unable to access interface: No such device")
            };
        }

        if let Some(rest) = cmd.strip_prefix("wg-quick ") {
            let mut tokens = rest.split_whitespace();
            let verb = tokens.next().unwrap_or_default();
            let interface = tokens.next().unwrap_or_default();
            return self.wg_quick(verb, interface);
        }

        if cmd.starts_with("timeout ") && cmd.contains(" nc -u -l ") {
            return self.udp_listen(cmd).await;
        }

        if cmd.starts_with("echo -n ") && cmd.contains("/dev/udp/") {
            return self.udp_send(cmd);
        }

        Self::fail(format!("bash: command not found: {cmd}"))
    }
}

/// Splits `"{path}{sep}\n{body}\nEOF"` into path and body.
fn parse_heredoc<'a>(rest: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let (head, doc) = rest.split_once('\n')?;
    let path = head.strip_suffix(sep)?;
    let body = doc.strip_suffix("\nEOF").or_else(|| doc.strip_suffix("EOF"))?;
    Some((path, body))
}

#[async_trait]
impl Transport for FakeTransport {
    fn host(&self) -> &str {
        &self.hostname
    }

    fn is_root(&self) -> bool {
        self.root
    }

    async fn run(&self, cmd: &str, _root: bool) -> Result<CmdOutput> {
        self.lab
            .lock()
            .log
            .push((self.hostname.clone(), cmd.to_string()));

        // `wg-quick down X && wg-quick up X` style compounds.
        if cmd.starts_with("wg-quick ") && cmd.contains(" && ") {
            let mut combined = String::new();
            for part in cmd.split(" && ") {
                let out = self.dispatch(part).await;
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(out.stdout.trim_end());
                if !out.ok {
                    return Ok(CmdOutput {
                        ok: false,
                        stdout: combined,
                        stderr: String::new(),
                    });
                }
            }
            return Ok(CmdOutput {
                ok: true,
                stdout: combined,
                stderr: String::new(),
            });
        }

        Ok(self.dispatch(cmd).await)
    }
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport")
            .field("hostname", &self.hostname)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn transport(lab: &Lab, host: &str) -> FakeTransport {
        lab.dial(&SshSpec::Target(host.to_string()))
            .await
            .expect("dial")
    }

    #[tokio::test]
    async fn files_roundtrip() {
        let lab = Lab::new();
        let t = transport(&lab, "a").await;

        let out = t
            .run("cat > /etc/wireguard/wg-m1.conf <<'EOF'\n[Interface]\nEOF", false)
            .await
            .expect("run");
        assert!(out.ok);

        let out = t.run("cat /etc/wireguard/wg-m1.conf", true).await.expect("run");
        assert!(out.ok);
        assert_eq!(out.stdout, "[Interface]\n");

        let out = t.run("test -f /etc/wireguard/wg-m1.conf", true).await.expect("run");
        assert!(out.ok);

        t.run("rm -f /etc/wireguard/wg-m1.conf", true).await.expect("run");
        let out = t.run("test -f /etc/wireguard/wg-m1.conf", true).await.expect("run");
        assert!(!out.ok);
    }

    #[tokio::test]
    async fn sudo_tee_write_lands_in_file() {
        let lab = Lab::new();
        let t = transport(&lab, "a").await;

        let out = t
            .run(
                "cat <<'EOF' | sudo tee /etc/wireguard/wg-m1.conf >/dev/null\n[Interface]\nEOF",
                false,
            )
            .await
            .expect("run");
        assert!(out.ok);
        assert_eq!(
            lab.read_file("a", "/etc/wireguard/wg-m1.conf").as_deref(),
            Some("[Interface]\n")
        );
        assert_eq!(lab.write_count("a"), 1);
    }

    #[tokio::test]
    async fn wg_quick_up_fails_without_config() {
        let lab = Lab::new();
        let t = transport(&lab, "a").await;
        let out = t.run("wg-quick up wg-m1 2>&1", true).await.expect("run");
        assert!(!out.ok);
    }

    #[tokio::test]
    async fn scripted_up_failure() {
        let lab = Lab::new();
        lab.fail_wg_quick_up("a");
        lab.write_file("a", "/etc/wireguard/wg-m1.conf", "[Interface]\n");
        let t = transport(&lab, "a").await;

        let out = t.run("wg-quick up wg-m1 2>&1", true).await.expect("run");
        assert!(!out.ok);
        assert!(!lab.interface_up("a", "wg-m1"));
    }

    #[tokio::test]
    async fn unknown_command_fails() {
        let lab = Lab::new();
        let t = transport(&lab, "a").await;
        let out = t.run("frobnicate --now", true).await.expect("run");
        assert!(!out.ok);
    }
}
