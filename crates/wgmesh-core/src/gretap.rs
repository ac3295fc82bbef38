//! GRETAP shell fragment synthesis.
//!
//! Each peered pair gets one GRETAP device per side, tunneling Ethernet
//! frames between the two tunnel addresses and enslaved to the node's
//! single bridge. The fragments below are embedded verbatim as
//! `PostUp`/`PreDown` lines in the wg-quick config, so the kernel topology
//! follows the WireGuard interface lifecycle.
//!
//! Interface and bridge names are constrained to `[a-z0-9-]` and all
//! addresses are typed, so nothing interpolated can carry shell
//! metacharacters.

use std::net::IpAddr;

use ipnet::IpNet;

/// Emits the shell lines that create one GRETAP device and attach it to the
/// node's bridge, creating the bridge first if it does not exist yet.
///
/// `ip6gretap` is selected when both tunnel ends are IPv6; a mixed pair
/// falls back to `gretap` over IPv4.
#[must_use]
pub fn gretap_up(
    gretap_name: &str,
    bridge_name: &str,
    priority: u32,
    local: IpAddr,
    remote: IpAddr,
    bridge_addr: &IpNet,
) -> Vec<String> {
    let six = local.is_ipv6() && remote.is_ipv6();
    let kind = if six { "ip6gretap" } else { "gretap" };

    vec![
        format!("ip link add dev {gretap_name} type {kind} local {local} remote {remote}"),
        format!("ip link set dev {gretap_name} up"),
        format!(
            "if [ ! -f /sys/class/net/{bridge_name}/bridge/bridge_id ]; then \
             ip link add name {bridge_name} type bridge stp 1 prio {priority}; \
             ip link set dev {bridge_name} up; \
             ip addr add {bridge_addr} dev {bridge_name}; fi"
        ),
        format!("ip link set dev {gretap_name} master {bridge_name}"),
    ]
}

/// Emits the tear-down counterpart: detach and delete the GRETAP device,
/// then delete the bridge if nothing else is enslaved to it.
#[must_use]
pub fn gretap_down(gretap_name: &str, bridge_name: &str, no_fail: bool) -> Vec<String> {
    let nofail = if no_fail { " || true" } else { "" };
    vec![
        format!("ip link set dev {gretap_name} nomaster{nofail}"),
        format!("ip link del dev {gretap_name}{nofail}"),
        format!(
            "if ! ip a | grep -q 'master {bridge_name}'; then \
             ip link del dev {bridge_name}{nofail}; fi"
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v6(s: &str) -> IpAddr {
        s.parse().expect("valid address")
    }

    #[test]
    fn up_uses_ip6gretap_for_v6_pair() {
        let bridge_addr: IpNet = "10.0.0.1/24".parse().expect("valid cidr");
        let lines = gretap_up(
            "gt-m2",
            "br-m",
            32768,
            v6("fd00::1"),
            v6("fd00::2"),
            &bridge_addr,
        );

        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "ip link add dev gt-m2 type ip6gretap local fd00::1 remote fd00::2"
        );
        assert_eq!(lines[1], "ip link set dev gt-m2 up");
        assert!(lines[2].contains("/sys/class/net/br-m/bridge/bridge_id"));
        assert!(lines[2].contains("stp 1 prio 32768"));
        assert!(lines[2].contains("ip addr add 10.0.0.1/24 dev br-m"));
        assert_eq!(lines[3], "ip link set dev gt-m2 master br-m");
    }

    #[test]
    fn up_falls_back_to_gretap_for_mixed_families() {
        let bridge_addr: IpNet = "10.0.0.1/24".parse().expect("valid cidr");
        let lines = gretap_up(
            "gt-m2",
            "br-m",
            36864,
            "192.0.2.1".parse().expect("ip"),
            v6("fd00::2"),
            &bridge_addr,
        );
        assert!(lines[0].contains("type gretap "));
    }

    #[test]
    fn down_detaches_deletes_and_collects_bridge() {
        let lines = gretap_down("gt-m2", "br-m", true);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ip link set dev gt-m2 nomaster || true");
        assert_eq!(lines[1], "ip link del dev gt-m2 || true");
        assert!(lines[2].contains("grep -q 'master br-m'"));
        assert!(lines[2].contains("ip link del dev br-m || true"));
    }

    #[test]
    fn down_without_no_fail_is_strict() {
        let lines = gretap_down("gt-m2", "br-m", false);
        assert!(lines.iter().all(|l| !l.contains("|| true")));
    }
}
