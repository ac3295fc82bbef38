//! Address utilities: host-index math, random ULA generation, and address
//! planning helpers.

use std::net::{IpAddr, Ipv6Addr};

use ipnet::IpNet;

use crate::error::MeshError;
use crate::Result;

fn ip_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Offset of `addr` from the base of `network`.
///
/// Node indices are this offset for the node's bridge address; they key the
/// deterministic `wg-`/`gt-` interface naming.
#[must_use]
pub fn ip_index(addr: IpAddr, network: &IpNet) -> u128 {
    ip_to_u128(addr).wrapping_sub(ip_to_u128(network.network()))
}

/// Generates a random unique-local IPv6 address (`fd00::/8`).
#[must_use]
pub fn random_ula() -> Ipv6Addr {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = 0xfd;
    Ipv6Addr::from(bytes)
}

/// Generates a random ULA as a /128 interface address.
///
/// These serve as WireGuard tunnel addresses: GRETAP endpoints only, never
/// user traffic. They are random at first creation and preserved afterwards
/// by reading them back from the on-disk config.
#[must_use]
pub fn random_ula_net() -> IpNet {
    IpNet::V6(ipnet::Ipv6Net::from(random_ula()))
}

/// Splits `network` into at least `count` equal subnets.
pub fn generate_subnets(network: &IpNet, count: usize) -> Result<Vec<IpNet>> {
    let extra_bits = count.next_power_of_two().trailing_zeros() as u8;
    let new_prefix = network.prefix_len().saturating_add(extra_bits);
    let subnets = network
        .subnets(new_prefix)
        .map_err(|_| MeshError::AddressPlanExhausted {
            count,
            network: *network,
        })?;
    Ok(subnets.take(count).collect())
}

/// Yields the first `count` host interfaces of `network`, with an optional
/// prefix-length override.
pub fn generate_hosts(network: &IpNet, count: usize, prefix_len: Option<u8>) -> Result<Vec<IpNet>> {
    let prefix = prefix_len.unwrap_or_else(|| network.prefix_len());
    let hosts: Vec<IpNet> = network
        .hosts()
        .take(count)
        .map(|addr| IpNet::new(addr, prefix))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| MeshError::AddressPlanExhausted {
            count,
            network: *network,
        })?;
    if hosts.len() < count {
        return Err(MeshError::AddressPlanExhausted {
            count,
            network: *network,
        });
    }
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("10.0.0.0/24", "10.0.0.1", 1; "v4 first host")]
    #[test_case("10.0.0.0/24", "10.0.0.42", 42; "v4 mid host")]
    #[test_case("fd00:abcd::/64", "fd00:abcd::7", 7; "v6 host")]
    fn index_from_network_base(network: &str, addr: &str, expected: u128) {
        let network: IpNet = network.parse().expect("valid network");
        assert_eq!(ip_index(addr.parse().expect("ip"), &network), expected);
    }

    #[test]
    fn random_ula_is_fd00_8() {
        for _ in 0..32 {
            let addr = random_ula();
            assert_eq!(addr.octets()[0], 0xfd);
        }
    }

    #[test]
    fn random_ula_net_is_full_prefix() {
        let net = random_ula_net();
        assert_eq!(net.prefix_len(), 128);
    }

    #[test]
    fn subnets_cover_count() {
        let network: IpNet = "10.0.0.0/24".parse().expect("valid network");
        let subnets = generate_subnets(&network, 3).expect("subnets");
        assert_eq!(subnets.len(), 3);
        assert_eq!(subnets[0].prefix_len(), 26);
    }

    #[test]
    fn hosts_with_prefix_override() {
        let network: IpNet = "10.0.0.0/24".parse().expect("valid network");
        let hosts = generate_hosts(&network, 2, Some(32)).expect("hosts");
        assert_eq!(
            hosts,
            vec![
                "10.0.0.1/32".parse::<IpNet>().expect("net"),
                "10.0.0.2/32".parse::<IpNet>().expect("net"),
            ]
        );
    }

    #[test]
    fn hosts_exhaustion_is_an_error() {
        let network: IpNet = "10.0.0.0/30".parse().expect("valid network");
        assert!(generate_hosts(&network, 10, None).is_err());
    }
}
