//! Tenant-network IP allocator. Operates entirely on a `Tenant`'s
//! `network_map`/`owned_subnets` fields under the caller's tenant lock —
//! this module holds no locks of its own, it only implements the
//! selection algorithm.

use rand::Rng;

use crate::error::{DatastoreError, Result};
use crate::types::Tenant;

/// First reserved host octet (network address).
const HOST_NETWORK: u8 = 0;
/// Second reserved host octet (gateway).
const HOST_GATEWAY: u8 = 1;
/// Usable hosts per /24: 2..=254.
const USABLE_HOSTS_PER_SUBNET: usize = 253;
/// One past the last valid subnet index (172.47.255.0 itself is the
/// first *out-of-range* index — 32 high-octet values * 256 low-octet
/// values).
const SUBNET_INDEX_LIMIT: u32 = 32 * 256;
/// Wire-format high octet of subnet index 0 — the tenant address space
/// is `172.16.0.0/12` through `172.47.255.0`, not `172.0.0.0/8`.
const HIGH_OCTET_BASE: u8 = 16;

/// Splits a subnet index into its (high, low) wire-format octet pair,
/// `172.hi.lo.0`. Index 0 is `172.16.0.0`.
pub fn subnet_octets(index: u32) -> (u8, u8) {
    (HIGH_OCTET_BASE + (index >> 8) as u8, (index & 0xff) as u8)
}

/// `(high - 16) << 8 | low`, the inverse of [`subnet_octets`]. `high` is
/// the wire-format IP octet (16..=47), not the bare subnet index.
pub fn subnet_index(high: u8, low: u8) -> u32 {
    ((high - HIGH_OCTET_BASE) as u32) << 8 | low as u32
}

/// Formats `172.high.low.host` for a subnet index and host octet.
pub fn format_ip(index: u32, host: u8) -> String {
    let (high, low) = subnet_octets(index);
    format!("172.{}.{}.{}", high, low, host)
}

/// Parses a `172.a.b.c` address back into `(subnet_index, host)`. Used
/// at the instance-deletion boundary: the instance's IP string is the
/// canonical handle, re-parsed here rather than threaded through as an
/// already-decoded pair.
pub fn parse_ip(ip: &str) -> Result<(u32, u8)> {
    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 || octets[0] != "172" {
        return Err(DatastoreError::InvalidIp(ip.to_string()));
    }
    let high: u8 = octets[1]
        .parse()
        .map_err(|_| DatastoreError::InvalidIp(ip.to_string()))?;
    if high < HIGH_OCTET_BASE || high >= HIGH_OCTET_BASE + 32 {
        return Err(DatastoreError::InvalidIp(ip.to_string()));
    }
    let low: u8 = octets[2]
        .parse()
        .map_err(|_| DatastoreError::InvalidIp(ip.to_string()))?;
    let host: u8 = octets[3]
        .parse()
        .map_err(|_| DatastoreError::InvalidIp(ip.to_string()))?;
    Ok((subnet_index(high, low), host))
}

/// Derives an instance's MAC from its assigned IPv4 address: bytes
/// `02, 00, a, b, c, d`.
pub fn derive_mac(ip: &str) -> Result<String> {
    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 {
        return Err(DatastoreError::InvalidIp(ip.to_string()));
    }
    let mut bytes = [0u8; 4];
    for (i, o) in octets.iter().enumerate() {
        bytes[i] = o.parse().map_err(|_| DatastoreError::InvalidIp(ip.to_string()))?;
    }
    Ok(format!(
        "02:00:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    ))
}

/// Generates a random CNCI MAC: byte 0 forced to `0x02`, byte 1 forced
/// non-zero, so it can never collide with a `derive_mac` output (which
/// always has byte 1 equal to `0x00`).
pub fn random_cnci_mac() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 6];
    rng.fill(&mut bytes);
    bytes[0] = 0x02;
    if bytes[1] == 0 {
        bytes[1] = 1;
    }
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Picks the next subnet index for `tenant` to mint, per step 2 of the
/// allocation algorithm: scan from index 0 upward, skipping anything
/// already owned.
fn next_unowned_subnet(tenant: &Tenant) -> Result<u32> {
    let mut index = 0u32;
    while index < SUBNET_INDEX_LIMIT {
        if !tenant.owned_subnets.contains(&index) {
            return Ok(index);
        }
        index += 1;
    }
    Err(DatastoreError::OutOfSubnets)
}

/// Allocates a fresh host address within `tenant`'s network map,
/// mutating `owned_subnets`/`network_map` in place and returning the
/// formatted IPv4 address. Caller holds the tenant lock.
pub fn allocate(tenant: &mut Tenant) -> Result<String> {
    let mut target_subnet = None;
    for &index in &tenant.owned_subnets {
        let used = tenant.network_map.get(&index).map(|s| s.len()).unwrap_or(0);
        if used < USABLE_HOSTS_PER_SUBNET {
            target_subnet = Some(index);
            break;
        }
    }

    let subnet = match target_subnet {
        Some(index) => index,
        None => {
            let index = next_unowned_subnet(tenant)?;
            tenant.owned_subnets.push(index);
            tenant.network_map.entry(index).or_default();
            index
        }
    };

    let hosts = tenant.network_map.entry(subnet).or_default();
    let mut host = 2u8;
    debug_assert!(host > HOST_GATEWAY && host > HOST_NETWORK);
    loop {
        if !hosts.contains(&host) {
            break;
        }
        if host == 254 {
            // every value in [2, 254] is taken; step 1 guarantees this
            // branch is unreachable for a subnet selected as "not full".
            return Err(DatastoreError::OutOfHosts);
        }
        host += 1;
    }

    hosts.insert(host);
    Ok(format_ip(subnet, host))
}

/// Releases a previously-allocated `(subnet, host)` pair. A no-op if the
/// address was already free.
pub fn release(tenant: &mut Tenant, subnet: u32, host: u8) {
    if let Some(hosts) = tenant.network_map.get_mut(&subnet) {
        hosts.remove(&host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> Tenant {
        Tenant::new("t1".into(), "tenant-1".into(), random_cnci_mac())
    }

    #[test]
    fn allocate_then_release_then_allocate_returns_same_address() {
        let mut t = tenant();
        let ip = allocate(&mut t).unwrap();
        let (subnet, host) = parse_ip(&ip).unwrap();
        release(&mut t, subnet, host);
        let ip2 = allocate(&mut t).unwrap();
        assert_eq!(ip, ip2);
    }

    #[test]
    fn allocate_100_fills_one_subnet() {
        let mut t = tenant();
        for _ in 0..100 {
            allocate(&mut t).unwrap();
        }
        assert_eq!(t.owned_subnets.len(), 1);
        assert_eq!(t.network_map[&t.owned_subnets[0]].len(), 100);
    }

    #[test]
    fn allocate_1024_spans_five_subnets() {
        let mut t = tenant();
        for _ in 0..1024 {
            allocate(&mut t).unwrap();
        }
        assert_eq!(t.owned_subnets.len(), 5);
        for &subnet in &t.owned_subnets[..4] {
            assert_eq!(t.network_map[&subnet].len(), USABLE_HOSTS_PER_SUBNET);
        }
        let last = *t.owned_subnets.last().unwrap();
        assert_eq!(t.network_map[&last].len(), 1024 - 4 * USABLE_HOSTS_PER_SUBNET);
    }

    #[test]
    fn derive_mac_matches_ip_bytes() {
        let mac = derive_mac("172.0.1.5").unwrap();
        assert_eq!(mac, "02:00:ac:00:01:05");
    }

    #[test]
    fn cnci_mac_never_collides_with_derived_mac() {
        for _ in 0..100 {
            let mac = random_cnci_mac();
            let second_byte = &mac[3..5];
            assert_ne!(second_byte, "00");
        }
    }

    #[test]
    fn subnet_index_round_trips() {
        let (hi, lo) = subnet_octets(subnet_index(31, 200));
        assert_eq!((hi, lo), (31, 200));
    }

    #[test]
    fn subnet_index_zero_is_172_16() {
        assert_eq!(format_ip(0, 2), "172.16.0.2");
        assert_eq!(parse_ip("172.16.0.2").unwrap(), (0, 2));
    }

    #[test]
    fn first_allocation_lands_in_172_16_range() {
        let mut t = tenant();
        let ip = allocate(&mut t).unwrap();
        assert_eq!(ip, "172.16.0.2");
    }

    #[test]
    fn parse_ip_rejects_out_of_range_high_octet() {
        assert!(parse_ip("172.15.0.2").is_err());
        assert!(parse_ip("172.48.0.2").is_err());
    }
}
