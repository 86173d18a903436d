//! External IP pool manager. All validation happens before any
//! mutation — pool creation in particular must check every proposed
//! subnet and IP against the whole registry before committing a single
//! one, so a rejected pool leaves the registry byte-for-byte unchanged.

use std::net::Ipv4Addr;

use crate::error::{DatastoreError, Result};
use crate::types::{ExternalIp, ExternalSubnet, MappedIp, Pool};

struct ParsedCidr {
    base: u32,
    prefix: u32,
}

impl ParsedCidr {
    fn parse(cidr: &str) -> Result<Self> {
        let (addr, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| DatastoreError::InvalidPoolAddress(cidr.to_string()))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| DatastoreError::InvalidPoolAddress(cidr.to_string()))?;
        let prefix: u32 = prefix
            .parse()
            .map_err(|_| DatastoreError::InvalidPoolAddress(cidr.to_string()))?;
        if prefix > 32 {
            return Err(DatastoreError::InvalidPoolAddress(cidr.to_string()));
        }
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        Ok(Self {
            base: u32::from(addr) & mask,
            prefix,
        })
    }

    fn last(&self) -> u32 {
        let hosts = if self.prefix == 32 { 0 } else { (1u32 << (32 - self.prefix)) - 1 };
        self.base + hosts
    }

    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr <= self.last()
    }

    fn overlaps(&self, other: &ParsedCidr) -> bool {
        self.contains(other.base) || other.contains(self.base)
    }

    fn usable_count(&self) -> i64 {
        if self.prefix >= 31 {
            // /31 and /32 have no distinct network/broadcast to subtract.
            return (self.last() - self.base + 1) as i64;
        }
        (self.last() - self.base - 1) as i64
    }
}

fn parse_addr(addr: &str) -> Result<u32> {
    addr.parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| DatastoreError::InvalidPoolAddress(addr.to_string()))
}

/// Returns `true` if `address` falls within `cidr` (used by subnet
/// delete to scan the mapped-IP registry for occupants).
pub fn cidr_contains(cidr: &str, address: &str) -> Result<bool> {
    let parsed = ParsedCidr::parse(cidr)?;
    let addr = parse_addr(address)?;
    Ok(parsed.contains(addr))
}

/// Validates a proposed set of subnets/individual IPs against every
/// existing pool. Returns the combined `(free, total)` delta to apply
/// on success. Performs no mutation — callers commit only after this
/// returns `Ok`.
pub fn validate_additions(
    existing: &[&Pool],
    new_subnets: &[String],
    new_ips: &[String],
) -> Result<i64> {
    let mut parsed_new_subnets = Vec::with_capacity(new_subnets.len());
    for cidr in new_subnets {
        let parsed = ParsedCidr::parse(cidr)?;
        for pool in existing {
            for s in &pool.subnets {
                let other = ParsedCidr::parse(&s.cidr)?;
                if parsed.overlaps(&other) {
                    return Err(DatastoreError::DuplicateSubnet(cidr.clone()));
                }
            }
        }
        for other_cidr in new_subnets {
            if other_cidr == cidr {
                continue;
            }
            let other = ParsedCidr::parse(other_cidr)?;
            if parsed.overlaps(&other) {
                return Err(DatastoreError::DuplicateSubnet(cidr.clone()));
            }
        }
        parsed_new_subnets.push(parsed);
    }

    for ip in new_ips {
        let addr = parse_addr(ip)?;
        for pool in existing {
            for s in &pool.subnets {
                let parsed = ParsedCidr::parse(&s.cidr)?;
                if parsed.contains(addr) {
                    return Err(DatastoreError::DuplicateIp(ip.clone()));
                }
            }
            for existing_ip in &pool.individual_ips {
                if existing_ip.address == *ip {
                    return Err(DatastoreError::DuplicateIp(ip.clone()));
                }
            }
        }
        for parsed in &parsed_new_subnets {
            if parsed.contains(addr) {
                return Err(DatastoreError::DuplicateIp(ip.clone()));
            }
        }
    }

    let subnet_total: i64 = parsed_new_subnets.iter().map(|p| p.usable_count()).sum();
    Ok(subnet_total + new_ips.len() as i64)
}

/// Claims the first free address in `pool`, consulting `mapped` (keyed
/// by external address) to skip anything already mapped. Returns the
/// claimed address and, if it came from a subnet, that subnet's id.
pub fn claim_address(
    pool: &Pool,
    mapped: &std::collections::HashMap<String, MappedIp>,
) -> Result<String> {
    for subnet in &pool.subnets {
        let parsed = ParsedCidr::parse(&subnet.cidr)?;
        let first = parsed.base + 1;
        let last = if parsed.prefix >= 31 { parsed.last() } else { parsed.last() - 1 };
        let mut addr = first;
        while addr <= last {
            let candidate = Ipv4Addr::from(addr).to_string();
            if !mapped.contains_key(&candidate) {
                return Ok(candidate);
            }
            addr += 1;
        }
    }

    for ip in &pool.individual_ips {
        if !mapped.contains_key(&ip.address) {
            return Ok(ip.address.clone());
        }
    }

    Err(DatastoreError::PoolEmpty)
}

/// `2^(32-prefix) - 2` for `/0`..`/30`, `2^(32-prefix)` for `/31`/`/32`.
pub fn subnet_usable_count(cidr: &str) -> Result<i64> {
    Ok(ParsedCidr::parse(cidr)?.usable_count())
}

pub fn new_subnet(cidr: String) -> ExternalSubnet {
    ExternalSubnet {
        id: crate::types::new_id(),
        cidr,
    }
}

pub fn new_individual_ip(address: String) -> ExternalIp {
    ExternalIp {
        id: crate::types::new_id(),
        address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_subnet(cidr: &str) -> Pool {
        let mut pool = Pool::new("p1".into(), "pool-1".into());
        pool.subnets.push(new_subnet(cidr.to_string()));
        pool
    }

    #[test]
    fn duplicate_subnet_rejected() {
        let existing = pool_with_subnet("192.168.0.0/24");
        let err = validate_additions(&[&existing], &["192.168.0.0/24".to_string()], &[]);
        assert!(matches!(err, Err(DatastoreError::DuplicateSubnet(_))));
    }

    #[test]
    fn slash_24_usable_count_subtracts_network_and_broadcast() {
        assert_eq!(subnet_usable_count("10.0.0.0/24").unwrap(), 254);
    }

    #[test]
    fn claim_address_skips_mapped() {
        let mut pool = pool_with_subnet("192.168.0.0/30");
        pool.total = subnet_usable_count("192.168.0.0/30").unwrap();
        pool.free = pool.total;
        let mut mapped = std::collections::HashMap::new();
        let first = claim_address(&pool, &mapped).unwrap();
        assert_eq!(first, "192.168.0.1");
        mapped.insert(
            first.clone(),
            MappedIp {
                id: "m1".into(),
                external_ip: first,
                internal_ip: "172.0.0.2".into(),
                instance_id: "i1".into(),
                tenant_id: "t1".into(),
                pool_id: "p1".into(),
                pool_name: "pool-1".into(),
            },
        );
        let second = claim_address(&pool, &mapped).unwrap();
        assert_eq!(second, "192.168.0.2");
    }

    #[test]
    fn pool_empty_when_no_address_available() {
        let pool = Pool::new("p1".into(), "pool-1".into());
        let mapped = std::collections::HashMap::new();
        let err = claim_address(&pool, &mapped);
        assert!(matches!(err, Err(DatastoreError::PoolEmpty)));
    }
}
