use serde::{Deserialize, Serialize};

use super::Id;

/// A CIDR block contributed to a pool, e.g. `192.168.0.0/24`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSubnet {
    pub id: Id,
    pub cidr: String,
}

/// A single standalone address contributed to a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIp {
    pub id: Id,
    pub address: String,
}

/// A named collection of externally-routable addresses that
/// [`crate::external_ip`] allocates from.
///
/// Invariant (maintained by [`crate::external_ip`], not self-checked):
/// `total == sum(usable addresses in subnets) + individual_ips.len()`
/// and `free == total - mapped_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: Id,
    pub name: String,
    pub free: i64,
    pub total: i64,
    pub subnets: Vec<ExternalSubnet>,
    pub individual_ips: Vec<ExternalIp>,
}

impl Pool {
    pub fn new(id: Id, name: String) -> Self {
        Self {
            id,
            name,
            free: 0,
            total: 0,
            subnets: Vec::new(),
            individual_ips: Vec::new(),
        }
    }
}
