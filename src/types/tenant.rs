use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::Id;

/// A tenant's view of its own `172.16.0.0/12`-style address space: which
/// host octets are allocated within each subnet index it owns.
///
/// Keyed by subnet index (`high << 8 | low`), see
/// [`crate::allocator::subnet_index`].
pub type NetworkMap = HashMap<u32, BTreeSet<u8>>;

/// Owner of instances, block devices, and workload templates. Also the
/// unit of IP-address allocation: every tenant has its own bitmap of
/// `172.x.y.z` subnets, independent of every other tenant's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Id,
    pub name: String,

    /// Instance id of this tenant's controller-network-instance, once
    /// its CNCI workload has been launched. Empty until then.
    pub cnci_id: String,
    /// MAC address of the CNCI, generated once at tenant creation.
    /// Byte 0 is forced to `0x02`, byte 1 forced non-zero so CNCI MACs
    /// never collide with MACs derived from allocated instance IPs
    /// (see [`crate::allocator::derive_mac`]).
    pub cnci_mac: String,
    /// IP address of the CNCI, set once its first stat arrives.
    pub cnci_ip: String,

    pub network_map: NetworkMap,
    /// Subnet indexes this tenant owns, in the order they were created.
    /// The allocator always tries owned subnets in this order before
    /// minting a new one.
    pub owned_subnets: Vec<u32>,

    /// Ids of instances owned by this tenant. The authoritative
    /// `Instance` records live in the global instances arena
    /// ([`crate::cache::CacheIndexes::instances`]); this is an index,
    /// not a second copy (see the arena design note in `DESIGN.md`).
    pub instances: BTreeSet<Id>,
    pub block_devices: BTreeSet<Id>,
    pub workloads: Vec<Id>,
}

impl Tenant {
    pub fn new(id: Id, name: String, cnci_mac: String) -> Self {
        Self {
            id,
            name,
            cnci_id: String::new(),
            cnci_mac,
            cnci_ip: String::new(),
            network_map: HashMap::new(),
            owned_subnets: Vec::new(),
            instances: BTreeSet::new(),
            block_devices: BTreeSet::new(),
            workloads: Vec::new(),
        }
    }
}
