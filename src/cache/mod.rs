//! The write-through cache. One `parking_lot::RwLock` per
//! independent index, so readers on one index are never blocked by a
//! writer on another.
//!
//! `parking_lot` locks rather than `std::sync` ones: no poisoning to
//! thread through every caller, and the guards are small enough that
//! holding one across a synchronous cache mutation (never across a
//! backend call) is cheap.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::store::LoadedState;
use crate::types::{
    BlockData, Id, Instance, InstanceLastStat, MappedIp, NodeLastStat, Pool, StorageAttachment,
    Tenant, UsageSample,
};

/// Secondary indexes kept alongside the tenants map so instance lookups
/// by node or by tenant don't require scanning the whole arena.
#[derive(Default)]
pub struct InstanceIndexes {
    pub by_id: HashMap<Id, Instance>,
    pub by_node: HashMap<Id, BTreeSet<Id>>,
    pub by_tenant: HashMap<Id, BTreeSet<Id>>,
}

/// All in-memory state: one lock per entity kind, acquired independently
/// so a read on instances never waits behind a write on tenants.
pub struct CacheIndexes {
    pub tenants: RwLock<HashMap<Id, Tenant>>,
    pub instances: RwLock<InstanceIndexes>,
    pub node_last_stat: RwLock<HashMap<Id, NodeLastStat>>,
    pub instance_last_stat: RwLock<HashMap<Id, InstanceLastStat>>,
    pub tenant_usage: RwLock<HashMap<Id, Vec<UsageSample>>>,
    pub block_devices: RwLock<HashMap<Id, BlockData>>,
    pub attachments: RwLock<HashMap<Id, StorageAttachment>>,
    pub pools: RwLock<HashMap<Id, Pool>>,
    /// `external address -> pool id`, maintained alongside `pools` under
    /// the same lock to keep overlap checks O(1) without scanning every
    /// pool's subnet list.
    pub mapped_ips: RwLock<HashMap<String, MappedIp>>,
}

impl CacheIndexes {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            instances: RwLock::new(InstanceIndexes::default()),
            node_last_stat: RwLock::new(HashMap::new()),
            instance_last_stat: RwLock::new(HashMap::new()),
            tenant_usage: RwLock::new(HashMap::new()),
            block_devices: RwLock::new(HashMap::new()),
            attachments: RwLock::new(HashMap::new()),
            pools: RwLock::new(HashMap::new()),
            mapped_ips: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuilds every index from a backend snapshot. Called once at
    /// startup, before any concurrent access begins — no lock
    /// contention is possible yet, so this takes write locks freely.
    pub fn rebuild_from(state: LoadedState) -> Self {
        let cache = Self::new();

        {
            let mut tenants = cache.tenants.write();
            for tenant in state.tenants {
                tenants.insert(tenant.id.clone(), tenant);
            }
        }

        {
            let mut instances = cache.instances.write();
            for instance in state.instances {
                if !instance.node_id.is_empty() {
                    instances
                        .by_node
                        .entry(instance.node_id.clone())
                        .or_default()
                        .insert(instance.id.clone());
                }
                instances
                    .by_tenant
                    .entry(instance.tenant_id.clone())
                    .or_default()
                    .insert(instance.id.clone());
                instances.by_id.insert(instance.id.clone(), instance);
            }
        }

        {
            let mut blocks = cache.block_devices.write();
            for block in state.block_devices {
                blocks.insert(block.id.clone(), block);
            }
        }

        {
            let mut attachments = cache.attachments.write();
            for attachment in state.attachments {
                attachments.insert(attachment.id.clone(), attachment);
            }
        }

        {
            let mut pools = cache.pools.write();
            for pool in state.pools {
                pools.insert(pool.id.clone(), pool);
            }
        }

        {
            let mut mapped = cache.mapped_ips.write();
            for mapping in state.mapped_ips {
                mapped.insert(mapping.external_ip.clone(), mapping);
            }
        }

        {
            let mut node_stats = cache.node_last_stat.write();
            for stat in state.node_last_stats {
                node_stats.insert(stat.node_id.clone(), stat);
            }
        }

        {
            let mut instance_stats = cache.instance_last_stat.write();
            for stat in state.instance_last_stats {
                instance_stats.insert(stat.instance_id.clone(), stat);
            }
        }

        cache
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().by_id.len()
    }
}

impl Default for CacheIndexes {
    fn default() -> Self {
        Self::new()
    }
}
