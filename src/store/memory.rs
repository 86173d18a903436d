//! In-memory `PersistentStore`: no durability, used by tests and by
//! the `db_backend = Memory` configuration option. Mirrors the shape
//! of the relational backend exactly, so a test written against
//! `MemoryStore` exercises the same cache-rebuild path as production.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreResult;
use crate::types::{
    BlockData, EventRecord, ExternalIp, ExternalSubnet, Instance, InstanceLastStat, MappedIp,
    NodeLastStat, Pool, QuotaDetail, StorageAttachment, Tenant, UsageSample, Workload,
};

use super::{LoadedState, PersistentStore};

#[derive(Default)]
struct Tables {
    tenants: HashMap<String, Tenant>,
    workloads: HashMap<String, Workload>,
    instances: HashMap<String, Instance>,
    tenant_ips: std::collections::BTreeSet<(String, u32, u8)>,
    block_devices: HashMap<String, BlockData>,
    attachments: HashMap<String, StorageAttachment>,
    pools: HashMap<String, Pool>,
    mapped_ips: HashMap<String, MappedIp>,
    quotas: HashMap<(String, String), QuotaDetail>,
    node_last_stats: HashMap<String, NodeLastStat>,
    node_stat_samples: Vec<NodeLastStat>,
    instance_last_stats: HashMap<String, InstanceLastStat>,
    tenant_usage: HashMap<String, Vec<UsageSample>>,
    events: Vec<EventRecord>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn initialize(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn load_all(&self) -> StoreResult<LoadedState> {
        let t = self.tables.lock();
        Ok(LoadedState {
            tenants: t.tenants.values().cloned().collect(),
            workloads: t.workloads.values().cloned().collect(),
            instances: t.instances.values().cloned().collect(),
            block_devices: t.block_devices.values().cloned().collect(),
            attachments: t.attachments.values().cloned().collect(),
            pools: t.pools.values().cloned().collect(),
            mapped_ips: t.mapped_ips.values().cloned().collect(),
            quotas: t.quotas.values().cloned().collect(),
            node_last_stats: t.node_last_stats.values().cloned().collect(),
            instance_last_stats: t.instance_last_stats.values().cloned().collect(),
            events: t.events.clone(),
        })
    }

    async fn save_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        self.tables.lock().tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }

    async fn delete_tenant(&self, id: &str) -> StoreResult<()> {
        self.tables.lock().tenants.remove(id);
        Ok(())
    }

    async fn save_workload(&self, workload: &Workload) -> StoreResult<()> {
        self.tables
            .lock()
            .workloads
            .insert(workload.id.clone(), workload.clone());
        Ok(())
    }

    async fn delete_workload(&self, id: &str) -> StoreResult<()> {
        self.tables.lock().workloads.remove(id);
        Ok(())
    }

    async fn save_instance(&self, instance: &Instance) -> StoreResult<()> {
        self.tables
            .lock()
            .instances
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn delete_instance(&self, id: &str) -> StoreResult<()> {
        self.tables.lock().instances.remove(id);
        Ok(())
    }

    async fn save_tenant_ip(&self, tenant_id: &str, subnet_index: u32, host: u8) -> StoreResult<()> {
        self.tables
            .lock()
            .tenant_ips
            .insert((tenant_id.to_string(), subnet_index, host));
        Ok(())
    }

    async fn delete_tenant_ip(
        &self,
        tenant_id: &str,
        subnet_index: u32,
        host: u8,
    ) -> StoreResult<()> {
        self.tables
            .lock()
            .tenant_ips
            .remove(&(tenant_id.to_string(), subnet_index, host));
        Ok(())
    }

    async fn save_block_data(&self, block: &BlockData) -> StoreResult<()> {
        self.tables
            .lock()
            .block_devices
            .insert(block.id.clone(), block.clone());
        Ok(())
    }

    async fn delete_block_data(&self, id: &str) -> StoreResult<()> {
        self.tables.lock().block_devices.remove(id);
        Ok(())
    }

    async fn save_attachment(&self, attachment: &StorageAttachment) -> StoreResult<()> {
        self.tables
            .lock()
            .attachments
            .insert(attachment.id.clone(), attachment.clone());
        Ok(())
    }

    async fn delete_attachment(&self, id: &str) -> StoreResult<()> {
        self.tables.lock().attachments.remove(id);
        Ok(())
    }

    async fn save_pool(&self, pool: &Pool) -> StoreResult<()> {
        self.tables.lock().pools.insert(pool.id.clone(), pool.clone());
        Ok(())
    }

    async fn delete_pool(&self, id: &str) -> StoreResult<()> {
        self.tables.lock().pools.remove(id);
        Ok(())
    }

    async fn save_external_subnet(&self, pool_id: &str, subnet: &ExternalSubnet) -> StoreResult<()> {
        let mut t = self.tables.lock();
        if let Some(pool) = t.pools.get_mut(pool_id) {
            pool.subnets.retain(|s| s.id != subnet.id);
            pool.subnets.push(subnet.clone());
        }
        Ok(())
    }

    async fn delete_external_subnet(&self, pool_id: &str, subnet_id: &str) -> StoreResult<()> {
        let mut t = self.tables.lock();
        if let Some(pool) = t.pools.get_mut(pool_id) {
            pool.subnets.retain(|s| s.id != subnet_id);
        }
        Ok(())
    }

    async fn save_external_ip(&self, pool_id: &str, ip: &ExternalIp) -> StoreResult<()> {
        let mut t = self.tables.lock();
        if let Some(pool) = t.pools.get_mut(pool_id) {
            pool.individual_ips.retain(|i| i.id != ip.id);
            pool.individual_ips.push(ip.clone());
        }
        Ok(())
    }

    async fn delete_external_ip(&self, pool_id: &str, ip_id: &str) -> StoreResult<()> {
        let mut t = self.tables.lock();
        if let Some(pool) = t.pools.get_mut(pool_id) {
            pool.individual_ips.retain(|i| i.id != ip_id);
        }
        Ok(())
    }

    async fn save_mapped_ip(&self, mapping: &MappedIp) -> StoreResult<()> {
        self.tables
            .lock()
            .mapped_ips
            .insert(mapping.id.clone(), mapping.clone());
        Ok(())
    }

    async fn delete_mapped_ip(&self, id: &str) -> StoreResult<()> {
        self.tables.lock().mapped_ips.remove(id);
        Ok(())
    }

    async fn upsert_quota(&self, quota: &QuotaDetail) -> StoreResult<()> {
        self.tables
            .lock()
            .quotas
            .insert((quota.tenant_id.clone(), quota.name.clone()), quota.clone());
        Ok(())
    }

    async fn load_quotas(&self, tenant_id: &str) -> StoreResult<Vec<QuotaDetail>> {
        Ok(self
            .tables
            .lock()
            .quotas
            .values()
            .filter(|q| q.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn upsert_node_last_stat(&self, stat: &NodeLastStat) -> StoreResult<()> {
        self.tables
            .lock()
            .node_last_stats
            .insert(stat.node_id.clone(), stat.clone());
        Ok(())
    }

    async fn append_node_stat_sample(&self, stat: &NodeLastStat) -> StoreResult<()> {
        self.tables.lock().node_stat_samples.push(stat.clone());
        Ok(())
    }

    async fn upsert_instance_last_stat(&self, stat: &InstanceLastStat) -> StoreResult<()> {
        self.tables
            .lock()
            .instance_last_stats
            .insert(stat.instance_id.clone(), stat.clone());
        Ok(())
    }

    async fn append_tenant_usage_sample(
        &self,
        tenant_id: &str,
        sample: &UsageSample,
    ) -> StoreResult<()> {
        self.tables
            .lock()
            .tenant_usage
            .entry(tenant_id.to_string())
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn load_tenant_usage_history(&self, tenant_id: &str) -> StoreResult<Vec<UsageSample>> {
        Ok(self
            .tables
            .lock()
            .tenant_usage
            .get(tenant_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_event(&self, event: &EventRecord) -> StoreResult<()> {
        self.tables.lock().events.push(event.clone());
        Ok(())
    }

    async fn load_events(&self, tenant_id: &str) -> StoreResult<Vec<EventRecord>> {
        Ok(self
            .tables
            .lock()
            .events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn clear_events(&self, tenant_id: &str) -> StoreResult<()> {
        self.tables.lock().events.retain(|e| e.tenant_id != tenant_id);
        Ok(())
    }
}
