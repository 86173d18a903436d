//! The `Datastore` facade: the single entry point northbound
//! callers and the southbound stat pipeline use. Coordinates the cache,
//! the pluggable backend, and every subsystem module behind one
//! method-per-operation API. Cache mutations happen synchronously under
//! the owning lock; backend writes are dispatched afterward and never
//! block a reader.

use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::oneshot;

use crate::allocator;
use crate::cache::CacheIndexes;
use crate::error::{DatastoreError, Result};
use crate::event_log::EventLog;
use crate::external_ip;
use crate::quota::QuotaService;
use crate::stats::{self, PerInstanceReport, Stat};
use crate::storage;
use crate::store::PersistentStore;
use crate::types::{
    new_id, BlockData, BlockState, ExternalIp, ExternalSubnet, Id, Instance, InstanceState,
    MappedIp, NodeLastStat, Pool, QuotaDetail, Severity, StorageAttachment, Tenant, Workload,
};

/// Single-slot CNCI-creation barrier, keyed by tenant id.
type CnciRegistry = parking_lot::Mutex<std::collections::HashMap<Id, oneshot::Sender<bool>>>;

pub struct Datastore {
    cache: CacheIndexes,
    backend: Arc<dyn PersistentStore>,
    quotas: QuotaService,
    events: EventLog,
    cnci_pending: CnciRegistry,
}

impl Datastore {
    /// Connects the backend, runs its schema initialization, loads
    /// every table, and rebuilds the cache from that snapshot — the
    /// "reload reproduces last clean shutdown" guarantee.
    pub async fn initialize(backend: Arc<dyn PersistentStore>) -> Result<Self> {
        backend.initialize().await?;
        let state = backend.load_all().await?;
        let tenant_count = state.tenants.len();
        let instance_count = state.instances.len();
        let cache = CacheIndexes::rebuild_from(state);
        info!(
            "cache rebuilt: {} tenants, {} instances",
            tenant_count, instance_count
        );
        Ok(Self {
            cache,
            backend: backend.clone(),
            quotas: QuotaService::new(backend.clone()),
            events: EventLog::new(backend),
            cnci_pending: CnciRegistry::default(),
        })
    }

    #[cfg(test)]
    pub fn new_for_test(backend: Arc<dyn PersistentStore>) -> Self {
        Self {
            cache: CacheIndexes::new(),
            backend: backend.clone(),
            quotas: QuotaService::new(backend.clone()),
            events: EventLog::new(backend),
            cnci_pending: CnciRegistry::default(),
        }
    }

    // ---- Tenants ----------------------------------------------------

    pub async fn add_tenant(&self, name: String) -> Result<Tenant> {
        let tenant = Tenant::new(new_id(), name, allocator::random_cnci_mac());
        self.cache.tenants.write().insert(tenant.id.clone(), tenant.clone());
        if let Err(e) = self.backend.save_tenant(&tenant).await {
            warn!("tenant {} cache-committed but backend save failed: {}", tenant.id, e);
        }
        Ok(tenant)
    }

    pub fn get_tenant(&self, id: &str) -> Result<Tenant> {
        self.cache
            .tenants
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DatastoreError::TenantNotFound(id.to_string()))
    }

    // ---- Tenant-network IP allocator --------------------------

    pub async fn allocate_tenant_ip(&self, tenant_id: &str) -> Result<String> {
        let (ip, subnet, host) = {
            let mut tenants = self.cache.tenants.write();
            let tenant = tenants
                .get_mut(tenant_id)
                .ok_or_else(|| DatastoreError::TenantNotFound(tenant_id.to_string()))?;
            let ip = allocator::allocate(tenant)?;
            let (subnet, host) = allocator::parse_ip(&ip)?;
            (ip, subnet, host)
        };
        if let Err(e) = self.backend.save_tenant_ip(tenant_id, subnet, host).await {
            warn!("tenant ip {} allocated in cache but backend save failed: {}", ip, e);
        }
        Ok(ip)
    }

    pub async fn release_tenant_ip(&self, tenant_id: &str, ip: &str) -> Result<()> {
        // Re-parses the IP string rather than taking an already-decoded
        // (subnet, host) pair — the canonical boundary for this call.
        let (subnet, host) = allocator::parse_ip(ip)?;
        {
            let mut tenants = self.cache.tenants.write();
            if let Some(tenant) = tenants.get_mut(tenant_id) {
                allocator::release(tenant, subnet, host);
            }
        }
        if let Err(e) = self.backend.delete_tenant_ip(tenant_id, subnet, host).await {
            warn!("tenant ip {} released in cache but backend delete failed: {}", ip, e);
        }
        Ok(())
    }

    // ---- Instances ----------------------------------------------------

    pub async fn add_instance(
        &self,
        tenant_id: String,
        workload_id: String,
        name: Option<String>,
        is_cnci: bool,
    ) -> Result<Instance> {
        let ip = self.allocate_tenant_ip(&tenant_id).await?;
        let mac = allocator::derive_mac(&ip)?;
        let (subnet_index, _) = allocator::parse_ip(&ip)?;
        let instance = Instance::new(
            new_id(),
            tenant_id.clone(),
            workload_id,
            name,
            mac,
            ip,
            subnet_index,
            Utc::now(),
        );

        {
            let mut tenants = self.cache.tenants.write();
            if let Some(tenant) = tenants.get_mut(&tenant_id) {
                tenant.instances.insert(instance.id.clone());
                if is_cnci {
                    tenant.cnci_id = instance.id.clone();
                }
            }
        }
        {
            let mut instances = self.cache.instances.write();
            instances
                .by_tenant
                .entry(tenant_id.clone())
                .or_default()
                .insert(instance.id.clone());
            instances.by_id.insert(instance.id.clone(), instance.clone());
        }

        if let Err(e) = self.backend.save_instance(&instance).await {
            warn!("instance {} cache-committed but backend save failed: {}", instance.id, e);
        }
        Ok(instance)
    }

    pub fn get_instance(&self, id: &str) -> Result<Instance> {
        self.cache
            .instances
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| DatastoreError::InstanceNotFound(id.to_string()))
    }

    pub async fn delete_instance(&self, id: &str) -> Result<()> {
        let instance = self.get_instance(id)?;

        // Ephemeral volumes don't outlive the instance they're attached
        // to; non-ephemeral ones are only detached.
        for attachment in self.get_storage_attachments(id) {
            let volume_id = attachment.volume_id.clone();
            let ephemeral = attachment.ephemeral;
            if let Err(e) = self.delete_storage_attachment(&attachment.id).await {
                warn!("failed to remove attachment {} while deleting instance {}: {}", attachment.id, id, e);
                continue;
            }
            if ephemeral {
                if let Err(e) = self.delete_block_device(&volume_id).await {
                    warn!("failed to remove ephemeral volume {} while deleting instance {}: {}", volume_id, id, e);
                }
            }
        }

        self.release_tenant_ip(&instance.tenant_id, &instance.ip).await?;

        {
            let mut instances = self.cache.instances.write();
            instances.by_id.remove(id);
            if let Some(set) = instances.by_tenant.get_mut(&instance.tenant_id) {
                set.remove(id);
            }
            if !instance.node_id.is_empty() {
                if let Some(set) = instances.by_node.get_mut(&instance.node_id) {
                    set.remove(id);
                }
            }
        }
        {
            let mut tenants = self.cache.tenants.write();
            if let Some(tenant) = tenants.get_mut(&instance.tenant_id) {
                tenant.instances.remove(id);
            }
        }

        if let Err(e) = self.backend.delete_instance(id).await {
            warn!("instance {} removed from cache but backend delete failed: {}", id, e);
        }
        Ok(())
    }

    // ---- Block devices --------------------------------------------

    pub async fn add_block_device(
        &self,
        tenant_id: String,
        size_gib: i64,
        name: String,
        description: String,
    ) -> Result<BlockData> {
        let block = BlockData::new(new_id(), tenant_id.clone(), size_gib, name, description);
        self.cache.block_devices.write().insert(block.id.clone(), block.clone());
        {
            let mut tenants = self.cache.tenants.write();
            if let Some(tenant) = tenants.get_mut(&tenant_id) {
                tenant.block_devices.insert(block.id.clone());
            }
        }
        if let Err(e) = self.backend.save_block_data(&block).await {
            warn!("block device {} cache-committed but backend save failed: {}", block.id, e);
        }
        Ok(block)
    }

    pub async fn update_block_device(&self, id: &str, state: BlockState) -> Result<BlockData> {
        let updated = {
            let mut blocks = self.cache.block_devices.write();
            let block = blocks
                .get_mut(id)
                .ok_or_else(|| DatastoreError::BlockDataNotFound(id.to_string()))?;
            block.state = storage::transition(block.state, state)?;
            block.clone()
        };
        if let Err(e) = self.backend.save_block_data(&updated).await {
            warn!("block device {} state updated in cache but backend save failed: {}", id, e);
        }
        Ok(updated)
    }

    pub async fn delete_block_device(&self, id: &str) -> Result<()> {
        let block = self
            .cache
            .block_devices
            .write()
            .remove(id)
            .ok_or_else(|| DatastoreError::BlockDataNotFound(id.to_string()))?;
        {
            let mut tenants = self.cache.tenants.write();
            if let Some(tenant) = tenants.get_mut(&block.tenant_id) {
                tenant.block_devices.remove(id);
            }
        }
        if let Err(e) = self.backend.delete_block_data(id).await {
            warn!("block device {} removed from cache but backend delete failed: {}", id, e);
        }
        Ok(())
    }

    // ---- Storage attachments ----------------------------------------

    pub async fn create_storage_attachment(
        &self,
        instance_id: String,
        volume_id: String,
        ephemeral: bool,
        boot: bool,
    ) -> Result<StorageAttachment> {
        let attachment = storage::new_attachment(instance_id, volume_id.clone(), ephemeral, boot);

        let previous_state = {
            let mut blocks = self.cache.block_devices.write();
            let block = blocks
                .get_mut(&volume_id)
                .ok_or_else(|| DatastoreError::BlockDataNotFound(volume_id.clone()))?;
            let previous = block.state;
            block.state = storage::transition(block.state, BlockState::InUse)?;
            previous
        };
        self.cache.attachments.write().insert(attachment.id.clone(), attachment.clone());
        let block = self.cache.block_devices.read().get(&volume_id).cloned();

        if let Err(e) = self.backend.save_attachment(&attachment).await {
            warn!("rolling back attachment {} after backend save failure: {}", attachment.id, e);
            self.cache.attachments.write().remove(&attachment.id);
            if let Some(block) = self.cache.block_devices.write().get_mut(&volume_id) {
                block.state = previous_state;
            }
            return Err(DatastoreError::StorageFailure(
                crate::error::StoreError::Query(e.to_string()),
            ));
        }

        if let Some(block) = block {
            if let Err(e) = self.backend.save_block_data(&block).await {
                warn!("volume {} state persisted to cache but backend save failed: {}", volume_id, e);
            }
        }
        Ok(attachment)
    }

    pub async fn delete_storage_attachment(&self, id: &str) -> Result<()> {
        let attachment = self
            .cache
            .attachments
            .write()
            .remove(id)
            .ok_or_else(|| DatastoreError::StorageAttachmentNotFound(id.to_string()))?;

        let updated_block = {
            let mut blocks = self.cache.block_devices.write();
            blocks.get_mut(&attachment.volume_id).map(|block| {
                if let Ok(new_state) = storage::transition(block.state, BlockState::Available) {
                    block.state = new_state;
                }
                block.clone()
            })
        };

        if let Err(e) = self.backend.delete_attachment(id).await {
            warn!("attachment {} removed from cache but backend delete failed: {}", id, e);
        }
        if let Some(block) = updated_block {
            if let Err(e) = self.backend.save_block_data(&block).await {
                warn!("volume {} state updated in cache but backend save failed: {}", block.id, e);
            }
        }
        Ok(())
    }

    pub fn get_storage_attachments(&self, instance_id: &str) -> Vec<StorageAttachment> {
        self.cache
            .attachments
            .read()
            .values()
            .filter(|a| a.instance_id == instance_id)
            .cloned()
            .collect()
    }

    // ---- Stats ingestor ---------------------------------------

    pub async fn handle_stats(&self, stat: Stat) -> Result<()> {
        let now = Utc::now();

        if stats::is_load_sample_present(stat.load) {
            let node_stat = NodeLastStat {
                node_id: stat.node_id.clone(),
                hostname: stat.hostname.clone(),
                mem_total_mib: stat.mem_total_mib,
                mem_available_mib: stat.mem_available_mib,
                disk_total_mib: stat.disk_total_mib,
                disk_available_mib: stat.disk_available_mib,
                load: stat.load,
                cpu_count: stat.cpu_count,
                updated_at: now,
            };
            self.cache
                .node_last_stat
                .write()
                .insert(node_stat.node_id.clone(), node_stat.clone());
            if let Err(e) = self.backend.upsert_node_last_stat(&node_stat).await {
                warn!("node stat {} cache-committed but backend upsert failed: {}", node_stat.node_id, e);
            }
            if let Err(e) = self.backend.append_node_stat_sample(&node_stat).await {
                warn!("node stat history append failed for {}: {}", node_stat.node_id, e);
            }
        }

        for report in &stat.instances {
            self.handle_instance_report(&stat.node_id, report, now).await?;
        }

        Ok(())
    }

    async fn handle_instance_report(
        &self,
        node_id: &str,
        report: &PerInstanceReport,
        at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let previous = self.cache.instance_last_stat.read().get(&report.instance_id).cloned();
        let reported_usage = stats::ReportedInstanceUsage {
            instance_id: report.instance_id.clone(),
            cpu_units: report.cpu_units,
            mem_mib: report.mem_mib,
            disk_mib: report.disk_mib,
        };
        let (delta, new_last_stat) = stats::compute_delta(&reported_usage, previous.as_ref(), at);

        self.cache
            .instance_last_stat
            .write()
            .insert(report.instance_id.clone(), new_last_stat.clone());
        if let Err(e) = self.backend.upsert_instance_last_stat(&new_last_stat).await {
            warn!("instance last-stat {} cache-committed but backend upsert failed: {}", report.instance_id, e);
        }

        let tenant_id = {
            let mut instances = self.cache.instances.write();
            let tenant_id = instances.by_id.get(&report.instance_id).map(|i| i.tenant_id.clone());
            if let Some(instance) = instances.by_id.get_mut(&report.instance_id) {
                instance.state = report.state;
                instance.ssh_ip = report.ssh_ip.clone();
                instance.ssh_port = report.ssh_port;
                if instance.node_id != node_id {
                    instance.node_id = node_id.to_string();
                }
            }
            if let Some(set) = instances.by_node.get_mut(node_id) {
                set.insert(report.instance_id.clone());
            } else {
                instances
                    .by_node
                    .entry(node_id.to_string())
                    .or_default()
                    .insert(report.instance_id.clone());
            }
            tenant_id
        };

        let updated_instance = self.cache.instances.read().by_id.get(&report.instance_id).cloned();
        if let Some(instance) = updated_instance {
            if let Err(e) = self.backend.save_instance(&instance).await {
                warn!("instance {} state updated in cache but backend save failed: {}", instance.id, e);
            }
        }

        if let Some(tenant_id) = tenant_id {
            let last_sample = {
                let mut history = self.cache.tenant_usage.write();
                let entry = history.entry(tenant_id.clone()).or_default();
                stats::fold_usage(entry, &delta);
                entry.last().cloned()
            };
            if let Some(last) = last_sample {
                if let Err(e) = self.backend.append_tenant_usage_sample(&tenant_id, &last).await {
                    warn!("tenant usage sample append failed for {}: {}", tenant_id, e);
                }
            }
        }

        self.reconcile_attachments(&report.instance_id, &report.attached_volumes).await?;

        if report.state == InstanceState::Exited {
            // placeholder for lifecycle-failure hooks; a reported Exited
            // state on its own is not treated as a failure here, only as
            // a state update — LifecycleFailure is driven by an explicit
            // failure report, not stat polling.
        }

        Ok(())
    }

    async fn reconcile_attachments(&self, instance_id: &str, reported_volumes: &[Id]) -> Result<()> {
        let current: Vec<(Id, Id)> = self
            .cache
            .attachments
            .read()
            .values()
            .filter(|a| a.instance_id == instance_id)
            .map(|a| (a.id.clone(), a.volume_id.clone()))
            .collect();

        let diff = storage::reconcile(&current, reported_volumes);

        for volume_id in diff.to_create {
            let attachment = storage::new_attachment(instance_id.to_string(), volume_id.clone(), false, false);
            self.cache.attachments.write().insert(attachment.id.clone(), attachment.clone());
            if let Err(e) = self.backend.save_attachment(&attachment).await {
                warn!("reconciled attachment {} cache-committed but backend save failed: {}", attachment.id, e);
            }
            let block = {
                let mut blocks = self.cache.block_devices.write();
                blocks.get_mut(&volume_id).and_then(|block| {
                    storage::transition(block.state, BlockState::InUse).ok().map(|state| {
                        block.state = state;
                        block.clone()
                    })
                })
            };
            if let Some(block) = block {
                if let Err(e) = self.backend.save_block_data(&block).await {
                    warn!("volume {} state reconciled in cache but backend save failed: {}", volume_id, e);
                }
            }
        }

        for attachment_id in diff.to_remove {
            let attachment = self.cache.attachments.write().remove(&attachment_id);
            let Some(attachment) = attachment else { continue };
            if let Err(e) = self.backend.delete_attachment(&attachment_id).await {
                warn!("reconciled attachment {} removed from cache but backend delete failed: {}", attachment_id, e);
            }
            let block = {
                let mut blocks = self.cache.block_devices.write();
                blocks.get_mut(&attachment.volume_id).and_then(|block| {
                    storage::transition(block.state, BlockState::Available).ok().map(|state| {
                        block.state = state;
                        block.clone()
                    })
                })
            };
            if let Some(block) = block {
                if let Err(e) = self.backend.save_block_data(&block).await {
                    warn!("volume {} state reconciled in cache but backend save failed: {}", attachment.volume_id, e);
                }
            }
        }

        Ok(())
    }

    // ---- Lifecycle failures --------------------------------------

    pub async fn lifecycle_failure(&self, instance_id: &str, reason: &str) -> Result<()> {
        let instance = self.get_instance(instance_id)?;
        error!("lifecycle failure for instance {}: {}", instance_id, reason);
        self.events
            .append(instance.tenant_id.clone(), Severity::Error, format!("lifecycle failure: {}", reason))
            .await?;

        let is_cnci = self
            .cache
            .tenants
            .read()
            .get(&instance.tenant_id)
            .map(|t| t.cnci_id == instance_id)
            .unwrap_or(false);
        if is_cnci {
            self.teardown_cnci(&instance.tenant_id).await?;
            self.signal_cnci(&instance.tenant_id, false);
        }
        Ok(())
    }

    async fn teardown_cnci(&self, tenant_id: &str) -> Result<()> {
        let updated = {
            let mut tenants = self.cache.tenants.write();
            tenants.get_mut(tenant_id).map(|tenant| {
                tenant.cnci_id.clear();
                tenant.cnci_ip.clear();
                tenant.clone()
            })
        };
        if let Some(tenant) = updated {
            if let Err(e) = self.backend.save_tenant(&tenant).await {
                warn!("CNCI teardown for tenant {} committed to cache but backend save failed: {}", tenant_id, e);
            }
        }
        Ok(())
    }

    // ---- CNCI barrier --------------------------------------------

    /// Registers a single-slot channel for `tenant_id`. Overwrites any
    /// prior unclaimed registration — double-registration without an
    /// intervening signal is a caller bug.
    pub fn add_tenant_chan(&self, tenant_id: Id) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.cnci_pending.lock().insert(tenant_id, tx);
        rx
    }

    fn signal_cnci(&self, tenant_id: &str, ok: bool) {
        if let Some(tx) = self.cnci_pending.lock().remove(tenant_id) {
            let _ = tx.send(ok);
        }
    }

    /// Receipt of the CNCI's first IP assignment: sets the tenant's
    /// `cnci_ip` and signals `true` on the pending channel, if any.
    pub async fn add_cnci_ip(&self, tenant_id: &str, ip: String) -> Result<()> {
        let updated = {
            let mut tenants = self.cache.tenants.write();
            let tenant = tenants
                .get_mut(tenant_id)
                .ok_or_else(|| DatastoreError::TenantNotFound(tenant_id.to_string()))?;
            tenant.cnci_ip = ip;
            tenant.clone()
        };
        if let Err(e) = self.backend.save_tenant(&updated).await {
            warn!("CNCI ip for tenant {} committed to cache but backend save failed: {}", tenant_id, e);
        }
        self.signal_cnci(tenant_id, true);
        Ok(())
    }

    // ---- Workloads ------------------------------------------------

    pub async fn add_workload(&self, workload: Workload) -> Result<Workload> {
        if !workload.is_cnci {
            let mut tenants = self.cache.tenants.write();
            if let Some(tenant) = tenants.get_mut(&workload.tenant_id) {
                tenant.workloads.push(workload.id.clone());
            }
        }
        if let Err(e) = self.backend.save_workload(&workload).await {
            warn!("workload {} committed but backend save failed: {}", workload.id, e);
        }
        Ok(workload)
    }

    // ---- External IP pools -------------------------------------

    pub async fn add_pool(&self, name: String) -> Result<Pool> {
        let pool = Pool::new(new_id(), name);
        self.cache.pools.write().insert(pool.id.clone(), pool.clone());
        if let Err(e) = self.backend.save_pool(&pool).await {
            warn!("pool {} cache-committed but backend save failed: {}", pool.id, e);
        }
        Ok(pool)
    }

    pub async fn delete_pool(&self, id: &str) -> Result<()> {
        let mut pools = self.cache.pools.write();
        let pool = pools.get(id).ok_or_else(|| DatastoreError::PoolNotFound(id.to_string()))?;
        if pool.free != pool.total {
            return Err(DatastoreError::PoolNotEmpty);
        }
        pools.remove(id);
        drop(pools);
        if let Err(e) = self.backend.delete_pool(id).await {
            warn!("pool {} removed from cache but backend delete failed: {}", id, e);
        }
        Ok(())
    }

    pub async fn add_external_subnet(&self, pool_id: &str, cidr: String) -> Result<ExternalSubnet> {
        let delta = {
            let pools = self.cache.pools.read();
            let others: Vec<&Pool> = pools.values().filter(|p| p.id != pool_id).collect();
            external_ip::validate_additions(&others, &[cidr.clone()], &[])?
        };

        let subnet = external_ip::new_subnet(cidr);
        let updated = {
            let mut pools = self.cache.pools.write();
            let pool = pools
                .get_mut(pool_id)
                .ok_or_else(|| DatastoreError::PoolNotFound(pool_id.to_string()))?;
            pool.subnets.push(subnet.clone());
            pool.total += delta;
            pool.free += delta;
            pool.clone()
        };

        if let Err(e) = self.backend.save_external_subnet(pool_id, &subnet).await {
            warn!("subnet {} cache-committed but backend save failed, rolling back: {}", subnet.id, e);
            let mut pools = self.cache.pools.write();
            if let Some(pool) = pools.get_mut(pool_id) {
                pool.subnets.retain(|s| s.id != subnet.id);
                pool.total -= delta;
                pool.free -= delta;
            }
            return Err(DatastoreError::StorageFailure(crate::error::StoreError::Query(e.to_string())));
        }
        if let Err(e) = self.backend.save_pool(&updated).await {
            warn!("pool {} counters updated in cache but backend save failed: {}", pool_id, e);
        }
        Ok(subnet)
    }

    pub async fn add_external_ips(&self, pool_id: &str, addresses: Vec<String>) -> Result<Vec<ExternalIp>> {
        {
            let pools = self.cache.pools.read();
            let others: Vec<&Pool> = pools.values().filter(|p| p.id != pool_id).collect();
            external_ip::validate_additions(&others, &[], &addresses)?;
        }

        let new_ips: Vec<ExternalIp> = addresses.into_iter().map(external_ip::new_individual_ip).collect();
        let updated = {
            let mut pools = self.cache.pools.write();
            let pool = pools
                .get_mut(pool_id)
                .ok_or_else(|| DatastoreError::PoolNotFound(pool_id.to_string()))?;
            for ip in &new_ips {
                pool.individual_ips.push(ip.clone());
            }
            pool.total += new_ips.len() as i64;
            pool.free += new_ips.len() as i64;
            pool.clone()
        };

        for ip in &new_ips {
            if let Err(e) = self.backend.save_external_ip(pool_id, ip).await {
                warn!("external ip {} cache-committed but backend save failed: {}", ip.address, e);
            }
        }
        if let Err(e) = self.backend.save_pool(&updated).await {
            warn!("pool {} counters updated in cache but backend save failed: {}", pool_id, e);
        }
        Ok(new_ips)
    }

    pub async fn delete_subnet(&self, pool_id: &str, subnet_id: &str) -> Result<()> {
        let (cidr, delta) = {
            let pools = self.cache.pools.read();
            let pool = pools.get(pool_id).ok_or_else(|| DatastoreError::PoolNotFound(pool_id.to_string()))?;
            let subnet = pool
                .subnets
                .iter()
                .find(|s| s.id == subnet_id)
                .ok_or_else(|| DatastoreError::AddressNotFound(subnet_id.to_string()))?;
            (subnet.cidr.clone(), external_ip::subnet_usable_count(&subnet.cidr)?)
        };

        let mapped = self.cache.mapped_ips.read();
        for address in mapped.keys() {
            if external_ip::cidr_contains(&cidr, address)? {
                return Err(DatastoreError::PoolNotEmpty);
            }
        }
        drop(mapped);

        let updated = {
            let mut pools = self.cache.pools.write();
            let pool = pools.get_mut(pool_id).ok_or_else(|| DatastoreError::PoolNotFound(pool_id.to_string()))?;
            pool.subnets.retain(|s| s.id != subnet_id);
            pool.total -= delta;
            pool.free -= delta;
            pool.clone()
        };

        if let Err(e) = self.backend.delete_external_subnet(pool_id, subnet_id).await {
            warn!("subnet {} removed from cache but backend delete failed: {}", subnet_id, e);
        }
        if let Err(e) = self.backend.save_pool(&updated).await {
            warn!("pool {} counters updated in cache but backend save failed: {}", pool_id, e);
        }
        Ok(())
    }

    pub async fn delete_external_ip(&self, pool_id: &str, ip_id: &str) -> Result<()> {
        let address = {
            let pools = self.cache.pools.read();
            let pool = pools.get(pool_id).ok_or_else(|| DatastoreError::PoolNotFound(pool_id.to_string()))?;
            pool.individual_ips
                .iter()
                .find(|ip| ip.id == ip_id)
                .map(|ip| ip.address.clone())
                .ok_or_else(|| DatastoreError::AddressNotFound(ip_id.to_string()))?
        };
        if self.cache.mapped_ips.read().contains_key(&address) {
            return Err(DatastoreError::PoolNotEmpty);
        }

        let updated = {
            let mut pools = self.cache.pools.write();
            let pool = pools.get_mut(pool_id).ok_or_else(|| DatastoreError::PoolNotFound(pool_id.to_string()))?;
            pool.individual_ips.retain(|ip| ip.id != ip_id);
            pool.total -= 1;
            pool.free -= 1;
            pool.clone()
        };

        if let Err(e) = self.backend.delete_external_ip(pool_id, ip_id).await {
            warn!("external ip {} removed from cache but backend delete failed: {}", ip_id, e);
        }
        if let Err(e) = self.backend.save_pool(&updated).await {
            warn!("pool {} counters updated in cache but backend save failed: {}", pool_id, e);
        }
        Ok(())
    }

    pub async fn map_external_ip(&self, pool_id: &str, instance_id: &str) -> Result<MappedIp> {
        let instance = self.get_instance(instance_id)?;

        let (address, pool_name) = {
            let pools = self.cache.pools.read();
            let pool = pools.get(pool_id).ok_or_else(|| DatastoreError::PoolNotFound(pool_id.to_string()))?;
            if pool.free == 0 {
                return Err(DatastoreError::PoolEmpty);
            }
            let mapped = self.cache.mapped_ips.read();
            let address = external_ip::claim_address(pool, &mapped).map_err(|e| {
                warn!(
                    "pool {} reports free={} but no address was claimable (registry drift)",
                    pool_id, pool.free
                );
                e
            })?;
            (address, pool.name.clone())
        };

        let mapping = MappedIp {
            id: new_id(),
            external_ip: address.clone(),
            internal_ip: instance.ip.clone(),
            instance_id: instance_id.to_string(),
            tenant_id: instance.tenant_id.clone(),
            pool_id: pool_id.to_string(),
            pool_name,
        };

        self.cache.mapped_ips.write().insert(mapping.external_ip.clone(), mapping.clone());
        let updated_pool = {
            let mut pools = self.cache.pools.write();
            pools.get_mut(pool_id).map(|pool| {
                pool.free -= 1;
                pool.clone()
            })
        };

        if let Err(e) = self.backend.save_mapped_ip(&mapping).await {
            warn!("rolling back mapping {} after backend save failure: {}", mapping.id, e);
            self.cache.mapped_ips.write().remove(&mapping.external_ip);
            if let Some(pool) = self.cache.pools.write().get_mut(pool_id) {
                pool.free += 1;
            }
            return Err(DatastoreError::StorageFailure(crate::error::StoreError::Query(e.to_string())));
        }
        if let Some(pool) = updated_pool {
            if let Err(e) = self.backend.save_pool(&pool).await {
                warn!("pool {} free counter updated in cache but backend save failed: {}", pool_id, e);
            }
        }

        Ok(mapping)
    }

    pub async fn unmap_external_ip(&self, external_ip: &str) -> Result<()> {
        let mapping = self
            .cache
            .mapped_ips
            .write()
            .remove(external_ip)
            .ok_or_else(|| DatastoreError::AddressNotFound(external_ip.to_string()))?;

        let updated_pool = {
            let mut pools = self.cache.pools.write();
            pools.get_mut(&mapping.pool_id).map(|pool| {
                pool.free += 1;
                pool.clone()
            })
        };

        if let Err(e) = self.backend.delete_mapped_ip(&mapping.id).await {
            warn!("mapping {} removed from cache but backend delete failed: {}", mapping.id, e);
        }
        if let Some(pool) = updated_pool {
            if let Err(e) = self.backend.save_pool(&pool).await {
                warn!("pool {} free counter updated in cache but backend save failed: {}", mapping.pool_id, e);
            }
        }
        Ok(())
    }

    pub fn get_mapped_ips(&self, tenant_id: &str) -> Vec<MappedIp> {
        self.cache
            .mapped_ips
            .read()
            .values()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    // ---- Quotas --------------------------------------------------

    pub async fn get_quotas(&self, tenant_id: &str) -> Result<Vec<QuotaDetail>> {
        self.quotas.get_quotas(tenant_id).await
    }

    pub async fn update_quotas(&self, tenant_id: String, name: String, value: i64) -> Result<()> {
        self.quotas.update_quota(tenant_id, name, value).await
    }

    // ---- Event log --------------------------------------------------

    pub async fn log_event(&self, tenant_id: String, severity: Severity, message: String) -> Result<()> {
        self.events.append(tenant_id, severity, message).await
    }

    pub async fn get_events(&self, tenant_id: &str) -> Result<Vec<crate::types::EventRecord>> {
        self.events.read_all(tenant_id).await
    }

    pub fn tenant_count(&self) -> usize {
        self.cache.tenant_count()
    }

    pub fn instance_count(&self) -> usize {
        self.cache.instance_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::VmType;

    fn test_workload(tenant_id: &str, is_cnci: bool) -> Workload {
        Workload {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            description: "test workload".into(),
            firmware_type: "ovmf".into(),
            vm_type: VmType::Qemu,
            image_ref: "image-1".into(),
            cloud_init: String::new(),
            resources: Vec::new(),
            storage: Vec::new(),
            is_cnci,
        }
    }

    async fn test_store() -> Datastore {
        let backend: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        Datastore::initialize(backend).await.unwrap()
    }

    #[tokio::test]
    async fn add_tenant_then_add_instance_allocates_ip_and_mac() {
        let ds = test_store().await;
        let tenant = ds.add_tenant("acme".into()).await.unwrap();
        let workload = ds.add_workload(test_workload(&tenant.id, false)).await.unwrap();

        let instance = ds
            .add_instance(tenant.id.clone(), workload.id.clone(), Some("web-1".into()), false)
            .await
            .unwrap();

        assert!(instance.ip.starts_with("172."));
        assert!(instance.mac.starts_with("02:00:"));
        assert_eq!(ds.get_tenant(&tenant.id).unwrap().instances.len(), 1);
    }

    #[tokio::test]
    async fn delete_instance_releases_ip_for_reuse() {
        let ds = test_store().await;
        let tenant = ds.add_tenant("acme".into()).await.unwrap();
        let workload = ds.add_workload(test_workload(&tenant.id, false)).await.unwrap();

        let first = ds.add_instance(tenant.id.clone(), workload.id.clone(), None, false).await.unwrap();
        let first_ip = first.ip.clone();
        ds.delete_instance(&first.id).await.unwrap();

        let second = ds.add_instance(tenant.id.clone(), workload.id.clone(), None, false).await.unwrap();
        assert_eq!(second.ip, first_ip);
        assert!(ds.get_instance(&first.id).is_err());
    }

    #[tokio::test]
    async fn duplicate_external_subnet_is_rejected() {
        let ds = test_store().await;
        let pool = ds.add_pool("public".into()).await.unwrap();
        ds.add_external_subnet(&pool.id, "198.51.100.0/28".into()).await.unwrap();

        let err = ds.add_external_subnet(&pool.id, "198.51.100.0/28".into()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn map_then_unmap_external_ip_restores_pool_free_count() {
        let ds = test_store().await;
        let tenant = ds.add_tenant("acme".into()).await.unwrap();
        let workload = ds.add_workload(test_workload(&tenant.id, false)).await.unwrap();
        let instance = ds.add_instance(tenant.id.clone(), workload.id.clone(), None, false).await.unwrap();

        let pool = ds.add_pool("public".into()).await.unwrap();
        ds.add_external_subnet(&pool.id, "198.51.100.0/29".into()).await.unwrap();

        let mapping = ds.map_external_ip(&pool.id, &instance.id).await.unwrap();
        assert_eq!(ds.get_mapped_ips(&tenant.id).len(), 1);

        ds.unmap_external_ip(&mapping.external_ip).await.unwrap();
        assert_eq!(ds.get_mapped_ips(&tenant.id).len(), 0);
    }

    #[tokio::test]
    async fn create_storage_attachment_transitions_block_to_in_use() {
        let ds = test_store().await;
        let tenant = ds.add_tenant("acme".into()).await.unwrap();
        let workload = ds.add_workload(test_workload(&tenant.id, false)).await.unwrap();
        let instance = ds.add_instance(tenant.id.clone(), workload.id.clone(), None, false).await.unwrap();
        let block = ds
            .add_block_device(tenant.id.clone(), 10, "vol-1".into(), "".into())
            .await
            .unwrap();

        ds.create_storage_attachment(instance.id.clone(), block.id.clone(), false, true)
            .await
            .unwrap();
        let attachments = ds.get_storage_attachments(&instance.id);
        assert_eq!(attachments.len(), 1);
    }

    #[tokio::test]
    async fn delete_instance_removes_ephemeral_volume_but_keeps_persistent_one() {
        let ds = test_store().await;
        let tenant = ds.add_tenant("acme".into()).await.unwrap();
        let workload = ds.add_workload(test_workload(&tenant.id, false)).await.unwrap();
        let instance = ds.add_instance(tenant.id.clone(), workload.id.clone(), None, false).await.unwrap();

        let ephemeral_volume = ds
            .add_block_device(tenant.id.clone(), 10, "scratch".into(), "".into())
            .await
            .unwrap();
        let persistent_volume = ds
            .add_block_device(tenant.id.clone(), 20, "data".into(), "".into())
            .await
            .unwrap();
        ds.create_storage_attachment(instance.id.clone(), ephemeral_volume.id.clone(), true, true)
            .await
            .unwrap();
        ds.create_storage_attachment(instance.id.clone(), persistent_volume.id.clone(), false, false)
            .await
            .unwrap();

        ds.delete_instance(&instance.id).await.unwrap();

        assert!(ds.get_storage_attachments(&instance.id).is_empty());
        assert!(ds
            .update_block_device(&ephemeral_volume.id, BlockState::Attaching)
            .await
            .is_err());
        ds.update_block_device(&persistent_volume.id, BlockState::Attaching).await.unwrap();
    }

    #[tokio::test]
    async fn handle_stats_creates_reconciled_attachment_from_reported_volume() {
        let ds = test_store().await;
        let tenant = ds.add_tenant("acme".into()).await.unwrap();
        let workload = ds.add_workload(test_workload(&tenant.id, false)).await.unwrap();
        let instance = ds.add_instance(tenant.id.clone(), workload.id.clone(), None, false).await.unwrap();
        let block = ds
            .add_block_device(tenant.id.clone(), 10, "vol-1".into(), "".into())
            .await
            .unwrap();

        let stat = Stat {
            node_id: "node-1".into(),
            hostname: "host-1".into(),
            mem_total_mib: 1024,
            mem_available_mib: 512,
            disk_total_mib: 1024,
            disk_available_mib: 512,
            load: 0.5,
            cpu_count: 4,
            instances: vec![PerInstanceReport {
                instance_id: instance.id.clone(),
                state: InstanceState::Running,
                ssh_ip: instance.ip.clone(),
                ssh_port: 22,
                cpu_units: 10,
                mem_mib: 100,
                disk_mib: 200,
                attached_volumes: vec![block.id.clone()],
            }],
        };
        ds.handle_stats(stat).await.unwrap();

        let attachments = ds.get_storage_attachments(&instance.id);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].volume_id, block.id);
    }

    #[tokio::test]
    async fn cnci_start_failure_signals_false_on_pending_channel() {
        let ds = test_store().await;
        let tenant = ds.add_tenant("acme".into()).await.unwrap();
        let cnci_workload = ds.add_workload(test_workload(&tenant.id, true)).await.unwrap();
        let cnci = ds
            .add_instance(tenant.id.clone(), cnci_workload.id.clone(), None, true)
            .await
            .unwrap();

        let rx = ds.add_tenant_chan(tenant.id.clone());
        ds.lifecycle_failure(&cnci.id, "launch timed out").await.unwrap();

        assert!(!rx.await.unwrap());
        assert!(ds.get_tenant(&tenant.id).unwrap().cnci_id.is_empty());
    }

    #[tokio::test]
    async fn delete_pool_refuses_when_not_fully_free() {
        let ds = test_store().await;
        let pool = ds.add_pool("public".into()).await.unwrap();
        ds.add_external_subnet(&pool.id, "198.51.100.0/29".into()).await.unwrap();

        let tenant = ds.add_tenant("acme".into()).await.unwrap();
        let workload = ds.add_workload(test_workload(&tenant.id, false)).await.unwrap();
        let instance = ds.add_instance(tenant.id.clone(), workload.id.clone(), None, false).await.unwrap();
        ds.map_external_ip(&pool.id, &instance.id).await.unwrap();

        let err = ds.delete_pool(&pool.id).await;
        assert!(matches!(err, Err(DatastoreError::PoolNotEmpty)));
    }

    #[tokio::test]
    async fn quota_update_then_get_round_trips() {
        let ds = test_store().await;
        let tenant = ds.add_tenant("acme".into()).await.unwrap();
        ds.update_quotas(tenant.id.clone(), "max_instances".into(), 5).await.unwrap();
        let quotas = ds.get_quotas(&tenant.id).await.unwrap();
        assert!(quotas.iter().any(|q| q.name == "max_instances" && q.value == 5));
    }
}
