//! The pluggable persistence backend. `PersistentStore` is the
//! only capability the facade needs from durable storage: CRUD per
//! entity class plus a bulk "load everything" pass used once at
//! startup to rebuild the cache. Readers never reach the backend
//! directly after that initial load.

pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{
    BlockData, EventRecord, ExternalIp, ExternalSubnet, Instance, InstanceLastStat, MappedIp,
    NodeLastStat, Pool, QuotaDetail, Severity, StorageAttachment, Tenant, UsageSample, Workload,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Snapshot of every table, returned by [`PersistentStore::load_all`]
/// and used to rebuild [`crate::cache::CacheIndexes`] byte-for-byte at
/// process start.
#[derive(Debug, Default)]
pub struct LoadedState {
    pub tenants: Vec<Tenant>,
    pub workloads: Vec<Workload>,
    pub instances: Vec<Instance>,
    pub block_devices: Vec<BlockData>,
    pub attachments: Vec<StorageAttachment>,
    pub pools: Vec<Pool>,
    pub mapped_ips: Vec<MappedIp>,
    pub quotas: Vec<QuotaDetail>,
    pub node_last_stats: Vec<NodeLastStat>,
    pub instance_last_stats: Vec<InstanceLastStat>,
    pub events: Vec<EventRecord>,
}

/// Capability set a durable (or in-memory, for tests) backend provides.
/// All methods are `async` so a relational implementation can await
/// pool I/O; the facade never holds a cache lock across one of these
/// calls.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn initialize(&self) -> StoreResult<()>;
    async fn disconnect(&self) -> StoreResult<()>;

    /// Reads every table in full. Called once, at startup, before any
    /// other method.
    async fn load_all(&self) -> StoreResult<LoadedState>;

    async fn save_tenant(&self, tenant: &Tenant) -> StoreResult<()>;
    async fn delete_tenant(&self, id: &str) -> StoreResult<()>;

    async fn save_workload(&self, workload: &Workload) -> StoreResult<()>;
    async fn delete_workload(&self, id: &str) -> StoreResult<()>;

    async fn save_instance(&self, instance: &Instance) -> StoreResult<()>;
    async fn delete_instance(&self, id: &str) -> StoreResult<()>;

    /// Persists one allocated `(tenant, subnet_index, host)` triple in
    /// the tenant-network table.
    async fn save_tenant_ip(&self, tenant_id: &str, subnet_index: u32, host: u8) -> StoreResult<()>;
    async fn delete_tenant_ip(
        &self,
        tenant_id: &str,
        subnet_index: u32,
        host: u8,
    ) -> StoreResult<()>;

    async fn save_block_data(&self, block: &BlockData) -> StoreResult<()>;
    async fn delete_block_data(&self, id: &str) -> StoreResult<()>;

    async fn save_attachment(&self, attachment: &StorageAttachment) -> StoreResult<()>;
    async fn delete_attachment(&self, id: &str) -> StoreResult<()>;

    async fn save_pool(&self, pool: &Pool) -> StoreResult<()>;
    async fn delete_pool(&self, id: &str) -> StoreResult<()>;
    async fn save_external_subnet(&self, pool_id: &str, subnet: &ExternalSubnet) -> StoreResult<()>;
    async fn delete_external_subnet(&self, pool_id: &str, subnet_id: &str) -> StoreResult<()>;
    async fn save_external_ip(&self, pool_id: &str, ip: &ExternalIp) -> StoreResult<()>;
    async fn delete_external_ip(&self, pool_id: &str, ip_id: &str) -> StoreResult<()>;

    async fn save_mapped_ip(&self, mapping: &MappedIp) -> StoreResult<()>;
    async fn delete_mapped_ip(&self, id: &str) -> StoreResult<()>;

    /// Upserts a single `(tenant, name)` quota row. `value == -1`
    /// denotes unlimited.
    async fn upsert_quota(&self, quota: &QuotaDetail) -> StoreResult<()>;
    /// Quota reads always go straight to the backend (never cached) so
    /// callers see fresh limits.
    async fn load_quotas(&self, tenant_id: &str) -> StoreResult<Vec<QuotaDetail>>;

    async fn upsert_node_last_stat(&self, stat: &NodeLastStat) -> StoreResult<()>;
    async fn append_node_stat_sample(&self, stat: &NodeLastStat) -> StoreResult<()>;
    async fn upsert_instance_last_stat(&self, stat: &InstanceLastStat) -> StoreResult<()>;
    async fn append_tenant_usage_sample(
        &self,
        tenant_id: &str,
        sample: &UsageSample,
    ) -> StoreResult<()>;
    async fn load_tenant_usage_history(&self, tenant_id: &str) -> StoreResult<Vec<UsageSample>>;

    async fn append_event(&self, event: &EventRecord) -> StoreResult<()>;
    async fn load_events(&self, tenant_id: &str) -> StoreResult<Vec<EventRecord>>;
    async fn clear_events(&self, tenant_id: &str) -> StoreResult<()>;
}

/// Maps an event's severity to the `log` level it should also be
/// surfaced at — operator diagnostics and the tenant-facing audit trail
/// are deliberately separate sinks, but an error-severity event is
/// worth a line in the process log too.
pub fn log_severity(severity: Severity) -> log::Level {
    match severity {
        Severity::Info => log::Level::Info,
        Severity::Warn => log::Level::Warn,
        Severity::Error => log::Level::Error,
    }
}
