use thiserror::Error;

/// Error taxonomy for the `PersistentStore` backend, analogous to this
/// lineage's `DatabaseError` but scoped to a single embedded store
/// rather than a pool of per-platform MySQL connections.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to connect to store: {0}")]
    Connection(String),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("failed to serialize/deserialize record: {0}")]
    Serialization(String),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Facade-level error taxonomy, grouped by effect rather than by
/// origin: not-found and validation variants never mutate state,
/// capacity variants roll back any partial mutation, and
/// `StorageFailure` carries the backend error that triggered a
/// (possibly incomplete) compensation.
#[derive(Error, Debug)]
pub enum DatastoreError {
    #[error("tenant not found: {0}")]
    TenantNotFound(String),
    #[error("instance not found: {0}")]
    InstanceNotFound(String),
    #[error("workload not found: {0}")]
    WorkloadNotFound(String),
    #[error("pool not found: {0}")]
    PoolNotFound(String),
    #[error("address not found: {0}")]
    AddressNotFound(String),
    #[error("block data not found: {0}")]
    BlockDataNotFound(String),
    #[error("storage attachment not found: {0}")]
    StorageAttachmentNotFound(String),

    #[error("invalid IP address: {0}")]
    InvalidIp(String),
    #[error("duplicate IP address: {0}")]
    DuplicateIp(String),
    #[error("duplicate subnet: {0}")]
    DuplicateSubnet(String),
    #[error("invalid pool address: {0}")]
    InvalidPoolAddress(String),

    #[error("tenant has no free subnets left (exhausted 172.16.0.0-172.47.255.0)")]
    OutOfSubnets,
    #[error("subnet has no free host octets left")]
    OutOfHosts,
    #[error("pool is empty")]
    PoolEmpty,
    #[error("pool is not empty")]
    PoolNotEmpty,

    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),

    #[error("lifecycle failure: {0}")]
    LifecycleFailure(String),
}

pub type Result<T> = std::result::Result<T, DatastoreError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
