//! Data model shared by the cache, the persistence backend, and the
//! facade. Every entity is a plain struct keyed by a UUID; cross-entity
//! references are stored as ids, never as embedded structs, so that the
//! cache and the backend agree on a single arena-of-records shape.

pub mod attachment;
pub mod block_data;
pub mod event;
pub mod instance;
pub mod mapped_ip;
pub mod pool;
pub mod quota;
pub mod stats;
pub mod tenant;
pub mod workload;

pub use attachment::StorageAttachment;
pub use block_data::{BlockData, BlockState};
pub use event::{EventRecord, Severity};
pub use instance::{Instance, InstanceState};
pub use mapped_ip::MappedIp;
pub use pool::{ExternalIp, ExternalSubnet, Pool};
pub use quota::QuotaDetail;
pub use stats::{InstanceLastStat, NodeLastStat, UsageSample};
pub use tenant::Tenant;
pub use workload::{
    FirmwareType, SourceType, StorageResource, VmType, Workload, WorkloadResource,
};

/// Lowercase, hyphenated 36-character identifier used for every entity
/// in this core. A thin alias rather than a newtype: the rest of the
/// lineage passes ids around as plain `String`s pulled straight out of
/// `Uuid::new_v4().to_string()`, and this core follows that convention.
pub type Id = String;

/// Generates a fresh entity id in the canonical 36-character form.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}
