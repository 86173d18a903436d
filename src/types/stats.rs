use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// Sentinel the node stat pipeline uses in the `load` field to mean
/// "no load sample in this packet" (distinct from a real load of 0).
pub const NO_LOAD_SAMPLE: f64 = -1.0;

/// Most recently observed capacity/load sample for a compute node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLastStat {
    pub node_id: Id,
    pub hostname: String,
    pub mem_total_mib: i64,
    pub mem_available_mib: i64,
    pub disk_total_mib: i64,
    pub disk_available_mib: i64,
    pub load: f64,
    pub cpu_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// Most recently observed per-instance resource usage, used to compute
/// the delta folded into [`UsageSample`] history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceLastStat {
    pub instance_id: Id,
    pub cpu_units: i64,
    pub mem_mib: i64,
    pub disk_mib: i64,
    pub updated_at: DateTime<Utc>,
}

impl InstanceLastStat {
    pub fn zero(instance_id: Id, at: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            cpu_units: 0,
            mem_mib: 0,
            disk_mib: 0,
            updated_at: at,
        }
    }
}

/// One coalesced entry in a tenant's usage history. Entries are at
/// least 5 minutes apart (see [`crate::stats::fold_usage`]); a packet
/// arriving within the window adds into the existing entry in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSample {
    pub timestamp: DateTime<Utc>,
    pub vcpu: i64,
    pub mem_mib: i64,
    pub disk_mib: i64,
}
