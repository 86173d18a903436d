use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// Volume lifecycle state. See the transition table in
/// [`crate::storage`] for the only moves the facade allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    Available,
    Attaching,
    InUse,
    Detaching,
}

/// A block storage volume owned by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
    pub id: Id,
    pub tenant_id: Id,
    pub size_gib: i64,
    pub state: BlockState,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub description: String,
}

impl BlockData {
    pub fn new(id: Id, tenant_id: Id, size_gib: i64, name: String, description: String) -> Self {
        Self {
            id,
            tenant_id,
            size_gib,
            state: BlockState::Available,
            created_at: Utc::now(),
            name,
            description,
        }
    }
}
