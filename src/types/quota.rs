use serde::{Deserialize, Serialize};

use super::Id;

/// A single per-tenant, per-resource limit. `value == -1` denotes
/// unlimited. Uniqueness is `(tenant_id, name)`; enforcement happens
/// outside this core, this is storage only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDetail {
    pub tenant_id: Id,
    pub name: String,
    pub value: i64,
}

impl QuotaDetail {
    pub const UNLIMITED: i64 = -1;
}
