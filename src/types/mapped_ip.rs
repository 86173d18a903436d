use serde::{Deserialize, Serialize};

use super::Id;

/// A live 1-to-1 association between an external address and an
/// instance's internal address. Keyed by `external_ip` for lookup
/// uniqueness; the mapping `id` exists for backend CRUD identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappedIp {
    pub id: Id,
    pub external_ip: String,
    pub internal_ip: String,
    pub instance_id: Id,
    pub tenant_id: Id,
    pub pool_id: Id,
    pub pool_name: String,
}
