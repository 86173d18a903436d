use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// Lifecycle state of a launched instance, as reported by the launcher
/// and node stat pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopped,
    Exited,
}

/// A running (or launching) workload instance.
///
/// Invariants enforced by the facade, not by this type: `(tenant_id,
/// ip, mac)` unique across all instances, and `(tenant_id, name)`
/// unique when `name` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Id,
    pub tenant_id: Id,
    pub workload_id: Id,
    pub name: Option<String>,

    pub mac: String,
    pub ip: String,
    pub subnet_index: u32,

    /// Compute node this instance landed on. Empty until the first
    /// stat message names a node.
    pub node_id: String,
    pub state: InstanceState,

    pub ssh_ip: String,
    pub ssh_port: u16,

    /// Resource name -> consumed units, as last reported by the node.
    pub usage: HashMap<String, i64>,

    pub created_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(
        id: Id,
        tenant_id: Id,
        workload_id: Id,
        name: Option<String>,
        mac: String,
        ip: String,
        subnet_index: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            workload_id,
            name,
            mac,
            ip,
            subnet_index,
            node_id: String::new(),
            state: InstanceState::Pending,
            ssh_ip: String::new(),
            ssh_port: 0,
            usage: HashMap::new(),
            created_at,
        }
    }
}
