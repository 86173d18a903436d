use serde::{Deserialize, Serialize};

use super::Id;

/// Hypervisor/runtime the workload's instances launch under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmType {
    Qemu,
    Container,
}

/// Firmware the instance boots with. Kept as a plain string in the
/// backend column but typed at the API boundary; the set of valid
/// values is a launcher concern outside this core.
pub type FirmwareType = String;

/// One {resource-name, value, mandatory} entry in a workload's resource
/// request list, e.g. `{"vcpus", 2, true}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadResource {
    pub name: String,
    pub value: i64,
    pub mandatory: bool,
}

/// Where a storage resource's initial contents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Empty,
    ImageService,
    VolumeService,
}

/// One storage resource requested by a workload template. May reference
/// an existing volume (`existing_volume_id`) or request a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageResource {
    pub existing_volume_id: Option<Id>,
    pub size_gib: i64,
    pub bootable: bool,
    pub ephemeral: bool,
    pub source_type: SourceType,
    pub source_id: String,
    pub tag: String,
}

/// A reusable instance template: owner, image, cloud-init config, and
/// the resource/storage shape new instances are launched with.
///
/// Exactly one workload per process is the CNCI workload
/// ([`Workload::is_cnci`]); it is never owned by a user tenant and is
/// excluded from per-tenant workload listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub id: Id,
    pub tenant_id: Id,
    pub description: String,
    pub firmware_type: FirmwareType,
    pub vm_type: VmType,
    pub image_ref: String,
    pub cloud_init: String,
    pub resources: Vec<WorkloadResource>,
    pub storage: Vec<StorageResource>,
    pub is_cnci: bool,
}

impl Workload {
    pub fn is_cnci(&self) -> bool {
        self.is_cnci
    }
}
