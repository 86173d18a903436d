use serde::{Deserialize, Serialize};

use super::Id;

/// Links an instance to a volume it has mounted. Owned exclusively by
/// the attachment arena; instances and volumes hold no pointer to it,
/// only the reconciler and explicit attach/detach calls create or
/// remove rows here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageAttachment {
    pub id: Id,
    pub instance_id: Id,
    pub volume_id: Id,
    /// Delete this volume when the instance is deleted.
    pub ephemeral: bool,
    /// This volume is the instance's boot disk.
    pub boot: bool,
}
