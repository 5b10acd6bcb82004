use stgplan_api::{
    devicegraph::{device::Disk, Device},
    error::{StorageError, UnsupportedModificationError},
};

use crate::actiongraph::Action;

use super::unsupported;

/// Disks are hardware; a disk in the staging graph only can not be planned.
pub(super) fn create_error(device: &Device) -> StorageError {
    StorageError::new(UnsupportedModificationError::Create {
        kind: device.kind().to_string(),
        device: device.display_name(),
    })
}

pub(super) fn modify_actions(
    device: &Device,
    lhs: &Disk,
    rhs: &Disk,
) -> Result<Vec<Vec<Action>>, StorageError> {
    if lhs.region != rhs.region {
        return Err(unsupported(device, "size"));
    }
    Ok(Vec::new())
}
