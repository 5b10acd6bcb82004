//! Per-kind rules of the planner: which actions a device needs when it is
//! created, deleted or modified, how each action is committed and how it is
//! described.

use log::trace;

use stgplan_api::{
    devicegraph::{Device, DeviceData, DeviceKind},
    error::{InternalError, StorageError, UnsupportedModificationError},
    primitives::bytes::ByteCount,
    Devicegraph, Sid,
};

use crate::{
    actiongraph::{Action, ActionKind, ActionText, Side, Tense},
    commit::CommitContext,
};

mod bcache;
mod disk;
mod filesystem;
mod luks;
mod lvm;
mod md;
mod mount_point;
mod partition;
mod partition_table;

/// Actions creating `device`, which only exists in the staging graph.
pub fn create_actions(staging: &Devicegraph, device: &Device) -> Result<Vec<Action>, StorageError> {
    let sid = device.sid();
    let chain = match &device.data {
        DeviceData::Disk(_) => return Err(disk::create_error(device)),
        DeviceData::PartitionTable(pt) => partition_table::create_actions(staging, device, pt)?,
        DeviceData::Partition(partition) => partition::create_actions(sid, partition),
        DeviceData::Md(md) => md::create_actions(sid, md),
        DeviceData::LvmVg(_) | DeviceData::LvmPv(_) | DeviceData::LvmLv(_) => {
            vec![Action::create(sid)]
        }
        DeviceData::Luks(luks) => luks::create_actions(sid, luks),
        DeviceData::Bcache(_) | DeviceData::BcacheCset(_) => vec![Action::create(sid)],
        DeviceData::BlkFilesystem(fs) => filesystem::create_actions(device, fs)?,
        // Mounting is done by the mount point
        DeviceData::Nfs(_) => Vec::new(),
        DeviceData::Tmpfs(_) => vec![Action::create(sid).with_last()],
        DeviceData::MountPoint(mp) => mount_point::create_actions(device, mp),
    };
    trace!("Create chain of {}: {} actions", device.display_name(), chain.len());
    Ok(chain)
}

/// Actions deleting `device`, which only exists in the probed graph.
pub fn delete_actions(device: &Device) -> Result<Vec<Action>, StorageError> {
    let sid = device.sid();
    let chain = match &device.data {
        DeviceData::Disk(_) | DeviceData::Nfs(_) => Vec::new(),
        DeviceData::PartitionTable(_)
        | DeviceData::Partition(_)
        | DeviceData::LvmVg(_)
        | DeviceData::LvmPv(_)
        | DeviceData::BcacheCset(_)
        | DeviceData::BlkFilesystem(_) => vec![Action::delete(sid)],
        DeviceData::Md(md) => md::delete_actions(device, md),
        DeviceData::LvmLv(_) => lvm::lv_delete_actions(device),
        DeviceData::Luks(luks) => luks::delete_actions(device, luks),
        DeviceData::Bcache(_) => bcache::delete_actions(device),
        DeviceData::Tmpfs(_) => vec![Action::delete(sid).with_last()],
        DeviceData::MountPoint(mp) => mount_point::delete_actions(device, mp),
    };
    trace!("Delete chain of {}: {} actions", device.display_name(), chain.len());
    Ok(chain)
}

/// Chains turning `lhs` into `rhs`. Both describe the same device and have
/// the same kind.
pub fn modify_actions(
    probed: &Devicegraph,
    staging: &Devicegraph,
    lhs: &Device,
    rhs: &Device,
) -> Result<Vec<Vec<Action>>, StorageError> {
    let mut chains = match (&lhs.data, &rhs.data) {
        (DeviceData::Disk(l), DeviceData::Disk(r)) => disk::modify_actions(rhs, l, r)?,
        (DeviceData::PartitionTable(l), DeviceData::PartitionTable(r)) => {
            partition_table::modify_actions(rhs, l, r)?
        }
        (DeviceData::Partition(l), DeviceData::Partition(r)) => {
            partition::modify_actions(rhs, l, r)?
        }
        (DeviceData::Md(l), DeviceData::Md(r)) => md::modify_actions(rhs, l, r)?,
        (DeviceData::LvmVg(l), DeviceData::LvmVg(r)) => lvm::vg_modify_actions(rhs, l, r)?,
        (DeviceData::LvmPv(_), DeviceData::LvmPv(_)) => Vec::new(),
        (DeviceData::LvmLv(l), DeviceData::LvmLv(r)) => lvm::lv_modify_actions(rhs, l, r)?,
        (DeviceData::Luks(l), DeviceData::Luks(r)) => luks::modify_actions(rhs, l, r)?,
        (DeviceData::Bcache(l), DeviceData::Bcache(r)) => bcache::modify_actions(rhs, l, r)?,
        (DeviceData::BcacheCset(_), DeviceData::BcacheCset(_)) => Vec::new(),
        (DeviceData::BlkFilesystem(l), DeviceData::BlkFilesystem(r)) => {
            filesystem::modify_actions(rhs, l, r)?
        }
        (DeviceData::Nfs(l), DeviceData::Nfs(r)) => {
            if l != r {
                return Err(unsupported(rhs, "server or path"));
            }
            Vec::new()
        }
        (DeviceData::Tmpfs(_), DeviceData::Tmpfs(_)) => Vec::new(),
        (DeviceData::MountPoint(l), DeviceData::MountPoint(r)) => {
            return mount_point::modify_actions(probed, staging, lhs, rhs, l, r);
        }
        _ => {
            return Err(StorageError::new(InternalError::Internal(
                "Devices of different kinds cannot be compared",
            )))
        }
    };

    if lhs.active != rhs.active {
        chains.push(vec![activation_action(rhs)?]);
    }

    Ok(chains)
}

/// Activation or deactivation of a device whose `active` flag changed.
fn activation_action(device: &Device) -> Result<Action, StorageError> {
    match device.kind() {
        DeviceKind::Md | DeviceKind::LvmLv | DeviceKind::Luks => Ok(if device.active {
            Action::new(device.sid(), ActionKind::Activate, Side::Rhs)
        } else {
            Action::new(device.sid(), ActionKind::Deactivate, Side::Lhs)
        }),
        _ => Err(unsupported(device, "active state")),
    }
}

/// Commits a single action.
pub fn commit(action: &Action, context: &mut CommitContext) -> Result<(), StorageError> {
    let graph = context.graph(action.side);
    let device = graph.find_by_sid(action.sid)?;
    match &device.data {
        DeviceData::Disk(_) | DeviceData::Nfs(_) => Err(unexpected(action)),
        DeviceData::PartitionTable(pt) => partition_table::commit(action, device, pt, context),
        DeviceData::Partition(partition) => partition::commit(action, partition, context),
        DeviceData::Md(md) => md::commit(action, md, context),
        DeviceData::LvmVg(vg) => lvm::vg_commit(action, vg, context),
        DeviceData::LvmPv(_) => lvm::pv_commit(action, context),
        DeviceData::LvmLv(lv) => lvm::lv_commit(action, lv, context),
        DeviceData::Luks(luks) => luks::commit(action, luks, context),
        DeviceData::Bcache(bcache) => bcache::commit(action, bcache, context),
        DeviceData::BcacheCset(cset) => bcache::cset_commit(action, cset, context),
        DeviceData::BlkFilesystem(fs) => filesystem::commit(action, fs, context),
        DeviceData::Tmpfs(_) => match action.kind {
            // The kernel creates tmpfs instances when they are mounted
            ActionKind::Create | ActionKind::Delete => Ok(()),
            _ => Err(unexpected(action)),
        },
        DeviceData::MountPoint(mp) => mount_point::commit(action, mp, context),
    }
}

/// Structured description of `action`. Actions on the left hand side describe
/// the device as probed, all others as staged.
pub fn text(
    action: &Action,
    tense: Tense,
    probed: &Devicegraph,
    staging: &Devicegraph,
) -> Result<ActionText, StorageError> {
    let graph = match action.side {
        Side::Lhs => probed,
        Side::Rhs => staging,
    };
    let device = graph.find_by_sid(action.sid)?;
    let text = ActionText::new(
        action,
        tense,
        device_class(device),
        device_label(graph, device)?,
    );
    Ok(text_args(action, graph, device)?
        .into_iter()
        .fold(text, ActionText::with_arg))
}

fn device_class(device: &Device) -> String {
    match &device.data {
        DeviceData::Disk(_) => "disk".into(),
        DeviceData::PartitionTable(_) => "partition table".into(),
        DeviceData::Partition(_) => "partition".into(),
        DeviceData::Md(md) => md.level.to_string(),
        DeviceData::LvmVg(_) => "volume group".into(),
        DeviceData::LvmPv(_) => "physical volume".into(),
        DeviceData::LvmLv(_) => "logical volume".into(),
        DeviceData::Luks(_) => "encryption layer".into(),
        DeviceData::Bcache(_) => "bcache".into(),
        DeviceData::BcacheCset(_) => "bcache caching set".into(),
        DeviceData::BlkFilesystem(fs) => {
            let fs_type: &str = fs.fs_type.into();
            format!("{fs_type} filesystem")
        }
        DeviceData::Nfs(_) => "NFS".into(),
        DeviceData::Tmpfs(_) => "tmpfs".into(),
        DeviceData::MountPoint(_) => "mount point".into(),
    }
}

/// Name under which `device` appears in action texts. Devices without a name
/// of their own are named after the block devices they live on.
fn device_label(graph: &Devicegraph, device: &Device) -> Result<String, StorageError> {
    match &device.data {
        DeviceData::PartitionTable(_)
        | DeviceData::LvmPv(_)
        | DeviceData::BlkFilesystem(_)
        | DeviceData::BcacheCset(_) => {
            let names = blk_parent_names(graph, device.sid())?;
            if names.is_empty() {
                Ok(device.display_name())
            } else {
                Ok(names.join(", "))
            }
        }
        DeviceData::Tmpfs(_) => Ok(graph
            .children(device.sid())?
            .into_iter()
            .filter_map(|child| graph.find_by_sid(child).ok())
            .find_map(|child| match &child.data {
                DeviceData::MountPoint(mp) => Some(mp.path.clone()),
                _ => None,
            })
            .unwrap_or_else(|| device.display_name())),
        _ => Ok(device.display_name()),
    }
}

fn text_args(
    action: &Action,
    graph: &Devicegraph,
    device: &Device,
) -> Result<Vec<String>, StorageError> {
    let size = || {
        device
            .region()
            .map(|region| ByteCount(region.size()).to_human_readable())
    };

    let args = match (&action.kind, &device.data) {
        (ActionKind::Create, DeviceData::PartitionTable(pt)) => vec![pt.pt_type.to_string()],
        (ActionKind::Create, DeviceData::Partition(_) | DeviceData::LvmLv(_)) => {
            size().into_iter().collect()
        }
        (ActionKind::Create, DeviceData::Md(_)) => size()
            .into_iter()
            .chain(md::member_names(graph, device.sid())?)
            .collect(),
        (ActionKind::Create, DeviceData::BlkFilesystem(fs)) if !fs.label.is_empty() => {
            vec![fs.label.clone()]
        }
        (ActionKind::Resize, _) => size().into_iter().collect(),
        (ActionKind::SetPartitionId, DeviceData::Partition(partition)) => {
            vec![format!("0x{:x}", partition.id)]
        }
        (ActionKind::SetBoot, DeviceData::Partition(partition)) => {
            vec![if partition.boot { "on" } else { "off" }.to_owned()]
        }
        (ActionKind::SetLabel, DeviceData::BlkFilesystem(fs)) => vec![fs.label.clone()],
        (ActionKind::SetCacheMode, DeviceData::Bcache(bcache)) => {
            vec![bcache.cache_mode.to_string()]
        }
        (ActionKind::Reallot { member, .. }, _) => {
            vec![member_label(graph, *member)?]
        }
        _ => Vec::new(),
    };
    Ok(args)
}

/// Name of a device joining or leaving a container. Physical volumes are
/// named after their block device.
fn member_label(graph: &Devicegraph, member: Sid) -> Result<String, StorageError> {
    let device = graph.find_by_sid(member)?;
    match &device.data {
        DeviceData::LvmPv(_) => Ok(blk_parent(graph, member)?.display_name()),
        _ => Ok(device.display_name()),
    }
}

/// Block devices `sid` is built on, in sid order.
fn blk_parents(graph: &Devicegraph, sid: Sid) -> Result<Vec<&Device>, StorageError> {
    Ok(graph
        .parents(sid)?
        .into_iter()
        .filter_map(|parent| graph.find_by_sid(parent).ok())
        .filter(|parent| parent.kind().is_blk_device())
        .collect())
}

fn blk_parent_names(graph: &Devicegraph, sid: Sid) -> Result<Vec<String>, StorageError> {
    Ok(blk_parents(graph, sid)?
        .into_iter()
        .filter_map(|parent| parent.name().map(str::to_owned))
        .collect())
}

/// The block device `sid` is built on.
fn blk_parent(graph: &Devicegraph, sid: Sid) -> Result<&Device, StorageError> {
    blk_parents(graph, sid)?
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::new(InternalError::Internal("Device has no block device")))
}

/// Kernel name of the block device `sid` is built on.
fn blk_parent_name(graph: &Devicegraph, sid: Sid) -> Result<String, StorageError> {
    blk_parent(graph, sid)?
        .name()
        .map(str::to_owned)
        .ok_or_else(|| StorageError::new(InternalError::Internal("Block device has no name")))
}

fn unsupported(device: &Device, attribute: &str) -> StorageError {
    StorageError::new(UnsupportedModificationError::Attribute {
        device: device.display_name(),
        attribute: attribute.to_owned(),
    })
}

fn unexpected(action: &Action) -> StorageError {
    log::error!("No commit rule for action '{action}'");
    StorageError::new(InternalError::Internal(
        "Action is not supported for this device kind",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use stgplan_api::{
        devicegraph::{
            device::{
                BlkFilesystem, Disk, LvmLv, LvmPv, LvmVg, MountPoint, Partition, PartitionTable,
                Tmpfs,
            },
            Holder,
        },
        error::ErrorKind,
        primitives::region::Region,
    };
    use sysdefs::filesystems::RealFilesystemType;

    fn disk_with_partition(graph: &mut Devicegraph) -> (Sid, Sid, Sid) {
        let disk = graph
            .create_device(Disk {
                name: "/dev/sda".into(),
                region: Region::new(0, 4 * ByteCount::GIB / 512, 512),
                ..Default::default()
            })
            .unwrap();
        let pt = graph.create_device(PartitionTable::default()).unwrap();
        graph.add_holder(disk, pt, Holder::Subdevice).unwrap();
        let partition = graph
            .create_device(Partition::new(
                "/dev/sda1",
                Region::new(2048, ByteCount::GIB / 512, 512),
            ))
            .unwrap();
        graph.add_holder(pt, partition, Holder::Subdevice).unwrap();
        (disk, pt, partition)
    }

    fn texts(graph: &Devicegraph, actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .map(|action| {
                text(action, Tense::Pending, graph, graph)
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_texts_of_unnamed_devices() {
        let mut graph = Devicegraph::new();
        let (_, pt, partition) = disk_with_partition(&mut graph);
        let pv = graph.create_device(LvmPv::default()).unwrap();
        graph.add_holder(partition, pv, Holder::User).unwrap();
        let vg = graph
            .create_device(LvmVg {
                vg_name: "system".into(),
                extent_size: 4 * ByteCount::MIB,
                ..Default::default()
            })
            .unwrap();
        graph.add_holder(pv, vg, Holder::User).unwrap();
        let lv = graph
            .create_device(LvmLv {
                name: "/dev/system/root".into(),
                lv_name: "root".into(),
                region: Region::new(0, 512 * ByteCount::MIB / 512, 512),
                ..Default::default()
            })
            .unwrap();
        graph.add_holder(vg, lv, Holder::Subdevice).unwrap();
        let fs = graph
            .create_device(BlkFilesystem::new(RealFilesystemType::Ext4))
            .unwrap();
        graph.add_holder(lv, fs, Holder::filesystem_user()).unwrap();

        let actions: Vec<Action> = [pt, pv, vg, lv, fs]
            .into_iter()
            .flat_map(|sid| create_actions(&graph, graph.find_by_sid(sid).unwrap()).unwrap())
            .collect();
        assert_eq!(
            texts(&graph, &actions),
            vec![
                "Create partition table /dev/sda (gpt)",
                "Create physical volume /dev/sda1",
                "Create volume group /dev/system",
                "Create logical volume /dev/system/root (512 MiB)",
                "Create ext4 filesystem /dev/system/root",
            ]
        );

        let extend = Action::new(
            vg,
            ActionKind::Reallot {
                mode: crate::actiongraph::ReallotMode::Extend,
                member: pv,
            },
            Side::Rhs,
        );
        assert_eq!(
            texts(&graph, &[extend]),
            vec!["Extend volume group /dev/system (/dev/sda1)"]
        );
    }

    #[test]
    fn test_tmpfs_is_named_after_its_mount_point() {
        let mut graph = Devicegraph::new();
        let tmpfs = graph.create_device(Tmpfs {}).unwrap();
        let mp = graph.create_device(MountPoint::new("/tmp")).unwrap();
        graph.add_holder(tmpfs, mp, Holder::MountUser).unwrap();

        let chain = create_actions(&graph, graph.find_by_sid(tmpfs).unwrap()).unwrap();
        assert_eq!(chain, vec![Action::create(tmpfs).with_last()]);
        assert_eq!(texts(&graph, &chain), vec!["Create tmpfs /tmp"]);
    }

    #[test]
    fn test_disks_cannot_be_created() {
        let mut graph = Devicegraph::new();
        let (disk, _, _) = disk_with_partition(&mut graph);
        let error = create_actions(&graph, graph.find_by_sid(disk).unwrap()).unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::UnsupportedModification(UnsupportedModificationError::Create { .. })
        ));
        assert!(delete_actions(graph.find_by_sid(disk).unwrap())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_activation_changes() {
        let mut probed = Devicegraph::new();
        let (_, _, partition) = disk_with_partition(&mut probed);
        let mut staging = probed.clone();

        staging.find_by_sid_mut(partition).unwrap().active = false;
        let error = modify_actions(
            &probed,
            &staging,
            probed.find_by_sid(partition).unwrap(),
            staging.find_by_sid(partition).unwrap(),
        )
        .unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::UnsupportedModification(UnsupportedModificationError::Attribute {
                device: "/dev/sda1".into(),
                attribute: "active state".into(),
            })
        );

        let lv = probed
            .create_device(LvmLv {
                name: "/dev/system/root".into(),
                lv_name: "root".into(),
                ..Default::default()
            })
            .unwrap();
        let mut staging = probed.clone();
        staging.find_by_sid_mut(lv).unwrap().active = false;
        let chains = modify_actions(
            &probed,
            &staging,
            probed.find_by_sid(lv).unwrap(),
            staging.find_by_sid(lv).unwrap(),
        )
        .unwrap();
        assert_eq!(
            chains,
            vec![vec![Action::new(lv, ActionKind::Deactivate, Side::Lhs)]]
        );
    }
}
