use osutils::dependencies::{Command, Dependency};
use stgplan_api::{
    constants::{
        PARTITION_ID_ESP, PARTITION_ID_LINUX, PARTITION_ID_LVM, PARTITION_ID_RAID,
        PARTITION_ID_SWAP,
    },
    devicegraph::{
        device::{Partition, PartitionTable},
        types::PtType,
        Device, DeviceData,
    },
    error::{InternalError, ReportError, StorageError, UnsupportedModificationError},
    Devicegraph, Sid,
};

use crate::{
    actiongraph::{Action, ActionKind, Side},
    commit::CommitContext,
};

use super::{blk_parent_name, unexpected, unsupported};

pub(super) fn create_actions(sid: Sid, partition: &Partition) -> Vec<Action> {
    let mut chain = vec![Action::create(sid)];
    if partition.id != PARTITION_ID_LINUX {
        chain.push(Action::new(sid, ActionKind::SetPartitionId, Side::Rhs));
    }
    if partition.boot {
        chain.push(Action::new(sid, ActionKind::SetBoot, Side::Rhs));
    }
    chain
}

pub(super) fn modify_actions(
    device: &Device,
    lhs: &Partition,
    rhs: &Partition,
) -> Result<Vec<Vec<Action>>, StorageError> {
    if lhs.name != rhs.name {
        return Err(unsupported(device, "name"));
    }
    if lhs.region.start() != rhs.region.start() {
        return Err(unsupported(device, "start"));
    }
    if lhs.partition_type != rhs.partition_type {
        return Err(unsupported(device, "partition type"));
    }

    let sid = device.sid();
    let mut chain = Vec::new();
    if lhs.region.length() != rhs.region.length() {
        chain.push(Action::new(sid, ActionKind::Resize, Side::Rhs));
    }
    if lhs.id != rhs.id {
        chain.push(Action::new(sid, ActionKind::SetPartitionId, Side::Rhs));
    }
    if lhs.boot != rhs.boot {
        chain.push(Action::new(sid, ActionKind::SetBoot, Side::Rhs));
    }

    Ok(if chain.is_empty() { Vec::new() } else { vec![chain] })
}

/// The parted flag standing for a partition id.
fn id_flag(id: u32) -> Option<&'static str> {
    match id {
        PARTITION_ID_RAID => Some("raid"),
        PARTITION_ID_LVM => Some("lvm"),
        PARTITION_ID_SWAP => Some("swap"),
        PARTITION_ID_ESP => Some("esp"),
        _ => None,
    }
}

/// The partition table of the partition `sid` and the name of the device
/// holding it.
fn partition_table(
    graph: &Devicegraph,
    sid: Sid,
) -> Result<(&PartitionTable, String), StorageError> {
    let pt = graph
        .parents(sid)?
        .into_iter()
        .next()
        .structured(InternalError::Internal("Partition has no partition table"))?;
    match &graph.find_by_sid(pt)?.data {
        DeviceData::PartitionTable(payload) => Ok((payload, blk_parent_name(graph, pt)?)),
        _ => Err(StorageError::new(InternalError::Internal(
            "Parent of partition is not a partition table",
        ))),
    }
}

pub(super) fn commit(
    action: &Action,
    partition: &Partition,
    context: &mut CommitContext,
) -> Result<(), StorageError> {
    let (pt, disk) = partition_table(context.graph(action.side), action.sid)?;
    let number = partition
        .number()
        .structured(InternalError::Internal("Partition name has no number"))?
        .to_string();
    let parted = || Dependency::Parted.cmd().with_args(["-s", disk.as_str()]);

    match action.kind {
        ActionKind::Create => {
            context.run(&parted().with_args([
                "unit".to_owned(),
                "s".to_owned(),
                "mkpart".to_owned(),
                partition.partition_type.to_string(),
                format!("{}s", partition.region.start()),
                format!("{}s", partition.region.end()),
            ]))?;
            context.settle()
        }
        ActionKind::Delete => context.run(&parted().with_args(["rm", number.as_str()])),
        ActionKind::Resize => {
            context.run(&parted().with_args([
                "unit".to_owned(),
                "s".to_owned(),
                "resizepart".to_owned(),
                number,
                format!("{}s", partition.region.end()),
            ]))?;
            context.settle()
        }
        ActionKind::SetPartitionId => {
            let command = set_id_command(parted(), pt, &number, action.sid, partition, context)?;
            match command {
                Some(command) => context.run(&command),
                None => Ok(()),
            }
        }
        ActionKind::SetBoot => {
            let flag = match pt.pt_type {
                PtType::Msdos => "boot",
                _ => "legacy_boot",
            };
            let state = if partition.boot { "on" } else { "off" };
            context.run(&parted().with_args(["set", number.as_str(), flag, state]))
        }
        _ => Err(unexpected(action)),
    }
}

/// The command giving `partition` its id. Going back to the Linux id clears
/// the flag of the previous id, if it had one.
fn set_id_command(
    parted: Command,
    pt: &PartitionTable,
    number: &str,
    sid: Sid,
    partition: &Partition,
    context: &CommitContext,
) -> Result<Option<Command>, StorageError> {
    if let Some(flag) = id_flag(partition.id) {
        return Ok(Some(parted.with_args(["set", number, flag, "on"])));
    }

    if partition.id == PARTITION_ID_LINUX {
        let old_flag = context
            .graph(Side::Lhs)
            .find_by_sid(sid)
            .ok()
            .and_then(|device| match &device.data {
                DeviceData::Partition(old) => id_flag(old.id),
                _ => None,
            });
        return Ok(old_flag.map(|flag| parted.with_args(["set", number, flag, "off"])));
    }

    match pt.pt_type {
        PtType::Msdos => Ok(Some(parted.with_args([
            "type".to_owned(),
            number.to_owned(),
            format!("0x{:02x}", partition.id),
        ]))),
        _ => Err(StorageError::new(UnsupportedModificationError::Attribute {
            device: partition.name.clone(),
            attribute: format!("partition id 0x{:x}", partition.id),
        })),
    }
}
