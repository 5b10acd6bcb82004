use osutils::dependencies::Dependency;
use stgplan_api::{
    devicegraph::{device::PartitionTable, types::PtType, Device},
    error::{StorageError, UnsupportedModificationError},
    Devicegraph,
};

use crate::{
    actiongraph::{Action, ActionKind},
    commit::CommitContext,
};

use super::{blk_parent_name, unexpected, unsupported};

pub(super) fn create_actions(
    staging: &Devicegraph,
    device: &Device,
    pt: &PartitionTable,
) -> Result<Vec<Action>, StorageError> {
    match pt.pt_type {
        PtType::Gpt | PtType::Msdos => Ok(vec![Action::create(device.sid())]),
        PtType::Dasd | PtType::ImplicitPt => {
            Err(StorageError::new(UnsupportedModificationError::Create {
                kind: device.kind().to_string(),
                device: format!(
                    "{} on {}",
                    device.display_name(),
                    blk_parent_name(staging, device.sid())?
                ),
            }))
        }
    }
}

pub(super) fn modify_actions(
    device: &Device,
    lhs: &PartitionTable,
    rhs: &PartitionTable,
) -> Result<Vec<Vec<Action>>, StorageError> {
    if lhs.pt_type != rhs.pt_type {
        return Err(unsupported(device, "partition table type"));
    }
    Ok(Vec::new())
}

pub(super) fn commit(
    action: &Action,
    device: &Device,
    pt: &PartitionTable,
    context: &mut CommitContext,
) -> Result<(), StorageError> {
    let disk = blk_parent_name(context.graph(action.side), device.sid())?;
    match action.kind {
        ActionKind::Create => {
            let label = pt.pt_type.to_string();
            let command = Dependency::Parted
                .cmd()
                .with_args(["-s", disk.as_str(), "mklabel", label.as_str()]);
            context.run(&command)
        }
        ActionKind::Delete => {
            context.run(&Dependency::Wipefs.cmd().with_args(["--all", disk.as_str()]))?;
            context.settle()
        }
        _ => Err(unexpected(action)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use osutils::testutils::runner::RecordingRunner;
    use stgplan_api::{
        devicegraph::{device::Disk, Holder},
        error::ErrorKind,
    };

    use crate::commit::CommitData;

    #[test]
    fn test_create_and_delete() {
        let mut graph = Devicegraph::new();
        let disk = graph
            .create_device(Disk {
                name: "/dev/vda".into(),
                ..Default::default()
            })
            .unwrap();
        let pt = graph
            .create_device(PartitionTable {
                pt_type: PtType::Msdos,
            })
            .unwrap();
        graph.add_holder(disk, pt, Holder::Subdevice).unwrap();

        let runner = RecordingRunner::new();
        let mut data = CommitData::default();
        let mut context = CommitContext::new(&graph, &graph, &runner, &mut data, None);
        crate::devices::commit(&Action::create(pt), &mut context).unwrap();
        crate::devices::commit(&Action::delete(pt), &mut context).unwrap();
        assert_eq!(
            runner.commands(),
            vec![
                "parted -s /dev/vda mklabel msdos",
                "wipefs --all /dev/vda",
                "udevadm settle"
            ]
        );
    }

    #[test]
    fn test_implicit_partition_table_cannot_be_created() {
        let mut graph = Devicegraph::new();
        let disk = graph
            .create_device(Disk {
                name: "/dev/dasda".into(),
                ..Default::default()
            })
            .unwrap();
        let pt = graph
            .create_device(PartitionTable {
                pt_type: PtType::ImplicitPt,
            })
            .unwrap();
        graph.add_holder(disk, pt, Holder::Subdevice).unwrap();

        let error = create_actions(&graph, graph.find_by_sid(pt).unwrap(), &PartitionTable {
            pt_type: PtType::ImplicitPt,
        })
        .unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::UnsupportedModification(UnsupportedModificationError::Create {
                kind: "partition-table".into(),
                device: "implicitpt partition table on /dev/dasda".into(),
            })
        );
    }
}
