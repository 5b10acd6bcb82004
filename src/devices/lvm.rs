//! Volume groups, physical volumes and logical volumes.

use osutils::dependencies::Dependency;
use stgplan_api::{
    devicegraph::{
        device::{LvmLv, LvmVg},
        Device, DeviceData,
    },
    error::{InternalError, StorageError},
    primitives::bytes::ByteCount,
    Devicegraph, Sid,
};

use crate::{
    actiongraph::{Action, ActionKind, ReallotMode, Side},
    commit::CommitContext,
};

use super::{blk_parent_name, unexpected, unsupported};

pub(super) fn vg_modify_actions(
    device: &Device,
    lhs: &LvmVg,
    rhs: &LvmVg,
) -> Result<Vec<Vec<Action>>, StorageError> {
    if lhs.vg_name != rhs.vg_name {
        return Err(unsupported(device, "name"));
    }
    if lhs.extent_size != rhs.extent_size {
        return Err(unsupported(device, "extent size"));
    }
    // The size follows the physical volumes
    Ok(Vec::new())
}

pub(super) fn lv_delete_actions(device: &Device) -> Vec<Action> {
    let sid = device.sid();
    let mut chain = Vec::new();
    if device.active {
        chain.push(Action::new(sid, ActionKind::Deactivate, Side::Lhs));
    }
    chain.push(Action::delete(sid));
    chain
}

pub(super) fn lv_modify_actions(
    device: &Device,
    lhs: &LvmLv,
    rhs: &LvmLv,
) -> Result<Vec<Vec<Action>>, StorageError> {
    if lhs.lv_name != rhs.lv_name || lhs.name != rhs.name {
        return Err(unsupported(device, "name"));
    }
    if lhs.region.size() != rhs.region.size() {
        return Ok(vec![vec![Action::new(
            device.sid(),
            ActionKind::Resize,
            Side::Rhs,
        )]]);
    }
    Ok(Vec::new())
}

pub(super) fn pv_commit(action: &Action, context: &mut CommitContext) -> Result<(), StorageError> {
    let blk = blk_parent_name(context.graph(action.side), action.sid)?;
    let dependency = match action.kind {
        ActionKind::Create => Dependency::Pvcreate,
        ActionKind::Delete => Dependency::Pvremove,
        _ => return Err(unexpected(action)),
    };
    context.run(&dependency.cmd().with_args(["--yes", blk.as_str()]))
}

/// Block devices of the physical volumes of the volume group `sid`.
fn pv_blk_names(graph: &Devicegraph, sid: Sid) -> Result<Vec<String>, StorageError> {
    graph
        .parents(sid)?
        .into_iter()
        .map(|pv| blk_parent_name(graph, pv))
        .collect()
}

pub(super) fn vg_commit(
    action: &Action,
    vg: &LvmVg,
    context: &mut CommitContext,
) -> Result<(), StorageError> {
    let graph = context.graph(action.side);
    let name = vg.vg_name.as_str();
    match &action.kind {
        ActionKind::Create => context.run(
            &Dependency::Vgcreate
                .cmd()
                .with_args([
                    "--physicalextentsize".to_owned(),
                    format!("{}k", vg.extent_size / ByteCount::KIB),
                    vg.vg_name.clone(),
                ])
                .with_args(pv_blk_names(graph, action.sid)?),
        ),
        ActionKind::Delete => {
            context.run(&Dependency::Vgremove.cmd().with_args(["--force", name]))
        }
        ActionKind::Reallot { mode, member } => {
            let blk = blk_parent_name(graph, *member)?;
            let dependency = match mode {
                ReallotMode::Extend => Dependency::Vgextend,
                ReallotMode::Reduce => Dependency::Vgreduce,
            };
            context.run(&dependency.cmd().with_args([name, blk.as_str()]))
        }
        _ => Err(unexpected(action)),
    }
}

/// Name of the volume group of the logical volume `sid`.
fn vg_name(graph: &Devicegraph, sid: Sid) -> Result<String, StorageError> {
    graph
        .parents(sid)?
        .into_iter()
        .filter_map(|parent| graph.find_by_sid(parent).ok())
        .find_map(|parent| match &parent.data {
            DeviceData::LvmVg(vg) => Some(vg.vg_name.clone()),
            _ => None,
        })
        .ok_or_else(|| {
            StorageError::new(InternalError::Internal(
                "Logical volume has no volume group",
            ))
        })
}

pub(super) fn lv_commit(
    action: &Action,
    lv: &LvmLv,
    context: &mut CommitContext,
) -> Result<(), StorageError> {
    let vg = vg_name(context.graph(action.side), action.sid)?;
    // The form the LVM tools address logical volumes by
    let path = format!("{vg}/{}", lv.lv_name);
    let size = format!("{}b", lv.region.size());

    match action.kind {
        ActionKind::Create => context.run(&Dependency::Lvcreate.cmd().with_args([
            "--yes",
            "--name",
            lv.lv_name.as_str(),
            "--size",
            size.as_str(),
            vg.as_str(),
        ])),
        ActionKind::Delete => context.run(
            &Dependency::Lvremove
                .cmd()
                .with_args(["--force", path.as_str()]),
        ),
        ActionKind::Resize => context.run(&Dependency::Lvresize.cmd().with_args([
            "--force",
            "--size",
            size.as_str(),
            path.as_str(),
        ])),
        ActionKind::Activate | ActionKind::Deactivate => {
            let state = if action.kind == ActionKind::Activate {
                "y"
            } else {
                "n"
            };
            context.run(
                &Dependency::Lvchange
                    .cmd()
                    .with_args(["--activate", state, path.as_str()]),
            )
        }
        _ => Err(unexpected(action)),
    }
}
