use log::debug;
use uuid::Uuid;

use osutils::{dependencies::Dependency, mdadm::EtcMdadmEntry};
use stgplan_api::{
    devicegraph::{
        device::Md,
        types::{MdLevel, MdParity},
        Device,
    },
    error::{InternalError, ReportError, StorageError},
    primitives::bytes::ByteCount,
    Devicegraph, Sid,
};

use crate::{
    actiongraph::{Action, ActionKind, ReallotMode, Side},
    commit::CommitContext,
};

use super::{unexpected, unsupported};

pub(super) fn create_actions(sid: Sid, md: &Md) -> Vec<Action> {
    let mut chain = vec![Action::create(sid).with_last()];
    if md.in_etc_mdadm {
        chain.push(Action::new(sid, ActionKind::AddToEtcMdadm, Side::Rhs));
    }
    chain
}

pub(super) fn delete_actions(device: &Device, md: &Md) -> Vec<Action> {
    let sid = device.sid();
    let mut chain = Vec::new();
    if md.in_etc_mdadm {
        chain.push(Action::new(sid, ActionKind::RemoveFromEtcMdadm, Side::Lhs));
    }
    if device.active {
        chain.push(Action::new(sid, ActionKind::Deactivate, Side::Lhs));
    }
    chain.push(Action::delete(sid));
    chain
}

pub(super) fn modify_actions(
    device: &Device,
    lhs: &Md,
    rhs: &Md,
) -> Result<Vec<Vec<Action>>, StorageError> {
    if lhs.name != rhs.name {
        return Err(unsupported(device, "name"));
    }
    if lhs.level != rhs.level {
        return Err(unsupported(device, "RAID level"));
    }
    if lhs.metadata != rhs.metadata {
        return Err(unsupported(device, "metadata version"));
    }
    if lhs.chunk_size != rhs.chunk_size {
        return Err(unsupported(device, "chunk size"));
    }
    if lhs.parity != rhs.parity {
        return Err(unsupported(device, "parity"));
    }
    if !lhs.uuid.is_empty() && !rhs.uuid.is_empty() && lhs.uuid != rhs.uuid {
        return Err(unsupported(device, "UUID"));
    }
    if lhs.region != rhs.region {
        return Err(unsupported(device, "size"));
    }

    let sid = device.sid();
    Ok(match (lhs.in_etc_mdadm, rhs.in_etc_mdadm) {
        (false, true) => vec![vec![Action::new(sid, ActionKind::AddToEtcMdadm, Side::Rhs)]],
        (true, false) => vec![vec![Action::new(
            sid,
            ActionKind::RemoveFromEtcMdadm,
            Side::Lhs,
        )]],
        _ => Vec::new(),
    })
}

/// Member names as passed to mdadm: active members by position, then spares.
pub(super) fn member_names(graph: &Devicegraph, sid: Sid) -> Result<Vec<String>, StorageError> {
    let (mut devices, spares) = members(graph, sid)?;
    devices.extend(spares);
    Ok(devices)
}

/// Names of the active members in position order and of the spares in sid
/// order.
fn members(graph: &Devicegraph, sid: Sid) -> Result<(Vec<String>, Vec<String>), StorageError> {
    let mut members = graph.md_members(sid)?;
    members.sort_by_key(|(member, user)| (user.spare, user.sort_key, *member));

    let mut devices = Vec::new();
    let mut spares = Vec::new();
    for (member, user) in members {
        let name = graph
            .find_by_sid(member)?
            .name()
            .structured(InternalError::Internal("MD member has no name"))?
            .to_owned();
        if user.spare {
            spares.push(name);
        } else {
            devices.push(name);
        }
    }
    Ok((devices, spares))
}

/// A random UUID in the format mdadm prints, four groups of eight hex digits
/// separated by colons.
fn generate_uuid() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex.as_bytes()
        .chunks(8)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

pub(super) fn commit(
    action: &Action,
    md: &Md,
    context: &mut CommitContext,
) -> Result<(), StorageError> {
    let graph = context.graph(action.side);
    let mdadm = || Dependency::Mdadm.cmd();

    match &action.kind {
        ActionKind::Create => {
            let (devices, spares) = members(graph, action.sid)?;
            let uuid = context.uuid(action.sid, &md.uuid, generate_uuid);

            let mut command = mdadm().with_args([
                "--create".to_owned(),
                md.name.clone(),
                "--run".to_owned(),
                format!("--level={}", md.level.to_mdadm()),
                format!("--metadata={}", md.metadata),
                "--homehost=any".to_owned(),
            ]);
            if md.level.has_redundancy() {
                command.arg("--bitmap=internal");
            }
            if md.chunk_size > 0 && md.level != MdLevel::Raid1 {
                command.arg(format!("--chunk={}", md.chunk_size / ByteCount::KIB));
            }
            if md.parity != MdParity::Default {
                command.arg(format!("--parity={}", md.parity));
            }
            command.arg(format!("--uuid={uuid}"));
            command.arg(format!("--raid-devices={}", devices.len()));
            if !spares.is_empty() {
                command.arg(format!("--spare-devices={}", spares.len()));
            }
            command.args(devices.iter().chain(&spares));

            context.run(&command)?;
            context.settle()
        }
        ActionKind::Delete => context.run(
            &mdadm()
                .with_arg("--zero-superblock")
                .with_args(member_names(graph, action.sid)?),
        ),
        ActionKind::Activate => context.run(
            &mdadm()
                .with_args(["--assemble", "--run", md.name.as_str()])
                .with_args(member_names(graph, action.sid)?),
        ),
        ActionKind::Deactivate => context.run(&mdadm().with_args(["--stop", md.name.as_str()])),
        ActionKind::AddToEtcMdadm => {
            let uuid = context
                .data
                .uuids
                .get(&action.sid)
                .cloned()
                .unwrap_or_else(|| md.uuid.clone());
            if uuid.is_empty() {
                return Err(StorageError::new(InternalError::Internal(
                    "MD array to register has no UUID",
                )));
            }
            context.data.etc_mdadm.update_entry(&EtcMdadmEntry {
                device: md.name.clone(),
                uuid,
                metadata: Some(md.metadata.clone()),
            });
            Ok(())
        }
        ActionKind::RemoveFromEtcMdadm => {
            if !context.data.etc_mdadm.remove_entry(&md.uuid) {
                debug!("{} was not listed in mdadm.conf", md.name);
            }
            Ok(())
        }
        ActionKind::Reallot { mode, member } => {
            let name = graph
                .find_by_sid(*member)?
                .name()
                .structured(InternalError::Internal("MD member has no name"))?;
            match mode {
                ReallotMode::Extend => {
                    let spare = graph
                        .holder(*member, action.sid)
                        .and_then(|holder| holder.as_md_user())
                        .is_some_and(|user| user.spare);
                    let add = if spare { "--add-spare" } else { "--add" };
                    context.run(&mdadm().with_args([md.name.as_str(), add, name]))
                }
                ReallotMode::Reduce => {
                    // Active members have to be failed before they can be
                    // removed
                    context.run_best_effort(&mdadm().with_args([
                        md.name.as_str(),
                        "--fail",
                        name,
                    ]))?;
                    context.run(&mdadm().with_args([md.name.as_str(), "--remove", name]))
                }
            }
        }
        _ => Err(unexpected(action)),
    }
}
