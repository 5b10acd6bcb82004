use log::debug;
use uuid::Uuid;

use osutils::{crypttab::CrypttabEntry, dependencies::Dependency};
use stgplan_api::{
    devicegraph::{device::Luks, Device},
    error::StorageError,
    Sid,
};

use crate::{
    actiongraph::{Action, ActionKind, Side},
    commit::CommitContext,
};

use super::{blk_parent_name, unexpected, unsupported};

pub(super) fn create_actions(sid: Sid, luks: &Luks) -> Vec<Action> {
    let mut chain = vec![
        Action::create(sid),
        Action::new(sid, ActionKind::Activate, Side::Rhs).with_last(),
    ];
    if luks.in_etc_crypttab {
        chain.push(Action::new(sid, ActionKind::AddToEtcCrypttab, Side::Rhs));
    }
    chain
}

pub(super) fn delete_actions(device: &Device, luks: &Luks) -> Vec<Action> {
    let sid = device.sid();
    let mut chain = Vec::new();
    if luks.in_etc_crypttab {
        chain.push(Action::new(sid, ActionKind::RemoveFromEtcCrypttab, Side::Lhs));
    }
    if device.active {
        chain.push(Action::new(sid, ActionKind::Deactivate, Side::Lhs));
    }
    chain.push(Action::delete(sid));
    chain
}

pub(super) fn modify_actions(
    device: &Device,
    lhs: &Luks,
    rhs: &Luks,
) -> Result<Vec<Vec<Action>>, StorageError> {
    if lhs.name != rhs.name || lhs.dm_table_name != rhs.dm_table_name {
        return Err(unsupported(device, "name"));
    }
    if !lhs.uuid.is_empty() && !rhs.uuid.is_empty() && lhs.uuid != rhs.uuid {
        return Err(unsupported(device, "UUID"));
    }

    let sid = device.sid();
    Ok(match (lhs.in_etc_crypttab, rhs.in_etc_crypttab) {
        (false, true) => vec![vec![Action::new(sid, ActionKind::AddToEtcCrypttab, Side::Rhs)]],
        (true, false) => vec![vec![Action::new(
            sid,
            ActionKind::RemoveFromEtcCrypttab,
            Side::Lhs,
        )]],
        _ => Vec::new(),
    })
}

pub(super) fn commit(
    action: &Action,
    luks: &Luks,
    context: &mut CommitContext,
) -> Result<(), StorageError> {
    let blk = blk_parent_name(context.graph(action.side), action.sid)?;
    let cryptsetup = || Dependency::Cryptsetup.cmd().with_arg("--batch-mode");
    let dm = luks.dm_table_name.as_str();

    match action.kind {
        ActionKind::Create => {
            let uuid = context.uuid(action.sid, &luks.uuid, || {
                Uuid::new_v4().hyphenated().to_string()
            });
            context.run(&cryptsetup().with_args([
                "luksFormat".to_owned(),
                "--type".to_owned(),
                "luks2".to_owned(),
                format!("--uuid={uuid}"),
                blk,
            ]))
        }
        ActionKind::Activate => {
            context.run(&cryptsetup().with_args(["luksOpen", blk.as_str(), dm]))?;
            context.settle()
        }
        ActionKind::Deactivate => context.run(&cryptsetup().with_args(["luksClose", dm])),
        ActionKind::Delete => {
            context.run(&Dependency::Wipefs.cmd().with_args(["--all", blk.as_str()]))
        }
        ActionKind::AddToEtcCrypttab => {
            let uuid = context
                .data
                .uuids
                .get(&action.sid)
                .cloned()
                .unwrap_or_else(|| luks.uuid.clone());
            let device = if uuid.is_empty() {
                blk
            } else {
                format!("UUID={uuid}")
            };
            context
                .data
                .etc_crypttab
                .update_entry(&CrypttabEntry::new(dm, device));
            Ok(())
        }
        ActionKind::RemoveFromEtcCrypttab => {
            if !context.data.etc_crypttab.remove_entry(dm) {
                debug!("{dm} was not listed in crypttab");
            }
            Ok(())
        }
        _ => Err(unexpected(action)),
    }
}
