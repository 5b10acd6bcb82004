//! Bcache devices and their caching sets.

use osutils::dependencies::{Command, Dependency};
use stgplan_api::{
    devicegraph::{
        device::{Bcache, BcacheCset},
        types::CacheMode,
        Device, DeviceData,
    },
    error::StorageError,
    Devicegraph, Sid,
};

use crate::{
    actiongraph::{Action, ActionKind, Side},
    commit::CommitContext,
};

use super::{blk_parent_name, blk_parent_names, unexpected, unsupported};

pub(super) fn delete_actions(device: &Device) -> Vec<Action> {
    let sid = device.sid();
    vec![
        Action::new(sid, ActionKind::Deactivate, Side::Lhs),
        Action::delete(sid),
    ]
}

pub(super) fn modify_actions(
    device: &Device,
    lhs: &Bcache,
    rhs: &Bcache,
) -> Result<Vec<Vec<Action>>, StorageError> {
    if lhs.name != rhs.name {
        return Err(unsupported(device, "name"));
    }
    if lhs.cache_mode != rhs.cache_mode {
        return Ok(vec![vec![Action::new(
            device.sid(),
            ActionKind::SetCacheMode,
            Side::Rhs,
        )]]);
    }
    Ok(Vec::new())
}

/// Block devices of the caching set attached to the bcache `sid`, if any.
fn cset_blk_names(graph: &Devicegraph, sid: Sid) -> Result<Option<Vec<String>>, StorageError> {
    for parent in graph.parents(sid)? {
        if let DeviceData::BcacheCset(_) = graph.find_by_sid(parent)?.data {
            return blk_parent_names(graph, parent).map(Some);
        }
    }
    Ok(None)
}

fn set_cache_mode_command(backing: &str, bcache: &Bcache) -> Command {
    Dependency::Bcache.cmd().with_args([
        "set-cachemode".to_owned(),
        backing.to_owned(),
        bcache.cache_mode.to_string(),
    ])
}

pub(super) fn commit(
    action: &Action,
    bcache: &Bcache,
    context: &mut CommitContext,
) -> Result<(), StorageError> {
    let graph = context.graph(action.side);
    let backing = blk_parent_name(graph, action.sid)?;

    match action.kind {
        ActionKind::Create => {
            context.run(&Dependency::MakeBcache.cmd().with_args(["-B", backing.as_str()]))?;
            context.settle()?;
            let cache = cset_blk_names(graph, action.sid)?.and_then(|blks| blks.into_iter().next());
            if let Some(cache) = cache {
                context.run(&Dependency::Bcache.cmd().with_args([
                    "attach",
                    cache.as_str(),
                    backing.as_str(),
                ]))?;
            }
            if bcache.cache_mode != CacheMode::default() {
                context.run(&set_cache_mode_command(&backing, bcache))?;
            }
            Ok(())
        }
        ActionKind::SetCacheMode => context.run(&set_cache_mode_command(&backing, bcache)),
        ActionKind::Deactivate => {
            context.run(&Dependency::Bcache.cmd().with_args(["stop", bcache.name.as_str()]))?;
            context.settle()
        }
        ActionKind::Delete => {
            context.run(&Dependency::Wipefs.cmd().with_args(["--all", backing.as_str()]))
        }
        _ => Err(unexpected(action)),
    }
}

pub(super) fn cset_commit(
    action: &Action,
    _cset: &BcacheCset,
    context: &mut CommitContext,
) -> Result<(), StorageError> {
    let blks = blk_parent_names(context.graph(action.side), action.sid)?;
    match action.kind {
        ActionKind::Create => {
            context.run(&Dependency::MakeBcache.cmd().with_arg("-C").with_args(blks))?;
            context.settle()
        }
        ActionKind::Delete => {
            for blk in &blks {
                // The set stays registered until its last device is gone
                context.run_best_effort(
                    &Dependency::Bcache
                        .cmd()
                        .with_args(["unregister", blk.as_str()]),
                )?;
            }
            context.run(&Dependency::Wipefs.cmd().with_arg("--all").with_args(blks))
        }
        _ => Err(unexpected(action)),
    }
}
