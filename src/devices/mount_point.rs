//! Mount points: mounting, unmounting and their fstab entries.

use std::path::PathBuf;

use log::{debug, warn};

use osutils::{dependencies::Dependency, tabfile::TabFileEntry};
use stgplan_api::{
    devicegraph::{device::MountPoint, types::MountByType, Device, DeviceData},
    error::{InternalError, StorageError},
    Devicegraph, Sid,
};
use sysdefs::filesystems::RealFilesystemType;

use crate::{
    actiongraph::{Action, ActionKind, Side},
    commit::CommitContext,
};

use super::{blk_parent, unexpected};

pub(super) fn create_actions(device: &Device, mp: &MountPoint) -> Vec<Action> {
    let sid = device.sid();
    let mut chain = Vec::new();
    if device.active {
        chain.push(Action::new(
            sid,
            ActionKind::Mount {
                path: mp.path.clone(),
            },
            Side::Rhs,
        ));
    }
    if mp.in_etc_fstab {
        chain.push(Action::new(sid, ActionKind::AddToEtcFstab, Side::Rhs));
    }
    chain
}

pub(super) fn delete_actions(device: &Device, mp: &MountPoint) -> Vec<Action> {
    let sid = device.sid();
    let mut chain = Vec::new();
    if mp.in_etc_fstab {
        chain.push(Action::new(sid, ActionKind::RemoveFromEtcFstab, Side::Lhs));
    }
    if device.active {
        chain.push(Action::new(
            sid,
            ActionKind::Unmount {
                path: mp.path.clone(),
            },
            Side::Lhs,
        ));
    }
    chain
}

/// Changes of a mount point. A new path or a new filesystem below it means
/// unmounting and mounting again.
pub(super) fn modify_actions(
    probed: &Devicegraph,
    staging: &Devicegraph,
    lhs: &Device,
    rhs: &Device,
    l: &MountPoint,
    r: &MountPoint,
) -> Result<Vec<Vec<Action>>, StorageError> {
    let sid = rhs.sid();
    let moved = l.path != r.path || probed.parents(sid)? != staging.parents(sid)?;
    let unmount = Action::new(
        sid,
        ActionKind::Unmount {
            path: l.path.clone(),
        },
        Side::Lhs,
    );
    let mount = Action::new(
        sid,
        ActionKind::Mount {
            path: r.path.clone(),
        },
        Side::Rhs,
    );

    let mut chain = Vec::new();
    if l.in_etc_fstab && !r.in_etc_fstab {
        chain.push(Action::new(sid, ActionKind::RemoveFromEtcFstab, Side::Lhs));
    }
    match (lhs.active, rhs.active) {
        (true, true) if moved => chain.extend([unmount, mount]),
        (true, false) => chain.push(unmount),
        (false, true) => chain.push(mount),
        _ => {}
    }
    match (l.in_etc_fstab, r.in_etc_fstab) {
        (false, true) => chain.push(Action::new(sid, ActionKind::AddToEtcFstab, Side::Rhs)),
        (true, true)
            if moved || l.mount_by != r.mount_by || l.mount_options != r.mount_options =>
        {
            chain.push(Action::new(sid, ActionKind::RenameInEtcFstab, Side::Rhs))
        }
        _ => {}
    }

    Ok(if chain.is_empty() {
        Vec::new()
    } else {
        vec![chain]
    })
}

/// What is mounted at a mount point.
enum Mounted<'a> {
    Blk {
        device: &'a Device,
        fs_type: RealFilesystemType,
        uuid: &'a str,
        label: &'a str,
    },
    Nfs(String),
    Tmpfs,
}

impl Mounted<'_> {
    fn find(graph: &Devicegraph, sid: Sid) -> Result<Mounted<'_>, StorageError> {
        let parent = graph.parents(sid)?.into_iter().next().ok_or_else(|| {
            StorageError::new(InternalError::Internal("Mount point has no filesystem"))
        })?;
        let fs = graph.find_by_sid(parent)?;
        match &fs.data {
            DeviceData::BlkFilesystem(blk_fs) => Ok(Mounted::Blk {
                device: blk_parent(graph, parent)?,
                fs_type: blk_fs.fs_type,
                uuid: &blk_fs.uuid,
                label: &blk_fs.label,
            }),
            DeviceData::Nfs(nfs) => Ok(Mounted::Nfs(format!("{}:{}", nfs.server, nfs.path))),
            DeviceData::Tmpfs(_) => Ok(Mounted::Tmpfs),
            _ => Err(StorageError::new(InternalError::Internal(
                "Mount point is not held by a filesystem",
            ))),
        }
    }

    fn is_swap(&self) -> bool {
        matches!(
            self,
            Mounted::Blk {
                fs_type: RealFilesystemType::Swap,
                ..
            }
        )
    }

    fn fs_type(&self) -> &'static str {
        match self {
            Mounted::Blk { fs_type, .. } => (*fs_type).into(),
            Mounted::Nfs(_) => "nfs",
            Mounted::Tmpfs => "tmpfs",
        }
    }

    /// Kernel name of the mounted device or its equivalent.
    fn source(&self) -> String {
        match self {
            Mounted::Blk { device, .. } => device.display_name(),
            Mounted::Nfs(name) => name.clone(),
            Mounted::Tmpfs => "tmpfs".into(),
        }
    }

    /// First field of the fstab entry, following `mount_by` where the
    /// filesystem provides the needed attribute.
    fn fstab_spec(&self, mount_by: MountByType) -> String {
        let Mounted::Blk {
            device,
            uuid,
            label,
            ..
        } = self
        else {
            return self.source();
        };
        let udev_link = |prefix: &str| {
            device
                .udev_ids
                .iter()
                .find(|id| id.starts_with(prefix))
                .cloned()
        };
        let spec = match mount_by {
            MountByType::Device => None,
            MountByType::Uuid => (!uuid.is_empty()).then(|| format!("UUID={uuid}")),
            MountByType::Label => (!label.is_empty()).then(|| format!("LABEL={label}")),
            MountByType::Id => udev_link("/dev/disk/by-id/"),
            MountByType::Path => udev_link("/dev/disk/by-path/"),
        };
        spec.unwrap_or_else(|| {
            if mount_by != MountByType::Device {
                warn!(
                    "Cannot refer to {} by {mount_by}, using the device name",
                    device.display_name()
                );
            }
            self.source()
        })
    }
}

fn fstab_entry(mounted: &Mounted, mp: &MountPoint) -> TabFileEntry {
    TabFileEntry::new(mounted.fstab_spec(mp.mount_by), &mp.path, mounted.fs_type())
        .with_options(mp.mount_options.clone())
}

pub(super) fn commit(
    action: &Action,
    mp: &MountPoint,
    context: &mut CommitContext,
) -> Result<(), StorageError> {
    let mounted = Mounted::find(context.graph(action.side), action.sid)?;

    match &action.kind {
        ActionKind::Mount { path } => {
            if mounted.is_swap() {
                return context.run(&Dependency::Swapon.cmd().with_arg(mounted.source()));
            }
            let mut cmd = Dependency::Mount
                .cmd()
                .with_args(["--mkdir", "-t", mounted.fs_type()]);
            if !mp.mount_options.is_empty() {
                cmd.args(["-o".to_owned(), mp.mount_options.join(",")]);
            }
            let target: PathBuf = context.mount_path(path);
            context.run(&cmd.with_arg(mounted.source()).with_arg(target))
        }
        ActionKind::Unmount { path } => {
            if mounted.is_swap() {
                context.run(&Dependency::Swapoff.cmd().with_arg(mounted.source()))
            } else {
                context.run(&Dependency::Umount.cmd().with_arg(context.mount_path(path)))
            }
        }
        ActionKind::AddToEtcFstab => {
            context.data.etc_fstab.update_entry(fstab_entry(&mounted, mp));
            Ok(())
        }
        ActionKind::RenameInEtcFstab => {
            if let DeviceData::MountPoint(old) = &context
                .graph(Side::Lhs)
                .find_by_sid(action.sid)?
                .data
            {
                if old.path != mp.path {
                    context.data.etc_fstab.remove_entry(&old.path);
                }
            }
            context.data.etc_fstab.update_entry(fstab_entry(&mounted, mp));
            Ok(())
        }
        ActionKind::RemoveFromEtcFstab => {
            if !context.data.etc_fstab.remove_entry(&mp.path) {
                debug!("{} was not listed in fstab", mp.path);
            }
            Ok(())
        }
        _ => Err(unexpected(action)),
    }
}
