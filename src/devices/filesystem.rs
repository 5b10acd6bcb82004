//! Filesystems on block devices.

use log::warn;

use osutils::dependencies::{Command, Dependency};
use stgplan_api::{
    devicegraph::{device::BlkFilesystem, Device},
    error::{StorageError, UnsupportedModificationError},
};
use sysdefs::filesystems::RealFilesystemType;

use crate::{
    actiongraph::{Action, ActionKind, Side},
    commit::CommitContext,
};

use super::{blk_parent_name, unexpected, unsupported};

fn fs_name(fs_type: RealFilesystemType) -> &'static str {
    fs_type.into()
}

/// Whether mkfs can create a filesystem of this type. Read-only images are
/// built by other tools.
fn can_create(fs_type: RealFilesystemType) -> bool {
    fs_type.is_supported() && fs_type != RealFilesystemType::Iso9660
}

fn can_relabel(fs_type: RealFilesystemType) -> bool {
    matches!(
        fs_type,
        RealFilesystemType::Ext2
            | RealFilesystemType::Ext3
            | RealFilesystemType::Ext4
            | RealFilesystemType::Xfs
            | RealFilesystemType::Btrfs
            | RealFilesystemType::Reiserfs
            | RealFilesystemType::Jfs
            | RealFilesystemType::Swap
    )
}

pub(super) fn create_actions(
    device: &Device,
    fs: &BlkFilesystem,
) -> Result<Vec<Action>, StorageError> {
    if !can_create(fs.fs_type) {
        return Err(StorageError::new(UnsupportedModificationError::Create {
            kind: format!("{} filesystem", fs_name(fs.fs_type)),
            device: device.display_name(),
        }));
    }
    Ok(vec![Action::create(device.sid())])
}

pub(super) fn modify_actions(
    device: &Device,
    lhs: &BlkFilesystem,
    rhs: &BlkFilesystem,
) -> Result<Vec<Vec<Action>>, StorageError> {
    if lhs.fs_type != rhs.fs_type {
        return Err(unsupported(device, "filesystem type"));
    }
    if !lhs.uuid.is_empty() && !rhs.uuid.is_empty() && lhs.uuid != rhs.uuid {
        return Err(unsupported(device, "UUID"));
    }
    if lhs.label == rhs.label {
        return Ok(Vec::new());
    }
    if !can_relabel(rhs.fs_type) {
        return Err(unsupported(device, "label"));
    }
    Ok(vec![vec![Action::new(
        device.sid(),
        ActionKind::SetLabel,
        Side::Rhs,
    )]])
}

fn mkfs_command(fs: &BlkFilesystem, blk: &str) -> Command {
    let mut cmd = match fs.fs_type {
        RealFilesystemType::Swap => Dependency::Mkswap.cmd(),
        fs_type => Dependency::Mkfs.cmd().with_args(["-t", fs_name(fs_type)]),
    };

    // Both ask for confirmation otherwise
    if matches!(
        fs.fs_type,
        RealFilesystemType::Reiserfs | RealFilesystemType::Jfs
    ) {
        cmd.arg("-q");
    }

    if !fs.label.is_empty() {
        let flag = match fs.fs_type {
            RealFilesystemType::Vfat => "-n",
            RealFilesystemType::F2fs | RealFilesystemType::Reiserfs => "-l",
            _ => "-L",
        };
        cmd.args([flag, fs.label.as_str()]);
    }

    if !fs.uuid.is_empty() {
        match fs.fs_type {
            RealFilesystemType::Ext2
            | RealFilesystemType::Ext3
            | RealFilesystemType::Ext4
            | RealFilesystemType::Btrfs
            | RealFilesystemType::Swap => {
                cmd.args(["-U", fs.uuid.as_str()]);
            }
            RealFilesystemType::Xfs => {
                cmd.args(["-m".to_owned(), format!("uuid={}", fs.uuid)]);
            }
            RealFilesystemType::Reiserfs => {
                cmd.args(["-u", fs.uuid.as_str()]);
            }
            fs_type => warn!(
                "UUID of {} filesystems cannot be chosen, ignoring '{}'",
                fs_name(fs_type),
                fs.uuid
            ),
        }
    }

    cmd.with_arg(blk)
}

fn set_label_command(fs: &BlkFilesystem, blk: &str) -> Option<Command> {
    let label = fs.label.as_str();
    Some(match fs.fs_type {
        RealFilesystemType::Ext2 | RealFilesystemType::Ext3 | RealFilesystemType::Ext4 => {
            Dependency::Tune2fs.cmd().with_args(["-L", label, blk])
        }
        // xfs_admin clears the label when given "--"
        RealFilesystemType::Xfs => Dependency::XfsAdmin.cmd().with_args([
            "-L",
            if label.is_empty() { "--" } else { label },
            blk,
        ]),
        RealFilesystemType::Btrfs => Dependency::Btrfs
            .cmd()
            .with_args(["filesystem", "label", blk, label]),
        RealFilesystemType::Swap => Dependency::Swaplabel.cmd().with_args(["-L", label, blk]),
        RealFilesystemType::Reiserfs => {
            Dependency::Reiserfstune.cmd().with_args(["-l", label, blk])
        }
        RealFilesystemType::Jfs => Dependency::JfsTune.cmd().with_args(["-L", label, blk]),
        _ => return None,
    })
}

pub(super) fn commit(
    action: &Action,
    fs: &BlkFilesystem,
    context: &mut CommitContext,
) -> Result<(), StorageError> {
    let blk = blk_parent_name(context.graph(action.side), action.sid)?;
    match action.kind {
        ActionKind::Create => {
            context.run(&mkfs_command(fs, &blk))?;
            context.settle()
        }
        ActionKind::Delete => {
            context.run(&Dependency::Wipefs.cmd().with_args(["--all", blk.as_str()]))
        }
        ActionKind::SetLabel => match set_label_command(fs, &blk) {
            Some(cmd) => context.run(&cmd),
            None => Err(unexpected(action)),
        },
        _ => Err(unexpected(action)),
    }
}
