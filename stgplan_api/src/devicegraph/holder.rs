use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

use super::types::DeviceKind;

/// An edge of the devicegraph, from the used device to the device using it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Holder {
    /// Generic consumer, e.g. a LUKS device on its backing device or a
    /// volume group on a physical volume.
    User,

    /// Membership in an MD array.
    MdUser(MdUser),

    /// Partition table of a partitionable, partition of a partition table,
    /// logical volume of a volume group.
    Subdevice,

    /// Filesystem on a block device.
    FilesystemUser(FilesystemUser),

    /// Mount point of a filesystem.
    MountUser,

    /// Backing or caching device of a bcache.
    BcacheUser,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct MdUser {
    #[serde(default)]
    pub spare: bool,
    #[serde(default)]
    pub faulty: bool,
    /// Position of the member in the array, one-based. Zero means unknown.
    #[serde(default)]
    pub sort_key: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct FilesystemUser {
    #[serde(default)]
    pub journal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum HolderKind {
    User,
    MdUser,
    Subdevice,
    FilesystemUser,
    MountUser,
    BcacheUser,
}

impl Holder {
    pub fn md_user(spare: bool) -> Self {
        Holder::MdUser(MdUser {
            spare,
            ..Default::default()
        })
    }

    pub fn filesystem_user() -> Self {
        Holder::FilesystemUser(FilesystemUser::default())
    }

    pub fn kind(&self) -> HolderKind {
        match self {
            Holder::User => HolderKind::User,
            Holder::MdUser(_) => HolderKind::MdUser,
            Holder::Subdevice => HolderKind::Subdevice,
            Holder::FilesystemUser(_) => HolderKind::FilesystemUser,
            Holder::MountUser => HolderKind::MountUser,
            Holder::BcacheUser => HolderKind::BcacheUser,
        }
    }

    pub fn as_md_user(&self) -> Option<&MdUser> {
        match self {
            Holder::MdUser(md_user) => Some(md_user),
            _ => None,
        }
    }

    pub fn as_md_user_mut(&mut self) -> Option<&mut MdUser> {
        match self {
            Holder::MdUser(md_user) => Some(md_user),
            _ => None,
        }
    }
}

impl HolderKind {
    /// Whether a holder of this kind may connect a device of kind `source` to
    /// a device of kind `target`.
    pub fn connects(self, source: DeviceKind, target: DeviceKind) -> bool {
        match self {
            HolderKind::User => {
                (source.is_blk_device()
                    && matches!(
                        target,
                        DeviceKind::Luks | DeviceKind::LvmPv | DeviceKind::BcacheCset
                    ))
                    || (source == DeviceKind::LvmPv && target == DeviceKind::LvmVg)
            }
            HolderKind::MdUser => source.is_blk_device() && target == DeviceKind::Md,
            HolderKind::Subdevice => matches!(
                (source, target),
                (DeviceKind::Disk | DeviceKind::Md, DeviceKind::PartitionTable)
                    | (DeviceKind::PartitionTable, DeviceKind::Partition)
                    | (DeviceKind::LvmVg, DeviceKind::LvmLv)
            ),
            HolderKind::FilesystemUser => {
                source.is_blk_device() && target == DeviceKind::BlkFilesystem
            }
            HolderKind::MountUser => source.is_filesystem() && target == DeviceKind::MountPoint,
            HolderKind::BcacheUser => {
                (source.is_blk_device() || source == DeviceKind::BcacheCset)
                    && target == DeviceKind::Bcache
            }
        }
    }
}
