//! Basic types for the devicegraph

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, IntoStaticStr};

use super::cardinality::ValidCardinality;

/// Enum for supported device kinds
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeviceKind {
    Disk,
    PartitionTable,
    Partition,
    Md,
    LvmVg,
    LvmPv,
    LvmLv,
    Luks,
    Bcache,
    BcacheCset,
    BlkFilesystem,
    Nfs,
    Tmpfs,
    MountPoint,
}

bitflags::bitflags! {
    /// Bitflags for device kinds
    ///
    /// MUST MATCH THE CONTENTS OF DeviceKind
    #[derive(Serialize, Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct DeviceKindFlag: u32 {
        const Disk = 1;
        const PartitionTable = 1 << 1;
        const Partition = 1 << 2;
        const Md = 1 << 3;
        const LvmVg = 1 << 4;
        const LvmPv = 1 << 5;
        const LvmLv = 1 << 6;
        const Luks = 1 << 7;
        const Bcache = 1 << 8;
        const BcacheCset = 1 << 9;
        const BlkFilesystem = 1 << 10;
        const Nfs = 1 << 11;
        const Tmpfs = 1 << 12;
        const MountPoint = 1 << 13;

        // Groups:
        const BlkDevice = Self::Disk.bits()
            | Self::Partition.bits()
            | Self::Md.bits()
            | Self::LvmLv.bits()
            | Self::Luks.bits()
            | Self::Bcache.bits();
        const Partitionable = Self::Disk.bits() | Self::Md.bits();
        const Filesystem = Self::BlkFilesystem.bits() | Self::Nfs.bits() | Self::Tmpfs.bits();
    }
}

impl DeviceKind {
    pub fn as_flag(self) -> DeviceKindFlag {
        match self {
            Self::Disk => DeviceKindFlag::Disk,
            Self::PartitionTable => DeviceKindFlag::PartitionTable,
            Self::Partition => DeviceKindFlag::Partition,
            Self::Md => DeviceKindFlag::Md,
            Self::LvmVg => DeviceKindFlag::LvmVg,
            Self::LvmPv => DeviceKindFlag::LvmPv,
            Self::LvmLv => DeviceKindFlag::LvmLv,
            Self::Luks => DeviceKindFlag::Luks,
            Self::Bcache => DeviceKindFlag::Bcache,
            Self::BcacheCset => DeviceKindFlag::BcacheCset,
            Self::BlkFilesystem => DeviceKindFlag::BlkFilesystem,
            Self::Nfs => DeviceKindFlag::Nfs,
            Self::Tmpfs => DeviceKindFlag::Tmpfs,
            Self::MountPoint => DeviceKindFlag::MountPoint,
        }
    }

    /// Whether devices of this kind have a device node that can hold a
    /// filesystem or be used by another device.
    pub fn is_blk_device(self) -> bool {
        DeviceKindFlag::BlkDevice.contains(self.as_flag())
    }

    pub fn is_partitionable(self) -> bool {
        DeviceKindFlag::Partitionable.contains(self.as_flag())
    }

    pub fn is_filesystem(self) -> bool {
        DeviceKindFlag::Filesystem.contains(self.as_flag())
    }

    /// Valid number of children of a device of this kind.
    pub fn valid_children(self) -> ValidCardinality {
        match self {
            Self::PartitionTable | Self::LvmVg | Self::BcacheCset => ValidCardinality::new_any(),
            Self::MountPoint => ValidCardinality::new_zero(),
            _ => ValidCardinality::new_at_most(1),
        }
    }

    /// Valid number of parents of a device of this kind.
    pub fn valid_parents(self) -> ValidCardinality {
        match self {
            Self::Disk | Self::Nfs | Self::Tmpfs => ValidCardinality::new_zero(),
            Self::Md | Self::LvmVg | Self::BlkFilesystem => ValidCardinality::new_any(),
            Self::Bcache => ValidCardinality::new_range(1, 2),
            Self::PartitionTable
            | Self::Partition
            | Self::LvmPv
            | Self::LvmLv
            | Self::Luks
            | Self::BcacheCset
            | Self::MountPoint => ValidCardinality::new_exact(1),
        }
    }
}

/// RAID level of an MD array.
#[derive(
    Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Display, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
pub enum MdLevel {
    #[default]
    #[strum(serialize = "unknown")]
    Unknown,
    #[strum(serialize = "RAID0")]
    Raid0,
    #[strum(serialize = "RAID1")]
    Raid1,
    #[strum(serialize = "RAID4")]
    Raid4,
    #[strum(serialize = "RAID5")]
    Raid5,
    #[strum(serialize = "RAID6")]
    Raid6,
    #[strum(serialize = "RAID10")]
    Raid10,
    #[strum(serialize = "CONTAINER")]
    Container,
}

impl MdLevel {
    /// Parses the level as printed by mdadm and `/proc/mdstat`, e.g. `raid5`.
    pub fn from_mdadm(level: &str) -> Self {
        match level.trim().to_ascii_lowercase().as_str() {
            "raid0" | "0" | "stripe" => MdLevel::Raid0,
            "raid1" | "1" | "mirror" => MdLevel::Raid1,
            "raid4" | "4" => MdLevel::Raid4,
            "raid5" | "5" => MdLevel::Raid5,
            "raid6" | "6" => MdLevel::Raid6,
            "raid10" | "10" => MdLevel::Raid10,
            "container" => MdLevel::Container,
            _ => MdLevel::Unknown,
        }
    }

    /// The level as accepted by `mdadm --level`.
    pub fn to_mdadm(self) -> String {
        self.to_string().to_lowercase()
    }

    /// Whether the level uses a chunked layout with parity or copies, and so
    /// gets a write-intent bitmap on creation.
    pub fn has_redundancy(self) -> bool {
        matches!(
            self,
            MdLevel::Raid1 | MdLevel::Raid4 | MdLevel::Raid5 | MdLevel::Raid6 | MdLevel::Raid10
        )
    }
}

/// Parity algorithm or layout of an MD array.
#[derive(
    Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Display, EnumIter,
)]
pub enum MdParity {
    #[default]
    #[serde(rename = "default")]
    #[strum(serialize = "default")]
    Default,
    #[serde(rename = "left-asymmetric")]
    #[strum(serialize = "left-asymmetric")]
    LeftAsymmetric,
    #[serde(rename = "left-symmetric")]
    #[strum(serialize = "left-symmetric")]
    LeftSymmetric,
    #[serde(rename = "right-asymmetric")]
    #[strum(serialize = "right-asymmetric")]
    RightAsymmetric,
    #[serde(rename = "right-symmetric")]
    #[strum(serialize = "right-symmetric")]
    RightSymmetric,
    #[serde(rename = "parity-first")]
    #[strum(serialize = "parity-first")]
    First,
    #[serde(rename = "parity-last")]
    #[strum(serialize = "parity-last")]
    Last,
    #[serde(rename = "left-asymmetric-6")]
    #[strum(serialize = "left-asymmetric-6")]
    LeftAsymmetric6,
    #[serde(rename = "left-symmetric-6")]
    #[strum(serialize = "left-symmetric-6")]
    LeftSymmetric6,
    #[serde(rename = "right-asymmetric-6")]
    #[strum(serialize = "right-asymmetric-6")]
    RightAsymmetric6,
    #[serde(rename = "right-symmetric-6")]
    #[strum(serialize = "right-symmetric-6")]
    RightSymmetric6,
    #[serde(rename = "parity-first-6")]
    #[strum(serialize = "parity-first-6")]
    First6,
    #[serde(rename = "n2")]
    #[strum(serialize = "n2")]
    Near2,
    #[serde(rename = "o2")]
    #[strum(serialize = "o2")]
    Offset2,
    #[serde(rename = "f2")]
    #[strum(serialize = "f2")]
    Far2,
    #[serde(rename = "n3")]
    #[strum(serialize = "n3")]
    Near3,
    #[serde(rename = "o3")]
    #[strum(serialize = "o3")]
    Offset3,
    #[serde(rename = "f3")]
    #[strum(serialize = "f3")]
    Far3,
}

impl MdParity {
    /// Parses the layout as printed by `mdadm --detail`, e.g. `left-symmetric`
    /// or `near=2`. Unknown layouts map to `Default`.
    pub fn from_mdadm(layout: &str) -> Self {
        use strum::IntoEnumIterator;

        let layout = layout.trim();
        if let Some((kind, copies)) = layout.split_once('=') {
            return match (kind, copies) {
                ("near", "2") => MdParity::Near2,
                ("offset", "2") => MdParity::Offset2,
                ("far", "2") => MdParity::Far2,
                ("near", "3") => MdParity::Near3,
                ("offset", "3") => MdParity::Offset3,
                ("far", "3") => MdParity::Far3,
                _ => MdParity::Default,
            };
        }
        MdParity::iter()
            .find(|parity| parity.to_string() == layout)
            .unwrap_or_default()
    }
}

/// Partition table type.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "lowercase")]
pub enum PtType {
    #[default]
    Gpt,
    Msdos,
    Dasd,
    ImplicitPt,
}

impl PtType {
    /// Parses the `PTTYPE` reported by lsblk and blkid.
    pub fn from_lsblk(pttype: &str) -> Option<Self> {
        match pttype {
            "gpt" => Some(PtType::Gpt),
            "dos" | "msdos" => Some(PtType::Msdos),
            "dasd" => Some(PtType::Dasd),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "lowercase")]
pub enum PartitionType {
    #[default]
    Primary,
    Extended,
    Logical,
}

/// How a mount point refers to its filesystem in fstab.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "lowercase")]
pub enum MountByType {
    #[default]
    Device,
    Uuid,
    Label,
    Id,
    Path,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Writethrough,
    Writeback,
    Writearound,
    None,
}

impl CacheMode {
    pub fn from_sysfs(mode: &str) -> Self {
        // sysfs marks the active mode with brackets: "[writethrough] writeback ..."
        let active = mode
            .split_whitespace()
            .find(|word| word.starts_with('['))
            .map(|word| word.trim_matches(|c| c == '[' || c == ']'))
            .unwrap_or(mode.trim());
        match active {
            "writeback" => CacheMode::Writeback,
            "writearound" => CacheMode::Writearound,
            "none" => CacheMode::None,
            _ => CacheMode::Writethrough,
        }
    }
}

/// I/O topology of a block device.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Topology {
    pub alignment_offset: i64,
    pub optimal_io_size: u64,
}

/// Size and usage of a mounted filesystem, in bytes.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SpaceInfo {
    pub size: u64,
    pub used: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    use strum::IntoEnumIterator;

    #[test]
    fn test_kind_groups() {
        let blk: Vec<_> = DeviceKind::iter().filter(|k| k.is_blk_device()).collect();
        assert_eq!(
            blk,
            vec![
                DeviceKind::Disk,
                DeviceKind::Partition,
                DeviceKind::Md,
                DeviceKind::LvmLv,
                DeviceKind::Luks,
                DeviceKind::Bcache
            ]
        );
        assert!(DeviceKind::Md.is_partitionable());
        assert!(!DeviceKind::Partition.is_partitionable());
        assert!(DeviceKind::Tmpfs.is_filesystem());
        assert_eq!(DeviceKind::BlkFilesystem.to_string(), "blk-filesystem");
    }

    #[test]
    fn test_md_level_names() {
        let names: Vec<_> = MdLevel::iter().map(|l| l.to_string()).collect();
        assert_eq!(
            names,
            ["unknown", "RAID0", "RAID1", "RAID4", "RAID5", "RAID6", "RAID10", "CONTAINER"]
        );
        assert_eq!(MdLevel::from_mdadm("raid10"), MdLevel::Raid10);
        assert_eq!(MdLevel::from_mdadm("linear"), MdLevel::Unknown);
        assert_eq!(MdLevel::Raid6.to_mdadm(), "raid6");
        assert!(!MdLevel::Raid0.has_redundancy());
    }

    #[test]
    fn test_md_parity_names() {
        assert_eq!(MdParity::from_mdadm("left-symmetric"), MdParity::LeftSymmetric);
        assert_eq!(MdParity::from_mdadm("near=2"), MdParity::Near2);
        assert_eq!(MdParity::from_mdadm("far=3"), MdParity::Far3);
        assert_eq!(MdParity::from_mdadm("parity-first-6"), MdParity::First6);
        assert_eq!(MdParity::from_mdadm("near=4"), MdParity::Default);
        assert_eq!(MdParity::from_mdadm("bogus"), MdParity::Default);

        // Persisted names match the mdadm option values
        assert_eq!(serde_yaml::to_string(&MdParity::Offset2).unwrap(), "o2\n");
    }

    #[test]
    fn test_cache_mode() {
        assert_eq!(
            CacheMode::from_sysfs("writethrough [writeback] writearound none"),
            CacheMode::Writeback
        );
        assert_eq!(CacheMode::from_sysfs("none"), CacheMode::None);
    }
}
