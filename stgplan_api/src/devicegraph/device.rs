use serde::{Deserialize, Serialize};
use sysdefs::filesystems::RealFilesystemType;

use crate::{
    constants::{MD_METADATA_VERSION, PARTITION_ID_LINUX},
    primitives::region::Region,
};

use super::{
    sid::Sid,
    types::{
        CacheMode, DeviceKind, MdLevel, MdParity, MountByType, PartitionType, PtType, SpaceInfo,
        Topology,
    },
};

/// A vertex of the devicegraph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Device {
    sid: Sid,

    /// The device is present and usable, as opposed to merely configured.
    #[serde(default = "default_true")]
    pub active: bool,

    /// The device exists on the system, as opposed to only being planned.
    #[serde(default)]
    pub exists_in_system: bool,

    /// Alternative names of the device, e.g. `/dev/disk/by-id/...` links.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub udev_ids: Vec<String>,

    pub data: DeviceData,
}

fn default_true() -> bool {
    true
}

impl Device {
    pub(crate) fn new(sid: Sid, data: DeviceData) -> Self {
        Device {
            sid,
            active: true,
            exists_in_system: false,
            udev_ids: Vec::new(),
            data,
        }
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn kind(&self) -> DeviceKind {
        self.data.kind()
    }

    /// Kernel name of a block device, e.g. `/dev/sda1`.
    pub fn name(&self) -> Option<&str> {
        self.data.name()
    }

    /// Whether `name` is the kernel name or one of the udev names of this
    /// device.
    pub fn has_name(&self, name: &str) -> bool {
        self.name() == Some(name) || self.udev_ids.iter().any(|id| id == name)
    }

    pub fn region(&self) -> Option<&Region> {
        self.data.region()
    }

    /// Human readable identification used in logs and action texts.
    pub fn display_name(&self) -> String {
        match &self.data {
            DeviceData::PartitionTable(pt) => format!("{} partition table", pt.pt_type),
            DeviceData::LvmVg(vg) => format!("/dev/{}", vg.vg_name),
            DeviceData::LvmPv(_) => format!("physical volume {}", self.sid),
            DeviceData::BcacheCset(cset) => format!("caching set {}", cset.uuid),
            DeviceData::BlkFilesystem(fs) => {
                let fs_type: &str = fs.fs_type.into();
                format!("{fs_type} filesystem {}", self.sid)
            }
            DeviceData::Nfs(nfs) => format!("{}:{}", nfs.server, nfs.path),
            DeviceData::Tmpfs(_) => "tmpfs".to_owned(),
            DeviceData::MountPoint(mp) => mp.path.clone(),
            data => data.name().unwrap_or_default().to_owned(),
        }
    }

    /// Whether the two devices describe the same real-world object in the
    /// same configuration.
    pub fn equal(&self, other: &Device) -> bool {
        self.sid == other.sid && self.active == other.active && self.data.equal(&other.data)
    }
}

/// Kind-specific payload of a device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DeviceData {
    Disk(Disk),
    PartitionTable(PartitionTable),
    Partition(Partition),
    Md(Md),
    LvmVg(LvmVg),
    LvmPv(LvmPv),
    LvmLv(LvmLv),
    Luks(Luks),
    Bcache(Bcache),
    BcacheCset(BcacheCset),
    BlkFilesystem(BlkFilesystem),
    Nfs(Nfs),
    Tmpfs(Tmpfs),
    MountPoint(MountPoint),
}

impl DeviceData {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Disk(_) => DeviceKind::Disk,
            Self::PartitionTable(_) => DeviceKind::PartitionTable,
            Self::Partition(_) => DeviceKind::Partition,
            Self::Md(_) => DeviceKind::Md,
            Self::LvmVg(_) => DeviceKind::LvmVg,
            Self::LvmPv(_) => DeviceKind::LvmPv,
            Self::LvmLv(_) => DeviceKind::LvmLv,
            Self::Luks(_) => DeviceKind::Luks,
            Self::Bcache(_) => DeviceKind::Bcache,
            Self::BcacheCset(_) => DeviceKind::BcacheCset,
            Self::BlkFilesystem(_) => DeviceKind::BlkFilesystem,
            Self::Nfs(_) => DeviceKind::Nfs,
            Self::Tmpfs(_) => DeviceKind::Tmpfs,
            Self::MountPoint(_) => DeviceKind::MountPoint,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Disk(disk) => Some(&disk.name),
            Self::Partition(partition) => Some(&partition.name),
            Self::Md(md) => Some(&md.name),
            Self::LvmLv(lv) => Some(&lv.name),
            Self::Luks(luks) => Some(&luks.name),
            Self::Bcache(bcache) => Some(&bcache.name),
            _ => None,
        }
    }

    pub fn region(&self) -> Option<&Region> {
        match self {
            Self::Disk(disk) => Some(&disk.region),
            Self::Partition(partition) => Some(&partition.region),
            Self::Md(md) => Some(&md.region),
            Self::LvmVg(vg) => Some(&vg.region),
            Self::LvmLv(lv) => Some(&lv.region),
            Self::Luks(luks) => Some(&luks.region),
            Self::Bcache(bcache) => Some(&bcache.region),
            _ => None,
        }
    }

    pub fn region_mut(&mut self) -> Option<&mut Region> {
        match self {
            Self::Disk(disk) => Some(&mut disk.region),
            Self::Partition(partition) => Some(&mut partition.region),
            Self::Md(md) => Some(&mut md.region),
            Self::LvmVg(vg) => Some(&mut vg.region),
            Self::LvmLv(lv) => Some(&mut lv.region),
            Self::Luks(luks) => Some(&mut luks.region),
            Self::Bcache(bcache) => Some(&mut bcache.region),
            _ => None,
        }
    }

    /// Kind-specific content comparison. Attributes that merely report the
    /// state of the system, such as free space, are ignored.
    pub fn equal(&self, other: &DeviceData) -> bool {
        match (self, other) {
            (Self::Md(lhs), Self::Md(rhs)) => {
                lhs.name == rhs.name
                    && lhs.region == rhs.region
                    && lhs.level == rhs.level
                    && lhs.parity == rhs.parity
                    && lhs.chunk_size == rhs.chunk_size
                    && lhs.metadata == rhs.metadata
                    && lhs.uuid == rhs.uuid
                    && lhs.in_etc_mdadm == rhs.in_etc_mdadm
            }
            (Self::BlkFilesystem(lhs), Self::BlkFilesystem(rhs)) => {
                lhs.fs_type == rhs.fs_type && lhs.uuid == rhs.uuid && lhs.label == rhs.label
            }
            (lhs, rhs) => lhs == rhs,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Disk {
    pub name: String,
    pub region: Region,
    #[serde(default)]
    pub rotational: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionTable {
    pub pt_type: PtType,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Partition {
    pub name: String,
    pub region: Region,
    #[serde(default)]
    pub partition_type: PartitionType,
    #[serde(default = "default_partition_id")]
    pub id: u32,
    #[serde(default)]
    pub boot: bool,
}

fn default_partition_id() -> u32 {
    PARTITION_ID_LINUX
}

impl Partition {
    pub fn new(name: impl Into<String>, region: Region) -> Self {
        Partition {
            name: name.into(),
            region,
            partition_type: PartitionType::Primary,
            id: PARTITION_ID_LINUX,
            boot: false,
        }
    }

    /// Partition number, taken from the trailing digits of the name.
    pub fn number(&self) -> Option<u32> {
        let digits = self.name.len()
            - self
                .name
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_digit())
                .count();
        self.name[digits..].parse().ok()
    }
}

/// A software RAID array.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Md {
    pub name: String,
    #[serde(default)]
    pub region: Region,
    pub level: MdLevel,
    #[serde(default, skip_serializing_if = "is_default")]
    pub parity: MdParity,
    /// Chunk size in bytes, zero meaning the default of the level.
    #[serde(default, skip_serializing_if = "is_default")]
    pub chunk_size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default = "default_metadata")]
    pub metadata: String,
    #[serde(default, skip_serializing_if = "is_default")]
    pub in_etc_mdadm: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub topology: Topology,
}

fn default_metadata() -> String {
    MD_METADATA_VERSION.to_owned()
}

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

impl Md {
    pub fn new(name: impl Into<String>, level: MdLevel) -> Self {
        Md {
            name: name.into(),
            region: Region::default(),
            level,
            parity: MdParity::Default,
            chunk_size: 0,
            uuid: String::new(),
            metadata: default_metadata(),
            in_etc_mdadm: true,
            topology: Topology::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct LvmVg {
    pub vg_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    pub extent_size: u64,
    #[serde(default)]
    pub region: Region,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct LvmPv {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct LvmLv {
    pub name: String,
    pub lv_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    pub region: Region,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Luks {
    pub name: String,
    pub dm_table_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default)]
    pub region: Region,
    #[serde(default)]
    pub in_etc_crypttab: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Bcache {
    pub name: String,
    #[serde(default)]
    pub region: Region,
    #[serde(default)]
    pub cache_mode: CacheMode,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct BcacheCset {
    #[serde(default)]
    pub uuid: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct BlkFilesystem {
    pub fs_type: RealFilesystemType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_info: Option<SpaceInfo>,
}

impl BlkFilesystem {
    pub fn new(fs_type: RealFilesystemType) -> Self {
        BlkFilesystem {
            fs_type,
            uuid: String::new(),
            label: String::new(),
            space_info: None,
        }
    }
}

/// A filesystem mounted over NFS, identified by `server:path`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Nfs {
    pub server: String,
    pub path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Tmpfs {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct MountPoint {
    pub path: String,
    #[serde(default)]
    pub mount_by: MountByType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_options: Vec<String>,
    #[serde(default)]
    pub in_etc_fstab: bool,
}

impl MountPoint {
    pub fn new(path: impl Into<String>) -> Self {
        MountPoint {
            path: path.into(),
            mount_by: MountByType::Device,
            mount_options: Vec::new(),
            in_etc_fstab: true,
        }
    }
}

macro_rules! impl_from_payload {
    ($($kind:ident),* $(,)?) => {
        $(
            impl From<$kind> for DeviceData {
                fn from(data: $kind) -> Self {
                    DeviceData::$kind(data)
                }
            }
        )*
    };
}

impl_from_payload!(
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
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_number() {
        let partition = Partition::new("/dev/nvme0n1p12", Region::new(0, 1, 512));
        assert_eq!(partition.number(), Some(12));
        let partition = Partition::new("/dev/sdb", Region::new(0, 1, 512));
        assert_eq!(partition.number(), None);
    }

    #[test]
    fn test_md_equal_ignores_topology() {
        let mut lhs = Md::new("/dev/md0", MdLevel::Raid1);
        let mut rhs = lhs.clone();
        rhs.topology.optimal_io_size = 4096;
        assert!(DeviceData::from(lhs.clone()).equal(&DeviceData::from(rhs.clone())));

        lhs.in_etc_mdadm = false;
        assert!(!DeviceData::from(lhs).equal(&DeviceData::from(rhs)));
    }

    #[test]
    fn test_filesystem_equal_ignores_space_info() {
        let lhs = BlkFilesystem::new(RealFilesystemType::Ext4);
        let mut rhs = lhs.clone();
        rhs.space_info = Some(SpaceInfo {
            size: 1024,
            used: 512,
        });
        assert!(DeviceData::from(lhs.clone()).equal(&DeviceData::from(rhs.clone())));

        rhs.label = "data".into();
        assert!(!DeviceData::from(lhs).equal(&DeviceData::from(rhs)));
    }

    #[test]
    fn test_has_name() {
        let mut device = Device::new(
            Sid::allocate(),
            Disk {
                name: "/dev/sda".into(),
                ..Default::default()
            }
            .into(),
        );
        device
            .udev_ids
            .push("/dev/disk/by-id/ata-SAMSUNG_1234".into());

        assert!(device.has_name("/dev/sda"));
        assert!(device.has_name("/dev/disk/by-id/ata-SAMSUNG_1234"));
        assert!(!device.has_name("/dev/sdb"));
        assert_eq!(device.display_name(), "/dev/sda");
    }
}
