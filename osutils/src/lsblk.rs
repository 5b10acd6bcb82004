//! Block-topology listing from `lsblk`.

use anyhow::{Context, Error};
use log::warn;
use serde::{Deserialize, Deserializer};

use crate::dependencies::Dependency;

/// Columns requested from lsblk, matching the fields of [`BlockDevice`].
pub const LSBLK_COLUMNS: &str = "NAME,KNAME,TYPE,SIZE,START,LOG-SEC,PKNAME,RO,ROTA,TRAN,PTTYPE,PARTTYPE,PARTFLAGS";

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct LsBlkOutput {
    pub blockdevices: Vec<BlockDevice>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockDeviceType {
    Disk,
    Part,
    Crypt,
    Lvm,
    Md,
    Raid0,
    Raid1,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
    Loop,
    Rom,
    #[default]
    #[serde(other)]
    Other,
}

impl BlockDeviceType {
    /// Whether lsblk reports the device as an MD array.
    pub fn is_md(self) -> bool {
        matches!(
            self,
            Self::Md | Self::Raid0 | Self::Raid1 | Self::Raid4 | Self::Raid5 | Self::Raid6 | Self::Raid10
        )
    }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct BlockDevice {
    /// Device path, e.g. `/dev/sda1`.
    pub name: String,

    /// Kernel device path, e.g. `/dev/dm-0` for `/dev/mapper/cr_home`.
    #[serde(default)]
    pub kname: String,

    #[serde(rename = "type", default)]
    pub blkdev_type: BlockDeviceType,

    /// Size in bytes.
    #[serde(default, deserialize_with = "number_or_string")]
    pub size: u64,

    /// Start sector of a partition.
    #[serde(default, deserialize_with = "number_or_string")]
    pub start: u64,

    /// Logical sector size in bytes.
    #[serde(default, deserialize_with = "number_or_string")]
    pub log_sec: u64,

    #[serde(rename = "pkname", default)]
    pub parent_kernel_name: Option<String>,

    #[serde(default)]
    pub ro: bool,

    #[serde(rename = "rota", default)]
    pub rotational: bool,

    #[serde(rename = "tran", default)]
    pub transport: Option<String>,

    #[serde(default)]
    pub pttype: Option<String>,

    /// Partition type, a GUID on GPT and a hex byte such as `0x83` on MS-DOS.
    #[serde(default)]
    pub parttype: Option<String>,

    /// Partition flags, e.g. `0x80` for a bootable MS-DOS partition.
    #[serde(default)]
    pub partflags: Option<String>,
}

/// Older lsblk versions print numbers as strings even with `--bytes`.
fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Raw::Number(n)) => Ok(n),
        Some(Raw::Text(s)) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Lists all block devices as a flat list.
pub fn list() -> Result<Vec<BlockDevice>, Error> {
    let result = Dependency::Lsblk
        .cmd()
        .with_args(["--json", "--list", "--bytes", "--paths", "--output"])
        .with_arg(LSBLK_COLUMNS)
        .output_and_check()
        .context("Failed to execute lsblk")?;

    let parsed = parse(result.as_str());
    if parsed.is_err() {
        warn!("lsblk output: {}", result);
    }

    parsed
}

/// Parses `lsblk --json --list` output. Devices with several parents, such as
/// MD arrays, are listed once per parent; only the first entry is kept.
pub fn parse(output: &str) -> Result<Vec<BlockDevice>, Error> {
    let parsed: LsBlkOutput =
        serde_json::from_str(output).context("Failed to parse lsblk output")?;

    let mut devices: Vec<BlockDevice> = Vec::with_capacity(parsed.blockdevices.len());
    for device in parsed.blockdevices {
        if !devices.iter().any(|d| d.name == device.name) {
            devices.push(device);
        }
    }

    Ok(devices)
}
