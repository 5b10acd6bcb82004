//! Signature probing with `blkid`.

use std::collections::BTreeMap;

use anyhow::{Context, Error};

use crate::dependencies::Dependency;

const TYPE_MD: &str = "linux_raid_member";
const TYPE_LVM: &str = "LVM2_member";
const TYPE_LUKS: &str = "crypto_LUKS";
const TYPE_BCACHE: &str = "bcache";

/// Signature information of a single device.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BlkidEntry {
    /// Signature type, e.g. `ext4` or `linux_raid_member`.
    pub fs_type: Option<String>,
    pub uuid: Option<String>,
    pub label: Option<String>,
}

/// Signatures of all devices, keyed by device path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Blkid {
    pub entries: BTreeMap<String, BlkidEntry>,
}

impl Blkid {
    /// Runs `blkid` on all devices, bypassing the blkid cache.
    pub fn run() -> Result<Self, Error> {
        let output = Dependency::Blkid
            .cmd()
            .with_args(["-c", "/dev/null", "-o", "export"])
            .output_and_check()
            .context("Failed to execute blkid")?;
        Ok(Self::parse(&output))
    }

    /// Parses `blkid -o export` output: blocks of `KEY=value` lines separated
    /// by empty lines, each block starting with `DEVNAME`.
    pub fn parse(output: &str) -> Self {
        let mut entries = BTreeMap::new();
        let mut name: Option<String> = None;
        let mut entry = BlkidEntry::default();

        for line in output.lines().map(str::trim) {
            if line.is_empty() {
                if let Some(name) = name.take() {
                    entries.insert(name, std::mem::take(&mut entry));
                }
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "DEVNAME" => name = Some(value.to_owned()),
                "TYPE" => entry.fs_type = Some(value.to_owned()),
                "UUID" => entry.uuid = Some(value.to_owned()),
                "LABEL" => entry.label = Some(value.to_owned()),
                _ => {}
            }
        }
        if let Some(name) = name {
            entries.insert(name, entry);
        }

        Blkid { entries }
    }

    pub fn get(&self, device: &str) -> Option<&BlkidEntry> {
        self.entries.get(device)
    }

    fn any_of_type(&self, fs_type: &str) -> bool {
        self.entries
            .values()
            .any(|entry| entry.fs_type.as_deref() == Some(fs_type))
    }

    pub fn any_md(&self) -> bool {
        self.any_of_type(TYPE_MD)
    }

    pub fn any_lvm(&self) -> bool {
        self.any_of_type(TYPE_LVM)
    }

    pub fn any_luks(&self) -> bool {
        self.any_of_type(TYPE_LUKS)
    }

    pub fn any_bcache(&self) -> bool {
        self.any_of_type(TYPE_BCACHE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let output = indoc::indoc!(
            r#"
            DEVNAME=/dev/sda1
            UUID=5c3a1e9e-26b9-4b37-b1b3-c0d1a8f0e2d4
            TYPE=ext4
            LABEL=root

            DEVNAME=/dev/sdb1
            UUID=4d5e7a6f-0000-1111-2222-333344445555
            UUID_SUB=91c7f3f0-aaaa-bbbb-cccc-ddddeeeeffff
            LABEL=any:0
            TYPE=linux_raid_member
            PARTUUID=0d2f9a3c-01

            DEVNAME=/dev/sdc
            PTUUID=1a2b3c4d
            PTTYPE=gpt
            "#
        );

        let blkid = Blkid::parse(output);
        assert_eq!(blkid.entries.len(), 3);
        assert_eq!(
            blkid.get("/dev/sda1"),
            Some(&BlkidEntry {
                fs_type: Some("ext4".into()),
                uuid: Some("5c3a1e9e-26b9-4b37-b1b3-c0d1a8f0e2d4".into()),
                label: Some("root".into()),
            })
        );
        assert_eq!(
            blkid.get("/dev/sdb1").unwrap().fs_type.as_deref(),
            Some("linux_raid_member")
        );
        assert_eq!(blkid.get("/dev/sdc"), Some(&BlkidEntry::default()));

        assert!(blkid.any_md());
        assert!(!blkid.any_lvm());
        assert!(!blkid.any_luks());
        assert!(!blkid.any_bcache());
    }

    #[test]
    fn test_parse_empty() {
        assert!(Blkid::parse("").entries.is_empty());
        assert!(Blkid::parse("\n\n").entries.is_empty());
    }
}
