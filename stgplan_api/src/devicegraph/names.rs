//! Name grammars of the device kinds.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{InvalidNameError, StorageError};

use super::device::DeviceData;

lazy_static! {
    /// `/dev/md0` and `/dev/md/0`.
    static ref MD_NUMERIC_NAME: Regex =
        Regex::new(r"^/dev/md/?([0-9]+)$").expect("Failed to compile MD numeric name regex");

    /// `/dev/md/<name>`, the format mdadm creates links in for named arrays.
    static ref MD_FORMAT1_NAME: Regex =
        Regex::new(r"^/dev/md/([^/ ]+)$").expect("Failed to compile MD name regex");

    /// `/dev/md_<name>`, the kernel name of arrays created with a name.
    static ref MD_FORMAT2_NAME: Regex =
        Regex::new(r"^/dev/md_([^/ ]+)$").expect("Failed to compile MD sysfs name regex");

    static ref BCACHE_NAME: Regex =
        Regex::new(r"^/dev/bcache([0-9]+)$").expect("Failed to compile bcache name regex");

    /// Names of LVM volume groups and logical volumes.
    static ref LVM_NAME: Regex =
        Regex::new(r"^[A-Za-z0-9+_.][A-Za-z0-9+_.-]*$").expect("Failed to compile LVM name regex");

    static ref PARTITION_NAME: Regex =
        Regex::new(r"^/dev/\S+[0-9]$").expect("Failed to compile partition name regex");
}

/// Whether `name` is a valid name for an MD array.
pub fn is_valid_md_name(name: &str) -> bool {
    MD_NUMERIC_NAME.is_match(name) || MD_FORMAT1_NAME.is_match(name)
}

/// Whether `name` is a valid kernel name for an MD array as found in sysfs,
/// with the `/dev/` prefix.
pub fn is_valid_md_sysfs_name(name: &str) -> bool {
    MD_NUMERIC_NAME.is_match(name) || MD_FORMAT2_NAME.is_match(name)
}

/// The number of a numeric MD name, e.g. 3 for `/dev/md3` or `/dev/md/3`.
pub fn md_number(name: &str) -> Option<u32> {
    MD_NUMERIC_NAME
        .captures(name)
        .and_then(|captures| captures[1].parse().ok())
}

/// The name without `/dev/md/`, or else without `/dev/`, e.g. `data` for
/// `/dev/md/data` and `md0` for `/dev/md0`.
pub fn md_short_name(name: &str) -> &str {
    name.strip_prefix("/dev/md/")
        .or_else(|| name.strip_prefix("/dev/"))
        .unwrap_or(name)
}

pub fn is_valid_lvm_name(name: &str) -> bool {
    LVM_NAME.is_match(name) && name != "." && name != ".." && !name.starts_with('-')
}

pub fn is_valid_bcache_name(name: &str) -> bool {
    BCACHE_NAME.is_match(name)
}

/// An NFS name is `server:path` and at least three characters long.
pub fn is_valid_nfs_name(name: &str) -> bool {
    name.len() >= 3 && !name.starts_with('/') && name.contains(':')
}

/// Splits an NFS name into server and path.
pub fn split_nfs_name(name: &str) -> Option<(&str, &str)> {
    if !is_valid_nfs_name(name) {
        return None;
    }
    name.split_once(':')
}

/// Canonical form of an NFS export path: no double slashes and no trailing
/// slash except for the root itself.
pub fn canonical_nfs_path(path: &str) -> String {
    let mut canonical = path.to_owned();
    while canonical.contains("//") {
        canonical = canonical.replace("//", "/");
    }
    if canonical.len() >= 2 && canonical.ends_with('/') {
        canonical.pop();
    }
    canonical
}

fn is_valid_blk_name(name: &str) -> bool {
    name.len() > "/dev/".len() && name.starts_with("/dev/") && !name.contains(char::is_whitespace)
}

fn invalid(kind: &DeviceData, name: &str) -> StorageError {
    StorageError::new(InvalidNameError::Device {
        kind: kind.kind().to_string(),
        name: name.to_owned(),
    })
}

/// Checks the name of the payload against the grammar of its kind.
pub fn validate(data: &DeviceData) -> Result<(), StorageError> {
    let (name, valid) = match data {
        DeviceData::Disk(disk) => (disk.name.as_str(), is_valid_blk_name(&disk.name)),
        DeviceData::Partition(partition) => (
            partition.name.as_str(),
            PARTITION_NAME.is_match(&partition.name),
        ),
        DeviceData::Md(md) => (md.name.as_str(), is_valid_md_name(&md.name)),
        DeviceData::LvmVg(vg) => (vg.vg_name.as_str(), is_valid_lvm_name(&vg.vg_name)),
        DeviceData::LvmLv(lv) => (
            lv.name.as_str(),
            is_valid_lvm_name(&lv.lv_name) && lv.name.ends_with(&format!("/{}", lv.lv_name)),
        ),
        DeviceData::Luks(luks) => (
            luks.name.as_str(),
            !luks.dm_table_name.is_empty()
                && luks.name == format!("/dev/mapper/{}", luks.dm_table_name),
        ),
        DeviceData::Bcache(bcache) => (bcache.name.as_str(), is_valid_bcache_name(&bcache.name)),
        DeviceData::Nfs(nfs) => {
            let name = format!("{}:{}", nfs.server, nfs.path);
            if !is_valid_nfs_name(&name) || nfs.server.is_empty() {
                return Err(invalid(data, &name));
            }
            return Ok(());
        }
        DeviceData::MountPoint(mp) => (
            mp.path.as_str(),
            mp.path.starts_with('/') || mp.path == "swap" || mp.path == "none",
        ),
        DeviceData::PartitionTable(_)
        | DeviceData::LvmPv(_)
        | DeviceData::BcacheCset(_)
        | DeviceData::BlkFilesystem(_)
        | DeviceData::Tmpfs(_) => return Ok(()),
    };

    if valid {
        Ok(())
    } else {
        Err(invalid(data, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        devicegraph::{
            device::{LvmLv, Md, Nfs},
            types::MdLevel,
        },
        error::ErrorKind,
        primitives::region::Region,
    };

    #[test]
    fn test_md_names() {
        assert!(is_valid_md_name("/dev/md0"));
        assert!(is_valid_md_name("/dev/md/0"));
        assert!(is_valid_md_name("/dev/md/test"));
        assert!(!is_valid_md_name("/dev/md/te st"));
        assert!(!is_valid_md_name("/dev/md/a/b"));
        assert!(!is_valid_md_name("/dev/sda"));
        assert!(!is_valid_md_name("/dev/mdx"));

        assert!(is_valid_md_sysfs_name("/dev/md127"));
        assert!(is_valid_md_sysfs_name("/dev/md_test"));
        assert!(!is_valid_md_sysfs_name("/dev/md/test"));

        assert_eq!(md_number("/dev/md12"), Some(12));
        assert_eq!(md_number("/dev/md/7"), Some(7));
        assert_eq!(md_number("/dev/md/test"), None);

        assert_eq!(md_short_name("/dev/md/test"), "test");
        assert_eq!(md_short_name("/dev/md0"), "md0");
    }

    #[test]
    fn test_nfs_names() {
        assert!(is_valid_nfs_name("a:b"));
        assert!(!is_valid_nfs_name("a:"));
        assert!(!is_valid_nfs_name("/server:path"));
        assert!(!is_valid_nfs_name("server/path"));

        assert_eq!(split_nfs_name("srv:/export/home"), Some(("srv", "/export/home")));
        assert_eq!(split_nfs_name("srv"), None);

        assert_eq!(canonical_nfs_path("/"), "/");
        assert_eq!(canonical_nfs_path("//export///home/"), "/export/home");
        assert_eq!(canonical_nfs_path("/home/"), "/home");
    }

    #[test]
    fn test_lvm_names() {
        assert!(is_valid_lvm_name("system"));
        assert!(is_valid_lvm_name("vg-01.data_x+y"));
        assert!(!is_valid_lvm_name("-vg"));
        assert!(!is_valid_lvm_name("."));
        assert!(!is_valid_lvm_name(".."));
        assert!(!is_valid_lvm_name("my vg"));
    }

    #[test]
    fn test_validate() {
        validate(&Md::new("/dev/md/data", MdLevel::Raid1).into()).unwrap();

        let error = validate(&Md::new("/dev/sda", MdLevel::Raid1).into()).unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::InvalidName(InvalidNameError::Device {
                kind: "md".into(),
                name: "/dev/sda".into()
            })
        );

        validate(
            &LvmLv {
                name: "/dev/system/root".into(),
                lv_name: "root".into(),
                uuid: String::new(),
                region: Region::default(),
            }
            .into(),
        )
        .unwrap();

        validate(
            &Nfs {
                server: "srv".into(),
                path: "/export".into(),
            }
            .into(),
        )
        .unwrap();
        validate(
            &Nfs {
                server: String::new(),
                path: "/export".into(),
            }
            .into(),
        )
        .unwrap_err();
    }
}
