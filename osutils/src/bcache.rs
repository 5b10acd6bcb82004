//! Bcache state from sysfs.

use std::{fs, path::Path};

use anyhow::{Context, Error};
use log::trace;

pub const SYS_BLOCK_DIR: &str = "/sys/block";
pub const SYS_FS_BCACHE_DIR: &str = "/sys/fs/bcache";

/// State of one bcache device, e.g. `bcache0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BcacheInfo {
    /// Raw content of `cache_mode`, with the active mode in brackets.
    pub cache_mode: String,

    /// UUID of the attached caching set, if any.
    pub cset_uuid: Option<String>,
}

/// A caching set below `/sys/fs/bcache`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSet {
    pub uuid: String,

    /// Device paths of the caching devices, e.g. `/dev/sdb`.
    pub cache_devices: Vec<String>,
}

/// Reads the state of the bcache device `short_name` below `sys_block_dir`.
pub fn read_info(sys_block_dir: impl AsRef<Path>, short_name: &str) -> Result<BcacheInfo, Error> {
    let dir = sys_block_dir.as_ref().join(short_name).join("bcache");
    let cache_mode = fs::read_to_string(dir.join("cache_mode"))
        .with_context(|| format!("Failed to read cache mode of '{short_name}'"))?
        .trim()
        .to_owned();

    // The cache link points to the directory of the caching set, named by
    // its UUID
    let cset_uuid = fs::read_link(dir.join("cache"))
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()));

    Ok(BcacheInfo {
        cache_mode,
        cset_uuid,
    })
}

/// Lists the caching sets below `sys_fs_bcache_dir`. A missing directory
/// means bcache is not loaded and there are no sets.
pub fn read_cache_sets(sys_fs_bcache_dir: impl AsRef<Path>) -> Result<Vec<CacheSet>, Error> {
    let dir = sys_fs_bcache_dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut sets = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read '{}'", dir.display()))? {
        let entry = entry.context("Failed to read directory entry")?;
        let uuid = entry.file_name().to_string_lossy().into_owned();
        if !entry.path().is_dir() || !uuid.contains('-') {
            continue;
        }

        let mut cache_devices = Vec::new();
        for link in fs::read_dir(entry.path())
            .with_context(|| format!("Failed to read caching set '{uuid}'"))?
        {
            let link = link.context("Failed to read directory entry")?;
            if !link.file_name().to_string_lossy().starts_with("cache") {
                continue;
            }
            // cacheN -> ../../../devices/.../block/sdb/bcache
            let Ok(target) = fs::read_link(link.path()) else {
                continue;
            };
            if let Some(device) = target.parent().and_then(Path::file_name) {
                cache_devices.push(format!("/dev/{}", device.to_string_lossy()));
            }
        }
        cache_devices.sort();

        trace!("Found caching set '{uuid}' on {cache_devices:?}");
        sets.push(CacheSet {
            uuid,
            cache_devices,
        });
    }

    sets.sort_by(|a, b| a.uuid.cmp(&b.uuid));
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::unix::fs::symlink;

    const CSET_UUID: &str = "6e5f2ba4-6b35-4f0c-a6b3-2c1c2b7d1a9e";

    #[test]
    fn test_read_info() {
        let sys = tempfile::tempdir().unwrap();
        let block = sys.path().join("block");
        let bcache_dir = block.join("bcache0/bcache");
        fs::create_dir_all(&bcache_dir).unwrap();
        fs::write(
            bcache_dir.join("cache_mode"),
            "writethrough [writeback] writearound none\n",
        )
        .unwrap();

        let info = read_info(&block, "bcache0").unwrap();
        assert_eq!(info.cache_mode, "writethrough [writeback] writearound none");
        assert_eq!(info.cset_uuid, None);

        symlink(
            format!("../../../../fs/bcache/{CSET_UUID}"),
            bcache_dir.join("cache"),
        )
        .unwrap();
        assert_eq!(
            read_info(&block, "bcache0").unwrap().cset_uuid.as_deref(),
            Some(CSET_UUID)
        );

        assert!(read_info(&block, "bcache1").is_err());
    }

    #[test]
    fn test_read_cache_sets() {
        let sys = tempfile::tempdir().unwrap();
        let fs_bcache = sys.path().join("fs/bcache");
        assert!(read_cache_sets(&fs_bcache).unwrap().is_empty());

        let set = fs_bcache.join(CSET_UUID);
        fs::create_dir_all(&set).unwrap();
        fs::write(fs_bcache.join("register"), "").unwrap();
        fs::write(set.join("cache_available_percent"), "100").unwrap();
        symlink(
            "../../../devices/pci0000:00/0000:00:1f.2/ata2/host1/block/sdb/bcache",
            set.join("cache0"),
        )
        .unwrap();

        assert_eq!(
            read_cache_sets(&fs_bcache).unwrap(),
            vec![CacheSet {
                uuid: CSET_UUID.into(),
                cache_devices: vec!["/dev/sdb".into()],
            }]
        );
    }
}
