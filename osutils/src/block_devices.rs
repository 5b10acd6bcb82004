use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::trace;

/// Root of the udev symlink directories.
pub const DEV_DISK_DIR: &str = "/dev/disk";

/// Subdirectories of [`DEV_DISK_DIR`] whose links identify a device.
pub const UDEV_ID_DIRS: [&str; 2] = ["by-id", "by-path"];

/// Collects the udev links below `dev_disk_dir`, keyed by the path of the
/// device they resolve to. Links within a device are sorted.
pub fn udev_links(dev_disk_dir: impl AsRef<Path>) -> Result<BTreeMap<PathBuf, Vec<String>>, Error> {
    let mut links: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();

    for subdir in UDEV_ID_DIRS {
        let dir = dev_disk_dir.as_ref().join(subdir);
        if !dir.exists() {
            continue;
        }

        for entry in
            fs::read_dir(&dir).with_context(|| format!("Failed to read '{}'", dir.display()))?
        {
            let link = entry.context("Failed to read directory entry")?.path();
            let Ok(target) = link.canonicalize() else {
                trace!("Ignoring dangling udev link '{}'", link.display());
                continue;
            };
            links
                .entry(target)
                .or_default()
                .push(link.to_string_lossy().into_owned());
        }
    }

    for names in links.values_mut() {
        names.sort();
    }

    Ok(links)
}
