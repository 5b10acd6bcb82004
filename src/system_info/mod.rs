//! System facts the prober reconstructs the devicegraph from.
//!
//! Every provider is a method of [`SystemInfo`]. [`LiveSystemInfo`] queries
//! the running system; [`CachedSystemInfo`] wraps any provider and runs each
//! query at most once, keyed by its argument where it has one.

use std::{
    cell::{OnceCell, RefCell},
    collections::BTreeMap,
    path::PathBuf,
};

use anyhow::{Context, Error};
use log::trace;

use osutils::{
    bcache::{self, BcacheInfo, CacheSet},
    blkid::Blkid,
    block_devices,
    crypttab::Crypttab,
    df::{self, DfSpace},
    dependencies::Dependency,
    findmnt::{self, MountEntry},
    lsblk::{self, BlockDevice},
    lvm,
    mdadm::{self, EtcMdadm, MdLinks, MdadmDetail, ProcMdstat},
    tabfile::TabFile,
};
use stgplan_api::constants::DEV_MD_DIR;

use crate::config::PlannerConfig;

#[cfg(test)]
pub mod fake;

/// Udev links keyed by the device they resolve to.
pub type UdevLinks = BTreeMap<PathBuf, Vec<String>>;

pub trait SystemInfo {
    fn block_devices(&self) -> Result<Vec<BlockDevice>, Error>;

    fn udev_links(&self) -> Result<UdevLinks, Error>;

    fn proc_mdstat(&self) -> Result<ProcMdstat, Error>;

    /// `mdadm --detail` of the array with kernel name `name`.
    fn mdadm_detail(&self, name: &str) -> Result<MdadmDetail, Error>;

    fn md_links(&self) -> Result<MdLinks, Error>;

    fn etc_mdadm(&self) -> Result<EtcMdadm, Error>;

    fn lvm_vgs(&self) -> Result<Vec<lvm::Vg>, Error>;

    fn lvm_pvs(&self) -> Result<Vec<lvm::Pv>, Error>;

    fn lvm_lvs(&self) -> Result<Vec<lvm::Lv>, Error>;

    fn blkid(&self) -> Result<Blkid, Error>;

    /// Sysfs state of the bcache device with kernel name `short_name`, e.g.
    /// `bcache0`.
    fn bcache_info(&self, short_name: &str) -> Result<BcacheInfo, Error>;

    fn bcache_cache_sets(&self) -> Result<Vec<CacheSet>, Error>;

    fn mounts(&self) -> Result<Vec<MountEntry>, Error>;

    /// Device paths of the active swap areas.
    fn swaps(&self) -> Result<Vec<String>, Error>;

    fn etc_fstab(&self) -> Result<TabFile, Error>;

    fn etc_crypttab(&self) -> Result<Crypttab, Error>;

    /// Size and usage of the filesystem mounted at `path`.
    fn df(&self, path: &str) -> Result<DfSpace, Error>;

    /// Whether the tool is installed.
    fn has_command(&self, dependency: Dependency) -> bool;
}

/// Queries the running system.
#[derive(Debug, Clone)]
pub struct LiveSystemInfo {
    etc_mdadm_path: PathBuf,
    etc_fstab_path: PathBuf,
    etc_crypttab_path: PathBuf,
}

impl LiveSystemInfo {
    pub fn new(config: &PlannerConfig) -> Self {
        LiveSystemInfo {
            etc_mdadm_path: config.etc_mdadm_path.clone(),
            etc_fstab_path: config.etc_fstab_path.clone(),
            etc_crypttab_path: config.etc_crypttab_path.clone(),
        }
    }
}

impl SystemInfo for LiveSystemInfo {
    fn block_devices(&self) -> Result<Vec<BlockDevice>, Error> {
        lsblk::list()
    }

    fn udev_links(&self) -> Result<UdevLinks, Error> {
        block_devices::udev_links(block_devices::DEV_DISK_DIR)
    }

    fn proc_mdstat(&self) -> Result<ProcMdstat, Error> {
        ProcMdstat::read()
    }

    fn mdadm_detail(&self, name: &str) -> Result<MdadmDetail, Error> {
        MdadmDetail::run(name)
    }

    fn md_links(&self) -> Result<MdLinks, Error> {
        mdadm::read_md_links(DEV_MD_DIR)
    }

    fn etc_mdadm(&self) -> Result<EtcMdadm, Error> {
        EtcMdadm::read(&self.etc_mdadm_path)
    }

    fn lvm_vgs(&self) -> Result<Vec<lvm::Vg>, Error> {
        lvm::vgs()
    }

    fn lvm_pvs(&self) -> Result<Vec<lvm::Pv>, Error> {
        lvm::pvs()
    }

    fn lvm_lvs(&self) -> Result<Vec<lvm::Lv>, Error> {
        lvm::lvs()
    }

    fn blkid(&self) -> Result<Blkid, Error> {
        Blkid::run()
    }

    fn bcache_info(&self, short_name: &str) -> Result<BcacheInfo, Error> {
        bcache::read_info(bcache::SYS_BLOCK_DIR, short_name)
    }

    fn bcache_cache_sets(&self) -> Result<Vec<CacheSet>, Error> {
        bcache::read_cache_sets(bcache::SYS_FS_BCACHE_DIR)
    }

    fn mounts(&self) -> Result<Vec<MountEntry>, Error> {
        findmnt::mounts()
    }

    fn swaps(&self) -> Result<Vec<String>, Error> {
        findmnt::swaps()
    }

    fn etc_fstab(&self) -> Result<TabFile, Error> {
        TabFile::read(&self.etc_fstab_path)
    }

    fn etc_crypttab(&self) -> Result<Crypttab, Error> {
        Crypttab::read(&self.etc_crypttab_path)
    }

    fn df(&self, path: &str) -> Result<DfSpace, Error> {
        df::space(path).with_context(|| format!("Failed to get space of '{path}'"))
    }

    fn has_command(&self, dependency: Dependency) -> bool {
        dependency.exists()
    }
}

/// Runs every query of the wrapped provider at most once. Failed queries are
/// not cached.
pub struct CachedSystemInfo<S: SystemInfo> {
    inner: S,
    block_devices: OnceCell<Vec<BlockDevice>>,
    udev_links: OnceCell<UdevLinks>,
    proc_mdstat: OnceCell<ProcMdstat>,
    mdadm_details: RefCell<BTreeMap<String, MdadmDetail>>,
    md_links: OnceCell<MdLinks>,
    etc_mdadm: OnceCell<EtcMdadm>,
    lvm_vgs: OnceCell<Vec<lvm::Vg>>,
    lvm_pvs: OnceCell<Vec<lvm::Pv>>,
    lvm_lvs: OnceCell<Vec<lvm::Lv>>,
    blkid: OnceCell<Blkid>,
    bcache_infos: RefCell<BTreeMap<String, BcacheInfo>>,
    bcache_cache_sets: OnceCell<Vec<CacheSet>>,
    mounts: OnceCell<Vec<MountEntry>>,
    swaps: OnceCell<Vec<String>>,
    etc_fstab: OnceCell<TabFile>,
    etc_crypttab: OnceCell<Crypttab>,
    dfs: RefCell<BTreeMap<String, DfSpace>>,
}

fn cached<T: Clone>(
    cell: &OnceCell<T>,
    what: &str,
    query: impl FnOnce() -> Result<T, Error>,
) -> Result<T, Error> {
    if let Some(value) = cell.get() {
        trace!("Using cached {what}");
        return Ok(value.clone());
    }
    let value = query()?;
    Ok(cell.get_or_init(|| value).clone())
}

fn cached_by_key<T: Clone>(
    cache: &RefCell<BTreeMap<String, T>>,
    key: &str,
    query: impl FnOnce() -> Result<T, Error>,
) -> Result<T, Error> {
    if let Some(value) = cache.borrow().get(key) {
        trace!("Using cached value for '{key}'");
        return Ok(value.clone());
    }
    let value = query()?;
    cache.borrow_mut().insert(key.to_owned(), value.clone());
    Ok(value)
}

impl<S: SystemInfo> CachedSystemInfo<S> {
    pub fn new(inner: S) -> Self {
        CachedSystemInfo {
            inner,
            block_devices: OnceCell::new(),
            udev_links: OnceCell::new(),
            proc_mdstat: OnceCell::new(),
            mdadm_details: RefCell::default(),
            md_links: OnceCell::new(),
            etc_mdadm: OnceCell::new(),
            lvm_vgs: OnceCell::new(),
            lvm_pvs: OnceCell::new(),
            lvm_lvs: OnceCell::new(),
            blkid: OnceCell::new(),
            bcache_infos: RefCell::default(),
            bcache_cache_sets: OnceCell::new(),
            mounts: OnceCell::new(),
            swaps: OnceCell::new(),
            etc_fstab: OnceCell::new(),
            etc_crypttab: OnceCell::new(),
            dfs: RefCell::default(),
        }
    }
}

impl<S: SystemInfo> SystemInfo for CachedSystemInfo<S> {
    fn block_devices(&self) -> Result<Vec<BlockDevice>, Error> {
        cached(&self.block_devices, "lsblk", || self.inner.block_devices())
    }

    fn udev_links(&self) -> Result<UdevLinks, Error> {
        cached(&self.udev_links, "udev links", || self.inner.udev_links())
    }

    fn proc_mdstat(&self) -> Result<ProcMdstat, Error> {
        cached(&self.proc_mdstat, "mdstat", || self.inner.proc_mdstat())
    }

    fn mdadm_detail(&self, name: &str) -> Result<MdadmDetail, Error> {
        cached_by_key(&self.mdadm_details, name, || self.inner.mdadm_detail(name))
    }

    fn md_links(&self) -> Result<MdLinks, Error> {
        cached(&self.md_links, "MD links", || self.inner.md_links())
    }

    fn etc_mdadm(&self) -> Result<EtcMdadm, Error> {
        cached(&self.etc_mdadm, "mdadm.conf", || self.inner.etc_mdadm())
    }

    fn lvm_vgs(&self) -> Result<Vec<lvm::Vg>, Error> {
        cached(&self.lvm_vgs, "vgs", || self.inner.lvm_vgs())
    }

    fn lvm_pvs(&self) -> Result<Vec<lvm::Pv>, Error> {
        cached(&self.lvm_pvs, "pvs", || self.inner.lvm_pvs())
    }

    fn lvm_lvs(&self) -> Result<Vec<lvm::Lv>, Error> {
        cached(&self.lvm_lvs, "lvs", || self.inner.lvm_lvs())
    }

    fn blkid(&self) -> Result<Blkid, Error> {
        cached(&self.blkid, "blkid", || self.inner.blkid())
    }

    fn bcache_info(&self, short_name: &str) -> Result<BcacheInfo, Error> {
        cached_by_key(&self.bcache_infos, short_name, || {
            self.inner.bcache_info(short_name)
        })
    }

    fn bcache_cache_sets(&self) -> Result<Vec<CacheSet>, Error> {
        cached(&self.bcache_cache_sets, "caching sets", || {
            self.inner.bcache_cache_sets()
        })
    }

    fn mounts(&self) -> Result<Vec<MountEntry>, Error> {
        cached(&self.mounts, "mount table", || self.inner.mounts())
    }

    fn swaps(&self) -> Result<Vec<String>, Error> {
        cached(&self.swaps, "swaps", || self.inner.swaps())
    }

    fn etc_fstab(&self) -> Result<TabFile, Error> {
        cached(&self.etc_fstab, "fstab", || self.inner.etc_fstab())
    }

    fn etc_crypttab(&self) -> Result<Crypttab, Error> {
        cached(&self.etc_crypttab, "crypttab", || self.inner.etc_crypttab())
    }

    fn df(&self, path: &str) -> Result<DfSpace, Error> {
        cached_by_key(&self.dfs, path, || self.inner.df(path))
    }

    fn has_command(&self, dependency: Dependency) -> bool {
        self.inner.has_command(dependency)
    }
}
