use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Error};

use osutils::{
    bcache::{BcacheInfo, CacheSet},
    blkid::{Blkid, BlkidEntry},
    crypttab::Crypttab,
    df::DfSpace,
    dependencies::Dependency,
    findmnt::MountEntry,
    lsblk::BlockDevice,
    lvm,
    mdadm::{EtcMdadm, MdLinks, MdadmDetail, ProcMdstat},
    tabfile::TabFile,
};

use super::{SystemInfo, UdevLinks};

/// Canned system facts for tests. Keyed facts that are missing fail.
#[derive(Debug, Default)]
pub struct FakeSystemInfo {
    pub block_devices: Vec<BlockDevice>,
    pub udev_links: UdevLinks,
    pub proc_mdstat: ProcMdstat,
    pub mdadm_details: BTreeMap<String, MdadmDetail>,
    pub md_links: MdLinks,
    pub etc_mdadm: EtcMdadm,
    pub lvm_vgs: Vec<lvm::Vg>,
    pub lvm_pvs: Vec<lvm::Pv>,
    pub lvm_lvs: Vec<lvm::Lv>,
    pub blkid: Blkid,
    pub bcache_infos: BTreeMap<String, BcacheInfo>,
    pub bcache_cache_sets: Vec<CacheSet>,
    pub mounts: Vec<MountEntry>,
    pub swaps: Vec<String>,
    pub etc_fstab: TabFile,
    pub etc_crypttab: Crypttab,
    pub df: BTreeMap<String, DfSpace>,
    pub missing_commands: BTreeSet<&'static str>,
    /// Names of providers that fail.
    pub failing: BTreeSet<&'static str>,
}

impl FakeSystemInfo {
    pub fn with_block_device(mut self, device: BlockDevice) -> Self {
        self.block_devices.push(device);
        self
    }

    pub fn with_blkid(
        mut self,
        device: &str,
        fs_type: &str,
        uuid: &str,
        label: Option<&str>,
    ) -> Self {
        self.blkid.entries.insert(
            device.to_owned(),
            BlkidEntry {
                fs_type: Some(fs_type.to_owned()),
                uuid: Some(uuid.to_owned()),
                label: label.map(str::to_owned),
            },
        );
        self
    }

    pub fn with_mount(mut self, source: &str, target: &str, fstype: &str) -> Self {
        self.mounts.push(MountEntry {
            target: target.to_owned(),
            source: Some(source.to_owned()),
            fstype: fstype.to_owned(),
            options: vec!["rw".to_owned()],
        });
        self
    }

    fn check(&self, provider: &'static str) -> Result<(), Error> {
        if self.failing.contains(provider) {
            anyhow::bail!("{provider} failed");
        }
        Ok(())
    }
}

impl SystemInfo for FakeSystemInfo {
    fn block_devices(&self) -> Result<Vec<BlockDevice>, Error> {
        self.check("lsblk")?;
        Ok(self.block_devices.clone())
    }

    fn udev_links(&self) -> Result<UdevLinks, Error> {
        self.check("udev")?;
        Ok(self.udev_links.clone())
    }

    fn proc_mdstat(&self) -> Result<ProcMdstat, Error> {
        self.check("mdstat")?;
        Ok(self.proc_mdstat.clone())
    }

    fn mdadm_detail(&self, name: &str) -> Result<MdadmDetail, Error> {
        self.mdadm_details
            .get(name)
            .cloned()
            .with_context(|| format!("No mdadm detail for '{name}'"))
    }

    fn md_links(&self) -> Result<MdLinks, Error> {
        Ok(self.md_links.clone())
    }

    fn etc_mdadm(&self) -> Result<EtcMdadm, Error> {
        Ok(self.etc_mdadm.clone())
    }

    fn lvm_vgs(&self) -> Result<Vec<lvm::Vg>, Error> {
        self.check("vgs")?;
        Ok(self.lvm_vgs.clone())
    }

    fn lvm_pvs(&self) -> Result<Vec<lvm::Pv>, Error> {
        self.check("pvs")?;
        Ok(self.lvm_pvs.clone())
    }

    fn lvm_lvs(&self) -> Result<Vec<lvm::Lv>, Error> {
        self.check("lvs")?;
        Ok(self.lvm_lvs.clone())
    }

    fn blkid(&self) -> Result<Blkid, Error> {
        self.check("blkid")?;
        Ok(self.blkid.clone())
    }

    fn bcache_info(&self, short_name: &str) -> Result<BcacheInfo, Error> {
        self.bcache_infos
            .get(short_name)
            .cloned()
            .with_context(|| format!("No bcache info for '{short_name}'"))
    }

    fn bcache_cache_sets(&self) -> Result<Vec<CacheSet>, Error> {
        Ok(self.bcache_cache_sets.clone())
    }

    fn mounts(&self) -> Result<Vec<MountEntry>, Error> {
        self.check("findmnt")?;
        Ok(self.mounts.clone())
    }

    fn swaps(&self) -> Result<Vec<String>, Error> {
        Ok(self.swaps.clone())
    }

    fn etc_fstab(&self) -> Result<TabFile, Error> {
        Ok(self.etc_fstab.clone())
    }

    fn etc_crypttab(&self) -> Result<Crypttab, Error> {
        Ok(self.etc_crypttab.clone())
    }

    fn df(&self, path: &str) -> Result<DfSpace, Error> {
        self.df
            .get(path)
            .copied()
            .with_context(|| format!("No space information for '{path}'"))
    }

    fn has_command(&self, dependency: Dependency) -> bool {
        !self.missing_commands.contains(dependency.name())
    }
}
