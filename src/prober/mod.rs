//! Reconstructs the devicegraph of the running system.
//!
//! The kinds of block devices can be stacked in any order (LUKS on LVM on MD
//! or the other way round), so no single pass can probe them in dependency
//! order. Probing therefore runs in strictly ordered passes:
//!
//! - Pass 1a: containers and block devices without their partitions (disks,
//!   MD arrays, LVM, LUKS, bcache), each from its own source of facts.
//! - Pass 1b: holders of the devices found in 1a. References to block devices
//!   that are not known yet are queued as pending holders.
//! - Pass 1c: partition tables and partitions of partitionables nothing else
//!   uses.
//! - Pass 1d: the pending holders are resolved. A name that still does not
//!   resolve is fatal.
//! - Pass 1f: attributes that need the complete membership, e.g. the order of
//!   MD members.
//! - Pass 2: filesystems on unused block devices, mount points, NFS and tmpfs.
//!
//! A failure to probe a single device is reported through [`ProbeCallbacks`]
//! and probing continues without it, unless the callback asks to abort.

use std::{collections::BTreeMap, fmt::Display, path::Path};

use log::{debug, error, trace, warn};

use osutils::{
    blkid::Blkid,
    dependencies::Dependency,
    findmnt::MountEntry,
    lsblk::{BlockDevice, BlockDeviceType},
    mdadm::MdadmDetail,
    tabfile::{TabFile, TabFileEntry},
};
use stgplan_api::{
    constants::{
        DEV_MAPPER_DIR, DEV_MD_DIR, PARTITION_ID_ESP, PARTITION_ID_LINUX, PARTITION_ID_LVM,
        PARTITION_ID_RAID, PARTITION_ID_SWAP,
    },
    devicegraph::{
        device::{
            Bcache, BcacheCset, BlkFilesystem, Disk, Luks, LvmLv, LvmPv, LvmVg, Md, MountPoint,
            Nfs, Partition, PartitionTable, Tmpfs,
        },
        holder::MdUser,
        names,
        types::{CacheMode, DeviceKindFlag, MountByType, PartitionType, PtType, SpaceInfo},
        DeviceData, DeviceKind, Holder,
    },
    error::{ProbeConsistencyError, ProbeError, StorageError},
    primitives::region::Region,
    Devicegraph, Sid,
};
use sysdefs::filesystems::{KernelFilesystemType, NodevFilesystemType};

use crate::system_info::SystemInfo;

pub mod callbacks;

pub use callbacks::{LoggingProbeCallbacks, ProbeCallbacks, ProbeCallbacksRecorder};

/// Block size assumed when lsblk does not report a logical sector size.
const DEFAULT_SECTOR_SIZE: u64 = 512;

/// GPT partition type GUIDs with an equivalent MS-DOS partition id.
const GPT_TYPE_IDS: [(&str, u32); 5] = [
    ("0fc63daf-8483-4772-8e79-3d69d8477de4", PARTITION_ID_LINUX),
    ("0657fd6d-a4ab-43c4-84e5-0933c84b4f4f", PARTITION_ID_SWAP),
    ("e6d6d379-f507-44c2-a23c-238f2a3df928", PARTITION_ID_LVM),
    ("a19d880f-05fc-4d3b-a006-743f0f84911e", PARTITION_ID_RAID),
    ("c12a7328-f81f-11d2-ba4b-00a0c93ec93b", PARTITION_ID_ESP),
];

/// MS-DOS partition ids of extended partitions.
const MSDOS_EXTENDED_IDS: [u32; 3] = [0x05, 0x0f, 0x85];

/// blkid types of devices used by MD, LVM, LUKS or bcache.
const MEMBER_SIGNATURES: [&str; 4] = ["linux_raid_member", "LVM2_member", "crypto_LUKS", "bcache"];

/// A holder whose source block device was not known when the holder was
/// probed. It is added once all block devices are known.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingHolder {
    /// Kernel, udev or device mapper name of the source block device.
    pub name: String,
    pub target: Sid,
    pub holder: Holder,
}

/// Source of a holder found in pass 1a.
#[derive(Debug)]
enum Source {
    Sid(Sid),
    Name(String),
}

/// Probes the system described by `system_info`.
#[tracing::instrument(skip_all)]
pub fn probe(
    system_info: &dyn SystemInfo,
    callbacks: &mut dyn ProbeCallbacks,
) -> Result<Devicegraph, StorageError> {
    callbacks.begin();
    let mut prober = Prober::new(system_info, callbacks);
    prober.run()?;
    prober.callbacks.end();
    debug!(
        "Probed {} devices and {} holders",
        prober.graph.num_devices(),
        prober.graph.num_holders()
    );
    Ok(prober.graph)
}

struct Prober<'a> {
    system_info: &'a dyn SystemInfo,
    callbacks: &'a mut dyn ProbeCallbacks,
    graph: Devicegraph,

    /// Block devices as listed by lsblk.
    block_devices: Vec<BlockDevice>,
    blkid: Blkid,

    /// Kernel names of the probed block devices, e.g. `/dev/dm-0`.
    knames: BTreeMap<Sid, String>,

    /// Holders found in pass 1a, added in pass 1b.
    links: Vec<(Source, Sid, Holder)>,
    pending_holders: Vec<PendingHolder>,
    md_details: BTreeMap<Sid, MdadmDetail>,
}

impl<'a> Prober<'a> {
    fn new(system_info: &'a dyn SystemInfo, callbacks: &'a mut dyn ProbeCallbacks) -> Self {
        Prober {
            system_info,
            callbacks,
            graph: Devicegraph::new(),
            block_devices: Vec::new(),
            blkid: Blkid::default(),
            knames: BTreeMap::new(),
            links: Vec::new(),
            pending_holders: Vec::new(),
            md_details: BTreeMap::new(),
        }
    }

    fn run(&mut self) -> Result<(), StorageError> {
        self.block_devices = self.fact("lsblk", self.system_info.block_devices())?;
        self.blkid = self.fact("blkid", self.system_info.blkid())?;

        self.pass_1a()?;
        self.pass_1b()?;
        self.pass_1c()?;
        self.pass_1d()?;
        self.pass_1f()?;
        self.pass_2()?;
        Ok(())
    }

    /// Reports a failure through the callbacks. Fails if the callback asks to
    /// abort.
    fn report(&mut self, message: &str, what: impl Display) -> Result<(), StorageError> {
        if self.callbacks.error(message, &what.to_string()) {
            Ok(())
        } else {
            Err(StorageError::new(ProbeError::Aborted))
        }
    }

    /// A system fact, or its default if it could not be read and the
    /// callbacks allow continuing without it.
    fn fact<T: Default>(
        &mut self,
        provider: &str,
        result: Result<T, anyhow::Error>,
    ) -> Result<T, StorageError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.report(
                    &format!("Failed to read system facts from {provider}"),
                    format!("{e:#}"),
                )?;
                Ok(T::default())
            }
        }
    }

    /// Whether the tool is installed. A missing tool is reported with the
    /// device kinds that cannot be probed without it.
    fn require(
        &mut self,
        dependency: Dependency,
        what: &str,
        features: DeviceKindFlag,
    ) -> Result<bool, StorageError> {
        if self.system_info.has_command(dependency) {
            return Ok(true);
        }
        let proceed = self.callbacks.missing_command(
            &format!("Cannot probe {what}"),
            what,
            dependency.name(),
            u64::from(features.bits()),
        );
        if proceed {
            Ok(false)
        } else {
            Err(StorageError::new(ProbeError::Aborted))
        }
    }

    /// Adds a device found on the system.
    fn add_device(
        &mut self,
        data: impl Into<DeviceData>,
        kname: Option<&str>,
        active: bool,
    ) -> Result<Sid, StorageError> {
        let sid = self.graph.create_device(data)?;
        let device = self.graph.find_by_sid_mut(sid)?;
        device.exists_in_system = true;
        device.active = active;
        if let Some(kname) = kname {
            self.knames.insert(sid, kname.to_owned());
        }
        Ok(sid)
    }

    fn lsblk_entry(&self, kname: &str) -> Option<&BlockDevice> {
        self.block_devices
            .iter()
            .find(|entry| entry.kname == kname || entry.name == kname)
    }

    /// Block device with the given kernel, device or udev name.
    fn find_blk(&self, name: &str) -> Option<Sid> {
        self.graph
            .find_by_any_name(name)
            .map(|device| device.sid())
            .or_else(|| {
                self.knames
                    .iter()
                    .find(|(_, kname)| *kname == name)
                    .map(|(sid, _)| *sid)
            })
    }

    /// Names blkid and the mount table may use for the block device `sid`.
    fn blk_names(&self, sid: Sid) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(device) = self.graph.find_by_sid(sid) {
            names.extend(device.name().map(str::to_owned));
            names.extend(device.udev_ids.iter().cloned());
        }
        names.extend(self.knames.get(&sid).cloned());
        names
    }

    #[tracing::instrument(skip_all)]
    fn pass_1a(&mut self) -> Result<(), StorageError> {
        debug!("Probe pass 1a");
        self.probe_disks()?;
        if self.blkid.any_md() && self.require(Dependency::Mdadm, "MD RAIDs", DeviceKindFlag::Md)? {
            self.probe_mds()?;
        }
        if self.blkid.any_lvm()
            && self.require(
                Dependency::Vgs,
                "LVM",
                DeviceKindFlag::LvmVg | DeviceKindFlag::LvmPv | DeviceKindFlag::LvmLv,
            )?
        {
            self.probe_lvm()?;
        }
        if self.blkid.any_luks() {
            self.probe_lukses()?;
        }
        if self.blkid.any_bcache() {
            self.probe_bcaches()?;
        }
        self.add_udev_ids()
    }

    fn probe_disks(&mut self) -> Result<(), StorageError> {
        let disks: Vec<BlockDevice> = self
            .block_devices
            .iter()
            .filter(|entry| entry.blkdev_type == BlockDeviceType::Disk)
            // bcache devices are listed as disks
            .filter(|entry| !names::is_valid_bcache_name(&entry.name))
            .cloned()
            .collect();

        for entry in disks {
            let disk = Disk {
                name: entry.name.clone(),
                region: lsblk_region(&entry, 0),
                rotational: entry.rotational,
                transport: entry.transport.clone(),
            };
            trace!("Found disk {}", entry.name);
            if let Err(e) = self.add_device(disk, Some(&entry.kname), true) {
                self.report("Failed to probe disk", format!("{}: {e}", entry.name))?;
            }
        }
        Ok(())
    }

    fn probe_mds(&mut self) -> Result<(), StorageError> {
        let mdstat = self.fact("/proc/mdstat", self.system_info.proc_mdstat())?;
        let md_links = self.fact("/dev/md", self.system_info.md_links())?;
        let etc_mdadm = self.fact("mdadm.conf", self.system_info.etc_mdadm())?;

        for (short_name, entry) in mdstat.entries {
            if entry.is_container || entry.has_container {
                warn!("Skipping MD RAID {short_name} with external metadata");
                continue;
            }

            let kname = format!("/dev/{short_name}");
            let detail = match self.system_info.mdadm_detail(&kname) {
                Ok(detail) => detail,
                Err(e) => {
                    self.report("Failed to probe MD RAID", format!("{kname}: {e:#}"))?;
                    continue;
                }
            };

            // Links in /dev/md only name the array if mdadm agrees
            let name = match detail.devname.as_ref().filter(|devname| {
                md_links
                    .get(&short_name)
                    .is_some_and(|links| links.contains(devname))
            }) {
                Some(devname) => format!("{DEV_MD_DIR}/{devname}"),
                None => kname.clone(),
            };
            let region = self
                .lsblk_entry(&kname)
                .map(|lsblk| lsblk_region(lsblk, 0))
                .unwrap_or_else(|| Region::new(0, 0, DEFAULT_SECTOR_SIZE as u32));
            let md = Md {
                region,
                parity: entry.parity,
                chunk_size: entry.chunk_size,
                uuid: detail.uuid.clone(),
                metadata: detail.metadata.clone(),
                in_etc_mdadm: etc_mdadm.has_entry(&detail.uuid),
                ..Md::new(name.clone(), detail.level)
            };

            let sid = match self.add_device(md, Some(&kname), !entry.inactive) {
                Ok(sid) => sid,
                Err(e) => {
                    self.report("Failed to probe MD RAID", format!("{name}: {e}"))?;
                    continue;
                }
            };
            trace!("Found MD RAID {name} with {} members", entry.devices.len());
            for member in entry.devices {
                self.links.push((
                    Source::Name(member.name),
                    sid,
                    Holder::MdUser(MdUser {
                        spare: member.spare,
                        faulty: member.faulty,
                        sort_key: 0,
                    }),
                ));
            }
            self.md_details.insert(sid, detail);
        }
        Ok(())
    }

    fn probe_lvm(&mut self) -> Result<(), StorageError> {
        let vgs = self.fact("vgs", self.system_info.lvm_vgs())?;
        let pvs = self.fact("pvs", self.system_info.lvm_pvs())?;
        let lvs = self.fact("lvs", self.system_info.lvm_lvs())?;

        let mut vg_sids = BTreeMap::new();
        for vg in vgs {
            let extent_size = vg.vg_extent_size;
            let Ok(block_size) = u32::try_from(extent_size) else {
                self.report(
                    "Failed to probe volume group",
                    format!("{}: Extent size {extent_size} is too large", vg.vg_name),
                )?;
                continue;
            };
            let lvm_vg = LvmVg {
                vg_name: vg.vg_name.clone(),
                uuid: vg.vg_uuid.clone(),
                extent_size,
                region: Region::new(0, vg.vg_extent_count, block_size),
            };
            match self.add_device(lvm_vg, None, true) {
                Ok(sid) => {
                    vg_sids.insert(vg.vg_name, sid);
                }
                Err(e) => self.report("Failed to probe volume group", format!("{}: {e}", vg.vg_name))?,
            }
        }

        for pv in pvs {
            let Some(vg) = vg_sids.get(&pv.vg_name).copied() else {
                trace!("Skipping physical volume {} without volume group", pv.pv_name);
                continue;
            };
            let sid = self.add_device(LvmPv { uuid: pv.pv_uuid }, None, true)?;
            self.links.push((Source::Sid(sid), vg, Holder::User));
            self.links.push((Source::Name(pv.pv_name), sid, Holder::User));
        }

        for lv in lvs {
            let Some(vg) = vg_sids.get(&lv.vg_name).copied() else {
                warn!("Volume group {} of {} not found", lv.vg_name, lv.lv_name);
                continue;
            };
            let mapper_name = format!(
                "{DEV_MAPPER_DIR}/{}-{}",
                lv.vg_name.replace('-', "--"),
                lv.lv_name.replace('-', "--")
            );
            let kname = self.lsblk_entry(&mapper_name).map(|entry| entry.kname.clone());
            let lvm_lv = LvmLv {
                name: format!("/dev/{}/{}", lv.vg_name, lv.lv_name),
                lv_name: lv.lv_name.clone(),
                uuid: lv.lv_uuid.clone(),
                region: Region::new(0, lv.lv_size / DEFAULT_SECTOR_SIZE, DEFAULT_SECTOR_SIZE as u32),
            };
            match self.add_device(lvm_lv, kname.as_deref(), lv.is_active()) {
                Ok(sid) => {
                    self.graph.find_by_sid_mut(sid)?.udev_ids.push(mapper_name);
                    self.links.push((Source::Sid(vg), sid, Holder::Subdevice));
                }
                Err(e) => self.report(
                    "Failed to probe logical volume",
                    format!("{}/{}: {e}", lv.vg_name, lv.lv_name),
                )?,
            }
        }
        Ok(())
    }

    fn probe_lukses(&mut self) -> Result<(), StorageError> {
        let crypttab = self.fact("crypttab", self.system_info.etc_crypttab())?;
        let entries: Vec<BlockDevice> = self
            .block_devices
            .iter()
            .filter(|entry| entry.blkdev_type == BlockDeviceType::Crypt)
            .cloned()
            .collect();

        for entry in entries {
            let Some(dm_table_name) = entry
                .name
                .strip_prefix(DEV_MAPPER_DIR)
                .map(|name| name.trim_start_matches('/').to_owned())
            else {
                warn!("Skipping encrypted device {} outside of {DEV_MAPPER_DIR}", entry.name);
                continue;
            };
            let Some(backing) = entry.parent_kernel_name.clone() else {
                self.report("Failed to probe encryption layer", format!("{}: no backing device", entry.name))?;
                continue;
            };
            let uuid = self
                .blkid
                .get(&backing)
                .and_then(|blkid| blkid.uuid.clone())
                .unwrap_or_default();
            let luks = Luks {
                name: entry.name.clone(),
                in_etc_crypttab: crypttab.has_entry(&dm_table_name),
                dm_table_name,
                uuid,
                region: lsblk_region(&entry, 0),
            };
            match self.add_device(luks, Some(&entry.kname), true) {
                Ok(sid) => self.links.push((Source::Name(backing), sid, Holder::User)),
                Err(e) => {
                    self.report("Failed to probe encryption layer", format!("{}: {e}", entry.name))?
                }
            }
        }
        Ok(())
    }

    fn probe_bcaches(&mut self) -> Result<(), StorageError> {
        let mut csets = BTreeMap::new();
        for cache_set in self.fact("/sys/fs/bcache", self.system_info.bcache_cache_sets())? {
            let sid = self.add_device(
                BcacheCset {
                    uuid: cache_set.uuid.clone(),
                },
                None,
                true,
            )?;
            for cache_device in cache_set.cache_devices {
                self.links.push((Source::Name(cache_device), sid, Holder::User));
            }
            csets.insert(cache_set.uuid, sid);
        }

        let entries: Vec<BlockDevice> = self
            .block_devices
            .iter()
            .filter(|entry| names::is_valid_bcache_name(&entry.name))
            .cloned()
            .collect();
        for entry in entries {
            let short_name = entry.name.trim_start_matches("/dev/");
            let info = match self.system_info.bcache_info(short_name) {
                Ok(info) => info,
                Err(e) => {
                    self.report("Failed to probe bcache", format!("{}: {e:#}", entry.name))?;
                    continue;
                }
            };
            let bcache = Bcache {
                name: entry.name.clone(),
                region: lsblk_region(&entry, 0),
                cache_mode: CacheMode::from_sysfs(&info.cache_mode),
            };
            let sid = self.add_device(bcache, Some(&entry.kname), true)?;
            if let Some(backing) = entry.parent_kernel_name.clone() {
                self.links.push((Source::Name(backing), sid, Holder::BcacheUser));
            }
            if let Some(cset) = info.cset_uuid.as_ref().and_then(|uuid| csets.get(uuid)) {
                self.links.push((Source::Sid(*cset), sid, Holder::BcacheUser));
            }
        }
        Ok(())
    }

    /// Udev links of the probed block devices.
    fn add_udev_ids(&mut self) -> Result<(), StorageError> {
        let links = self.fact("/dev/disk", self.system_info.udev_links())?;
        for (sid, kname) in &self.knames {
            if let Some(ids) = links.get(Path::new(kname)) {
                self.graph
                    .find_by_sid_mut(*sid)?
                    .udev_ids
                    .extend(ids.iter().cloned());
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn pass_1b(&mut self) -> Result<(), StorageError> {
        debug!("Probe pass 1b");
        for (source, target, holder) in std::mem::take(&mut self.links) {
            match source {
                Source::Sid(source) => self.graph.add_holder(source, target, holder)?,
                Source::Name(name) => self.add_holder(name, target, holder)?,
            }
        }
        Ok(())
    }

    /// Adds a holder from the block device `name`, or queues it if the
    /// device is not known yet.
    fn add_holder(&mut self, name: String, target: Sid, holder: Holder) -> Result<(), StorageError> {
        match self.find_blk(&name) {
            Some(source) => self.graph.add_holder(source, target, holder),
            None => {
                trace!("Queueing holder from '{name}' to {target}");
                self.pending_holders.push(PendingHolder {
                    name,
                    target,
                    holder,
                });
                Ok(())
            }
        }
    }

    #[tracing::instrument(skip_all)]
    fn pass_1c(&mut self) -> Result<(), StorageError> {
        debug!("Probe pass 1c");
        let partitionables: Vec<Sid> = self
            .graph
            .devices()
            .filter(|device| device.kind().is_partitionable())
            .map(|device| device.sid())
            .collect();

        for sid in partitionables {
            // Used by something else than a partition table
            if !self.graph.children(sid)?.is_empty() {
                continue;
            }
            if let Err(e) = self.probe_partitions(sid) {
                let name = self.graph.find_by_sid(sid)?.display_name();
                self.report("Failed to probe partitions", format!("{name}: {e}"))?;
            }
        }
        Ok(())
    }

    fn probe_partitions(&mut self, sid: Sid) -> Result<(), StorageError> {
        let Some(kname) = self.knames.get(&sid).cloned() else {
            return Ok(());
        };
        let Some(entry) = self.lsblk_entry(&kname) else {
            return Ok(());
        };
        let Some(pttype) = entry.pttype.clone() else {
            return Ok(());
        };
        let Some(pt_type) = PtType::from_lsblk(&pttype) else {
            warn!("Unsupported partition table '{pttype}' on {kname}");
            return Ok(());
        };

        let partitions: Vec<BlockDevice> = self
            .block_devices
            .iter()
            .filter(|part| {
                part.blkdev_type == BlockDeviceType::Part
                    && part.parent_kernel_name.as_deref() == Some(kname.as_str())
            })
            .cloned()
            .collect();

        let pt = self.add_device(PartitionTable { pt_type }, None, true)?;
        self.graph.add_holder(sid, pt, Holder::Subdevice)?;
        trace!("Found {pt_type} partition table on {kname} with {} partitions", partitions.len());

        for part in partitions {
            let id = partition_id(pt_type, part.parttype.as_deref());
            let partition = Partition {
                partition_type: partition_type(pt_type, &part.name, id),
                id,
                boot: part.partflags.as_deref() == Some("0x80"),
                ..Partition::new(part.name.clone(), lsblk_region(&part, part.start))
            };
            let partition = self.add_device(partition, Some(&part.kname), true)?;
            self.graph.add_holder(pt, partition, Holder::Subdevice)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn pass_1d(&mut self) -> Result<(), StorageError> {
        debug!("Probe pass 1d, {} pending holders", self.pending_holders.len());
        for pending in std::mem::take(&mut self.pending_holders) {
            let Some(source) = self.find_blk(&pending.name) else {
                error!(
                    "Failed to find '{}' for device {}",
                    pending.name,
                    pending.target
                );
                return Err(StorageError::new(ProbeConsistencyError::UnresolvedHolder {
                    name: pending.name,
                    target_sid: pending.target.as_u32(),
                }));
            };
            self.graph.add_holder(source, pending.target, pending.holder)?;
        }
        Ok(())
    }

    /// Order of the MD members from the roles mdadm reports. Spares keep
    /// sort key 0.
    #[tracing::instrument(skip_all)]
    fn pass_1f(&mut self) -> Result<(), StorageError> {
        debug!("Probe pass 1f");
        for (md, detail) in std::mem::take(&mut self.md_details) {
            for (member, _) in self.graph.md_members(md)? {
                let role = self
                    .blk_names(member)
                    .iter()
                    .find_map(|name| detail.roles.get(name))
                    .and_then(|role| role.parse::<u32>().ok());
                let Some(role) = role else {
                    continue;
                };
                if let Some(user) = self
                    .graph
                    .holder_mut(member, md)
                    .and_then(Holder::as_md_user_mut)
                {
                    user.sort_key = role + 1;
                }
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn pass_2(&mut self) -> Result<(), StorageError> {
        debug!("Probe pass 2");
        self.probe_filesystems()?;

        let mounts = self.fact("findmnt", self.system_info.mounts())?;
        let swaps = self.fact("/proc/swaps", self.system_info.swaps())?;
        let fstab = self.fact("fstab", self.system_info.etc_fstab())?;

        self.probe_mount_points(&mounts, &swaps, &fstab)?;
        self.probe_nfses(&mounts, &fstab)?;
        self.probe_tmpfses(&mounts, &fstab)
    }

    fn probe_filesystems(&mut self) -> Result<(), StorageError> {
        for sid in self.graph.leaf_blk_devices() {
            let entry = self
                .blk_names(sid)
                .iter()
                .find_map(|name| self.blkid.get(name))
                .cloned();
            let Some(fs_type) = entry.as_ref().and_then(|entry| entry.fs_type.clone()) else {
                continue;
            };
            if MEMBER_SIGNATURES.contains(&fs_type.as_str()) {
                continue;
            }

            let fs_type = match KernelFilesystemType::from(fs_type.as_str()) {
                KernelFilesystemType::Real(fs_type) if fs_type.is_supported() => fs_type,
                _ => {
                    let name = self.graph.find_by_sid(sid)?.display_name();
                    warn!("Detected unsupported filesystem '{fs_type}' on {name}");
                    continue;
                }
            };
            let fs = BlkFilesystem {
                uuid: entry.as_ref().and_then(|e| e.uuid.clone()).unwrap_or_default(),
                label: entry.as_ref().and_then(|e| e.label.clone()).unwrap_or_default(),
                ..BlkFilesystem::new(fs_type)
            };
            let fs = self.add_device(fs, None, true)?;
            self.graph.add_holder(sid, fs, Holder::filesystem_user())?;
        }
        Ok(())
    }

    /// Filesystem on the block device `name`.
    fn filesystem_on(&self, name: &str) -> Option<Sid> {
        let blk = self.find_blk(name)?;
        self.graph.children(blk).ok()?.into_iter().find(|child| {
            self.graph
                .find_by_sid(*child)
                .is_ok_and(|device| device.kind() == DeviceKind::BlkFilesystem)
        })
    }

    /// Filesystem an fstab entry refers to.
    fn filesystem_by_spec(&self, spec: &str) -> Option<Sid> {
        let by_attribute = |predicate: &dyn Fn(&BlkFilesystem) -> bool| {
            self.graph
                .devices()
                .find(|device| {
                    matches!(&device.data, DeviceData::BlkFilesystem(fs) if predicate(fs))
                })
                .map(|device| device.sid())
        };
        if let Some(uuid) = spec.strip_prefix("UUID=") {
            by_attribute(&|fs| fs.uuid == uuid)
        } else if let Some(label) = spec.strip_prefix("LABEL=") {
            by_attribute(&|fs| fs.label == label)
        } else {
            self.filesystem_on(spec)
        }
    }

    /// Adds a mount point below the filesystem `fs` unless it already has
    /// one.
    fn add_mount_point(
        &mut self,
        fs: Sid,
        path: &str,
        fstab_entry: Option<&TabFileEntry>,
        active: bool,
    ) -> Result<Option<Sid>, StorageError> {
        if !self.graph.children(fs)?.is_empty() {
            debug!("Ignoring additional mount point {path} of device {fs}");
            return Ok(None);
        }
        let mount_point = MountPoint {
            path: path.to_owned(),
            mount_by: fstab_entry.map_or(MountByType::Device, |entry| mount_by(&entry.spec)),
            mount_options: fstab_entry.map(|entry| entry.options.clone()).unwrap_or_default(),
            in_etc_fstab: fstab_entry.is_some(),
        };
        let sid = self.add_device(mount_point, None, active)?;
        self.graph.add_holder(fs, sid, Holder::MountUser)?;
        Ok(Some(sid))
    }

    fn probe_mount_points(
        &mut self,
        mounts: &[MountEntry],
        swaps: &[String],
        fstab: &TabFile,
    ) -> Result<(), StorageError> {
        for mount in mounts {
            let Some(fs) = mount.source.as_deref().and_then(|source| self.filesystem_on(source))
            else {
                continue;
            };
            let fstab_entry = fstab.find_by_mount_point(&mount.target);
            if self.add_mount_point(fs, &mount.target, fstab_entry, true)?.is_none() {
                continue;
            }

            match self.system_info.df(&mount.target) {
                Ok(space) => {
                    if let DeviceData::BlkFilesystem(payload) = &mut self.graph.find_by_sid_mut(fs)?.data {
                        payload.space_info = Some(SpaceInfo {
                            size: space.size,
                            used: space.used,
                        });
                    }
                }
                Err(e) => debug!("No space information for {}: {e:#}", mount.target),
            }
        }

        for swap in swaps {
            if let Some(fs) = self.filesystem_on(swap) {
                let fstab_entry = fstab.entries().find(|entry| {
                    entry.fs_type == "swap" && self.filesystem_by_spec(&entry.spec) == Some(fs)
                });
                self.add_mount_point(fs, "swap", fstab_entry, true)?;
            }
        }

        // Listed in fstab but not mounted
        for entry in fstab.entries() {
            let Some(fs) = self.filesystem_by_spec(&entry.spec) else {
                continue;
            };
            if self.graph.children(fs)?.is_empty() {
                self.add_mount_point(fs, &entry.mount_point, Some(entry), false)?;
            }
        }
        Ok(())
    }

    fn probe_nfses(&mut self, mounts: &[MountEntry], fstab: &TabFile) -> Result<(), StorageError> {
        for mount in mounts {
            let is_nfs = matches!(
                KernelFilesystemType::from(mount.fstype.as_str()),
                KernelFilesystemType::Nodev(fs_type) if fs_type.is_nfs()
            );
            if !is_nfs {
                continue;
            }
            let source = mount.source.as_deref().unwrap_or_default();
            let Some((server, path)) = names::split_nfs_name(source) else {
                warn!("Skipping NFS mount {} with invalid name '{source}'", mount.target);
                continue;
            };
            let nfs = Nfs {
                server: server.to_owned(),
                path: names::canonical_nfs_path(path),
            };
            let existing = self
                .graph
                .devices()
                .find(|device| matches!(&device.data, DeviceData::Nfs(other) if *other == nfs))
                .map(|device| device.sid());
            let nfs = match existing {
                Some(sid) => sid,
                None => self.add_device(nfs, None, true)?,
            };
            self.add_mount_point(nfs, &mount.target, fstab.find_by_mount_point(&mount.target), true)?;
        }
        Ok(())
    }

    /// Only tmpfs mounts that are also listed in fstab are managed.
    fn probe_tmpfses(&mut self, mounts: &[MountEntry], fstab: &TabFile) -> Result<(), StorageError> {
        for mount in mounts {
            if KernelFilesystemType::from(mount.fstype.as_str())
                != KernelFilesystemType::Nodev(NodevFilesystemType::Tmpfs)
            {
                continue;
            }
            let Some(entry) = fstab
                .find_by_mount_point(&mount.target)
                .filter(|entry| entry.fs_type == "tmpfs")
            else {
                continue;
            };
            let tmpfs = self.add_device(Tmpfs {}, None, true)?;
            self.add_mount_point(tmpfs, &mount.target, Some(entry), true)?;
        }
        Ok(())
    }
}

/// Region of a block device as reported by lsblk.
fn lsblk_region(entry: &BlockDevice, start: u64) -> Region {
    let block_size = if entry.log_sec == 0 {
        DEFAULT_SECTOR_SIZE
    } else {
        entry.log_sec
    };
    Region::new(start, entry.size / block_size, block_size as u32)
}

/// Partition id of a partition with the lsblk `PARTTYPE`.
fn partition_id(pt_type: PtType, parttype: Option<&str>) -> u32 {
    let Some(parttype) = parttype else {
        return PARTITION_ID_LINUX;
    };
    match pt_type {
        PtType::Msdos => u32::from_str_radix(parttype.trim_start_matches("0x"), 16)
            .unwrap_or(PARTITION_ID_LINUX),
        _ => GPT_TYPE_IDS
            .iter()
            .find(|(guid, _)| guid.eq_ignore_ascii_case(parttype))
            .map_or(PARTITION_ID_LINUX, |(_, id)| *id),
    }
}

fn partition_type(pt_type: PtType, name: &str, id: u32) -> PartitionType {
    if pt_type != PtType::Msdos {
        return PartitionType::Primary;
    }
    if MSDOS_EXTENDED_IDS.contains(&id) {
        return PartitionType::Extended;
    }
    let number: u32 = name
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .chars()
        .rev()
        .collect::<String>()
        .parse()
        .unwrap_or_default();
    if number >= 5 {
        PartitionType::Logical
    } else {
        PartitionType::Primary
    }
}

/// How an fstab spec refers to its device.
fn mount_by(spec: &str) -> MountByType {
    if spec.starts_with("UUID=") {
        MountByType::Uuid
    } else if spec.starts_with("LABEL=") {
        MountByType::Label
    } else if spec.starts_with("/dev/disk/by-id/") {
        MountByType::Id
    } else if spec.starts_with("/dev/disk/by-path/") {
        MountByType::Path
    } else {
        MountByType::Device
    }
}
