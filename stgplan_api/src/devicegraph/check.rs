use std::collections::BTreeMap;

use log::warn;

use crate::{constants::MD_RAID0_MIN_CHUNK_SIZE, error::StorageError};

use super::{
    device::{Device, DeviceData},
    graph::Devicegraph,
    names,
    types::MdLevel,
};

/// Receives the issues found by `Devicegraph::check`.
pub trait CheckCallbacks {
    fn error(&mut self, message: &str);
}

/// Collects check issues as strings.
#[derive(Debug, Default)]
pub struct CheckCallbacksRecorder {
    pub messages: Vec<String>,
}

impl CheckCallbacks for CheckCallbacksRecorder {
    fn error(&mut self, message: &str) {
        self.messages.push(format!("error: message = '{message}'"));
    }
}

impl CheckCallbacksRecorder {
    /// The recorded messages in sorted order.
    pub fn sorted(&self) -> Vec<String> {
        let mut messages = self.messages.clone();
        messages.sort();
        messages
    }
}

struct LogOnly;
impl CheckCallbacks for LogOnly {
    fn error(&mut self, message: &str) {
        warn!("{message}");
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        0
    } else {
        a / gcd(a, b) * b
    }
}

impl Devicegraph {
    /// Checks every device and the graph as a whole. Names that do not match
    /// the grammar of their kind are errors; everything else is reported
    /// through `callbacks`, or logged if there are none.
    pub fn check(
        &self,
        callbacks: Option<&mut dyn CheckCallbacks>,
        page_size: u64,
    ) -> Result<(), StorageError> {
        let mut log_only = LogOnly;
        let callbacks = match callbacks {
            Some(callbacks) => callbacks,
            None => &mut log_only,
        };

        let mut names: BTreeMap<&str, usize> = BTreeMap::new();
        for device in self.devices() {
            names::validate(&device.data)?;
            if let Some(name) = device.name() {
                *names.entry(name).or_default() += 1;
            }

            match &device.data {
                DeviceData::Md(_) => self.check_md(device, page_size, callbacks)?,
                DeviceData::Partition(partition) => {
                    self.check_partition(device, &partition.name, callbacks)?
                }
                DeviceData::MountPoint(mp) => {
                    if self.parents(device.sid())?.is_empty() {
                        callbacks.error(&format!("Mount point {} has no filesystem.", mp.path));
                    }
                }
                DeviceData::PartitionTable(_) | DeviceData::LvmPv(_) | DeviceData::LvmLv(_) => {
                    if self.parents(device.sid())?.is_empty() {
                        callbacks.error(&format!(
                            "{} {} has no parent.",
                            device.kind(),
                            device.sid()
                        ));
                    }
                }
                _ => (),
            }
        }

        for (name, count) in names {
            if count > 1 {
                callbacks.error(&format!("Name {name} is used by {count} devices."));
            }
        }

        Ok(())
    }

    fn check_md(
        &self,
        device: &Device,
        page_size: u64,
        callbacks: &mut dyn CheckCallbacks,
    ) -> Result<(), StorageError> {
        let md = self.md(device.sid())?;
        if md.chunk_size == 0 {
            return Ok(());
        }

        match md.level {
            MdLevel::Raid0 => {
                if md.chunk_size < MD_RAID0_MIN_CHUNK_SIZE {
                    callbacks.error(&format!(
                        "Chunk size of MD {} is smaller than 4 KiB.",
                        md.name
                    ));
                }

                let mut multiple = 1024;
                for (member, _) in self.md_members(device.sid())? {
                    if let Some(region) = self.find_by_sid(member)?.region() {
                        multiple = lcm(multiple, u64::from(region.block_size()));
                    }
                }
                if md.chunk_size % multiple != 0 {
                    callbacks.error(&format!(
                        "Chunk size of MD {} is not a multiple of the sector size of the devices.",
                        md.name
                    ));
                }
            }
            MdLevel::Raid4 | MdLevel::Raid5 | MdLevel::Raid6 | MdLevel::Raid10 => {
                if md.chunk_size < page_size {
                    callbacks.error(&format!(
                        "Chunk size of MD {} is smaller than the page size.",
                        md.name
                    ));
                }
                if !md.chunk_size.is_power_of_two() {
                    callbacks.error(&format!(
                        "Chunk size of MD {} is not a power of two.",
                        md.name
                    ));
                }
            }
            _ => (),
        }
        Ok(())
    }

    fn check_partition(
        &self,
        device: &Device,
        name: &str,
        callbacks: &mut dyn CheckCallbacks,
    ) -> Result<(), StorageError> {
        let Some(region) = device.region() else {
            return Ok(());
        };
        // Partition -> partition table -> partitionable
        for table in self.parents(device.sid())? {
            for partitionable in self.parents(table)? {
                let container = self.find_by_sid(partitionable)?;
                if !container.kind().is_partitionable() {
                    continue;
                }
                if let Some(container_region) = container.region() {
                    if !matches!(region.inside(container_region), Ok(true)) {
                        callbacks.error(&format!(
                            "Partition {name} does not fit on {}.",
                            container.display_name()
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        devicegraph::{
            device::{Disk, Md, MountPoint, Partition, PartitionTable},
            holder::Holder,
        },
        primitives::region::Region,
    };

    const PAGE_SIZE: u64 = 4096;

    fn md_graph(level: MdLevel, chunk_size: u64, block_size: u32) -> Devicegraph {
        let mut graph = Devicegraph::new();
        let md = graph.create_device(Md::new("/dev/md0", level)).unwrap();
        for name in ["/dev/sda", "/dev/sdb"] {
            let disk = graph
                .create_device(Disk {
                    name: name.into(),
                    region: Region::new(0, 1 << 20, block_size),
                    ..Default::default()
                })
                .unwrap();
            graph.md_add_device(md, disk, false).unwrap();
        }
        graph.set_md_chunk_size(md, chunk_size).unwrap();
        graph
    }

    fn check(graph: &Devicegraph) -> Vec<String> {
        let mut recorder = CheckCallbacksRecorder::default();
        graph.check(Some(&mut recorder), PAGE_SIZE).unwrap();
        recorder.sorted()
    }

    #[test]
    fn test_raid0_chunk_size() {
        assert!(check(&md_graph(MdLevel::Raid0, 64 * 1024, 512)).is_empty());
        assert!(check(&md_graph(MdLevel::Raid0, 0, 4096)).is_empty(), "zero means default");

        assert_eq!(
            check(&md_graph(MdLevel::Raid0, 2048, 512)),
            vec!["error: message = 'Chunk size of MD /dev/md0 is smaller than 4 KiB.'"]
        );

        // 6 KiB is not a multiple of 4 KiB sectors
        assert_eq!(
            check(&md_graph(MdLevel::Raid0, 6 * 1024, 4096)),
            vec![
                "error: message = 'Chunk size of MD /dev/md0 is not a multiple of the sector size of the devices.'"
            ]
        );
    }

    #[test]
    fn test_raid10_chunk_size() {
        assert!(check(&md_graph(MdLevel::Raid10, 512 * 1024, 512)).is_empty());
        assert_eq!(
            check(&md_graph(MdLevel::Raid10, 3 * 1024, 512)),
            vec![
                "error: message = 'Chunk size of MD /dev/md0 is not a power of two.'",
                "error: message = 'Chunk size of MD /dev/md0 is smaller than the page size.'",
            ]
        );
        assert_eq!(
            check(&md_graph(MdLevel::Raid10, 12 * 1024, 512)),
            vec!["error: message = 'Chunk size of MD /dev/md0 is not a power of two.'"]
        );
    }

    #[test]
    fn test_graph_checks() {
        let mut graph = Devicegraph::new();
        let sda = graph
            .create_device(Disk {
                name: "/dev/sda".into(),
                region: Region::new(0, 1000, 512),
                ..Default::default()
            })
            .unwrap();
        graph
            .create_device(Disk {
                name: "/dev/sda".into(),
                region: Region::new(0, 1000, 512),
                ..Default::default()
            })
            .unwrap();
        let pt = graph.create_device(PartitionTable::default()).unwrap();
        graph.add_holder(sda, pt, Holder::Subdevice).unwrap();
        let sda1 = graph
            .create_device(Partition::new("/dev/sda1", Region::new(900, 200, 512)))
            .unwrap();
        graph.add_holder(pt, sda1, Holder::Subdevice).unwrap();
        graph.create_device(MountPoint::new("/data")).unwrap();

        assert_eq!(
            check(&graph),
            vec![
                "error: message = 'Mount point /data has no filesystem.'",
                "error: message = 'Name /dev/sda is used by 2 devices.'",
                "error: message = 'Partition /dev/sda1 does not fit on /dev/sda.'",
            ]
        );

        // Without callbacks issues are only logged
        graph.check(None, PAGE_SIZE).unwrap();
    }
}
