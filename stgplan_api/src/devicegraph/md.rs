//! Policies of MD arrays that are pure functions of the devicegraph: RAID
//! sizing, allowed parities and membership editing.

use log::debug;

use crate::{
    constants::{
        MD_DEFAULT_CHUNK_SIZE, MD_MAX_SAFETY_TRIM, MD_RAID1_CHUNK_SIZE, MD_SUPERBLOCK_ALIGNMENT,
        MD_SUPERBLOCK_RESERVATION,
    },
    error::{StorageError, StructuralError},
};

use super::{
    device::{DeviceData, Md},
    graph::Devicegraph,
    holder::{Holder, MdUser},
    names,
    sid::Sid,
    types::{MdLevel, MdParity, Topology},
};

/// Minimal number of non-spare members an array of the level needs.
pub fn minimal_number_of_devices(level: MdLevel) -> usize {
    match level {
        MdLevel::Raid0 | MdLevel::Raid1 | MdLevel::Raid10 => 2,
        MdLevel::Raid4 | MdLevel::Raid5 => 3,
        MdLevel::Raid6 => 4,
        MdLevel::Unknown | MdLevel::Container => 0,
    }
}

/// Parities allowed for an array of the level with the given number of
/// non-spare members.
pub fn allowed_parities(level: MdLevel, number_of_devices: usize) -> Vec<MdParity> {
    const RAID5_PARITIES: [MdParity; 7] = [
        MdParity::Default,
        MdParity::LeftAsymmetric,
        MdParity::LeftSymmetric,
        MdParity::RightAsymmetric,
        MdParity::RightSymmetric,
        MdParity::First,
        MdParity::Last,
    ];

    match level {
        MdLevel::Raid5 => RAID5_PARITIES.to_vec(),
        MdLevel::Raid6 => RAID5_PARITIES
            .into_iter()
            .chain([
                MdParity::LeftAsymmetric6,
                MdParity::LeftSymmetric6,
                MdParity::RightAsymmetric6,
                MdParity::RightSymmetric6,
                MdParity::First6,
            ])
            .collect(),
        MdLevel::Raid10 => {
            let mut parities = vec![
                MdParity::Default,
                MdParity::Near2,
                MdParity::Offset2,
                MdParity::Far2,
            ];
            if number_of_devices > 2 {
                parities.extend([MdParity::Near3, MdParity::Offset3, MdParity::Far3]);
            }
            parities
        }
        _ => Vec::new(),
    }
}

/// Size of one member once the superblock reservation, the safety trim and
/// the rounding to whole chunks are deducted.
pub fn usable_member_size(size: u64, chunk_size: u64) -> u64 {
    let mut size = (size & !(MD_SUPERBLOCK_ALIGNMENT - 1)).saturating_sub(MD_SUPERBLOCK_RESERVATION);
    size -= MD_MAX_SAFETY_TRIM.min(size / 64);
    if chunk_size > 0 {
        size -= size % chunk_size;
    }
    size
}

/// One member as seen by the size computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberSize {
    pub size: u64,
    pub spare: bool,
}

/// Size and optimal I/O size of a new array. Arrays with fewer members than
/// the level needs get size zero.
pub fn calculate_size_and_optimal_io(
    level: MdLevel,
    chunk_size: u64,
    members: &[MemberSize],
) -> (u64, u64) {
    let chunk_size = match (level, chunk_size) {
        (MdLevel::Raid1, _) => MD_RAID1_CHUNK_SIZE,
        (_, 0) => MD_DEFAULT_CHUNK_SIZE,
        (_, chunk_size) => chunk_size,
    };

    let mut number: u64 = 0;
    let mut sum: u64 = 0;
    let mut smallest = u64::MAX;

    for member in members {
        let size = usable_member_size(member.size, chunk_size);
        if !member.spare {
            number += 1;
            sum += size;
        }
        smallest = smallest.min(size);
    }

    match level {
        MdLevel::Raid0 if number >= 2 => (sum, chunk_size * number),
        MdLevel::Raid1 if number >= 2 => (smallest, 0),
        MdLevel::Raid4 | MdLevel::Raid5 if number >= 3 => {
            (smallest * (number - 1), chunk_size * (number - 1))
        }
        MdLevel::Raid6 if number >= 4 => (smallest * (number - 2), chunk_size * (number - 2)),
        MdLevel::Raid10 if number >= 2 => {
            let size = ((smallest / chunk_size) * number / 2) * chunk_size;
            let mut optimal_io = chunk_size * number / 2;
            if number % 2 == 1 {
                optimal_io *= 2;
            }
            (size, optimal_io)
        }
        _ => (0, 0),
    }
}

impl Devicegraph {
    /// Payload of the MD array `sid`.
    pub fn md(&self, sid: Sid) -> Result<&Md, StorageError> {
        let device = self.find_by_sid(sid)?;
        match &device.data {
            DeviceData::Md(md) => Ok(md),
            data => Err(wrong_kind(sid, data)),
        }
    }

    fn md_mut(&mut self, sid: Sid) -> Result<&mut Md, StorageError> {
        let device = self.find_by_sid_mut(sid)?;
        match &mut device.data {
            DeviceData::Md(md) => Ok(md),
            data => Err(wrong_kind(sid, data)),
        }
    }

    /// Members of the array with their holder attributes, ordered by sid.
    pub fn md_members(&self, sid: Sid) -> Result<Vec<(Sid, MdUser)>, StorageError> {
        self.md(sid)?;
        Ok(self
            .in_holders(sid)?
            .into_iter()
            .filter_map(|(source, holder)| holder.as_md_user().map(|user| (source, *user)))
            .collect())
    }

    /// Number of members of the array that are not spares.
    pub fn md_number_of_devices(&self, sid: Sid) -> Result<usize, StorageError> {
        Ok(self
            .md_members(sid)?
            .iter()
            .filter(|(_, user)| !user.spare)
            .count())
    }

    pub fn md_allowed_parities(&self, sid: Sid) -> Result<Vec<MdParity>, StorageError> {
        Ok(allowed_parities(
            self.md(sid)?.level,
            self.md_number_of_devices(sid)?,
        ))
    }

    /// Adds `blk` as member of the array `md`. Non-spare members are sorted
    /// after the existing ones.
    pub fn md_add_device(&mut self, md: Sid, blk: Sid, spare: bool) -> Result<(), StorageError> {
        let members = self.md_members(md)?;
        let sort_key = if spare {
            0
        } else {
            members
                .iter()
                .map(|(_, user)| user.sort_key)
                .max()
                .unwrap_or_default()
                + 1
        };
        self.add_holder(
            blk,
            md,
            Holder::MdUser(MdUser {
                spare,
                faulty: false,
                sort_key,
            }),
        )?;
        self.calculate_md_region_and_topology(md)
    }

    pub fn md_remove_device(&mut self, md: Sid, blk: Sid) -> Result<(), StorageError> {
        self.md(md)?;
        self.remove_holder(blk, md)?;
        self.calculate_md_region_and_topology(md)
    }

    pub fn set_md_level(&mut self, md: Sid, level: MdLevel) -> Result<(), StorageError> {
        self.md_mut(md)?.level = level;
        self.calculate_md_region_and_topology(md)
    }

    pub fn set_md_chunk_size(&mut self, md: Sid, chunk_size: u64) -> Result<(), StorageError> {
        self.md_mut(md)?.chunk_size = chunk_size;
        self.calculate_md_region_and_topology(md)
    }

    pub fn set_md_parity(&mut self, md: Sid, parity: MdParity) -> Result<(), StorageError> {
        self.md_mut(md)?.parity = parity;
        Ok(())
    }

    /// Recomputes size and topology of the array from its members. Arrays
    /// that exist on the system keep their probed size.
    pub fn calculate_md_region_and_topology(&mut self, md: Sid) -> Result<(), StorageError> {
        if self.find_by_sid(md)?.exists_in_system {
            return Ok(());
        }

        let members = self
            .md_members(md)?
            .into_iter()
            .map(|(sid, user)| {
                Ok(MemberSize {
                    size: self
                        .find_by_sid(sid)?
                        .region()
                        .map(|region| region.size())
                        .unwrap_or_default(),
                    spare: user.spare,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let payload = self.md_mut(md)?;
        let (size, optimal_io_size) =
            calculate_size_and_optimal_io(payload.level, payload.chunk_size, &members);
        debug!(
            "Calculated size of {} as {size} bytes from {} members",
            payload.name,
            members.len()
        );
        payload.region.set_size(size);
        payload.topology = Topology {
            alignment_offset: 0,
            optimal_io_size,
        };
        Ok(())
    }

    /// Lowest `/dev/md<N>` no array in the graph uses.
    pub fn md_find_free_numeric_name(&self) -> String {
        let used: Vec<u32> = self
            .devices()
            .filter_map(|device| match &device.data {
                DeviceData::Md(md) => names::md_number(&md.name),
                _ => None,
            })
            .collect();
        let free = (0..).find(|n| !used.contains(n)).unwrap_or_default();
        format!("/dev/md{free}")
    }
}

fn wrong_kind(sid: Sid, data: &DeviceData) -> StorageError {
    StorageError::new(StructuralError::WrongDeviceKind {
        sid: sid.as_u32(),
        expected: "md".into(),
        actual: data.kind().to_string(),
    })
}
