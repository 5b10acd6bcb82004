use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StructuralError};

/// A block-addressed extent: `length` blocks of `block_size` bytes starting
/// at block `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Region {
    start: u64,
    length: u64,
    block_size: u32,
}

impl Default for Region {
    fn default() -> Self {
        Region {
            start: 0,
            length: 0,
            block_size: 512,
        }
    }
}

impl Region {
    /// Creates a new region. A zero block size is replaced by 512, the
    /// logical sector size every kernel block device supports.
    pub fn new(start: u64, length: u64, block_size: u32) -> Self {
        Region {
            start,
            length,
            block_size: if block_size == 0 { 512 } else { block_size },
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Last block of the region. For an empty region this is the block before
    /// `start`, saturating at zero.
    pub fn end(&self) -> u64 {
        (self.start + self.length).saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.length * u64::from(self.block_size)
    }

    /// Sets the length so the region covers `size` bytes, rounding down to
    /// whole blocks.
    pub fn set_size(&mut self, size: u64) {
        self.length = self.to_blocks(size);
    }

    pub fn set_start(&mut self, start: u64) {
        self.start = start;
    }

    pub fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    pub fn to_bytes(&self, blocks: u64) -> u64 {
        blocks * u64::from(self.block_size)
    }

    pub fn to_blocks(&self, bytes: u64) -> u64 {
        bytes / u64::from(self.block_size)
    }

    /// Moves the start of the region by `delta` blocks, keeping its end.
    pub fn adjust_start(&mut self, delta: i64) {
        let start = self.start.saturating_add_signed(delta);
        let end = self.start + self.length;
        self.start = start.min(end);
        self.length = end - self.start;
    }

    pub fn adjust_length(&mut self, delta: i64) {
        self.length = self.length.saturating_add_signed(delta);
    }

    fn check_block_size(&self, other: &Region) -> Result<(), StorageError> {
        if self.block_size != other.block_size {
            return Err(StorageError::new(StructuralError::BlockSizeMismatch {
                left: self.block_size,
                right: other.block_size,
            }));
        }
        Ok(())
    }

    /// Whether `self` lies entirely within `other`.
    pub fn inside(&self, other: &Region) -> Result<bool, StorageError> {
        self.check_block_size(other)?;
        Ok(self.start >= other.start && self.start + self.length <= other.start + other.length)
    }

    pub fn overlaps(&self, other: &Region) -> Result<bool, StorageError> {
        self.check_block_size(other)?;
        Ok(self.start < other.start + other.length && other.start < self.start + self.length)
    }

    /// Common part of two regions, `None` if they do not overlap.
    pub fn intersection(&self, other: &Region) -> Result<Option<Region>, StorageError> {
        if !self.overlaps(other)? {
            return Ok(None);
        }
        let start = self.start.max(other.start);
        let end = (self.start + self.length).min(other.start + other.length);
        Ok(Some(Region::new(start, end - start, self.block_size)))
    }

    /// Whether the region starts on a multiple of `grain` bytes.
    pub fn is_aligned(&self, grain: u64) -> bool {
        grain == 0 || self.to_bytes(self.start) % grain == 0
    }

    /// Largest sub-region whose start and end are multiples of `grain` bytes.
    pub fn aligned(&self, grain: u64) -> Region {
        if grain == 0 {
            return *self;
        }
        let start = self.to_bytes(self.start).div_ceil(grain) * grain;
        let end = (self.to_bytes(self.start + self.length) / grain) * grain;
        let start_block = self.to_blocks(start);
        let end_block = self.to_blocks(end).max(start_block);
        Region::new(start_block, end_block - start_block, self.block_size)
    }

    /// The parts of `self` not covered by any of `used`, in ascending order.
    pub fn unused_regions(&self, used: &[Region]) -> Result<Vec<Region>, StorageError> {
        let mut used = used
            .iter()
            .map(|region| {
                self.check_block_size(region)?;
                Ok(*region)
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        used.sort_by_key(|region| region.start);

        let mut unused = Vec::new();
        let mut cursor = self.start;
        let end = self.start + self.length;
        for region in used {
            let region_end = (region.start + region.length).min(end);
            if region.start > cursor {
                unused.push(Region::new(
                    cursor,
                    region.start.min(end) - cursor,
                    self.block_size,
                ));
            }
            cursor = cursor.max(region_end);
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            unused.push(Region::new(cursor, end - cursor, self.block_size));
        }
        Ok(unused)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {} B]",
            self.start, self.length, self.block_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ErrorKind;

    #[test]
    fn test_basic_arithmetic() {
        let mut region = Region::new(2048, 4096, 512);
        assert_eq!(region.end(), 6143);
        assert_eq!(region.size(), 2 * 1024 * 1024);
        assert_eq!(region.to_bytes(3), 1536);
        assert_eq!(region.to_blocks(1537), 3);

        region.set_size(1000);
        assert_eq!(region.length(), 1, "size rounds down to whole blocks");

        // Zero block size is normalised
        assert_eq!(Region::new(0, 1, 0).block_size(), 512);
        assert_eq!(Region::new(5, 0, 512).end(), 4);
    }

    #[test]
    fn test_adjust() {
        let mut region = Region::new(100, 50, 512);
        region.adjust_start(10);
        assert_eq!(region, Region::new(110, 40, 512));
        region.adjust_start(-20);
        assert_eq!(region, Region::new(90, 60, 512));
        region.adjust_length(-100);
        assert_eq!(region.length(), 0);
    }

    #[test]
    fn test_overlaps_and_inside() {
        let a = Region::new(0, 100, 512);
        let b = Region::new(50, 100, 512);
        let c = Region::new(100, 10, 512);

        assert!(a.overlaps(&b).unwrap());
        assert!(!a.overlaps(&c).unwrap(), "touching regions do not overlap");
        assert_eq!(
            a.intersection(&b).unwrap(),
            Some(Region::new(50, 50, 512))
        );
        assert_eq!(a.intersection(&c).unwrap(), None);
        assert!(Region::new(10, 20, 512).inside(&a).unwrap());
        assert!(!b.inside(&a).unwrap());

        let err = a.overlaps(&Region::new(0, 1, 4096)).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Structural(StructuralError::BlockSizeMismatch {
                left: 512,
                right: 4096
            })
        );
    }

    #[test]
    fn test_alignment() {
        let region = Region::new(34, 2000, 512);
        assert!(!region.is_aligned(1024 * 1024));
        assert!(Region::new(2048, 1, 512).is_aligned(1024 * 1024));

        let aligned = region.aligned(4096);
        assert_eq!(aligned.start(), 40);
        assert_eq!(aligned.end(), 2031);
        assert!(aligned.is_aligned(4096));
    }

    #[test]
    fn test_unused_regions() {
        let disk = Region::new(0, 1000, 512);
        let used = [Region::new(100, 100, 512), Region::new(150, 100, 512), Region::new(900, 200, 512)];
        assert_eq!(
            disk.unused_regions(&used).unwrap(),
            vec![Region::new(0, 100, 512), Region::new(250, 650, 512)]
        );
        assert_eq!(disk.unused_regions(&[]).unwrap(), vec![disk]);
        disk.unused_regions(&[Region::new(0, 1, 4096)]).unwrap_err();
    }
}
