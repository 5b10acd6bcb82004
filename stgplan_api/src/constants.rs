// Identity constants

/// First sid handed out by a fresh process.
pub const FIRST_SID: u32 = 42;

// Path constants

/// Root mount point path.
pub const ROOT_MOUNT_POINT_PATH: &str = "/";

/// Directory holding the device nodes of MD arrays with a name.
pub const DEV_MD_DIR: &str = "/dev/md";

/// Directory of device-mapper nodes.
pub const DEV_MAPPER_DIR: &str = "/dev/mapper";

/// Default path of the mdadm configuration file.
pub const ETC_MDADM_PATH: &str = "/etc/mdadm.conf";

/// Default path of the fstab file.
pub const ETC_FSTAB_PATH: &str = "/etc/fstab";

/// Default path of the crypttab file.
pub const ETC_CRYPTTAB_PATH: &str = "/etc/crypttab";

// MD constants

/// Chunk size used for new striped arrays when none is given.
pub const MD_DEFAULT_CHUNK_SIZE: u64 = 512 * 1024;

/// Chunk size mdadm uses for the size computation of RAID1 arrays.
pub const MD_RAID1_CHUNK_SIZE: u64 = 64 * 1024;

/// Metadata version used for new arrays. Version 1.0 keeps the superblock at
/// the end of the device so members stay readable without MD.
pub const MD_METADATA_VERSION: &str = "1.0";

/// Granularity the member size is rounded down to before the superblock is
/// deducted.
pub const MD_SUPERBLOCK_ALIGNMENT: u64 = 0x1000;

/// Space reserved at the end of each member for the 1.0 superblock.
pub const MD_SUPERBLOCK_RESERVATION: u64 = 0x2000;

/// Upper bound of the additional safety trim taken from each member.
pub const MD_MAX_SAFETY_TRIM: u64 = 128 * 1024 * 1024;

/// Smallest chunk size accepted for RAID0.
pub const MD_RAID0_MIN_CHUNK_SIZE: u64 = 4 * 1024;

// Partition ids

pub const PARTITION_ID_LINUX: u32 = 0x83;
pub const PARTITION_ID_SWAP: u32 = 0x82;
pub const PARTITION_ID_LVM: u32 = 0x8e;
pub const PARTITION_ID_RAID: u32 = 0xfd;
pub const PARTITION_ID_ESP: u32 = 0xef;
