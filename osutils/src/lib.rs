pub mod bcache;
pub mod blkid;
pub mod block_devices;
pub mod crypttab;
pub mod df;
pub mod dependencies;
pub mod findmnt;
pub mod lsblk;
pub mod lvm;
pub mod mdadm;
pub mod runner;
pub mod tabfile;
pub mod udevadm;

#[cfg(any(test, feature = "test-utilities"))]
pub mod testutils;
