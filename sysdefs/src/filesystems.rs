use serde::{de::value::Error, forward_to_deserialize_any, Deserialize, Deserializer, Serialize};
use strum_macros::{EnumIs, EnumIter, IntoStaticStr};

/// Superset of all filesystem types recognized by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, EnumIs)]
#[serde(untagged)]
pub enum KernelFilesystemType {
    Real(RealFilesystemType),
    Nodev(NodevFilesystemType),
    #[serde(untagged)]
    Other(String),
}

impl From<RealFilesystemType> for KernelFilesystemType {
    fn from(fs: RealFilesystemType) -> Self {
        KernelFilesystemType::Real(fs)
    }
}

impl From<NodevFilesystemType> for KernelFilesystemType {
    fn from(fs: NodevFilesystemType) -> Self {
        KernelFilesystemType::Nodev(fs)
    }
}

impl From<&str> for KernelFilesystemType {
    fn from(fs: &str) -> Self {
        Self::deserialize(&mut EnumDeserializer(fs))
            .unwrap_or_else(|_| KernelFilesystemType::Other(fs.to_string()))
    }
}

/// Filesystem types that live on a block device, as reported by blkid in the
/// `TYPE` tag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RealFilesystemType {
    Btrfs,
    Cramfs,
    Exfat,
    Ext2,
    Ext3,
    Ext4,
    F2fs,
    Iso9660,
    Jfs,
    Msdos,
    Ntfs,
    Reiserfs,
    Squashfs,
    Swap,
    Udf,
    Vfat,
    Xfs,
}

impl RealFilesystemType {
    pub fn as_kernel(self) -> KernelFilesystemType {
        self.into()
    }

    /// Whether a filesystem of this type is modelled when probing. Other
    /// types are reported with a warning and skipped.
    pub fn is_supported(self) -> bool {
        !matches!(
            self,
            RealFilesystemType::Cramfs | RealFilesystemType::Msdos | RealFilesystemType::Squashfs
        )
    }
}

/// List of nodev filesystem types the planner cares about. These are types
/// that do NOT use a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodevFilesystemType {
    Cgroup2,
    Devtmpfs,
    Nfs,
    Nfs4,
    Overlay,
    Proc,
    Ramfs,
    Sysfs,
    Tmpfs,
}

impl NodevFilesystemType {
    pub fn as_kernel(self) -> KernelFilesystemType {
        self.into()
    }

    /// Whether this is one of the network filesystem types.
    pub fn is_nfs(self) -> bool {
        matches!(self, NodevFilesystemType::Nfs | NodevFilesystemType::Nfs4)
    }
}

/// Simple deserializer to convert a &str into an enum using serde.
struct EnumDeserializer<'de>(&'de str);
impl<'de> Deserializer<'de> for &mut EnumDeserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: serde::de::Visitor<'de>,
    {
        visitor.visit_str(self.0)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use strum::IntoEnumIterator;

    #[test]
    fn test_kernel_filesystem_type() {
        let fs: KernelFilesystemType = serde_json::from_str(r#""ext4""#).unwrap();
        assert_eq!(fs, KernelFilesystemType::Real(RealFilesystemType::Ext4));
        assert!(fs.is_real());

        let fs: KernelFilesystemType = serde_json::from_str(r#""nfs4""#).unwrap();
        assert_eq!(fs, KernelFilesystemType::Nodev(NodevFilesystemType::Nfs4));
        assert!(fs.is_nodev());

        let fs: KernelFilesystemType = serde_json::from_str(r#""zonefs""#).unwrap();
        assert_eq!(fs, KernelFilesystemType::Other("zonefs".to_string()));
        assert!(fs.is_other());

        // From<&str> goes through the same rules
        assert_eq!(
            KernelFilesystemType::from("swap"),
            KernelFilesystemType::Real(RealFilesystemType::Swap)
        );
        assert_eq!(
            KernelFilesystemType::from("tmpfs"),
            NodevFilesystemType::Tmpfs.as_kernel()
        );
    }

    #[test]
    fn test_supported_types() {
        let unsupported: Vec<_> = RealFilesystemType::iter()
            .filter(|fs| !fs.is_supported())
            .collect();
        assert_eq!(
            unsupported,
            vec![
                RealFilesystemType::Cramfs,
                RealFilesystemType::Msdos,
                RealFilesystemType::Squashfs
            ]
        );
        assert!(RealFilesystemType::Reiserfs.is_supported());
        assert_eq!(
            KernelFilesystemType::from("jfs"),
            RealFilesystemType::Jfs.as_kernel()
        );
        assert!(NodevFilesystemType::Nfs.is_nfs());
        assert!(!NodevFilesystemType::Tmpfs.is_nfs());
    }
}
