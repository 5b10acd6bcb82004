use serde::{de::Error, Deserialize, Deserializer};
use strum_macros::IntoStaticStr;

/// System architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum SystemArchitecture {
    /// 64-bit x86
    #[strum(serialize = "amd64")]
    Amd64,

    /// 64-bit ARM
    #[strum(serialize = "arm64")]
    Aarch64,
}

impl SystemArchitecture {
    /// Get the current system architecture
    pub const fn current() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            SystemArchitecture::Amd64
        }

        #[cfg(not(target_arch = "x86_64"))]
        {
            SystemArchitecture::Aarch64
        }
    }

    /// Base page size of the architecture, in bytes.
    ///
    /// Both supported architectures run 4 KiB base pages in the kernels we
    /// target. MD chunk sizes for striped parity levels must not go below
    /// this value.
    pub const fn page_size(self) -> u64 {
        match self {
            SystemArchitecture::Amd64 => 4096,
            SystemArchitecture::Aarch64 => 4096,
        }
    }
}

impl<'de> Deserialize<'de> for SystemArchitecture {
    fn deserialize<D>(deserializer: D) -> Result<SystemArchitecture, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match &*String::deserialize(deserializer)?.to_lowercase() {
            "x64" | "amd64" | "x86_64" => SystemArchitecture::Amd64,
            "arm64" | "aarch64" => SystemArchitecture::Aarch64,
            arch => {
                return Err(D::Error::custom(format!(
                    "unknown system architecture '{arch}'",
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_aliases() {
        for alias in ["x64", "amd64", "X86_64"] {
            let arch: SystemArchitecture =
                serde_json::from_str(&format!("\"{alias}\"")).unwrap();
            assert_eq!(arch, SystemArchitecture::Amd64);
        }

        let arch: SystemArchitecture = serde_json::from_str("\"aarch64\"").unwrap();
        assert_eq!(arch, SystemArchitecture::Aarch64);

        serde_json::from_str::<SystemArchitecture>("\"riscv\"").unwrap_err();
    }

    #[test]
    fn test_page_size() {
        assert_eq!(SystemArchitecture::current().page_size(), 4096);
        let name: &'static str = SystemArchitecture::Aarch64.into();
        assert_eq!(name, "arm64");
    }
}
