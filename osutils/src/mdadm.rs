//! Facts about MD RAID arrays: `/proc/mdstat`, `mdadm --detail` and
//! `mdadm.conf`.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Error};
use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;

use stgplan_api::devicegraph::types::{MdLevel, MdParity};

use crate::dependencies::Dependency;

pub const PROC_MDSTAT_PATH: &str = "/proc/mdstat";

lazy_static! {
    static ref MDSTAT_HEADER: Regex =
        Regex::new(r"^(md[^ ]+) : (active|inactive)(.*)$").expect("Failed to compile regex");
    static ref MDSTAT_DEVICE: Regex =
        Regex::new(r"^([^\[ ]+)\[([0-9]+)\]((?:\([A-Z]\))*)$").expect("Failed to compile regex");
    static ref MDSTAT_CHUNK: Regex =
        Regex::new(r"([0-9]+)[kK] chunk").expect("Failed to compile regex");
    static ref MDSTAT_ALGORITHM: Regex =
        Regex::new(r"algorithm ([0-9]+)").expect("Failed to compile regex");
    static ref MDSTAT_COPIES: Regex =
        Regex::new(r"([23]) (near|offset|far)-copies").expect("Failed to compile regex");
    static ref MDSTAT_SUPER: Regex =
        Regex::new(r"super ([^ ]+)").expect("Failed to compile regex");
    static ref MDADM_DEVICE_KEY: Regex =
        Regex::new(r"^MD_DEVICE_(.+)_(ROLE|DEV)$").expect("Failed to compile regex");
}

/// A member device of an array as listed in `/proc/mdstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdstatDevice {
    /// Device path, e.g. `/dev/sda1`.
    pub name: String,
    pub spare: bool,
    pub faulty: bool,
}

/// An array as listed in `/proc/mdstat`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MdstatEntry {
    pub inactive: bool,
    pub read_only: bool,
    pub level: MdLevel,
    pub parity: MdParity,
    /// Chunk size in bytes, zero if not reported.
    pub chunk_size: u64,
    /// Superblock format, e.g. `1.0` or `external:imsm`.
    pub super_format: String,
    /// The array is an external metadata container.
    pub is_container: bool,
    /// The array lives inside an external metadata container.
    pub has_container: bool,
    pub devices: Vec<MdstatDevice>,
}

/// Contents of `/proc/mdstat`, keyed by the sysfs name of the array, e.g.
/// `md0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcMdstat {
    pub entries: BTreeMap<String, MdstatEntry>,
}

impl ProcMdstat {
    pub fn read() -> Result<Self, Error> {
        let content = fs::read_to_string(PROC_MDSTAT_PATH)
            .with_context(|| format!("Failed to read {PROC_MDSTAT_PATH}"))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, Error> {
        let mut entries = BTreeMap::new();
        let mut lines = content.lines().peekable();

        while let Some(line) = lines.next() {
            let Some(captures) = MDSTAT_HEADER.captures(line) else {
                continue;
            };

            let short_name = captures[1].to_owned();
            let mut entry = MdstatEntry {
                inactive: &captures[2] == "inactive",
                ..Default::default()
            };

            for word in captures[3].split_whitespace() {
                if word == "(read-only)" || word == "(auto-read-only)" {
                    entry.read_only = true;
                } else if let Some(device) = MDSTAT_DEVICE.captures(word) {
                    let flags = &device[3];
                    entry.devices.push(MdstatDevice {
                        name: format!("/dev/{}", &device[1]),
                        spare: flags.contains("(S)"),
                        faulty: flags.contains("(F)"),
                    });
                } else if entry.level == MdLevel::Unknown {
                    entry.level = MdLevel::from_mdadm(word);
                }
            }

            // The detail lines are indented and end at the next empty line.
            let mut details = String::new();
            while let Some(next) = lines.peek() {
                if next.trim().is_empty() || !next.starts_with(' ') {
                    break;
                }
                details.push_str(next);
                details.push(' ');
                lines.next();
            }
            entry.parse_details(&details);

            trace!("Parsed /proc/mdstat entry {short_name}: {entry:?}");
            entries.insert(short_name, entry);
        }

        Ok(ProcMdstat { entries })
    }

    pub fn get_entry(&self, short_name: &str) -> Result<&MdstatEntry, Error> {
        self.entries
            .get(short_name)
            .with_context(|| format!("Entry for {short_name} not found in {PROC_MDSTAT_PATH}"))
    }
}

impl MdstatEntry {
    fn parse_details(&mut self, details: &str) {
        if let Some(captures) = MDSTAT_SUPER.captures(details) {
            self.super_format = captures[1].to_owned();
            if let Some(external) = self.super_format.strip_prefix("external:") {
                if external.starts_with('/') {
                    self.has_container = true;
                } else {
                    self.is_container = true;
                    self.level = MdLevel::Container;
                }
            }
        }

        if let Some(captures) = MDSTAT_CHUNK.captures(details) {
            self.chunk_size = captures[1].parse::<u64>().unwrap_or(0) * 1024;
        }

        if let Some(captures) = MDSTAT_ALGORITHM.captures(details) {
            self.parity = parity_from_algorithm(self.level, &captures[1]);
        } else if let Some(captures) = MDSTAT_COPIES.captures(details) {
            self.parity = MdParity::from_mdadm(&format!("{}={}", &captures[2], &captures[1]));
        }
    }
}

/// Maps the numeric RAID5/6 algorithm of `/proc/mdstat` to a parity.
fn parity_from_algorithm(level: MdLevel, algorithm: &str) -> MdParity {
    match (level, algorithm) {
        (MdLevel::Raid4 | MdLevel::Raid5 | MdLevel::Raid6, "0") => MdParity::LeftAsymmetric,
        (MdLevel::Raid4 | MdLevel::Raid5 | MdLevel::Raid6, "1") => MdParity::RightAsymmetric,
        (MdLevel::Raid4 | MdLevel::Raid5 | MdLevel::Raid6, "2") => MdParity::LeftSymmetric,
        (MdLevel::Raid4 | MdLevel::Raid5 | MdLevel::Raid6, "3") => MdParity::RightSymmetric,
        (MdLevel::Raid4 | MdLevel::Raid5 | MdLevel::Raid6, "4") => MdParity::First,
        (MdLevel::Raid4 | MdLevel::Raid5 | MdLevel::Raid6, "5") => MdParity::Last,
        (MdLevel::Raid6, "16") => MdParity::LeftAsymmetric6,
        (MdLevel::Raid6, "17") => MdParity::RightAsymmetric6,
        (MdLevel::Raid6, "18") => MdParity::LeftSymmetric6,
        (MdLevel::Raid6, "19") => MdParity::RightSymmetric6,
        (MdLevel::Raid6, "20") => MdParity::First6,
        _ => MdParity::Default,
    }
}

/// Output of `mdadm --detail --export` for one array.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MdadmDetail {
    pub level: MdLevel,
    pub uuid: String,
    pub metadata: String,
    /// Name below `/dev/md/`, if the array has one.
    pub devname: Option<String>,
    /// Role of every member, keyed by device path. Roles are numbers or
    /// `spare`.
    pub roles: BTreeMap<String, String>,
}

impl MdadmDetail {
    pub fn run(name: &str) -> Result<Self, Error> {
        debug!("Getting RAID array details for '{name}'");
        let output = Dependency::Mdadm
            .cmd()
            .with_args(["--detail", "--export", name])
            .output_and_check()
            .context("Failed to run mdadm detail")?;
        Self::parse(&output).context("Failed to parse mdadm detail")
    }

    pub fn parse(output: &str) -> Result<Self, Error> {
        let mut detail = MdadmDetail::default();
        let mut roles: BTreeMap<&str, &str> = BTreeMap::new();
        let mut devs: BTreeMap<&str, &str> = BTreeMap::new();

        for line in output.lines().map(str::trim) {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "MD_LEVEL" => detail.level = MdLevel::from_mdadm(value),
                "MD_UUID" => detail.uuid = value.to_owned(),
                "MD_METADATA" => detail.metadata = value.to_owned(),
                "MD_DEVNAME" => detail.devname = Some(value.to_owned()),
                _ => {
                    if let Some(captures) = MDADM_DEVICE_KEY.captures(key) {
                        let (Some(id), Some(field)) = (captures.get(1), captures.get(2)) else {
                            continue;
                        };
                        match field.as_str() {
                            "ROLE" => roles.insert(id.as_str(), value),
                            _ => devs.insert(id.as_str(), value),
                        };
                    }
                }
            }
        }

        if detail.level == MdLevel::Unknown {
            bail!("No RAID level reported");
        }

        for (id, role) in roles {
            let dev = devs
                .get(id)
                .with_context(|| format!("No device reported for member '{id}'"))?;
            detail.roles.insert((*dev).to_owned(), role.to_owned());
        }

        Ok(detail)
    }
}

/// Symlinks in `/dev/md`, keyed by the kernel name of the array they point to.
pub type MdLinks = BTreeMap<String, Vec<String>>;

pub fn read_md_links(dir: impl AsRef<Path>) -> Result<MdLinks, Error> {
    let mut links = MdLinks::new();
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(links);
    }

    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to read '{}'", dir.display()))?
    {
        let entry = entry.context("Failed to read directory entry")?;
        let Ok(target) = fs::read_link(entry.path()) else {
            continue;
        };
        let Some(kernel_name) = target.file_name() else {
            continue;
        };
        links
            .entry(kernel_name.to_string_lossy().into_owned())
            .or_default()
            .push(entry.file_name().to_string_lossy().into_owned());
    }

    for names in links.values_mut() {
        names.sort();
    }

    Ok(links)
}

/// An `ARRAY` line of `mdadm.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcMdadmEntry {
    pub device: String,
    pub uuid: String,
    pub metadata: Option<String>,
}

impl EtcMdadmEntry {
    fn render(&self) -> String {
        match &self.metadata {
            Some(metadata) => format!(
                "ARRAY {} metadata={} UUID={}",
                self.device, metadata, self.uuid
            ),
            None => format!("ARRAY {} UUID={}", self.device, self.uuid),
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        if words.next() != Some("ARRAY") {
            return None;
        }
        let device = words.next()?.to_owned();
        let mut uuid = None;
        let mut metadata = None;
        for word in words {
            if let Some(value) = word.strip_prefix("UUID=") {
                uuid = Some(value.to_owned());
            } else if let Some(value) = word.strip_prefix("metadata=") {
                metadata = Some(value.to_owned());
            }
        }
        Some(EtcMdadmEntry {
            device,
            uuid: uuid?,
            metadata,
        })
    }
}

/// `mdadm.conf`, edited line by line so that unrelated lines are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EtcMdadm {
    path: PathBuf,
    lines: Vec<String>,
    modified: bool,
}

impl EtcMdadm {
    /// Reads the file at `path`. A missing file yields an empty config.
    pub fn read(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let content = if path.exists() {
            fs::read_to_string(&path)
                .with_context(|| format!("Failed to read '{}'", path.display()))?
        } else {
            String::new()
        };
        Ok(Self::parse(path, &content))
    }

    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Self {
        EtcMdadm {
            path: path.into(),
            lines: content.lines().map(str::to_owned).collect(),
            modified: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Vec<EtcMdadmEntry> {
        self.lines
            .iter()
            .filter_map(|line| EtcMdadmEntry::parse(line))
            .collect()
    }

    pub fn has_entry(&self, uuid: &str) -> bool {
        self.entries().iter().any(|entry| entry.uuid == uuid)
    }

    /// Adds `entry`, replacing an existing entry with the same UUID.
    pub fn update_entry(&mut self, entry: &EtcMdadmEntry) {
        let rendered = entry.render();
        let existing = self.lines.iter_mut().find(|line| {
            EtcMdadmEntry::parse(line).is_some_and(|old| old.uuid == entry.uuid)
        });
        match existing {
            Some(line) => *line = rendered,
            None => self.lines.push(rendered),
        }
        self.modified = true;
    }

    /// Removes the entry with `uuid`. Returns whether an entry was removed.
    pub fn remove_entry(&mut self, uuid: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|line| EtcMdadmEntry::parse(line).map_or(true, |entry| entry.uuid != uuid));
        let removed = self.lines.len() != before;
        self.modified |= removed;
        removed
    }

    pub fn render(&self) -> String {
        self.lines.iter().map(|line| format!("{line}\n")).collect()
    }

    /// Writes the file back if it was modified.
    pub fn write(&self) -> Result<(), Error> {
        if !self.modified {
            return Ok(());
        }
        fs::write(&self.path, self.render())
            .with_context(|| format!("Failed to write '{}'", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;

    #[test]
    fn test_parse_proc_mdstat() {
        let content = indoc! {"
            Personalities : [raid1] [raid6] [raid5] [raid4] [raid10] [raid0]
            md1 : active raid5 sdd1[3] sdc1[2](F) sdb1[1] sde1[4](S)
                  20953088 blocks super 1.0 level 5, 512k chunk, algorithm 2 [3/2] [UU_]
                  bitmap: 0/1 pages [0KB], 65536KB chunk

            md0 : active (auto-read-only) raid1 sdb2[1] sda2[0]
                  1047552 blocks super 1.0 [2/2] [UU]

            md2 : active raid10 sda3[0] sdb3[1] sdc3[2] sdd3[3]
                  2095104 blocks super 1.2 64K chunks 2 offset-copies [4/4] [UUUU]

            md127 : inactive sdf[0](S)
                  1048 blocks super external:imsm

            md126 : active raid0 sdf[0]
                  1048 blocks super external:/md127/0 128k chunks

            unused devices: <none>
        "};

        let mdstat = ProcMdstat::parse(content).unwrap();
        assert_eq!(mdstat.entries.len(), 5);

        let md1 = mdstat.get_entry("md1").unwrap();
        assert!(!md1.inactive);
        assert_eq!(md1.level, MdLevel::Raid5);
        assert_eq!(md1.parity, MdParity::LeftSymmetric);
        assert_eq!(md1.chunk_size, 512 * 1024);
        assert_eq!(md1.super_format, "1.0");
        assert_eq!(
            md1.devices,
            vec![
                MdstatDevice {
                    name: "/dev/sdd1".into(),
                    spare: false,
                    faulty: false
                },
                MdstatDevice {
                    name: "/dev/sdc1".into(),
                    spare: false,
                    faulty: true
                },
                MdstatDevice {
                    name: "/dev/sdb1".into(),
                    spare: false,
                    faulty: false
                },
                MdstatDevice {
                    name: "/dev/sde1".into(),
                    spare: true,
                    faulty: false
                },
            ]
        );

        let md0 = mdstat.get_entry("md0").unwrap();
        assert!(md0.read_only);
        assert_eq!(md0.level, MdLevel::Raid1);
        assert_eq!(md0.chunk_size, 0);
        assert_eq!(md0.devices.len(), 2);

        let md2 = mdstat.get_entry("md2").unwrap();
        assert_eq!(md2.level, MdLevel::Raid10);
        assert_eq!(md2.parity, MdParity::Offset2);
        assert_eq!(md2.chunk_size, 64 * 1024);

        let md127 = mdstat.get_entry("md127").unwrap();
        assert!(md127.inactive);
        assert!(md127.is_container);
        assert_eq!(md127.level, MdLevel::Container);
        assert!(md127.devices[0].spare);

        let md126 = mdstat.get_entry("md126").unwrap();
        assert!(md126.has_container);
        assert!(!md126.is_container);
        assert_eq!(md126.chunk_size, 128 * 1024);

        assert!(mdstat.get_entry("md5").is_err());
    }

    #[test]
    fn test_parse_proc_mdstat_empty() {
        let content = indoc! {"
            Personalities :
            unused devices: <none>
        "};
        assert!(ProcMdstat::parse(content).unwrap().entries.is_empty());
    }

    #[test]
    fn test_parse_mdadm_detail() {
        let output = indoc! {"
            MD_LEVEL=raid1
            MD_DEVICES=2
            MD_METADATA=1.0
            MD_UUID=35dd06d2:9e1c5a4d:8a2c4d6f:1b3e9f7a
            MD_DEVNAME=test
            MD_NAME=any:test
            MD_DEVICE_dev_sda1_ROLE=0
            MD_DEVICE_dev_sda1_DEV=/dev/sda1
            MD_DEVICE_dev_sdb1_ROLE=1
            MD_DEVICE_dev_sdb1_DEV=/dev/sdb1
            MD_DEVICE_dev_sdc1_ROLE=spare
            MD_DEVICE_dev_sdc1_DEV=/dev/sdc1
        "};

        let detail = MdadmDetail::parse(output).unwrap();
        assert_eq!(detail.level, MdLevel::Raid1);
        assert_eq!(detail.metadata, "1.0");
        assert_eq!(detail.uuid, "35dd06d2:9e1c5a4d:8a2c4d6f:1b3e9f7a");
        assert_eq!(detail.devname.as_deref(), Some("test"));
        assert_eq!(
            detail.roles,
            BTreeMap::from([
                ("/dev/sda1".to_owned(), "0".to_owned()),
                ("/dev/sdb1".to_owned(), "1".to_owned()),
                ("/dev/sdc1".to_owned(), "spare".to_owned()),
            ])
        );
    }

    #[test]
    fn test_parse_mdadm_detail_invalid() {
        assert!(MdadmDetail::parse("MD_UUID=1:2:3:4").is_err());
        assert!(MdadmDetail::parse("MD_LEVEL=raid0\nMD_DEVICE_dev_sda_ROLE=0").is_err());
    }

    #[test]
    fn test_read_md_links() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("../md127", dir.path().join("home")).unwrap();
        std::os::unix::fs::symlink("../md127", dir.path().join("data")).unwrap();
        std::os::unix::fs::symlink("../md0", dir.path().join("0")).unwrap();

        let links = read_md_links(dir.path()).unwrap();
        assert_eq!(
            links,
            BTreeMap::from([
                ("md0".to_owned(), vec!["0".to_owned()]),
                (
                    "md127".to_owned(),
                    vec!["data".to_owned(), "home".to_owned()]
                ),
            ])
        );

        assert!(read_md_links(dir.path().join("missing"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_etc_mdadm() {
        let content = indoc! {"
            # mdadm.conf
            DEVICE containers partitions
            ARRAY /dev/md0 metadata=1.0 UUID=1111:2222:3333:4444
        "};

        let mut etc_mdadm = EtcMdadm::parse("/etc/mdadm.conf", content);
        assert!(etc_mdadm.has_entry("1111:2222:3333:4444"));
        assert!(!etc_mdadm.has_entry("aaaa:bbbb:cccc:dddd"));

        etc_mdadm.update_entry(&EtcMdadmEntry {
            device: "/dev/md/test".into(),
            uuid: "aaaa:bbbb:cccc:dddd".into(),
            metadata: Some("1.0".into()),
        });
        etc_mdadm.update_entry(&EtcMdadmEntry {
            device: "/dev/md0".into(),
            uuid: "1111:2222:3333:4444".into(),
            metadata: None,
        });

        assert_eq!(
            etc_mdadm.render(),
            indoc! {"
                # mdadm.conf
                DEVICE containers partitions
                ARRAY /dev/md0 UUID=1111:2222:3333:4444
                ARRAY /dev/md/test metadata=1.0 UUID=aaaa:bbbb:cccc:dddd
            "}
        );

        assert!(etc_mdadm.remove_entry("1111:2222:3333:4444"));
        assert!(!etc_mdadm.remove_entry("1111:2222:3333:4444"));
        assert_eq!(etc_mdadm.entries().len(), 1);
    }

    #[test]
    fn test_etc_mdadm_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mdadm.conf");

        let mut etc_mdadm = EtcMdadm::read(&path).unwrap();
        assert!(etc_mdadm.entries().is_empty());

        // Unmodified files are not written.
        etc_mdadm.write().unwrap();
        assert!(!path.exists());

        etc_mdadm.update_entry(&EtcMdadmEntry {
            device: "/dev/md0".into(),
            uuid: "1:2:3:4".into(),
            metadata: Some("1.0".into()),
        });
        etc_mdadm.write().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "ARRAY /dev/md0 metadata=1.0 UUID=1:2:3:4\n"
        );
        assert!(EtcMdadm::read(&path).unwrap().has_entry("1:2:3:4"));
    }
}
