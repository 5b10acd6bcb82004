//! Execution of a planned [`Actiongraph`].
//!
//! Actions run one at a time in commit order. Commands go through a
//! [`CommandRunner`]; config-file actions edit the tables held in
//! [`CommitData`], which are written back once at the end.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use log::{debug, error, info};

use osutils::{
    crypttab::Crypttab,
    dependencies::Command,
    mdadm::EtcMdadm,
    runner::{CommandRunner, RunMode},
    tabfile::TabFile,
    udevadm,
};
use stgplan_api::{
    error::{InternalError, InvalidInputError, ReportError, StorageError, StorageResultExt},
    Devicegraph, Sid,
};

use crate::{
    actiongraph::{ActionText, Actiongraph, Side, Tense},
    config::PlannerConfig,
    devices,
};

/// Config files edited during commit.
#[derive(Debug, Default)]
pub struct CommitData {
    pub etc_mdadm: EtcMdadm,
    pub etc_fstab: TabFile,
    pub etc_crypttab: Crypttab,

    /// UUIDs handed to devices created during this commit.
    pub uuids: BTreeMap<Sid, String>,
}

impl CommitData {
    pub fn load(config: &PlannerConfig) -> Result<Self, StorageError> {
        let load_error = |path: &Path| InvalidInputError::LoadConfig {
            path: path.display().to_string(),
        };
        Ok(CommitData {
            etc_mdadm: EtcMdadm::read(&config.etc_mdadm_path)
                .structured(load_error(&config.etc_mdadm_path))?,
            etc_fstab: TabFile::read(&config.etc_fstab_path)
                .structured(load_error(&config.etc_fstab_path))?,
            etc_crypttab: Crypttab::read(&config.etc_crypttab_path)
                .structured(load_error(&config.etc_crypttab_path))?,
            uuids: BTreeMap::new(),
        })
    }

    /// Writes back the config files that were modified.
    pub fn write(&self) -> Result<(), StorageError> {
        let write_error = |path: &Path| InternalError::WriteFile {
            path: path.display().to_string(),
        };
        self.etc_mdadm
            .write()
            .structured(write_error(self.etc_mdadm.path()))?;
        self.etc_fstab
            .write()
            .structured(write_error(self.etc_fstab.path()))?;
        self.etc_crypttab
            .write()
            .structured(write_error(self.etc_crypttab.path()))?;
        Ok(())
    }
}

/// Receives the text of every action right before it is committed.
pub trait CommitCallbacks {
    fn message(&mut self, text: &ActionText);
}

#[derive(Debug, Default)]
pub struct LoggingCommitCallbacks;

impl CommitCallbacks for LoggingCommitCallbacks {
    fn message(&mut self, text: &ActionText) {
        info!("{text}");
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Directory mount points are mounted below.
    pub root_prefix: Option<PathBuf>,

    /// Write modified config files back once all actions ran.
    pub write_config_files: bool,
}

/// What a single action sees while it is committed.
pub struct CommitContext<'a> {
    probed: &'a Devicegraph,
    staging: &'a Devicegraph,
    runner: &'a dyn CommandRunner,
    pub data: &'a mut CommitData,
    root_prefix: Option<&'a Path>,
}

impl<'a> CommitContext<'a> {
    pub fn new(
        probed: &'a Devicegraph,
        staging: &'a Devicegraph,
        runner: &'a dyn CommandRunner,
        data: &'a mut CommitData,
        root_prefix: Option<&'a Path>,
    ) -> Self {
        CommitContext {
            probed,
            staging,
            runner,
            data,
            root_prefix,
        }
    }

    /// The graph actions on `side` read their device from.
    pub fn graph(&self, side: Side) -> &'a Devicegraph {
        match side {
            Side::Lhs => self.probed,
            Side::Rhs => self.staging,
        }
    }

    pub fn run(&self, command: &Command) -> Result<(), StorageError> {
        self.runner.run(command, RunMode::MustSucceed).map(|_| ())
    }

    pub fn run_best_effort(&self, command: &Command) -> Result<i32, StorageError> {
        self.runner.run(command, RunMode::BestEffort)
    }

    /// Waits for udev to create the device nodes of new devices.
    pub fn settle(&self) -> Result<(), StorageError> {
        self.run_best_effort(&udevadm::settle_command()).map(|_| ())
    }

    /// Where `path` gets mounted, taking the root prefix into account.
    pub fn mount_path(&self, path: &str) -> PathBuf {
        match self.root_prefix {
            Some(prefix) => prefix.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }

    /// The UUID of `sid`: `existing` if set, otherwise one generated for this
    /// commit by `generate`.
    pub fn uuid(&mut self, sid: Sid, existing: &str, generate: impl FnOnce() -> String) -> String {
        if !existing.is_empty() {
            return existing.to_owned();
        }
        self.data.uuids.entry(sid).or_insert_with(generate).clone()
    }
}

/// Commits all actions in commit order and stops at the first failure.
/// Already committed actions are not rolled back. Config files are written
/// even after a failure so that they match what was committed.
#[tracing::instrument(skip_all)]
pub fn commit(
    actiongraph: &Actiongraph,
    runner: &dyn CommandRunner,
    data: &mut CommitData,
    options: &CommitOptions,
    callbacks: &mut dyn CommitCallbacks,
) -> Result<(), StorageError> {
    let mut context = CommitContext::new(
        actiongraph.probed(),
        actiongraph.staging(),
        runner,
        data,
        options.root_prefix.as_deref(),
    );

    let mut result: Result<(), StorageError> = Ok(());
    for action in actiongraph.commit_order() {
        let text = actiongraph.text(action, Tense::Doing)?;
        callbacks.message(&text);
        debug!("Committing {action}");

        if let Err(e) = devices::commit(action, &mut context) {
            error!("Failed to commit action '{action}'");
            result = Err::<(), _>(e).message(format!("Failed to commit '{text}'"));
            break;
        }
    }

    if options.write_config_files {
        let written = context.data.write();
        if result.is_ok() {
            result = written;
        } else if let Err(e) = written {
            error!("Failed to write config files after failed commit: {e}");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    use osutils::testutils::runner::RecordingRunner;
    use stgplan_api::{
        devicegraph::{
            device::{BlkFilesystem, Disk, Md, MountPoint, Partition, PartitionTable},
            types::{MdLevel, PtType},
            Holder,
        },
        error::{CommandFailedError, ErrorKind},
        primitives::{bytes::ByteCount, region::Region},
    };
    use sysdefs::filesystems::RealFilesystemType;

    #[derive(Default)]
    struct Recorder {
        texts: Vec<String>,
    }

    impl CommitCallbacks for Recorder {
        fn message(&mut self, text: &ActionText) {
            self.texts.push(text.to_string());
        }
    }

    const GIB_BLOCKS: u64 = ByteCount::GIB / 512;

    /// Two empty disks, and a staging graph with a RAID1 over one partition
    /// of each, mounted at `/srv`.
    fn raid_plan() -> (Devicegraph, Devicegraph) {
        let mut probed = Devicegraph::new();
        let disks: Vec<Sid> = ["/dev/sda", "/dev/sdb"]
            .into_iter()
            .map(|name| {
                let sid = probed
                    .create_device(Disk {
                        name: name.into(),
                        region: Region::new(0, 20 * GIB_BLOCKS, 512),
                        ..Default::default()
                    })
                    .unwrap();
                probed.find_by_sid_mut(sid).unwrap().exists_in_system = true;
                sid
            })
            .collect();

        let mut staging = probed.clone();
        let md = staging
            .create_device(Md::new("/dev/md0", MdLevel::Raid1))
            .unwrap();
        for disk in disks {
            let pt = staging
                .create_device(PartitionTable {
                    pt_type: PtType::Gpt,
                })
                .unwrap();
            staging.add_holder(disk, pt, Holder::Subdevice).unwrap();
            let name = format!("{}1", staging.find_by_sid(disk).unwrap().display_name());
            let partition = staging
                .create_device(Partition::new(name, Region::new(2048, 10 * GIB_BLOCKS, 512)))
                .unwrap();
            staging.add_holder(pt, partition, Holder::Subdevice).unwrap();
            staging.md_add_device(md, partition, false).unwrap();
        }
        if let stgplan_api::devicegraph::DeviceData::Md(payload) =
            &mut staging.find_by_sid_mut(md).unwrap().data
        {
            payload.uuid = "a1b2c3d4:a1b2c3d4:a1b2c3d4:a1b2c3d4".into();
        }

        let fs = staging
            .create_device(BlkFilesystem::new(RealFilesystemType::Xfs))
            .unwrap();
        staging.add_holder(md, fs, Holder::filesystem_user()).unwrap();
        let mp = staging.create_device(MountPoint::new("/srv")).unwrap();
        staging.add_holder(fs, mp, Holder::MountUser).unwrap();

        (probed, staging)
    }

    #[test]
    fn test_commit_runs_commands_in_order() {
        let (probed, staging) = raid_plan();
        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        let runner = RecordingRunner::new();
        let mut data = CommitData::default();
        let mut callbacks = Recorder::default();

        commit(
            &actiongraph,
            &runner,
            &mut data,
            &CommitOptions::default(),
            &mut callbacks,
        )
        .unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "parted -s /dev/sda mklabel gpt",
                "parted -s /dev/sda unit s mkpart primary 2048s 20973567s",
                "udevadm settle",
                "parted -s /dev/sdb mklabel gpt",
                "parted -s /dev/sdb unit s mkpart primary 2048s 20973567s",
                "udevadm settle",
                "mdadm --create /dev/md0 --run --level=raid1 --metadata=1.0 --homehost=any \
                 --bitmap=internal --uuid=a1b2c3d4:a1b2c3d4:a1b2c3d4:a1b2c3d4 \
                 --raid-devices=2 /dev/sda1 /dev/sdb1",
                "udevadm settle",
                "mkfs -t xfs /dev/md0",
                "udevadm settle",
                "mount --mkdir -t xfs /dev/md0 /srv",
            ]
        );

        assert_eq!(callbacks.texts.len(), actiongraph.len());
        assert_eq!(callbacks.texts[0], "Creating partition table /dev/sda (gpt)");
        assert_eq!(
            data.etc_mdadm.render(),
            "ARRAY /dev/md0 metadata=1.0 UUID=a1b2c3d4:a1b2c3d4:a1b2c3d4:a1b2c3d4\n"
        );
        let entry = data.etc_fstab.find_by_mount_point("/srv").unwrap();
        assert_eq!(entry.spec, "/dev/md0");
        assert_eq!(entry.fs_type, "xfs");
    }

    #[test]
    fn test_commit_stops_at_first_failure() {
        let (probed, staging) = raid_plan();
        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        let runner = RecordingRunner::new().fail_on("mdadm --create", 1);
        let mut data = CommitData::default();
        let mut callbacks = Recorder::default();

        let error = commit(
            &actiongraph,
            &runner,
            &mut data,
            &CommitOptions::default(),
            &mut callbacks,
        )
        .unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::CommandFailed(CommandFailedError::ExitCode { exit_code: 1, .. })
        ));

        let commands = runner.commands();
        assert!(commands.last().unwrap().starts_with("mdadm --create"));
        assert!(!commands.iter().any(|command| command.starts_with("mkfs")));
        assert!(data.etc_mdadm.entries().is_empty());
        assert!(data.etc_fstab.entries().next().is_none());
    }

    #[test]
    fn test_commit_writes_config_files() {
        let (probed, staging) = raid_plan();
        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        let root = tempfile::tempdir().unwrap();
        let config = PlannerConfig {
            etc_mdadm_path: root.path().join("mdadm.conf"),
            etc_fstab_path: root.path().join("fstab"),
            etc_crypttab_path: root.path().join("crypttab"),
            ..Default::default()
        };
        std::fs::write(&config.etc_fstab_path, "# static file system information\n").unwrap();

        let mut data = CommitData::load(&config).unwrap();
        let runner = RecordingRunner::new();
        commit(
            &actiongraph,
            &runner,
            &mut data,
            &CommitOptions {
                root_prefix: Some(root.path().join("mnt")),
                write_config_files: true,
            },
            &mut LoggingCommitCallbacks,
        )
        .unwrap();

        let mount = format!("mount --mkdir -t xfs /dev/md0 {}/mnt/srv", root.path().display());
        assert_eq!(runner.commands().last().unwrap(), &mount);

        let fstab = std::fs::read_to_string(&config.etc_fstab_path).unwrap();
        assert!(fstab.starts_with("# static file system information\n"));
        assert!(fstab.contains("/dev/md0 /srv xfs defaults 0 2"));
        assert!(std::fs::read_to_string(&config.etc_mdadm_path)
            .unwrap()
            .contains("UUID=a1b2c3d4:a1b2c3d4:a1b2c3d4:a1b2c3d4"));
        // Nothing registered, nothing written
        assert!(!config.etc_crypttab_path.exists());
    }

    #[test]
    fn test_mount_path() {
        let graph = Devicegraph::new();
        let runner = RecordingRunner::new();
        let mut data = CommitData::default();
        let prefix = PathBuf::from("/mnt");

        let context = CommitContext::new(&graph, &graph, &runner, &mut data, Some(&prefix));
        assert_eq!(context.mount_path("/"), PathBuf::from("/mnt/"));
        assert_eq!(context.mount_path("/boot/efi"), PathBuf::from("/mnt/boot/efi"));

        let mut data = CommitData::default();
        let context = CommitContext::new(&graph, &graph, &runner, &mut data, None);
        assert_eq!(context.mount_path("/boot"), PathBuf::from("/boot"));
    }
}
