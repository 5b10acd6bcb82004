//! The fstab file, read for probing and edited during commit.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};

use stgplan_api::constants::ROOT_MOUNT_POINT_PATH;

/// A single mount entry of a tab file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabFileEntry {
    /// Device specification, e.g. `/dev/sda1` or `UUID=...`.
    pub spec: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: Vec<String>,
    pub dump: u32,
    pub pass: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TabLine {
    Entry(TabFileEntry),
    /// Comments, empty lines and lines that could not be parsed. Kept
    /// verbatim.
    Other(String),
}

/// A representation of a fstab file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TabFile {
    path: PathBuf,
    lines: Vec<TabLine>,
    modified: bool,
}

impl TabFileEntry {
    /// Create a new entry. The fsck pass is 1 for root, 0 for swap and
    /// pseudo filesystems and 2 for everything else.
    pub fn new(
        spec: impl Into<String>,
        mount_point: impl Into<String>,
        fs_type: impl Into<String>,
    ) -> Self {
        let mount_point = mount_point.into();
        let fs_type = fs_type.into();
        let pass = match (mount_point.as_str(), fs_type.as_str()) {
            (_, "swap" | "tmpfs" | "nfs" | "nfs4") => 0,
            (ROOT_MOUNT_POINT_PATH, _) => 1,
            _ => 2,
        };
        TabFileEntry {
            spec: spec.into(),
            mount_point,
            fs_type,
            options: Vec::new(),
            dump: 0,
            pass,
        }
    }

    /// Add options to this entry.
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 3 {
            return None;
        }

        Some(TabFileEntry {
            spec: fields[0].to_owned(),
            mount_point: fields[1].to_owned(),
            fs_type: fields[2].to_owned(),
            options: fields
                .get(3)
                .map(|options| {
                    options
                        .split(',')
                        .filter(|option| *option != "defaults")
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            dump: fields.get(4).and_then(|v| v.parse().ok()).unwrap_or(0),
            pass: fields.get(5).and_then(|v| v.parse().ok()).unwrap_or(0),
        })
    }

    /// Render this entry as a line of a tab file.
    pub fn render(&self) -> String {
        // If the options are empty, use "defaults" as the default
        let options = if self.options.is_empty() {
            "defaults".into()
        } else {
            self.options.join(",")
        };

        format!(
            "{} {} {} {} {} {}",
            self.spec, self.mount_point, self.fs_type, options, self.dump, self.pass
        )
    }
}

impl TabFile {
    /// Reads the tab file at `path`. A missing file yields an empty tab file.
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
        TabFile {
            path: path.into(),
            lines: content
                .lines()
                .map(|line| match TabFileEntry::parse(line) {
                    Some(entry) => TabLine::Entry(entry),
                    None => TabLine::Other(line.to_owned()),
                })
                .collect(),
            modified: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> impl Iterator<Item = &TabFileEntry> + '_ {
        self.lines.iter().filter_map(|line| match line {
            TabLine::Entry(entry) => Some(entry),
            TabLine::Other(_) => None,
        })
    }

    pub fn find_by_mount_point(&self, mount_point: &str) -> Option<&TabFileEntry> {
        self.entries().find(|entry| entry.mount_point == mount_point)
    }

    /// Adds `entry`, replacing an existing entry for the same mount point in
    /// place.
    pub fn update_entry(&mut self, entry: TabFileEntry) {
        let existing = self.lines.iter_mut().find(|line| {
            matches!(line, TabLine::Entry(old) if old.mount_point == entry.mount_point)
        });
        match existing {
            Some(line) => *line = TabLine::Entry(entry),
            None => self.lines.push(TabLine::Entry(entry)),
        }
        self.modified = true;
    }

    /// Removes the entry for `mount_point`. Returns whether an entry was
    /// removed.
    pub fn remove_entry(&mut self, mount_point: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(
            |line| !matches!(line, TabLine::Entry(entry) if entry.mount_point == mount_point),
        );
        let removed = self.lines.len() != before;
        self.modified |= removed;
        removed
    }

    /// Render this tab file as a string.
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|line| match line {
                TabLine::Entry(entry) => format!("{}\n", entry.render()),
                TabLine::Other(other) => format!("{other}\n"),
            })
            .collect()
    }

    /// Writes the tab file back if it was modified.
    pub fn write(&self) -> Result<(), Error> {
        if !self.modified {
            return Ok(());
        }
        fs::write(&self.path, self.render())
            .with_context(|| format!("Failed to write new {}", self.path.display()))
    }
}
