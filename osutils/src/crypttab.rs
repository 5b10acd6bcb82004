//! The crypttab file, edited during commit.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrypttabEntry {
    /// Name of the device-mapper table.
    pub name: String,
    /// Backing device specification.
    pub device: String,
    pub password: String,
    pub options: Vec<String>,
}

impl CrypttabEntry {
    pub fn new(name: impl Into<String>, device: impl Into<String>) -> Self {
        CrypttabEntry {
            name: name.into(),
            device: device.into(),
            password: "none".into(),
            options: Vec::new(),
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            return None;
        }
        let mut fields = trimmed.split_whitespace();
        Some(CrypttabEntry {
            name: fields.next()?.to_owned(),
            device: fields.next()?.to_owned(),
            password: fields.next().unwrap_or("none").to_owned(),
            options: fields
                .next()
                .map(|options| options.split(',').map(str::to_owned).collect())
                .unwrap_or_default(),
        })
    }

    pub fn render(&self) -> String {
        if self.options.is_empty() {
            format!("{} {} {}", self.name, self.device, self.password)
        } else {
            format!(
                "{} {} {} {}",
                self.name,
                self.device,
                self.password,
                self.options.join(",")
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Crypttab {
    path: PathBuf,
    lines: Vec<String>,
    modified: bool,
}

impl Crypttab {
    /// Reads the file at `path`. A missing file yields an empty crypttab.
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
        Crypttab {
            path: path.into(),
            lines: content.lines().map(str::to_owned).collect(),
            modified: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Vec<CrypttabEntry> {
        self.lines
            .iter()
            .filter_map(|line| CrypttabEntry::parse(line))
            .collect()
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.entries().iter().any(|entry| entry.name == name)
    }

    /// Adds `entry`, replacing an existing entry with the same name.
    pub fn update_entry(&mut self, entry: &CrypttabEntry) {
        let rendered = entry.render();
        let existing = self.lines.iter_mut().find(|line| {
            CrypttabEntry::parse(line).is_some_and(|old| old.name == entry.name)
        });
        match existing {
            Some(line) => *line = rendered,
            None => self.lines.push(rendered),
        }
        self.modified = true;
    }

    pub fn remove_entry(&mut self, name: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|line| CrypttabEntry::parse(line).map_or(true, |entry| entry.name != name));
        let removed = self.lines.len() != before;
        self.modified |= removed;
        removed
    }

    pub fn render(&self) -> String {
        self.lines.iter().map(|line| format!("{line}\n")).collect()
    }

    pub fn write(&self) -> Result<(), Error> {
        if !self.modified {
            return Ok(());
        }
        fs::write(&self.path, self.render())
            .with_context(|| format!("Failed to write '{}'", self.path.display()))
    }
}
