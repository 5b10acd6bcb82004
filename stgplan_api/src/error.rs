use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// A device name does not match the grammar of its kind.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidNameError {
    #[error("Invalid name '{name}' for device of kind {kind}")]
    Device { kind: String, name: String },
    #[error("Invalid sysfs name '{name}' for device of kind {kind}")]
    Sysfs { kind: String, name: String },
}

/// The holder/parent-child constraints of the graph would be violated.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum StructuralError {
    #[error("Holder from device {source_sid} to device {target_sid} already exists")]
    HolderAlreadyExists { source_sid: u32, target_sid: u32 },
    #[error("Holder from device {source_sid} to itself is not allowed")]
    SelfHolder { source_sid: u32 },
    #[error("Device {sid} ({kind}) has {count} children, expected {expected}")]
    WrongNumberOfChildren {
        sid: u32,
        kind: String,
        count: usize,
        expected: String,
    },
    #[error("Device {sid} ({kind}) has {count} parents, expected {expected}")]
    WrongNumberOfParents {
        sid: u32,
        kind: String,
        count: usize,
        expected: String,
    },
    #[error("Holder of type {holder} cannot connect a {source_kind} to a {target_kind}")]
    InvalidHolderEndpoints {
        holder: String,
        source_kind: String,
        target_kind: String,
    },
    #[error("Device {sid} is a {actual}, expected {expected}")]
    WrongDeviceKind {
        sid: u32,
        expected: String,
        actual: String,
    },
    #[error("Regions have different block sizes: {left} and {right}")]
    BlockSizeMismatch { left: u32, right: u32 },
    #[error("Device {sid} already exists in the graph")]
    DuplicateSid { sid: u32 },
    #[error("Failed to parse persisted devicegraph")]
    ParsePersistedGraph,
    #[error("Failed to serialize devicegraph")]
    SerializeGraph,
}

/// A lookup did not find what it was looking for.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum NotFoundError {
    #[error("Device with sid {sid} not found")]
    Device { sid: u32 },
    #[error("Device with name '{name}' not found")]
    DeviceByName { name: String },
    #[error("Holder from device {source_sid} to device {target_sid} not found")]
    Holder { source_sid: u32, target_sid: u32 },
}

/// The probed facts contradict each other in a way probing cannot recover
/// from.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeConsistencyError {
    #[error("Device '{name}' referenced by device {target_sid} was not found")]
    UnresolvedHolder { name: String, target_sid: u32 },
}

/// A single probe step failed, or probing was aborted by the caller.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeError {
    #[error("Failed to probe {what}")]
    Probe { what: String },
    #[error("Failed to read system facts from {provider}")]
    ReadFacts { provider: String },
    #[error("Probing was aborted")]
    Aborted,
}

/// An attribute that cannot be changed in place differs between the probed and
/// the staging graph.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum UnsupportedModificationError {
    #[error("Cannot change {attribute} of {device}")]
    Attribute { device: String, attribute: String },
    #[error("Cannot create {kind} {device}")]
    Create { kind: String, device: String },
    #[error("Cannot delete {kind} {device}")]
    Delete { kind: String, device: String },
}

/// The planner reached a state that construction should have made impossible.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PlanningInvariantError {
    #[error("Action graph has a cycle through {action}")]
    Cycle { action: String },
    #[error("Device {sid} is a {probed} in the probed graph but a {staging} in the staging graph")]
    KindMismatch {
        sid: u32,
        probed: String,
        staging: String,
    },
}

/// An external command exited unsuccessfully.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum CommandFailedError {
    #[error("Command '{command}' failed with exit code {exit_code}")]
    ExitCode { command: String, exit_code: i32 },
    #[error("Command '{command}' was terminated by a signal")]
    Signal { command: String },
    #[error("Failed to execute command '{command}'")]
    Spawn { command: String },
}

/// User provided input was invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Failed to load configuration file from '{path}'")]
    LoadConfig { path: String },
    #[error("Failed to parse configuration")]
    ParseConfig,
    #[error("Failed to load devicegraph from '{path}'")]
    LoadGraph { path: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Failed to write '{path}'")]
    WriteFile { path: String },
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// A device name failed the grammar of its kind.
    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),

    /// Holder arity or parent/child constraints were violated.
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// A pending holder could not be resolved once all devices were known.
    #[error(transparent)]
    ProbeConsistency(#[from] ProbeConsistencyError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// An immutable attribute was changed between two graphs.
    #[error(transparent)]
    UnsupportedModification(#[from] UnsupportedModificationError),

    /// A planner invariant was broken. This indicates a bug.
    #[error(transparent)]
    PlanningInvariant(#[from] PlanningInvariantError),

    #[error(transparent)]
    CommandFailed(#[from] CommandFailedError),

    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// An uncategorized error occurred or a bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct StorageErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct StorageError(Box<StorageErrorInner>);
impl StorageError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        StorageError(Box::new(StorageErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Whether this error is a planner defect rather than a user error.
    pub fn is_defect(&self) -> bool {
        matches!(
            self.0.kind,
            ErrorKind::PlanningInvariant(_) | ErrorKind::Internal(_)
        )
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured StorageError.
    fn structured(self, kind: K) -> Result<T, StorageError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, StorageError> {
        match self {
            Some(t) => Ok(t),
            None => Err(StorageError(Box::new(StorageErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, StorageError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(StorageError(Box::new(StorageErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait StorageResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, StorageError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}
impl<T> StorageResultExt<T> for Result<T, StorageError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, StorageError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for StorageError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("storage-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::InvalidName(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Structural(ref e) => state.serialize_field("error", e)?,
            ErrorKind::NotFound(ref e) => state.serialize_field("error", e)?,
            ErrorKind::ProbeConsistency(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Probe(ref e) => state.serialize_field("error", e)?,
            ErrorKind::UnsupportedModification(ref e) => state.serialize_field("error", e)?,
            ErrorKind::PlanningInvariant(ref e) => state.serialize_field("error", e)?,
            ErrorKind::CommandFailed(ref e) => state.serialize_field("error", e)?,
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.kind)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use serde_yaml::Value;

    use super::*;

    #[test]
    fn test_error_serialize() {
        let e = StorageError(Box::new(StorageErrorInner {
            kind: ErrorKind::CommandFailed(CommandFailedError::ExitCode {
                command: "mdadm --stop /dev/md0".into(),
                exit_code: 1,
            }),
            location: Location::caller(),
            source: Some(
                std::fs::read("/non-existant-file")
                    .context("failed to read file")
                    .unwrap_err(),
            ),
            context: Vec::new(),
        }));
        match serde_yaml::to_value(e).unwrap() {
            Value::Mapping(m) => {
                assert_eq!(m.len(), 5);
                assert_eq!(m["category"], Value::String("command-failed".into()));
                assert!(matches!(m["cause"], Value::String(_)));
                assert!(matches!(m["error"], Value::Mapping(_)));
                assert_eq!(
                    m["message"],
                    Value::String(
                        "Command 'mdadm --stop /dev/md0' failed with exit code 1".into()
                    )
                );
                match m["location"] {
                    Value::String(ref s) => assert!(s.contains("error.rs:")),
                    _ => panic!("location isn't string"),
                }
            }
            _ => panic!("value isn't mapping"),
        }
    }

    #[test]
    fn test_error_debug() {
        let error = Err::<(), _>(anyhow::anyhow!("z"))
            .context("x\ny")
            .structured(InternalError::Internal("w"))
            .unwrap_err();
        assert_eq!(
            format!("{:?}", error),
            format!(
                "Internal error: w at {}:{}\n\nCaused by:\n    0: x\n       y\n    1: z\n",
                error.0.location.file(),
                error.0.location.line(),
            ),
        );
    }

    #[test]
    fn test_error_context() {
        let error = Err::<(), _>(StorageError::new(NotFoundError::Device { sid: 7 }))
            .message("While looking up md member")
            .unwrap_err();
        let rendered = format!("{error:?}");
        assert!(rendered.starts_with("Device with sid 7 not found at "));
        assert!(rendered.contains("Context:\n    0: While looking up md member at "));
        assert!(!error.is_defect());

        let error = StorageError::new(PlanningInvariantError::Cycle {
            action: "create 42".into(),
        });
        assert!(error.is_defect());
        assert_eq!(<&str>::from(error.kind()), "planning-invariant");
    }
}
