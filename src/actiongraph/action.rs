use std::fmt::{self, Display};

use serde::Serialize;
use strum_macros::{Display, IntoStaticStr};

use stgplan_api::Sid;

/// Which graph an action reads its device from: the probed graph (left hand
/// side) or the staging graph (right hand side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Side {
    Lhs,
    Rhs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReallotMode {
    Extend,
    Reduce,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, IntoStaticStr)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ActionKind {
    Create,
    Delete,
    Resize,
    SetPartitionId,
    SetBoot,
    SetLabel,
    SetCacheMode,
    Activate,
    Deactivate,
    /// Adds `member` to or removes it from the container device.
    Reallot {
        mode: ReallotMode,
        member: Sid,
    },
    Mount {
        path: String,
    },
    Unmount {
        path: String,
    },
    AddToEtcMdadm,
    RemoveFromEtcMdadm,
    AddToEtcFstab,
    RemoveFromEtcFstab,
    RenameInEtcFstab,
    AddToEtcCrypttab,
    RemoveFromEtcCrypttab,
}

impl ActionKind {
    /// Whether the action registers a device in a system-wide config file.
    pub fn is_config_registration(&self) -> bool {
        matches!(
            self,
            ActionKind::AddToEtcMdadm | ActionKind::AddToEtcFstab | ActionKind::AddToEtcCrypttab
        )
    }

    fn phrase(&self, tense: Tense) -> &'static str {
        let (pending, doing) = match self {
            ActionKind::Create => ("Create", "Creating"),
            ActionKind::Delete => ("Delete", "Deleting"),
            ActionKind::Resize => ("Resize", "Resizing"),
            ActionKind::SetPartitionId => ("Set id of", "Setting id of"),
            ActionKind::SetBoot => ("Set boot flag of", "Setting boot flag of"),
            ActionKind::SetLabel => ("Set label of", "Setting label of"),
            ActionKind::SetCacheMode => ("Set cache mode of", "Setting cache mode of"),
            ActionKind::Activate => ("Activate", "Activating"),
            ActionKind::Deactivate => ("Deactivate", "Deactivating"),
            ActionKind::Reallot {
                mode: ReallotMode::Extend,
                ..
            } => ("Extend", "Extending"),
            ActionKind::Reallot {
                mode: ReallotMode::Reduce,
                ..
            } => ("Reduce", "Reducing"),
            ActionKind::Mount { .. } => ("Mount", "Mounting"),
            ActionKind::Unmount { .. } => ("Unmount", "Unmounting"),
            ActionKind::AddToEtcMdadm => ("Add to mdadm.conf", "Adding to mdadm.conf"),
            ActionKind::RemoveFromEtcMdadm => {
                ("Remove from mdadm.conf", "Removing from mdadm.conf")
            }
            ActionKind::AddToEtcFstab => ("Add to fstab", "Adding to fstab"),
            ActionKind::RemoveFromEtcFstab => ("Remove from fstab", "Removing from fstab"),
            ActionKind::RenameInEtcFstab => ("Update in fstab", "Updating in fstab"),
            ActionKind::AddToEtcCrypttab => ("Add to crypttab", "Adding to crypttab"),
            ActionKind::RemoveFromEtcCrypttab => {
                ("Remove from crypttab", "Removing from crypttab")
            }
        };
        match tense {
            Tense::Pending => pending,
            Tense::Doing => doing,
        }
    }
}

/// A single step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Action {
    pub sid: Sid,
    pub kind: ActionKind,
    pub side: Side,

    /// Other devices' actions that depend on this device wait for this
    /// action rather than for the start of its chain.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub first: bool,

    /// Other devices' actions that depend on this device wait for this
    /// action rather than for the end of its chain.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub last: bool,
}

impl Action {
    pub fn new(sid: Sid, kind: ActionKind, side: Side) -> Self {
        Action {
            sid,
            kind,
            side,
            first: false,
            last: false,
        }
    }

    pub fn create(sid: Sid) -> Self {
        Self::new(sid, ActionKind::Create, Side::Rhs)
    }

    pub fn delete(sid: Sid) -> Self {
        Self::new(sid, ActionKind::Delete, Side::Lhs)
    }

    pub fn with_first(mut self) -> Self {
        self.first = true;
        self
    }

    pub fn with_last(mut self) -> Self {
        self.last = true;
        self
    }

    pub fn verb(&self) -> &'static str {
        (&self.kind).into()
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.verb(), self.sid, self.side)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tense {
    /// The action is planned.
    Pending,

    /// The action is being committed.
    Doing,
}

/// Structured, unlocalised description of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActionText {
    pub verb: &'static str,
    pub tense: Tense,
    pub device_class: String,
    pub device: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip)]
    phrase: &'static str,
}

impl ActionText {
    pub fn new(
        action: &Action,
        tense: Tense,
        device_class: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        ActionText {
            verb: action.verb(),
            tense,
            device_class: device_class.into(),
            device: device.into(),
            args: Vec::new(),
            phrase: action.kind.phrase(tense),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Display for ActionText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.phrase, self.device_class, self.device)?;
        if !self.args.is_empty() {
            write!(f, " ({})", self.args.join(", "))?;
        }
        Ok(())
    }
}
