use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::constants::FIRST_SID;

static NEXT_SID: AtomicU32 = AtomicU32::new(FIRST_SID);

/// Storage id. Identifies a device across all devicegraphs of the process, so
/// that a probed graph and a staging graph cloned from it can be diffed by
/// identity.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Sid(u32);

impl Sid {
    /// Allocates a fresh sid. Sids are never reused.
    pub(crate) fn allocate() -> Sid {
        Sid(NEXT_SID.fetch_add(1, Ordering::Relaxed))
    }

    /// Makes sure no later allocation hands out `self` again.
    pub(crate) fn reserve(self) {
        NEXT_SID.fetch_max(self.0.saturating_add(1), Ordering::Relaxed);
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<Sid> for u32 {
    fn from(sid: Sid) -> u32 {
        sid.0
    }
}

impl std::fmt::Display for Sid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
