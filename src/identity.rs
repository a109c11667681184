//! Global version identity
//!
//! Every artifact version carries a store-wide unique `GlobalId` in addition
//! to its artifact-local version number. The id is derived from the log
//! position of the entry that created the version, so ids are strictly
//! increasing with log order and replaying the log re-derives the exact same
//! ids instead of minting new ones.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity errors
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Assignment would move backwards relative to an already-assigned id
    #[error("non-monotonic global id: position {position} <= last assigned {last}")]
    NonMonotonic { position: u64, last: u64 },
}

/// Result type for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Store-wide unique identifier for one artifact version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalId(u64);

impl GlobalId {
    /// Create a global id from a raw log position
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Assigns global ids from log positions
///
/// The materializer holds one assigner per node and consults it only for
/// entries it actually applies; already-applied entries are skipped upstream,
/// which is what keeps restarts from re-assigning ids.
pub struct IdentityAssigner {
    /// Highest position an id was assigned from
    last: AtomicU64,
}

impl IdentityAssigner {
    /// Create an assigner with no prior assignments
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Create an assigner that resumes after `position`
    ///
    /// Used on startup to continue from the materialization checkpoint.
    pub const fn starting_after(position: u64) -> Self {
        Self {
            last: AtomicU64::new(position),
        }
    }

    /// Derive the global id for a version created at `position`
    ///
    /// Fails if `position` does not advance past the last assignment; the
    /// apply loop is strictly ordered, so a regression here means entries
    /// were delivered out of order.
    pub fn assign(&self, position: u64) -> IdentityResult<GlobalId> {
        let last = self.last.load(Ordering::SeqCst);
        if position <= last {
            return Err(IdentityError::NonMonotonic { position, last });
        }
        self.last.store(position, Ordering::SeqCst);
        Ok(GlobalId::new(position))
    }

    /// Highest position an id was assigned from (0 if none)
    pub fn last_assigned(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for IdentityAssigner {
    fn default() -> Self {
        Self::new()
    }
}
