//! Revision counters and the reconciler that resolves optimistic races.
//!
//! # The Rule
//!
//! Every locally-initiated mutation of the aggregate goes through
//! [`increment`]. Every server response goes through [`merge`], which keeps
//! whichever side is authoritative:
//!
//! - server wins when either side has no revision yet ([`Revision::NONE`])
//! - server wins when it is strictly ahead
//! - otherwise the local version wins
//!
//! This is a whole-aggregate heuristic. It does not merge fields. A stale
//! response arriving after a newer local edit can never clobber that edit;
//! a local edit racing an older increment may be discarded.
//!
//! # Revision Zero
//!
//! `0` is reserved for "never revised". [`Revision::next`] starts at `1`, so
//! a post-increment value is never zero and the "either side is zero" branch
//! only fires for aggregates that were never touched locally or never came
//! from the server.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Monotonic revision counter of an aggregate root.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// Sentinel value for an aggregate that was never revised.
    pub const NONE: Revision = Revision(0);

    /// Create a new revision with a specific value.
    pub fn new(value: u64) -> Self {
        Revision(value)
    }

    /// Get the next revision.
    pub fn next(self) -> Self {
        Revision(self.0.saturating_add(1))
    }

    /// Check if this is the NONE sentinel.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Get the inner value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "r{}", self.0)
        }
    }
}

/// An aggregate root tracked by a revision counter.
pub trait Revisioned: Clone {
    fn revision(&self) -> Revision;

    fn set_revision(&mut self, revision: Revision);
}

/// Which side of a race is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// Decide the winner from the two revisions alone.
pub fn winner(local: Revision, remote: Revision) -> Winner {
    if local.is_none() || remote.is_none() || local < remote {
        Winner::Remote
    } else {
        Winner::Local
    }
}

/// Pick the authoritative version of an aggregate.
///
/// Returns one of the two inputs unchanged (same `Arc`), never a blend.
pub fn merge<A: Revisioned>(local: &Arc<A>, remote: &Arc<A>) -> Arc<A> {
    let (lr, rr) = (local.revision(), remote.revision());
    match winner(lr, rr) {
        Winner::Remote => {
            trace!(local = %lr, remote = %rr, "server version wins");
            remote.clone()
        }
        Winner::Local => {
            trace!(local = %lr, remote = %rr, "local version wins, server response is stale");
            local.clone()
        }
    }
}

/// Return the aggregate with its revision advanced by exactly one.
pub fn increment<A: Revisioned>(mut aggregate: A) -> A {
    let next = aggregate.revision().next();
    aggregate.set_revision(next);
    aggregate
}
