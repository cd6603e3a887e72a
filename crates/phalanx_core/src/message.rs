//! Synchronous task-to-task messaging.
//!
//! Messages are immutable values a task hands to its context during an
//! update. The scheduler collects them in an outbox and fans each one
//! out to every other active task *after* the update loop of the same
//! pass, so delivery never re-enters a task mid-update.
//!
//! A recipient that cannot answer immediately returns
//! [`MessageDisposition::Deferred`], keeping the offered [`PromiseId`];
//! when it later resolves the promise, the scheduler routes the typed
//! [`MessageResponse`] back to the original sender. This bus and the
//! shared reservation map are the only coordination channels between
//! tasks.

use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::region::RegionId;
use crate::task::{TaskId, TaskKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Broadcast payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// A squad is collapsing and needs anything that can fight.
    EmergencyDetected {
        /// Where the emergency is unfolding.
        region: RegionId,
    },
    /// A squad wants reinforcement toward a region.
    SupportRequested {
        /// Region to reinforce.
        region: RegionId,
    },
    /// Somebody wants a point revealed.
    ScanRequested {
        /// Point to reveal.
        point: Vec2Fixed,
    },
    /// Ask the task with the given key to wind down.
    AbortRequested {
        /// Key of the task to stop.
        key: TaskKey,
    },
    /// A hostile force was spotted outside normal engagements.
    EnemySighted {
        /// Region the force was seen in.
        region: RegionId,
        /// Scored threat of the sighting.
        #[serde(with = "fixed_serde")]
        threat: Fixed,
    },
}

/// Typed answer to a deferred message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageResponse {
    /// A surveillance sweep ran (or could not run) at the point.
    ScanPerformed {
        /// Point that was swept.
        point: Vec2Fixed,
        /// Whether the sweep actually fired.
        success: bool,
    },
    /// A squad committed to the requested support.
    SupportCommitted {
        /// Key of the committing squad.
        key: TaskKey,
    },
    /// The recipient looked at the request and turned it down.
    Declined,
}

/// How a recipient handled a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Not interesting to this task.
    Ignored,
    /// Acted on immediately; nothing further will happen.
    Handled,
    /// The offered ticket was kept; a response will arrive later.
    Deferred,
}

/// A message together with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Task that sent the message.
    pub origin: TaskId,
    /// The payload.
    pub message: Message,
}

/// Handle for one outstanding deferred response.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PromiseId(pub u64);

impl std::fmt::Display for PromiseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Allocator and registry for deferred responses.
///
/// The scheduler peeks the next ticket before each delivery; only if
/// the recipient defers is the ticket committed against the sender, so
/// ids stay dense and deterministic.
#[derive(Debug, Default)]
pub struct PromiseBook {
    next: u64,
    pending: BTreeMap<PromiseId, TaskId>,
}

impl PromiseBook {
    /// The ticket the next commit will register.
    #[must_use]
    pub fn ticket(&self) -> PromiseId {
        PromiseId(self.next)
    }

    /// Register the peeked ticket as awaited by `origin`.
    pub fn commit(&mut self, origin: TaskId) -> PromiseId {
        let id = PromiseId(self.next);
        self.next += 1;
        self.pending.insert(id, origin);
        id
    }

    /// Close out a promise, returning the task awaiting it.
    pub fn complete(&mut self, id: PromiseId) -> Option<TaskId> {
        self.pending.remove(&id)
    }

    /// Number of unresolved promises.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Feed the promise registry into a state hash.
    pub fn hash_into(&self, hasher: &mut impl std::hash::Hasher) {
        use std::hash::Hash;
        self.next.hash(hasher);
        for (promise, origin) in &self.pending {
            promise.0.hash(hasher);
            origin.0.hash(hasher);
        }
    }
}
