//! The unit of schedulable work.
//!
//! Tasks are long-lived trait objects stepped by the scheduler in
//! priority order. A task owns nothing directly: units are reserved
//! through the scheduler's reservation map and resources are only
//! declared as [`ResourceBudget`] so the embedding agent can subtract
//! them from its spendable totals.
//!
//! Failure stays task-local. A task that cannot proceed reports a
//! failed [`TaskResult`] and completes; it never propagates an error
//! into the scheduler.

use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::message::{MessageDisposition, MessageEnvelope, MessageResponse, PromiseId};
use crate::scheduler::TaskContext;
use crate::world::{UnitId, UnitSnapshot, WorldSnapshot};
use serde::{Deserialize, Serialize};

/// Unique, human-readable task identity.
///
/// Keys are namespaced with a colon, `"army:alpha"`; the part before
/// the colon is the task's *family*, which the default similarity rule
/// compares when capping structurally equivalent tasks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKey(String);

impl TaskKey {
    /// Create a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The full key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace before the first colon, or the whole key.
    #[must_use]
    pub fn family(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Scheduler-assigned arena index for an active task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Resources a task declares as spoken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceBudget {
    /// Primary currency.
    #[serde(with = "fixed_serde")]
    pub metal: Fixed,
    /// Secondary currency.
    #[serde(with = "fixed_serde")]
    pub crystal: Fixed,
}

impl ResourceBudget {
    /// No reservation.
    pub const ZERO: Self = Self {
        metal: Fixed::ZERO,
        crystal: Fixed::ZERO,
    };

    /// Budget from whole currency amounts.
    #[must_use]
    pub fn new(metal: i64, crystal: i64) -> Self {
        Self {
            metal: Fixed::from_num(metal),
            crystal: Fixed::from_num(crystal),
        }
    }
}

impl std::ops::Add for ResourceBudget {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            metal: self.metal + rhs.metal,
            crystal: self.crystal + rhs.crystal,
        }
    }
}

impl std::ops::AddAssign for ResourceBudget {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the task achieved its purpose.
    pub success: bool,
    /// Free-form payload for the task's creator.
    pub detail: Option<String>,
}

impl TaskResult {
    /// A successful outcome.
    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            success: true,
            detail: None,
        }
    }

    /// A failed outcome with a reason.
    #[must_use]
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: Some(detail.into()),
        }
    }
}

/// One squad's published position, rebuilt by the scheduler before
/// every pass so merge decisions read pre-update state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmyStatus {
    /// Task key of the squad.
    pub key: TaskKey,
    /// Centre of mass; `None` while the squad holds no units.
    pub centre: Option<Vec2Fixed>,
    /// Members currently held.
    pub unit_count: u32,
}

/// A schedulable unit of work.
///
/// Implementations follow three rules: `update` must tolerate any
/// world (units it remembers may be gone), all cross-task effects go
/// through the [`TaskContext`], and a completed task must stay inert
/// until the scheduler removes it.
pub trait Task {
    /// Unique key; two active tasks never share one.
    fn key(&self) -> &TaskKey;

    /// Scheduling priority; higher runs first, ties run in insertion order.
    fn priority(&self) -> i32;

    /// Whether the task has finished (successfully or not).
    fn is_complete(&self) -> bool;

    /// Terminal outcome, once complete.
    fn result(&self) -> Option<TaskResult> {
        None
    }

    /// Resources the task wants subtracted from spendable totals.
    fn reserved_budget(&self) -> ResourceBudget {
        ResourceBudget::ZERO
    }

    /// Whether this task is structurally equivalent to an active one,
    /// for the scheduler's parallelism cap. Defaults to sharing a key
    /// family.
    fn is_similar_to(&self, other: &dyn Task) -> bool {
        self.key().family() == other.key().family()
    }

    /// Advance the task by one scheduler pass.
    fn update(&mut self, ctx: &mut TaskContext<'_>);

    /// Whether the task would adopt a unit freed by another task.
    fn wants_unit(&self, _unit: &UnitSnapshot, _world: &dyn WorldSnapshot) -> bool {
        false
    }

    /// Adopt a unit the scheduler has already reserved to this task.
    fn accept_unit(&mut self, _unit: UnitId) {}

    /// Give up all held units, returning them in ascending id order.
    fn take_units(&mut self) -> Vec<UnitId> {
        Vec::new()
    }

    /// Units the task believes it holds, in ascending id order.
    fn held_units(&self) -> Vec<UnitId> {
        Vec::new()
    }

    /// Drop a unit the scheduler has force-released.
    fn forget_unit(&mut self, _unit: UnitId) {}

    /// React to a broadcast message.
    ///
    /// Returning [`MessageDisposition::Deferred`] keeps `ticket`; the
    /// task must later resolve it through the context.
    fn on_message(
        &mut self,
        _envelope: &MessageEnvelope,
        _ticket: PromiseId,
    ) -> MessageDisposition {
        MessageDisposition::Ignored
    }

    /// Receive the response to a message this task sent earlier.
    fn on_response(&mut self, _promise: PromiseId, _response: &MessageResponse) {}

    /// Position published to the per-pass army status board.
    fn army_status(&self) -> Option<ArmyStatus> {
        None
    }
}
