//! World observation and command boundary.
//!
//! The core never owns game entities. It reads a fresh [`WorldSnapshot`]
//! each tick, stores only [`UnitId`] tokens, and re-resolves them on
//! every use because units can disappear between ticks. Decisions leave
//! the core as fire-and-forget [`UnitIntent`] values pushed into a
//! [`CommandSink`]; the core never learns whether an intent succeeded
//! except by observing later snapshots.

use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque stable identifier for a world unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct UnitId(pub u64);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// Which side a unit belongs to, from the agent's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Alliance {
    /// Controlled by this agent.
    Own,
    /// Controlled by an opponent.
    Enemy,
    /// Neither side; ignored by the decision core.
    Neutral,
}

/// Broad combat classification of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnitClass {
    /// Close-range line unit.
    Assault,
    /// Ranged damage dealer.
    Ranged,
    /// Long-range siege platform.
    Siege,
    /// Utility caster or healer.
    Support,
    /// Economic unit; never drafted into squads.
    Worker,
    /// Immobile building.
    Structure,
}

impl UnitClass {
    /// Whether this class can be drafted into a fighting squad.
    #[must_use]
    pub const fn is_combatant(self) -> bool {
        !matches!(self, Self::Worker | Self::Structure)
    }
}

/// Tally of units per class.
pub type Composition = BTreeMap<UnitClass, u32>;

/// Immutable per-tick observation of a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// Stable identifier.
    pub id: UnitId,
    /// Owning side.
    pub alliance: Alliance,
    /// Combat classification.
    pub class: UnitClass,
    /// World position.
    pub position: Vec2Fixed,
    /// Current hit points.
    #[serde(with = "fixed_serde")]
    pub health: Fixed,
    /// Maximum hit points.
    #[serde(with = "fixed_serde")]
    pub max_health: Fixed,
    /// Whether the unit is currently observed (hostiles may be remembered).
    pub is_visible: bool,
}

impl UnitSnapshot {
    /// Whether the unit is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.health > Fixed::ZERO
    }
}

/// Read-only view of the game world, fresh each tick.
///
/// Implementations must be cheap to query repeatedly: the core resolves
/// every stored id against the snapshot at least once per update.
pub trait WorldSnapshot {
    /// Current game tick.
    fn tick(&self) -> u64;

    /// All observed units, in ascending id order.
    fn units(&self) -> &[UnitSnapshot];

    /// Resolve a single unit. `None` means the unit is gone or unknown.
    fn unit(&self, id: UnitId) -> Option<&UnitSnapshot>;

    /// Whether a world point is currently within sight.
    fn is_visible(&self, point: Vec2Fixed) -> bool;

    /// Whether ground units can occupy a world point.
    fn is_walkable(&self, point: Vec2Fixed) -> bool;

    /// Aggregate upgrade level of the agent's forces (0 = none).
    fn upgrade_level(&self) -> u32;
}

/// A single fire-and-forget order against the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitIntent {
    /// Move to a point, ignoring hostiles on the way.
    Move {
        /// Unit to order.
        unit: UnitId,
        /// Destination.
        target: Vec2Fixed,
    },
    /// Advance toward a point, engaging hostiles encountered.
    AttackMove {
        /// Unit to order.
        unit: UnitId,
        /// Destination.
        target: Vec2Fixed,
    },
    /// Attack a specific unit.
    AttackUnit {
        /// Unit to order.
        unit: UnitId,
        /// Victim.
        target: UnitId,
    },
    /// Halt in place and drop the current order.
    Stop {
        /// Unit to order.
        unit: UnitId,
    },
    /// Reveal an area with a surveillance sweep.
    Scan {
        /// Point to reveal.
        point: Vec2Fixed,
    },
}

/// Write-only outlet for unit intents.
pub trait CommandSink {
    /// Queue one intent for execution by the world.
    fn issue(&mut self, intent: UnitIntent);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: u64, health: i32) -> UnitSnapshot {
        UnitSnapshot {
            id: UnitId(id),
            alliance: Alliance::Own,
            class: UnitClass::Assault,
            position: Vec2Fixed::ZERO,
            health: Fixed::from_num(health),
            max_health: Fixed::from_num(100),
            is_visible: true,
        }
    }

    #[test]
    fn test_combatant_classes() {
        assert!(UnitClass::Assault.is_combatant());
        assert!(UnitClass::Siege.is_combatant());
        assert!(!UnitClass::Worker.is_combatant());
        assert!(!UnitClass::Structure.is_combatant());
    }

    #[test]
    fn test_alive_threshold() {
        assert!(snapshot(1, 1).is_alive());
        assert!(!snapshot(1, 0).is_alive());
    }

    #[test]
    fn test_unit_id_ordering() {
        let mut ids = vec![UnitId(9), UnitId(2), UnitId(5)];
        ids.sort();
        assert_eq!(ids, vec![UnitId(2), UnitId(5), UnitId(9)]);
    }
}
