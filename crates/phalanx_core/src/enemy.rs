//! Aggregated views of hostile forces.
//!
//! Squads never reason about individual enemies; they ask the enemy
//! awareness collaborator for a [`VirtualArmy`] near a point and read
//! its combined size, threat and composition. Virtual armies form a
//! commutative fold under [`VirtualArmy::combine`] with one exception:
//! a combined position only survives while at most one side actually
//! has units, because a merged cluster has no single meaningful spot.

use crate::math::{Fixed, Vec2Fixed};
use crate::threat::CombatScorer;
use crate::world::{Alliance, Composition, UnitId, UnitSnapshot, WorldSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Snapshot of a clustered hostile force.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VirtualArmy {
    /// Representative position, if one still exists.
    pub position: Option<Vec2Fixed>,
    /// Number of units in the cluster.
    pub size: u32,
    /// Combined scored threat.
    #[serde(with = "crate::math::fixed_serde")]
    pub threat: Fixed,
    /// Tally of unit classes.
    pub composition: Composition,
    /// Ids of the clustered units.
    pub members: BTreeSet<UnitId>,
}

impl VirtualArmy {
    /// Army containing nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Army of a single observed unit.
    #[must_use]
    pub fn from_unit(unit: &UnitSnapshot, scorer: &dyn CombatScorer) -> Self {
        let mut composition = Composition::new();
        composition.insert(unit.class, 1);
        let threat = scorer.threat_of(&composition);
        let mut members = BTreeSet::new();
        members.insert(unit.id);
        Self {
            position: Some(unit.position),
            size: 1,
            threat,
            composition,
            members,
        }
    }

    /// Whether the army holds no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Fold two armies into one.
    ///
    /// Size, threat, composition and membership combine commutatively.
    /// The position survives only while one side is empty.
    #[must_use]
    pub fn combine(mut self, other: Self) -> Self {
        self.position = match (self.size, other.size) {
            (0, _) => other.position,
            (_, 0) => self.position,
            _ => None,
        };
        self.size += other.size;
        self.threat += other.threat;
        for (class, count) in other.composition {
            *self.composition.entry(class).or_insert(0) += count;
        }
        self.members.extend(other.members);
        self
    }
}

/// Source of clustered hostile snapshots.
pub trait EnemyAwareness {
    /// The hostile army within `radius` of `point`, if any unit is there.
    fn army_near(
        &self,
        point: Vec2Fixed,
        radius: Fixed,
        world: &dyn WorldSnapshot,
        scorer: &dyn CombatScorer,
    ) -> Option<VirtualArmy>;
}

/// Default awareness that clusters straight from the world snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotAwareness;

impl EnemyAwareness for SnapshotAwareness {
    fn army_near(
        &self,
        point: Vec2Fixed,
        radius: Fixed,
        world: &dyn WorldSnapshot,
        scorer: &dyn CombatScorer,
    ) -> Option<VirtualArmy> {
        let radius_sq = radius * radius;
        let mut army = VirtualArmy::empty();
        for unit in world.units() {
            if unit.alliance != Alliance::Enemy || !unit.is_alive() {
                continue;
            }
            if unit.position.distance_squared(point) > radius_sq {
                continue;
            }
            army = army.combine(VirtualArmy::from_unit(unit, scorer));
        }
        if army.is_empty() {
            None
        } else {
            Some(army)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threat::StandardScorer;
    use crate::world::UnitClass;
    use crate::fixtures::{vec2, ScriptedWorld};

    fn unit(id: u64, class: UnitClass, x: i64) -> UnitSnapshot {
        UnitSnapshot {
            id: UnitId(id),
            alliance: Alliance::Enemy,
            class,
            position: vec2(x, 0),
            health: Fixed::from_num(50),
            max_health: Fixed::from_num(50),
            is_visible: true,
        }
    }

    #[test]
    fn test_single_unit_army() {
        let army = VirtualArmy::from_unit(&unit(1, UnitClass::Ranged, 0), &StandardScorer);
        assert_eq!(army.size, 1);
        assert_eq!(army.position, Some(vec2(0, 0)));
        assert_eq!(army.threat, Fixed::from_num(14));
        assert!(army.members.contains(&UnitId(1)));
    }

    #[test]
    fn test_combine_is_commutative_in_totals() {
        let a = VirtualArmy::from_unit(&unit(1, UnitClass::Assault, 0), &StandardScorer);
        let b = VirtualArmy::from_unit(&unit(2, UnitClass::Siege, 100), &StandardScorer);

        let ab = a.clone().combine(b.clone());
        let ba = b.combine(a);
        assert_eq!(ab.size, ba.size);
        assert_eq!(ab.threat, ba.threat);
        assert_eq!(ab.composition, ba.composition);
        assert_eq!(ab.members, ba.members);
        assert_eq!(ab.position, ba.position);
    }

    #[test]
    fn test_position_lost_when_both_sides_populated() {
        let a = VirtualArmy::from_unit(&unit(1, UnitClass::Assault, 0), &StandardScorer);
        let b = VirtualArmy::from_unit(&unit(2, UnitClass::Assault, 100), &StandardScorer);
        assert_eq!(a.clone().combine(b).position, None);

        // Folding into an empty accumulator keeps the position.
        let folded = VirtualArmy::empty().combine(a);
        assert_eq!(folded.position, Some(vec2(0, 0)));
    }

    #[test]
    fn test_awareness_respects_radius() {
        let mut world = ScriptedWorld::new();
        world.add_unit(1, Alliance::Enemy, UnitClass::Assault, vec2(0, 0));
        world.add_unit(2, Alliance::Enemy, UnitClass::Assault, vec2(100, 0));
        world.add_unit(3, Alliance::Enemy, UnitClass::Assault, vec2(5000, 0));
        world.add_unit(4, Alliance::Own, UnitClass::Assault, vec2(10, 0));

        let army = SnapshotAwareness
            .army_near(
                vec2(0, 0),
                Fixed::from_num(320),
                &world,
                &StandardScorer,
            )
            .unwrap();
        assert_eq!(army.size, 2);
        assert!(army.members.contains(&UnitId(1)));
        assert!(army.members.contains(&UnitId(2)));
        assert!(!army.members.contains(&UnitId(3)));
        assert!(!army.members.contains(&UnitId(4)));
    }

    #[test]
    fn test_awareness_empty_space_is_none() {
        let world = ScriptedWorld::new();
        assert!(SnapshotAwareness
            .army_near(vec2(0, 0), Fixed::from_num(320), &world, &StandardScorer)
            .is_none());
    }
}
