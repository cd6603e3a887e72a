//! Scripted worlds and recording sinks.
//!
//! The decision core only reads [`WorldSnapshot`]s and emits
//! [`UnitIntent`]s, so tests drive it with a hand-scripted world whose
//! units never move unless the test moves them, and collect every
//! intent in a [`RecordingSink`] for inspection.

use fixed::types::I32F32;
use phalanx_core::math::{Fixed, Vec2Fixed};
use phalanx_core::world::{
    Alliance, CommandSink, UnitClass, UnitId, UnitIntent, UnitSnapshot, WorldSnapshot,
};

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i64) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point vector from integer coordinates.
#[must_use]
pub fn vec2(x: i64, y: i64) -> Vec2Fixed {
    Vec2Fixed::new(Fixed::from_num(x), Fixed::from_num(y))
}

/// Tight formation offsets used by [`ScriptedWorld::add_own_squad`],
/// cycled when a squad outgrows the pattern. Small enough that every
/// member stays in the anchor's region on the 512-spaced fixture maps.
const SQUAD_OFFSETS: [(i64, i64); 8] = [
    (0, 0),
    (16, 0),
    (0, 16),
    (-16, 0),
    (0, -16),
    (16, 16),
    (-16, 16),
    (16, -16),
];

/// A [`WorldSnapshot`] whose contents are scripted by the test.
///
/// Units are stored in ascending id order, spawn alive at full health,
/// and keep their snapshot after death so remembered-enemy paths can be
/// exercised. Terrain is walkable everywhere; [`ScriptedWorld::hide_all`]
/// switches the whole map dark.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWorld {
    tick: u64,
    units: Vec<UnitSnapshot>,
    upgrade_level: u32,
    all_hidden: bool,
}

impl ScriptedWorld {
    /// Empty world at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit with 100 health and full visibility.
    ///
    /// Re-using an id replaces the earlier snapshot.
    pub fn add_unit(
        &mut self,
        id: u64,
        alliance: Alliance,
        class: UnitClass,
        position: Vec2Fixed,
    ) -> UnitId {
        let snapshot = UnitSnapshot {
            id: UnitId(id),
            alliance,
            class,
            position,
            health: Fixed::from_num(100),
            max_health: Fixed::from_num(100),
            is_visible: !self.all_hidden,
        };
        match self.units.binary_search_by_key(&snapshot.id, |u| u.id) {
            Ok(i) => self.units[i] = snapshot,
            Err(i) => self.units.insert(i, snapshot),
        }
        UnitId(id)
    }

    /// Add `count` own units in a tight formation around `around`,
    /// with consecutive ids starting at `first_id`.
    pub fn add_own_squad(
        &mut self,
        first_id: u64,
        count: u32,
        class: UnitClass,
        around: Vec2Fixed,
    ) -> Vec<UnitId> {
        (0..u64::from(count))
            .map(|n| {
                let (dx, dy) = SQUAD_OFFSETS[n as usize % SQUAD_OFFSETS.len()];
                self.add_unit(first_id + n, Alliance::Own, class, around + vec2(dx, dy))
            })
            .collect()
    }

    /// Drop a unit's health to zero, keeping the snapshot in place.
    pub fn kill(&mut self, id: UnitId) {
        if let Some(unit) = self.unit_mut(id) {
            unit.health = Fixed::ZERO;
        }
    }

    /// Teleport a unit.
    pub fn move_unit(&mut self, id: UnitId, to: Vec2Fixed) {
        if let Some(unit) = self.unit_mut(id) {
            unit.position = to;
        }
    }

    /// Override a unit's maximum health.
    pub fn set_max_health(&mut self, id: UnitId, max_health: Fixed) {
        if let Some(unit) = self.unit_mut(id) {
            unit.max_health = max_health;
        }
    }

    /// Set the aggregate upgrade level reported to combat scorers.
    pub fn set_upgrade_level(&mut self, level: u32) {
        self.upgrade_level = level;
    }

    /// Advance the clock by `ticks`.
    pub fn advance(&mut self, ticks: u64) {
        self.tick += ticks;
    }

    /// Turn the lights off: every unit and every point becomes unseen.
    pub fn hide_all(&mut self) {
        self.all_hidden = true;
        for unit in &mut self.units {
            unit.is_visible = false;
        }
    }

    fn unit_mut(&mut self, id: UnitId) -> Option<&mut UnitSnapshot> {
        self.units
            .binary_search_by_key(&id, |u| u.id)
            .ok()
            .map(|i| &mut self.units[i])
    }
}

impl WorldSnapshot for ScriptedWorld {
    fn tick(&self) -> u64 {
        self.tick
    }

    fn units(&self) -> &[UnitSnapshot] {
        &self.units
    }

    fn unit(&self, id: UnitId) -> Option<&UnitSnapshot> {
        self.units
            .binary_search_by_key(&id, |u| u.id)
            .ok()
            .map(|i| &self.units[i])
    }

    fn is_visible(&self, _point: Vec2Fixed) -> bool {
        !self.all_hidden
    }

    fn is_walkable(&self, _point: Vec2Fixed) -> bool {
        true
    }

    fn upgrade_level(&self) -> u32 {
        self.upgrade_level
    }
}

/// A [`CommandSink`] that keeps every intent in issue order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Intents issued since the last [`RecordingSink::clear`].
    pub intents: Vec<UnitIntent>,
}

impl RecordingSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget recorded intents.
    pub fn clear(&mut self) {
        self.intents.clear();
    }
}

impl CommandSink for RecordingSink {
    fn issue(&mut self, intent: UnitIntent) {
        self.intents.push(intent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_stay_sorted_by_id() {
        let mut world = ScriptedWorld::new();
        world.add_unit(9, Alliance::Own, UnitClass::Assault, vec2(0, 0));
        world.add_unit(2, Alliance::Enemy, UnitClass::Ranged, vec2(10, 0));
        world.add_unit(5, Alliance::Own, UnitClass::Worker, vec2(20, 0));

        let ids: Vec<u64> = world.units().iter().map(|u| u.id.0).collect();
        assert_eq!(ids, vec![2, 5, 9]);
        assert_eq!(world.unit(UnitId(5)).map(|u| u.class), Some(UnitClass::Worker));
    }

    #[test]
    fn test_squad_spawns_around_anchor() {
        let mut world = ScriptedWorld::new();
        let squad = world.add_own_squad(1, 5, UnitClass::Assault, vec2(512, 0));

        assert_eq!(squad.len(), 5);
        for id in &squad {
            let unit = world.unit(*id).unwrap();
            assert!(unit.position.distance_squared(vec2(512, 0)) <= fixed(16 * 16));
        }
    }

    #[test]
    fn test_kill_keeps_the_snapshot() {
        let mut world = ScriptedWorld::new();
        let id = world.add_unit(1, Alliance::Enemy, UnitClass::Siege, vec2(0, 0));
        world.kill(id);

        let unit = world.unit(id).unwrap();
        assert!(!unit.is_alive());
        assert_eq!(world.units().len(), 1);
    }

    #[test]
    fn test_hide_all_darkens_units_and_ground() {
        let mut world = ScriptedWorld::new();
        let id = world.add_unit(1, Alliance::Enemy, UnitClass::Assault, vec2(0, 0));
        assert!(world.is_visible(vec2(300, 300)));

        world.hide_all();
        assert!(!world.is_visible(vec2(300, 300)));
        assert!(!world.unit(id).unwrap().is_visible);
    }
}
