//! Minimal deterministic world simulation.
//!
//! The decision core only reads snapshots and emits intents, so the
//! headless runner has to close the loop itself: apply the intents,
//! move units, trade damage and advance the clock. The model here is
//! deliberately small. Units walk in straight lines at a flat speed,
//! deal flat damage inside weapon range, and own units project a sight
//! radius that (together with surveillance sweeps) drives fog of war.
//! Hostile combatants pursue the nearest own unit inside their aggro
//! radius so threats move and withdrawals actually happen.
//!
//! Everything iterates in ascending unit id order and movement reads
//! only pre-move state, so two worlds built from the same scenario and
//! seed stay bit-identical forever.

use std::collections::BTreeMap;

use phalanx_core::math::{Fixed, Vec2Fixed};
use phalanx_core::world::{
    Alliance, CommandSink, UnitClass, UnitId, UnitIntent, UnitSnapshot, WorldSnapshot,
};

use crate::scenario::{point, Scenario};

/// Distance a unit covers per tick, in world units.
const UNIT_SPEED: i64 = 24;
/// Reach of every weapon, in world units.
const WEAPON_RANGE: i64 = 64;
/// Flat damage dealt per tick while a foe is in reach.
const DAMAGE_PER_TICK: i64 = 4;
/// Sight radius projected by own units, in world units.
const SIGHT_RANGE: i64 = 384;
/// Radius revealed by a surveillance sweep, in world units.
const SCAN_RADIUS: i64 = 256;
/// Ticks a surveillance sweep stays active.
const SCAN_DURATION: u64 = 48;
/// Radius in which hostile combatants pick up a pursuit, in world units.
const AGGRO_RANGE: i64 = 256;

fn base_health(class: UnitClass) -> Fixed {
    Fixed::from_num(match class {
        UnitClass::Assault => 100,
        UnitClass::Ranged => 80,
        UnitClass::Siege => 120,
        UnitClass::Support => 70,
        UnitClass::Worker => 60,
        UnitClass::Structure => 400,
    })
}

#[derive(Debug, Clone, Copy)]
enum Order {
    Goto(Vec2Fixed),
    Pursue(UnitId),
}

#[derive(Debug, Clone, Copy)]
struct ScanSweep {
    point: Vec2Fixed,
    expires: u64,
}

/// Collects the intents one scheduler pass issues, for later application.
#[derive(Debug, Default)]
pub struct IntentBuffer {
    /// Intents in issue order.
    pub intents: Vec<UnitIntent>,
}

impl IntentBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandSink for IntentBuffer {
    fn issue(&mut self, intent: UnitIntent) {
        self.intents.push(intent);
    }
}

/// Self-advancing world the headless runner owns.
#[derive(Debug, Clone, Default)]
pub struct SimWorld {
    tick: u64,
    units: Vec<UnitSnapshot>,
    orders: BTreeMap<UnitId, Order>,
    scans: Vec<ScanSweep>,
    scans_requested: u64,
    upgrade_level: u32,
}

impl SimWorld {
    /// Create an empty world at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a world from a scenario's deployments.
    ///
    /// Hostile deployment anchors are jittered by up to 64 world units
    /// per axis, derived from `seed`, so batch runs explore slightly
    /// different engagements. Own deployments are never jittered; the
    /// armies' rally points have to stay where the scenario put them.
    #[must_use]
    pub fn from_scenario(scenario: &Scenario, seed: u64) -> Self {
        let mut world = Self::new();
        world.upgrade_level = scenario.upgrade_level;
        let mut rng = seed;
        for deployment in &scenario.deployments {
            let mut anchor = point(deployment.around);
            if deployment.alliance == Alliance::Enemy {
                let dx = (splitmix64(&mut rng) % 129) as i64 - 64;
                let dy = (splitmix64(&mut rng) % 129) as i64 - 64;
                anchor = anchor + Vec2Fixed::new(Fixed::from_num(dx), Fixed::from_num(dy));
            }
            for n in 0..deployment.count {
                world.deploy(
                    deployment.first_id + u64::from(n),
                    deployment.alliance,
                    deployment.class,
                    anchor + spread_offset(n),
                );
            }
        }
        world.refresh_visibility();
        world
    }

    /// Place a single unit at full class health.
    pub fn deploy(&mut self, id: u64, alliance: Alliance, class: UnitClass, position: Vec2Fixed) {
        let health = base_health(class);
        let snapshot = UnitSnapshot {
            id: UnitId(id),
            alliance,
            class,
            position,
            health,
            max_health: health,
            is_visible: true,
        };
        match self.units.binary_search_by_key(&snapshot.id, |u| u.id) {
            Ok(index) => self.units[index] = snapshot,
            Err(index) => self.units.insert(index, snapshot),
        }
    }

    /// Record one intent; it takes effect on the next [`SimWorld::advance`].
    pub fn apply(&mut self, intent: UnitIntent) {
        match intent {
            UnitIntent::Move { unit, target } | UnitIntent::AttackMove { unit, target } => {
                self.orders.insert(unit, Order::Goto(target));
            }
            UnitIntent::AttackUnit { unit, target } => {
                self.orders.insert(unit, Order::Pursue(target));
            }
            UnitIntent::Stop { unit } => {
                self.orders.remove(&unit);
            }
            UnitIntent::Scan { point } => {
                self.scans_requested += 1;
                self.scans.push(ScanSweep {
                    point,
                    expires: self.tick + SCAN_DURATION,
                });
            }
        }
    }

    /// Advance one tick: move, fight, expire sweeps, refresh fog.
    pub fn advance(&mut self) {
        self.tick += 1;
        self.step_movement();
        self.resolve_combat();
        let tick = self.tick;
        self.scans.retain(|s| s.expires > tick);
        self.refresh_visibility();
    }

    /// Living units on the given side.
    #[must_use]
    pub fn alive_count(&self, alliance: Alliance) -> u32 {
        self.units
            .iter()
            .filter(|u| u.alliance == alliance && u.is_alive())
            .count() as u32
    }

    /// Surveillance sweeps requested so far.
    #[must_use]
    pub fn scans_requested(&self) -> u64 {
        self.scans_requested
    }

    fn unit_mut(&mut self, id: UnitId) -> Option<&mut UnitSnapshot> {
        match self.units.binary_search_by_key(&id, |u| u.id) {
            Ok(index) => Some(&mut self.units[index]),
            Err(_) => None,
        }
    }

    fn sees(&self, point: Vec2Fixed) -> bool {
        let sight_sq = Fixed::from_num(SIGHT_RANGE * SIGHT_RANGE);
        let lit = self.units.iter().any(|u| {
            u.alliance == Alliance::Own
                && u.is_alive()
                && u.position.distance_squared(point) <= sight_sq
        });
        if lit {
            return true;
        }
        let scan_sq = Fixed::from_num(SCAN_RADIUS * SCAN_RADIUS);
        self.scans
            .iter()
            .any(|s| s.expires > self.tick && s.point.distance_squared(point) <= scan_sq)
    }

    fn step_movement(&mut self) {
        let speed = Fixed::from_num(UNIT_SPEED);
        let reach = Fixed::from_num(WEAPON_RANGE);
        let mut moves: Vec<(UnitId, Vec2Fixed)> = Vec::new();
        let mut finished: Vec<UnitId> = Vec::new();

        // Ordered units follow their standing order.
        for (&id, order) in &self.orders {
            let Some(unit) = self.unit(id) else {
                finished.push(id);
                continue;
            };
            if !unit.is_alive() {
                finished.push(id);
                continue;
            }
            match order {
                Order::Goto(target) => {
                    if unit.position.distance(*target) <= speed {
                        moves.push((id, *target));
                        finished.push(id);
                    } else {
                        moves.push((id, step_towards(unit.position, *target, speed)));
                    }
                }
                Order::Pursue(victim) => match self.unit(*victim) {
                    Some(v) if v.is_alive() => {
                        if unit.position.distance(v.position) > reach {
                            moves.push((id, step_towards(unit.position, v.position, speed)));
                        }
                    }
                    _ => finished.push(id),
                },
            }
        }

        // Hostile combatants close on the nearest own unit in aggro range.
        let aggro_sq = Fixed::from_num(AGGRO_RANGE * AGGRO_RANGE);
        let reach_sq = Fixed::from_num(WEAPON_RANGE * WEAPON_RANGE);
        for unit in &self.units {
            if unit.alliance != Alliance::Enemy || !unit.is_alive() || !unit.class.is_combatant() {
                continue;
            }
            let mut best: Option<(Fixed, UnitId, Vec2Fixed)> = None;
            for foe in &self.units {
                if foe.alliance != Alliance::Own || !foe.is_alive() {
                    continue;
                }
                let d = unit.position.distance_squared(foe.position);
                if d <= aggro_sq && best.map_or(true, |(bd, bid, _)| d < bd || (d == bd && foe.id < bid))
                {
                    best = Some((d, foe.id, foe.position));
                }
            }
            if let Some((d, _, target)) = best {
                if d > reach_sq {
                    moves.push((unit.id, step_towards(unit.position, target, speed)));
                }
            }
        }

        for (id, position) in moves {
            if let Some(unit) = self.unit_mut(id) {
                unit.position = position;
            }
        }
        for id in finished {
            self.orders.remove(&id);
        }
    }

    fn resolve_combat(&mut self) {
        let reach_sq = Fixed::from_num(WEAPON_RANGE * WEAPON_RANGE);
        let damage = Fixed::from_num(DAMAGE_PER_TICK);
        let mut pending: BTreeMap<UnitId, Fixed> = BTreeMap::new();
        for unit in &self.units {
            if !unit.is_alive() || !unit.class.is_combatant() {
                continue;
            }
            let foe_side = match unit.alliance {
                Alliance::Own => Alliance::Enemy,
                Alliance::Enemy => Alliance::Own,
                Alliance::Neutral => continue,
            };
            let mut best: Option<(Fixed, UnitId)> = None;
            for foe in &self.units {
                if foe.alliance != foe_side || !foe.is_alive() {
                    continue;
                }
                let d = unit.position.distance_squared(foe.position);
                if d <= reach_sq && best.map_or(true, |(bd, bid)| d < bd || (d == bd && foe.id < bid))
                {
                    best = Some((d, foe.id));
                }
            }
            if let Some((_, victim)) = best {
                *pending.entry(victim).or_insert(Fixed::ZERO) += damage;
            }
        }
        for (id, hit) in pending {
            if let Some(unit) = self.unit_mut(id) {
                unit.health = (unit.health - hit).max(Fixed::ZERO);
            }
        }
    }

    fn refresh_visibility(&mut self) {
        let flags: Vec<bool> = self
            .units
            .iter()
            .map(|u| match u.alliance {
                Alliance::Own => true,
                _ => self.sees(u.position),
            })
            .collect();
        for (unit, seen) in self.units.iter_mut().zip(flags) {
            unit.is_visible = seen;
        }
    }
}

impl WorldSnapshot for SimWorld {
    fn tick(&self) -> u64 {
        self.tick
    }

    fn units(&self) -> &[UnitSnapshot] {
        &self.units
    }

    fn unit(&self, id: UnitId) -> Option<&UnitSnapshot> {
        match self.units.binary_search_by_key(&id, |u| u.id) {
            Ok(index) => Some(&self.units[index]),
            Err(_) => None,
        }
    }

    fn is_visible(&self, point: Vec2Fixed) -> bool {
        self.sees(point)
    }

    fn is_walkable(&self, _point: Vec2Fixed) -> bool {
        true
    }

    fn upgrade_level(&self) -> u32 {
        self.upgrade_level
    }
}

fn step_towards(from: Vec2Fixed, to: Vec2Fixed, speed: Fixed) -> Vec2Fixed {
    let distance = from.distance(to);
    if distance <= speed {
        return to;
    }
    from + (to - from) * (speed / distance)
}

fn spread_offset(n: u32) -> Vec2Fixed {
    let col = i64::from(n % 4);
    let row = i64::from(n / 4);
    Vec2Fixed::new(Fixed::from_num(col * 32 - 48), Fixed::from_num(row * 32))
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
