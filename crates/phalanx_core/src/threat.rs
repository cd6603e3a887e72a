//! Regional threat model.
//!
//! Once per refresh interval the model rebuilds a full map of
//! [`RegionData`] from the current world snapshot. The new map is a
//! wholesale replacement: decay terms read the previous map explicitly
//! and nothing is mutated in place, so a missed refresh can never leave
//! half-updated state behind.
//!
//! Three signals are derived per region:
//! - decayed threat and visibility, remembering what was seen after it
//!   leaves sight;
//! - diffuse threat, spreading each hostile presence over nearby
//!   regions with distance falloff;
//! - a hysteretic control integrator summarising who has owned the
//!   region over time.

use crate::config::TuningConfig;
use crate::math::{fixed_ln, fixed_serde, Fixed};
use crate::region::{Region, RegionGraph, RegionId};
use crate::world::{Alliance, Composition, UnitClass, WorldSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Scores unit compositions into scalar threat and power.
///
/// Supplied by the embedding agent; the core ships [`StandardScorer`]
/// for tests and headless runs. Balance tables stay outside the core.
pub trait CombatScorer {
    /// Threat posed by a hostile composition.
    fn threat_of(&self, composition: &Composition) -> Fixed;

    /// Fighting power of an own composition at the given upgrade level.
    fn power_of(&self, composition: &Composition, upgrade_level: u32) -> Fixed;
}

/// Flat per-class weight table with a linear upgrade bonus.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardScorer;

impl StandardScorer {
    const WEIGHTS: [(UnitClass, i64); 6] = [
        (UnitClass::Assault, 10),
        (UnitClass::Ranged, 14),
        (UnitClass::Siege, 20),
        (UnitClass::Support, 6),
        (UnitClass::Worker, 1),
        (UnitClass::Structure, 8),
    ];

    fn score(composition: &Composition) -> Fixed {
        let mut total = Fixed::ZERO;
        for (class, weight) in Self::WEIGHTS {
            if let Some(&count) = composition.get(&class) {
                total += Fixed::from_num(weight) * Fixed::from_num(count);
            }
        }
        total
    }
}

impl CombatScorer for StandardScorer {
    fn threat_of(&self, composition: &Composition) -> Fixed {
        Self::score(composition)
    }

    fn power_of(&self, composition: &Composition, upgrade_level: u32) -> Fixed {
        let bonus = Fixed::ONE + Fixed::from_num(upgrade_level) / Fixed::from_num(10);
        Self::score(composition) * bonus
    }
}

/// External intelligence about bases and closed-off regions.
pub trait BaseIntel {
    /// Whether a hostile base is known to stand in the region.
    fn is_enemy_base(&self, region: RegionId) -> bool;

    /// Whether the region is closed to ground movement.
    fn is_blocked(&self, region: RegionId) -> bool;
}

/// Intel source that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIntel;

impl BaseIntel for NoIntel {
    fn is_enemy_base(&self, _region: RegionId) -> bool {
        false
    }

    fn is_blocked(&self, _region: RegionId) -> bool {
        false
    }
}

/// Per-region output of one threat refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionData {
    /// Region this data describes.
    pub region: RegionId,
    /// Threat scored from hostiles observed this refresh.
    #[serde(with = "fixed_serde")]
    pub instant_threat: Fixed,
    /// Threat with cross-refresh memory decay.
    #[serde(with = "fixed_serde")]
    pub threat: Fixed,
    /// Decayed threat spread in from surrounding regions.
    #[serde(with = "fixed_serde")]
    pub diffuse_threat: Fixed,
    /// Own fighting power present this refresh.
    #[serde(with = "fixed_serde")]
    pub power: Fixed,
    /// Signed log-scaled control factor; positive means we hold it.
    #[serde(with = "fixed_serde")]
    pub control: Fixed,
    /// Running integrator behind [`RegionData::control`].
    #[serde(with = "fixed_serde")]
    pub cumulative_control: Fixed,
    /// Fraction of sample points visible this refresh.
    #[serde(with = "fixed_serde")]
    pub instant_visibility: Fixed,
    /// Visibility with cross-refresh memory decay.
    #[serde(with = "fixed_serde")]
    pub visibility: Fixed,
    /// A hostile base stands here.
    pub has_enemy_base: bool,
    /// One of our bases stands here.
    pub is_own_base: bool,
    /// Closed to ground movement.
    pub is_blocked: bool,
}

impl RegionData {
    fn empty(region: RegionId) -> Self {
        Self {
            region,
            instant_threat: Fixed::ZERO,
            threat: Fixed::ZERO,
            diffuse_threat: Fixed::ZERO,
            power: Fixed::ZERO,
            control: Fixed::ZERO,
            cumulative_control: Fixed::ZERO,
            instant_visibility: Fixed::ZERO,
            visibility: Fixed::ZERO,
            has_enemy_base: false,
            is_own_base: false,
            is_blocked: false,
        }
    }

    /// Diffuse threat amplified where a hostile base anchors the danger.
    #[must_use]
    pub fn kill_zone_factor(&self, config: &TuningConfig) -> Fixed {
        if self.has_enemy_base {
            self.diffuse_threat * Fixed::from_num(config.kill_zone_multiplier)
        } else {
            self.diffuse_threat
        }
    }
}

/// The refreshable threat map.
#[derive(Debug, Default)]
pub struct ThreatModel {
    data: BTreeMap<RegionId, RegionData>,
    last_refresh: Option<u64>,
}

impl ThreatModel {
    /// Create an empty model; all regions read as zero until refreshed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the map if the refresh interval has elapsed.
    ///
    /// Returns whether a recompute ran this call.
    pub fn refresh(
        &mut self,
        world: &dyn WorldSnapshot,
        graph: &RegionGraph,
        scorer: &dyn CombatScorer,
        intel: &dyn BaseIntel,
        config: &TuningConfig,
    ) -> bool {
        let tick = world.tick();
        if let Some(last) = self.last_refresh {
            if tick.saturating_sub(last) < config.threat_refresh_interval {
                return false;
            }
        }
        self.last_refresh = Some(tick);
        self.data = recompute(&self.data, world, graph, scorer, intel, config);
        debug!(tick, regions = self.data.len(), "threat map refreshed");
        true
    }

    /// Data for one region, if it has been computed.
    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&RegionData> {
        self.data.get(&id)
    }

    /// Iterate region data in ascending region id order.
    pub fn regions(&self) -> impl Iterator<Item = &RegionData> {
        self.data.values()
    }

    /// Tick of the most recent recompute.
    #[must_use]
    pub fn last_refresh(&self) -> Option<u64> {
        self.last_refresh
    }

    /// Own-held region with the highest power, used as a fallback rally.
    ///
    /// Ties resolve to the lower region id.
    #[must_use]
    pub fn strongest_own_region(&self) -> Option<RegionId> {
        let mut best: Option<(Fixed, RegionId)> = None;
        for (id, datum) in &self.data {
            if !datum.is_own_base && datum.power <= Fixed::ZERO {
                continue;
            }
            match best {
                Some((power, _)) if datum.power <= power => {}
                _ => best = Some((datum.power, *id)),
            }
        }
        best.map(|(_, id)| id)
    }

    /// Order-independent hash of the computed map, for desync checks.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (id, datum) in &self.data {
            id.0.hash(&mut hasher);
            datum.instant_threat.to_bits().hash(&mut hasher);
            datum.threat.to_bits().hash(&mut hasher);
            datum.diffuse_threat.to_bits().hash(&mut hasher);
            datum.power.to_bits().hash(&mut hasher);
            datum.cumulative_control.to_bits().hash(&mut hasher);
            datum.visibility.to_bits().hash(&mut hasher);
            datum.has_enemy_base.hash(&mut hasher);
            datum.is_own_base.hash(&mut hasher);
            datum.is_blocked.hash(&mut hasher);
        }
        hasher.finish()
    }
}

fn recompute(
    previous: &BTreeMap<RegionId, RegionData>,
    world: &dyn WorldSnapshot,
    graph: &RegionGraph,
    scorer: &dyn CombatScorer,
    intel: &dyn BaseIntel,
    config: &TuningConfig,
) -> BTreeMap<RegionId, RegionData> {
    let mut hostiles: BTreeMap<RegionId, Composition> = BTreeMap::new();
    let mut own: BTreeMap<RegionId, Composition> = BTreeMap::new();
    let mut hostile_structures: BTreeMap<RegionId, u32> = BTreeMap::new();
    let mut own_structures: BTreeMap<RegionId, u32> = BTreeMap::new();

    for unit in world.units() {
        if !unit.is_alive() {
            continue;
        }
        let Some(region) = graph.nearest(unit.position) else {
            continue;
        };
        let (compositions, structures) = match unit.alliance {
            Alliance::Enemy => (&mut hostiles, &mut hostile_structures),
            Alliance::Own => (&mut own, &mut own_structures),
            Alliance::Neutral => continue,
        };
        *compositions
            .entry(region)
            .or_default()
            .entry(unit.class)
            .or_insert(0) += 1;
        if unit.class == UnitClass::Structure {
            *structures.entry(region).or_insert(0) += 1;
        }
    }

    let upgrade = world.upgrade_level();
    let epsilon = config.decay_epsilon();
    let mut next = BTreeMap::new();

    for region in graph.regions() {
        let id = region.id;
        let old = previous.get(&id);

        let instant_threat = hostiles.get(&id).map_or(Fixed::ZERO, |c| scorer.threat_of(c));
        let power = own
            .get(&id)
            .map_or(Fixed::ZERO, |c| scorer.power_of(c, upgrade));

        let instant_visibility = sample_visibility(world, region, config);
        let previous_visibility = old.map_or(Fixed::ZERO, |d| d.visibility);
        let visibility = decayed(
            instant_visibility,
            previous_visibility,
            config.visibility_decay(),
            epsilon,
        );

        let retention = threat_retention(visibility, config);
        let previous_threat = old.map_or(Fixed::ZERO, |d| d.threat);
        let threat = decayed(instant_threat, previous_threat, retention, epsilon);

        let previous_cumulative = old.map_or(Fixed::ZERO, |d| d.cumulative_control);
        let cumulative_control = integrate_control(previous_cumulative, power - threat, config);

        let hostile_structure_count = hostile_structures.get(&id).copied().unwrap_or(0);
        let own_structure_count = own_structures.get(&id).copied().unwrap_or(0);

        next.insert(
            id,
            RegionData {
                region: id,
                instant_threat,
                threat,
                diffuse_threat: Fixed::ZERO,
                power,
                control: control_factor(cumulative_control),
                cumulative_control,
                instant_visibility,
                visibility,
                has_enemy_base: intel.is_enemy_base(id)
                    || hostile_structure_count >= config.base_structure_threshold,
                is_own_base: own_structure_count >= config.base_structure_threshold,
                is_blocked: intel.is_blocked(id),
            },
        );
    }

    // Spread every threatened region's decayed threat outward, then let
    // the accumulated field decay with the same memory rule as threat.
    let mut fresh_diffuse: BTreeMap<RegionId, Fixed> = BTreeMap::new();
    let spacing = config.diffusion_spacing();
    for (id, datum) in &next {
        if datum.threat > Fixed::ZERO {
            spread_threat(
                *id,
                datum.threat,
                graph,
                spacing,
                config.diffusion_max_hops,
                &mut fresh_diffuse,
            );
        }
    }
    for (id, datum) in &mut next {
        let fresh = fresh_diffuse.get(id).copied().unwrap_or(Fixed::ZERO);
        let previous_diffuse = previous.get(id).map_or(Fixed::ZERO, |d| d.diffuse_threat);
        let retention = threat_retention(datum.visibility, config);
        datum.diffuse_threat = decayed(fresh, previous_diffuse, retention, epsilon);
    }

    next
}

/// Memory decay: keep the larger of the fresh reading and the faded
/// previous value. Never returns below the fresh reading.
fn decayed(instant: Fixed, previous: Fixed, retention: Fixed, epsilon: Fixed) -> Fixed {
    instant.max(previous * retention - epsilon)
}

/// Threat fades faster where we can see there is nothing left.
fn threat_retention(visibility: Fixed, config: &TuningConfig) -> Fixed {
    let seen = config.threat_decay_seen();
    let hidden = config.threat_decay_hidden();
    let vis = visibility.clamp(Fixed::ZERO, Fixed::ONE);
    hidden - (hidden - seen) * vis
}

/// Fraction of a region's probe points currently in sight.
fn sample_visibility(world: &dyn WorldSnapshot, region: &Region, config: &TuningConfig) -> Fixed {
    let stride = config.visibility_sample_stride as usize;
    let mut total: u32 = 1;
    let mut seen = u32::from(world.is_visible(region.centre));
    for point in region.border.iter().step_by(stride) {
        total += 1;
        if world.is_visible(*point) {
            seen += 1;
        }
    }
    Fixed::from_num(seen) / Fixed::from_num(total)
}

/// Breadth-first spread of one region's threat with distance falloff.
///
/// A region first reached at accumulated centre distance `d` receives
/// `threat * spacing / max(spacing, d)`; the origin itself receives the
/// full amount.
fn spread_threat(
    origin: RegionId,
    threat: Fixed,
    graph: &RegionGraph,
    spacing: Fixed,
    max_hops: u32,
    out: &mut BTreeMap<RegionId, Fixed>,
) {
    let mut visited: BTreeSet<RegionId> = BTreeSet::new();
    let mut queue: VecDeque<(RegionId, Fixed, u32)> = VecDeque::new();
    visited.insert(origin);
    queue.push_back((origin, Fixed::ZERO, 0));

    while let Some((current, travelled, hops)) = queue.pop_front() {
        let falloff = spacing / spacing.max(travelled);
        *out.entry(current).or_insert(Fixed::ZERO) += threat * falloff;

        if hops >= max_hops {
            continue;
        }
        let Some(region) = graph.region(current) else {
            continue;
        };
        for &neighbour in &region.neighbours {
            if !visited.insert(neighbour) {
                continue;
            }
            let Some(step) = graph.centre_distance(current, neighbour) else {
                continue;
            };
            queue.push_back((neighbour, travelled + step, hops + 1));
        }
    }
}

/// Advance the control integrator by one power-minus-threat delta.
///
/// Deltas pushing against established control are log-dampened so a
/// single spike cannot flip a long-held region.
fn integrate_control(previous: Fixed, delta: Fixed, config: &TuningConfig) -> Fixed {
    let opposing = (delta > Fixed::ZERO && previous < Fixed::ZERO)
        || (delta < Fixed::ZERO && previous > Fixed::ZERO);
    let step = if opposing {
        let resistance =
            Fixed::ONE + config.control_dampening() * fixed_ln(previous.abs() + Fixed::ONE);
        delta / resistance
    } else {
        delta
    };
    let clamp = config.control_clamp();
    (previous + step).clamp(-clamp, clamp)
}

/// Collapse the integrator onto a signed logarithmic scale.
fn control_factor(cumulative: Fixed) -> Fixed {
    let magnitude = fixed_ln(cumulative.abs() + Fixed::ONE);
    if cumulative < Fixed::ZERO {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2Fixed;
    use crate::fixtures::{vec2, ScriptedWorld};
    use crate::maps;

    fn quick_config() -> TuningConfig {
        TuningConfig {
            threat_refresh_interval: 1,
            ..TuningConfig::default()
        }
    }

    fn refresh(
        model: &mut ThreatModel,
        world: &ScriptedWorld,
        graph: &RegionGraph,
        config: &TuningConfig,
    ) -> bool {
        model.refresh(world, graph, &StandardScorer, &NoIntel, config)
    }

    #[test]
    fn test_refresh_respects_interval() {
        let graph = maps::two_regions();
        let config = TuningConfig::default();
        let mut world = ScriptedWorld::new();
        let mut model = ThreatModel::new();

        assert!(refresh(&mut model, &world, &graph, &config));
        world.advance(1);
        assert!(!refresh(&mut model, &world, &graph, &config));
        world.advance(config.threat_refresh_interval);
        assert!(refresh(&mut model, &world, &graph, &config));
    }

    #[test]
    fn test_instant_threat_from_hostiles() {
        let graph = maps::two_regions();
        let config = quick_config();
        let mut world = ScriptedWorld::new();
        world.add_unit(1, Alliance::Enemy, UnitClass::Assault, vec2(0, 0));
        world.add_unit(2, Alliance::Enemy, UnitClass::Ranged, vec2(10, 0));

        let mut model = ThreatModel::new();
        refresh(&mut model, &world, &graph, &config);

        let data = model.region(RegionId(1)).unwrap();
        // One assault (10) plus one ranged (14).
        assert_eq!(data.instant_threat, Fixed::from_num(24));
        assert_eq!(data.threat, Fixed::from_num(24));
        assert_eq!(
            model.region(RegionId(2)).unwrap().instant_threat,
            Fixed::ZERO
        );
    }

    #[test]
    fn test_threat_decays_monotonically_to_zero_when_seen() {
        let graph = maps::two_regions();
        let config = quick_config();
        let mut world = ScriptedWorld::new();
        let enemy = world.add_unit(1, Alliance::Enemy, UnitClass::Siege, vec2(0, 0));

        let mut model = ThreatModel::new();
        refresh(&mut model, &world, &graph, &config);
        let mut previous = model.region(RegionId(1)).unwrap().threat;
        assert!(previous > Fixed::ZERO);

        // Hostile leaves, region stays fully visible.
        world.kill(enemy);
        for _ in 0..60 {
            world.advance(1);
            refresh(&mut model, &world, &graph, &config);
            let current = model.region(RegionId(1)).unwrap().threat;
            if previous == Fixed::ZERO {
                assert_eq!(current, Fixed::ZERO);
                break;
            }
            assert!(current < previous, "threat must fall every refresh");
            previous = current;
        }
        assert_eq!(model.region(RegionId(1)).unwrap().threat, Fixed::ZERO);
    }

    #[test]
    fn test_hidden_regions_forget_slower() {
        let graph = maps::two_regions();
        let config = quick_config();

        let run = |hide: bool| {
            let mut world = ScriptedWorld::new();
            let enemy = world.add_unit(1, Alliance::Enemy, UnitClass::Siege, vec2(0, 0));
            let mut model = ThreatModel::new();
            refresh(&mut model, &world, &graph, &config);
            world.kill(enemy);
            if hide {
                world.hide_all();
            }
            world.advance(1);
            refresh(&mut model, &world, &graph, &config);
            model.region(RegionId(1)).unwrap().threat
        };

        let seen = run(false);
        let hidden = run(true);
        assert!(hidden > seen, "unseen threat must be retained longer");
    }

    #[test]
    fn test_visibility_decay_rule() {
        let graph = maps::two_regions();
        let config = quick_config();
        let mut world = ScriptedWorld::new();
        let mut model = ThreatModel::new();

        refresh(&mut model, &world, &graph, &config);
        assert_eq!(model.region(RegionId(1)).unwrap().visibility, Fixed::ONE);

        world.hide_all();
        world.advance(1);
        refresh(&mut model, &world, &graph, &config);
        let expected = Fixed::ONE * config.visibility_decay() - config.decay_epsilon();
        assert_eq!(model.region(RegionId(1)).unwrap().visibility, expected);
    }

    #[test]
    fn test_two_region_diffusion_bounds() {
        let graph = maps::two_regions();
        let config = quick_config();
        let mut world = ScriptedWorld::new();
        world.add_unit(1, Alliance::Enemy, UnitClass::Ranged, vec2(0, 0));

        let mut model = ThreatModel::new();
        refresh(&mut model, &world, &graph, &config);

        let origin = model.region(RegionId(1)).unwrap();
        let neighbour = model.region(RegionId(2)).unwrap();
        let threat = origin.threat;
        assert!(threat > Fixed::ZERO);
        // The origin keeps its full threat in the diffuse field.
        assert_eq!(origin.diffuse_threat, threat);
        // The neighbour sees a strictly positive, strictly smaller share.
        assert!(neighbour.diffuse_threat > Fixed::ZERO);
        assert!(neighbour.diffuse_threat < threat);
    }

    #[test]
    fn test_diffusion_falls_with_distance() {
        let graph = maps::line(4, 512);
        let config = quick_config();
        let mut world = ScriptedWorld::new();
        world.add_unit(1, Alliance::Enemy, UnitClass::Siege, vec2(0, 0));

        let mut model = ThreatModel::new();
        refresh(&mut model, &world, &graph, &config);

        let d2 = model.region(RegionId(2)).unwrap().diffuse_threat;
        let d3 = model.region(RegionId(3)).unwrap().diffuse_threat;
        let d4 = model.region(RegionId(4)).unwrap().diffuse_threat;
        assert!(d2 > d3);
        assert!(d3 > d4);
        assert!(d4 > Fixed::ZERO);
    }

    #[test]
    fn test_control_rises_under_sustained_power() {
        let graph = maps::two_regions();
        let config = quick_config();
        let mut world = ScriptedWorld::new();
        world.add_own_squad(1, 4, UnitClass::Assault, vec2(0, 0));

        let mut model = ThreatModel::new();
        let mut last = Fixed::ZERO;
        for _ in 0..5 {
            refresh(&mut model, &world, &graph, &config);
            let control = model.region(RegionId(1)).unwrap().control;
            assert!(control > last);
            last = control;
            world.advance(1);
        }
    }

    #[test]
    fn test_control_resists_single_opposing_spike() {
        let graph = maps::two_regions();
        let config = quick_config();
        let mut world = ScriptedWorld::new();
        let squad = world.add_own_squad(1, 4, UnitClass::Assault, vec2(0, 0));

        let mut model = ThreatModel::new();
        for _ in 0..10 {
            refresh(&mut model, &world, &graph, &config);
            world.advance(1);
        }
        let established = model.region(RegionId(1)).unwrap().cumulative_control;
        assert!(established > Fixed::ZERO);

        // Forces wiped, a large hostile army arrives.
        for id in squad {
            world.kill(id);
        }
        for n in 0..8 {
            world.add_unit(200 + n, Alliance::Enemy, UnitClass::Siege, vec2(0, 0));
        }
        refresh(&mut model, &world, &graph, &config);

        let after = model.region(RegionId(1)).unwrap();
        // Still positive: one spike cannot flip established control.
        assert!(after.cumulative_control > Fixed::ZERO);
        assert!(after.cumulative_control < established);

        // Sustained opposition eventually flips it.
        for _ in 0..40 {
            world.advance(1);
            refresh(&mut model, &world, &graph, &config);
        }
        assert!(model.region(RegionId(1)).unwrap().control < Fixed::ZERO);
    }

    #[test]
    fn test_base_flags_from_structure_density() {
        let graph = maps::two_regions();
        let config = quick_config();
        let mut world = ScriptedWorld::new();
        for n in 0..3 {
            world.add_unit(n, Alliance::Own, UnitClass::Structure, vec2(0, 0));
        }
        for n in 10..13 {
            world.add_unit(n, Alliance::Enemy, UnitClass::Structure, vec2(512, 0));
        }

        let mut model = ThreatModel::new();
        refresh(&mut model, &world, &graph, &config);

        assert!(model.region(RegionId(1)).unwrap().is_own_base);
        assert!(!model.region(RegionId(1)).unwrap().has_enemy_base);
        assert!(model.region(RegionId(2)).unwrap().has_enemy_base);
    }

    #[test]
    fn test_intel_flags_override_observation() {
        struct FixedIntel;
        impl BaseIntel for FixedIntel {
            fn is_enemy_base(&self, region: RegionId) -> bool {
                region == RegionId(2)
            }
            fn is_blocked(&self, region: RegionId) -> bool {
                region == RegionId(1)
            }
        }

        let graph = maps::two_regions();
        let config = quick_config();
        let world = ScriptedWorld::new();
        let mut model = ThreatModel::new();
        model.refresh(&world, &graph, &StandardScorer, &FixedIntel, &config);

        assert!(model.region(RegionId(1)).unwrap().is_blocked);
        assert!(model.region(RegionId(2)).unwrap().has_enemy_base);
    }

    #[test]
    fn test_kill_zone_amplification() {
        let config = quick_config();
        let mut plain = RegionData::empty(RegionId(1));
        plain.diffuse_threat = Fixed::from_num(10);
        assert_eq!(plain.kill_zone_factor(&config), Fixed::from_num(10));

        plain.has_enemy_base = true;
        assert_eq!(plain.kill_zone_factor(&config), Fixed::from_num(30));
    }

    #[test]
    fn test_strongest_own_region() {
        let graph = maps::line(3, 512);
        let config = quick_config();
        let mut world = ScriptedWorld::new();
        world.add_own_squad(1, 2, UnitClass::Assault, vec2(0, 0));
        world.add_own_squad(10, 6, UnitClass::Assault, vec2(512, 0));

        let mut model = ThreatModel::new();
        refresh(&mut model, &world, &graph, &config);
        assert_eq!(model.strongest_own_region(), Some(RegionId(2)));
    }

    #[test]
    fn test_state_hash_tracks_content() {
        let graph = maps::two_regions();
        let config = quick_config();
        let mut world = ScriptedWorld::new();
        let mut model = ThreatModel::new();
        refresh(&mut model, &world, &graph, &config);
        let empty_hash = model.state_hash();

        world.add_unit(1, Alliance::Enemy, UnitClass::Assault, Vec2Fixed::ZERO);
        world.advance(1);
        refresh(&mut model, &world, &graph, &config);
        assert_ne!(model.state_hash(), empty_hash);
    }

    #[test]
    fn test_scorer_upgrade_bonus() {
        let mut composition = Composition::new();
        composition.insert(UnitClass::Assault, 10);
        let base = StandardScorer.power_of(&composition, 0);
        let upgraded = StandardScorer.power_of(&composition, 3);
        assert_eq!(base, Fixed::from_num(100));
        assert_eq!(upgraded, Fixed::from_num(130));
    }
}
