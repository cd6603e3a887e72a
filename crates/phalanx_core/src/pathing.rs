//! Policy-weighted pathfinding over the region graph.
//!
//! A* with deterministic tie-breaking, like the rest of the core all in
//! fixed-point. Danger never makes a region impassable; avoidance
//! policies only multiply edge costs, so a squad ordered through a kill
//! zone will still find its way when no detour exists. Only regions the
//! intel layer marks blocked are excluded outright.

use crate::config::TuningConfig;
use crate::math::Fixed;
use crate::region::{RegionGraph, RegionId};
use crate::threat::{RegionData, ThreatModel};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

/// How strongly a route should bend around danger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AvoidancePolicy {
    /// Shortest route, ignoring threat.
    #[default]
    Normal,
    /// Penalize regions under diffuse enemy threat.
    AvoidEnemyArmy,
    /// Penalize threat harder where hostile bases anchor it.
    AvoidKillZone,
}

/// A node in the A* open set priority queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct PathNode {
    region: RegionId,
    /// f_score = g_score + heuristic.
    f_score: Fixed,
    /// Deterministic tie-breaker: lower region id first.
    tie_breaker: u32,
}

impl Ord for PathNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, so comparisons are reversed for
        // min-heap behavior; equal scores fall back to the lower id.
        match other.f_score.cmp(&self.f_score) {
            Ordering::Equal => other.tie_breaker.cmp(&self.tie_breaker),
            ord => ord,
        }
    }
}

impl PartialOrd for PathNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Plan a route between two regions.
///
/// Returns the region sequence including both endpoints, or `None`
/// when either endpoint is unknown or no unblocked route exists.
/// `None` is routine backpressure: callers retry on a later tick.
#[must_use]
pub fn plan_path(
    graph: &RegionGraph,
    threat: &ThreatModel,
    start: RegionId,
    goal: RegionId,
    policy: AvoidancePolicy,
    config: &TuningConfig,
) -> Option<Vec<RegionId>> {
    graph.region(start)?;
    let goal_centre = graph.region(goal)?.centre;

    if start == goal {
        return Some(vec![start]);
    }

    let mut open_set: BinaryHeap<PathNode> = BinaryHeap::new();
    let mut came_from: BTreeMap<RegionId, RegionId> = BTreeMap::new();
    let mut g_score: BTreeMap<RegionId, Fixed> = BTreeMap::new();

    let start_h = graph.region(start)?.centre.distance(goal_centre);
    g_score.insert(start, Fixed::ZERO);
    open_set.push(PathNode {
        region: start,
        f_score: start_h,
        tie_breaker: start.0,
    });

    while let Some(current) = open_set.pop() {
        if current.region == goal {
            return Some(reconstruct_path(&came_from, goal));
        }

        let current_g = g_score
            .get(&current.region)
            .copied()
            .unwrap_or(Fixed::MAX);
        let Some(region) = graph.region(current.region) else {
            continue;
        };

        for &neighbour in &region.neighbours {
            let data = threat.region(neighbour);
            if data.is_some_and(|d| d.is_blocked) {
                continue;
            }
            let Some(step) = graph.centre_distance(current.region, neighbour) else {
                continue;
            };

            let cost = step * policy_multiplier(policy, data, config);
            let tentative_g = current_g + cost;
            let neighbour_g = g_score.get(&neighbour).copied().unwrap_or(Fixed::MAX);

            if tentative_g < neighbour_g {
                came_from.insert(neighbour, current.region);
                g_score.insert(neighbour, tentative_g);

                let h = graph
                    .region(neighbour)
                    .map_or(Fixed::ZERO, |r| r.centre.distance(goal_centre));
                open_set.push(PathNode {
                    region: neighbour,
                    f_score: tentative_g + h,
                    tie_breaker: neighbour.0,
                });
            }
        }
    }

    None
}

/// Edge cost multiplier for entering a region under a policy.
///
/// Always at least one and monotone in the region's diffuse threat, so
/// the straight-line heuristic stays admissible.
fn policy_multiplier(
    policy: AvoidancePolicy,
    data: Option<&RegionData>,
    config: &TuningConfig,
) -> Fixed {
    let Some(data) = data else {
        return Fixed::ONE;
    };
    match policy {
        AvoidancePolicy::Normal => Fixed::ONE,
        AvoidancePolicy::AvoidEnemyArmy => {
            Fixed::ONE + data.diffuse_threat / config.avoidance_normalizer()
        }
        AvoidancePolicy::AvoidKillZone => {
            Fixed::ONE + data.kill_zone_factor(config) / config.avoidance_normalizer()
        }
    }
}

/// Walk the came_from chain back from the goal.
fn reconstruct_path(came_from: &BTreeMap<RegionId, RegionId>, goal: RegionId) -> Vec<RegionId> {
    let mut path = vec![goal];
    let mut current = goal;
    while let Some(&previous) = came_from.get(&current) {
        path.push(previous);
        current = previous;
    }
    path.reverse();
    path
}
