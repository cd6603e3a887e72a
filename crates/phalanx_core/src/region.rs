//! Static region graph.
//!
//! The map is partitioned into convex-ish regions ahead of time by an
//! external analyzer; the core receives the finished graph and never
//! mutates it. Points are assigned to whichever region centre is
//! nearest, which keeps the assignment total even for points outside
//! every region polygon.

use crate::error::{CoreError, Result};
use crate::math::Vec2Fixed;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque identifier for a map region.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RegionId(pub u32);

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// One precomputed map region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Stable identifier.
    pub id: RegionId,
    /// Geometric centre.
    pub centre: Vec2Fixed,
    /// Ids of regions sharing a traversable border, ascending.
    pub neighbours: Vec<RegionId>,
    /// Sampled border points, used for visibility probing.
    pub border: Vec<Vec2Fixed>,
}

/// Validated, immutable collection of regions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionGraph {
    regions: BTreeMap<RegionId, Region>,
}

impl RegionGraph {
    /// Build a graph from a list of regions.
    ///
    /// Neighbour lists are sorted during construction so traversal order
    /// never depends on input order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedGraph`] when ids repeat, a
    /// neighbour id does not exist, a region lists itself, or adjacency
    /// is not symmetric.
    pub fn new(regions: Vec<Region>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for mut region in regions {
            region.neighbours.sort_unstable();
            region.neighbours.dedup();
            let id = region.id;
            if map.insert(id, region).is_some() {
                return Err(CoreError::MalformedGraph(format!("duplicate region {id}")));
            }
        }

        for (id, region) in &map {
            for n in &region.neighbours {
                if n == id {
                    return Err(CoreError::MalformedGraph(format!(
                        "region {id} lists itself as a neighbour"
                    )));
                }
                let Some(other) = map.get(n) else {
                    return Err(CoreError::MalformedGraph(format!(
                        "region {id} references missing neighbour {n}"
                    )));
                };
                if !other.neighbours.contains(id) {
                    return Err(CoreError::MalformedGraph(format!(
                        "adjacency between {id} and {n} is not symmetric"
                    )));
                }
            }
        }

        Ok(Self { regions: map })
    }

    /// Look up a region by id.
    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    /// Iterate regions in ascending id order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Number of regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the graph holds no regions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Region whose centre is nearest to a point.
    ///
    /// Ties break toward the lower region id. `None` only for an empty
    /// graph.
    #[must_use]
    pub fn nearest(&self, point: Vec2Fixed) -> Option<RegionId> {
        self.regions
            .values()
            .map(|r| (r.centre.distance_squared(point), r.id))
            .min()
            .map(|(_, id)| id)
    }

    /// Centre-to-centre distance between two regions, if both exist.
    #[must_use]
    pub fn centre_distance(&self, a: RegionId, b: RegionId) -> Option<crate::math::Fixed> {
        let ra = self.regions.get(&a)?;
        let rb = self.regions.get(&b)?;
        Some(ra.centre.distance(rb.centre))
    }
}
