//! Small region graphs with hand-checkable geometry.
//!
//! Region ids are 1-based and centres sit 512 apart, so tests can do
//! the distance and route arithmetic on paper. Border samples are a
//! coarse square around each centre, close enough for visibility
//! probing in fixtures.

use crate::fixtures::vec2;
use phalanx_core::region::{Region, RegionGraph, RegionId};

fn region(id: u32, x: i64, y: i64, neighbours: &[u32]) -> Region {
    Region {
        id: RegionId(id),
        centre: vec2(x, y),
        neighbours: neighbours.iter().map(|&n| RegionId(n)).collect(),
        border: vec![
            vec2(x - 64, y - 64),
            vec2(x + 64, y - 64),
            vec2(x - 64, y + 64),
            vec2(x + 64, y + 64),
        ],
    }
}

/// Two adjacent regions, r1 at the origin and r2 at `(512, 0)`.
#[must_use]
pub fn two_regions() -> RegionGraph {
    line(2, 512)
}

/// A chain of `count` regions along the x axis, `spacing` apart.
///
/// Region `i` (1-based) sits at `((i - 1) * spacing, 0)` and touches
/// only its immediate neighbours in the chain.
#[must_use]
pub fn line(count: u32, spacing: i64) -> RegionGraph {
    let regions = (1..=count)
        .map(|i| {
            let mut neighbours = Vec::new();
            if i > 1 {
                neighbours.push(i - 1);
            }
            if i < count {
                neighbours.push(i + 1);
            }
            region(i, spacing * i64::from(i - 1), 0, &neighbours)
        })
        .collect();
    RegionGraph::new(regions).expect("line map is well formed")
}

/// Four regions on the corners of a 512-point square.
///
/// Sides are traversable, diagonals are not, so every corner-to-corner
/// route detours through one of the two shared sides.
#[must_use]
pub fn square() -> RegionGraph {
    RegionGraph::new(vec![
        region(1, 0, 0, &[2, 3]),
        region(2, 512, 0, &[1, 4]),
        region(3, 0, 512, &[1, 4]),
        region(4, 512, 512, &[2, 3]),
    ])
    .expect("square map is well formed")
}

/// Two regions with no traversable border between them.
#[must_use]
pub fn islands() -> RegionGraph {
    RegionGraph::new(vec![region(1, 0, 0, &[]), region(2, 512, 0, &[])])
        .expect("island map is well formed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_chains_neighbours() {
        let graph = line(4, 512);
        assert_eq!(graph.len(), 4);
        assert_eq!(
            graph.region(RegionId(2)).unwrap().neighbours,
            vec![RegionId(1), RegionId(3)]
        );
        assert_eq!(graph.region(RegionId(1)).unwrap().neighbours, vec![RegionId(2)]);
        assert_eq!(graph.nearest(vec2(600, 10)), Some(RegionId(2)));
    }

    #[test]
    fn test_square_has_no_diagonals() {
        let graph = square();
        let corner = graph.region(RegionId(1)).unwrap();
        assert!(!corner.neighbours.contains(&RegionId(4)));
        assert_eq!(corner.neighbours, vec![RegionId(2), RegionId(3)]);
    }

    #[test]
    fn test_islands_are_disconnected() {
        let graph = islands();
        assert!(graph.region(RegionId(1)).unwrap().neighbours.is_empty());
        assert!(graph.region(RegionId(2)).unwrap().neighbours.is_empty());
    }
}
