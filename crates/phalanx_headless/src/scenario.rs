//! Scenario loading and construction.
//!
//! A scenario is everything one headless run needs: the region map, the
//! units standing on it at tick zero, the standing orders the scheduler
//! starts with and any tuning overrides. Scenarios are stored as RON so
//! sweeps can edit cadences and deployments without recompiling.

use std::collections::BTreeSet;
use std::path::Path;

use phalanx_core::config::TuningConfig;
use phalanx_core::error::CoreError;
use phalanx_core::math::{Fixed, Vec2Fixed};
use phalanx_core::region::{Region, RegionGraph, RegionId};
use phalanx_core::threat::BaseIntel;
use phalanx_core::world::{Alliance, UnitClass};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// The scenario describes an invalid region graph or tuning.
    #[error("invalid scenario: {0}")]
    Invalid(#[from] CoreError),
    /// The name matches no builtin scenario and no file on disk.
    #[error("unknown scenario: {0} (not a builtin, not a file)")]
    Unknown(String),
}

/// A complete scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Region map, one entry per region.
    pub regions: Vec<RegionSpec>,
    /// Units standing on the map at tick zero.
    pub deployments: Vec<Deployment>,
    /// Standing army orders registered at startup.
    pub armies: Vec<ArmyOrder>,
    /// Register a surveillance task alongside the armies.
    #[serde(default)]
    pub surveillance: bool,
    /// Regions known to hold a hostile base.
    #[serde(default)]
    pub enemy_bases: Vec<u32>,
    /// Regions closed to ground movement.
    #[serde(default)]
    pub blocked: Vec<u32>,
    /// Aggregate upgrade level of own forces.
    #[serde(default)]
    pub upgrade_level: u32,
    /// Tick limit for a run.
    pub max_ticks: u64,
    /// Tuning overrides; unlisted fields keep their defaults.
    #[serde(default)]
    pub tuning: TuningConfig,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: "Face Off".to_string(),
            description: "Two regions, one army order, a token defence".to_string(),
            regions: vec![
                RegionSpec::new(1, 0, 0, &[2]),
                RegionSpec::new(2, 512, 0, &[1]),
            ],
            deployments: vec![
                Deployment::new(1, 6, Alliance::Own, UnitClass::Assault, 0, 0),
                Deployment::new(101, 2, Alliance::Enemy, UnitClass::Assault, 512, 0),
            ],
            armies: vec![ArmyOrder {
                key: "army:main".to_string(),
                priority: 30,
                size: 6,
                target: 2,
                home: 1,
                rally: (0, 0),
            }],
            surveillance: false,
            enemy_bases: Vec::new(),
            blocked: Vec::new(),
            upgrade_level: 0,
            max_ticks: 1500,
            tuning: TuningConfig::default(),
        }
    }
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let scenario: Scenario = ron::from_str(&contents)?;
        Ok(scenario)
    }

    /// Load from a RON string (useful for embedded scenarios).
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = ron::from_str(ron)?;
        Ok(scenario)
    }

    /// Resolve a CLI scenario argument: a file path if one exists under
    /// that name, otherwise a builtin.
    pub fn resolve(spec: &str) -> Result<Self, ScenarioError> {
        if Path::new(spec).exists() {
            return Self::load(spec);
        }
        match spec {
            "skirmish" => Ok(Self::skirmish()),
            other => Err(ScenarioError::Unknown(other.to_string())),
        }
    }

    /// Builtin four-region corridor assault.
    #[must_use]
    pub fn skirmish() -> Self {
        Self {
            name: "Bridge Skirmish".to_string(),
            description: "Push a mixed squad down a four-region corridor".to_string(),
            regions: vec![
                RegionSpec::new(1, 0, 0, &[2]),
                RegionSpec::new(2, 512, 0, &[1, 3]),
                RegionSpec::new(3, 1024, 0, &[2, 4]),
                RegionSpec::new(4, 1536, 0, &[3]),
            ],
            deployments: vec![
                Deployment::new(1, 6, Alliance::Own, UnitClass::Assault, 0, 0),
                Deployment::new(21, 2, Alliance::Own, UnitClass::Ranged, -96, 0),
                Deployment::new(101, 4, Alliance::Enemy, UnitClass::Assault, 1536, 0),
                Deployment::new(120, 1, Alliance::Enemy, UnitClass::Structure, 1600, 64),
            ],
            armies: vec![ArmyOrder {
                key: "army:spear".to_string(),
                priority: 30,
                size: 8,
                target: 4,
                home: 1,
                rally: (0, 0),
            }],
            surveillance: true,
            enemy_bases: Vec::new(),
            blocked: Vec::new(),
            upgrade_level: 0,
            max_ticks: 3000,
            tuning: TuningConfig::default(),
        }
    }

    /// Build the region graph this scenario describes.
    pub fn graph(&self) -> Result<RegionGraph, ScenarioError> {
        let regions: Vec<Region> = self.regions.iter().map(RegionSpec::to_region).collect();
        Ok(RegionGraph::new(regions)?)
    }

    /// Assemble base intel from the scenario's region annotations.
    #[must_use]
    pub fn intel(&self) -> ScenarioIntel {
        ScenarioIntel {
            enemy_bases: self.enemy_bases.iter().map(|&id| RegionId(id)).collect(),
            blocked: self.blocked.iter().map(|&id| RegionId(id)).collect(),
        }
    }
}

/// One region of the scenario map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSpec {
    /// Region id, unique across the map.
    pub id: u32,
    /// Centre point (x, y) in world units.
    pub centre: (i64, i64),
    /// Ids of adjacent regions; adjacency must be symmetric.
    pub neighbours: Vec<u32>,
    /// Half-width used to place visibility sample points.
    #[serde(default = "default_extent")]
    pub extent: i64,
}

fn default_extent() -> i64 {
    256
}

impl RegionSpec {
    /// Create a region spec with the default extent.
    #[must_use]
    pub fn new(id: u32, x: i64, y: i64, neighbours: &[u32]) -> Self {
        Self {
            id,
            centre: (x, y),
            neighbours: neighbours.to_vec(),
            extent: default_extent(),
        }
    }

    fn to_region(&self) -> Region {
        let centre = point(self.centre);
        let extent = Fixed::from_num(self.extent);
        Region {
            id: RegionId(self.id),
            centre,
            neighbours: self.neighbours.iter().map(|&n| RegionId(n)).collect(),
            border: vec![
                Vec2Fixed::new(centre.x - extent, centre.y),
                Vec2Fixed::new(centre.x + extent, centre.y),
                Vec2Fixed::new(centre.x, centre.y - extent),
                Vec2Fixed::new(centre.x, centre.y + extent),
            ],
        }
    }
}

/// A block of identical units placed around an anchor point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Id of the first unit; later units count up from here.
    pub first_id: u64,
    /// Number of units in the block.
    pub count: u32,
    /// Side the units fight for.
    pub alliance: Alliance,
    /// Class shared by every unit in the block.
    pub class: UnitClass,
    /// Anchor point (x, y) the block spreads around.
    pub around: (i64, i64),
}

impl Deployment {
    /// Create a deployment block.
    #[must_use]
    pub fn new(
        first_id: u64,
        count: u32,
        alliance: Alliance,
        class: UnitClass,
        x: i64,
        y: i64,
    ) -> Self {
        Self {
            first_id,
            count,
            alliance,
            class,
            around: (x, y),
        }
    }
}

/// A standing army order registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmyOrder {
    /// Task key; must be unique among the orders.
    pub key: String,
    /// Scheduling priority.
    pub priority: i32,
    /// Squad size the army recruits towards.
    pub size: u32,
    /// Region the army attacks.
    pub target: u32,
    /// Region the army withdraws to.
    pub home: u32,
    /// Rally point (x, y) for regrouping.
    pub rally: (i64, i64),
}

/// Base intel assembled from scenario annotations.
#[derive(Debug, Clone, Default)]
pub struct ScenarioIntel {
    enemy_bases: BTreeSet<RegionId>,
    blocked: BTreeSet<RegionId>,
}

impl BaseIntel for ScenarioIntel {
    fn is_enemy_base(&self, region: RegionId) -> bool {
        self.enemy_bases.contains(&region)
    }

    fn is_blocked(&self, region: RegionId) -> bool {
        self.blocked.contains(&region)
    }
}

/// Convert a scenario coordinate pair to a world point.
pub(crate) fn point(p: (i64, i64)) -> Vec2Fixed {
    Vec2Fixed::new(Fixed::from_num(p.0), Fixed::from_num(p.1))
}
