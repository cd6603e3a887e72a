//! Tuning configuration for the decision core.
//!
//! Every cadence, radius and decay constant the core uses lives here so
//! scenarios can override them from data files. Fields hold plain
//! integers (ticks, world units, permille ratios) so the values stay
//! readable in RON; accessors convert to fixed-point once per use.
//!
//! A config is validated once at startup. Validation failures are fatal
//! ([`CoreError::InvalidTuning`]); per-tick code never revalidates.

use crate::error::{CoreError, Result};
use crate::math::Fixed;
use serde::{Deserialize, Serialize};

/// Tuning constants for scheduling, squads, threat and pathing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Ticks between reservation reconciliation sweeps.
    pub reconcile_interval: u64,
    /// Squad update period while a hostile army is nearby.
    pub engaged_update_interval: u64,
    /// Squad update period while no hostile army is nearby.
    pub calm_update_interval: u64,
    /// Ticks a squad keeps a planned path before recomputing it.
    pub path_refresh_interval: u64,
    /// Ticks between threat model recomputes.
    pub threat_refresh_interval: u64,

    /// Distance at which a waypoint counts as reached, in world units.
    pub waypoint_tolerance_units: u32,
    /// Distance at which a child squad folds into its parent, in world units.
    pub merge_radius_units: u32,
    /// Radius around a squad's centre scanned for hostile armies, in world units.
    pub engage_radius_units: u32,
    /// Distance at which a member counts as fighting, in world units.
    pub contact_radius_units: u32,
    /// Average inter-region spacing used by threat diffusion, in world units.
    pub diffusion_spacing_units: u32,
    /// Dispersion below which a regrouping squad counts as gathered, in world units.
    pub regroup_dispersion_units: u32,
    /// Dispersion above which an attacking squad falls back to regrouping, in world units.
    pub disperse_limit_units: u32,

    /// Per-recompute visibility retention, in permille.
    pub visibility_decay_permille: u32,
    /// Threat retention for a fully visible region, in permille.
    pub threat_decay_seen_permille: u32,
    /// Threat retention for an unseen region, in permille.
    pub threat_decay_hidden_permille: u32,
    /// Retention of the fight momentum accumulator per squad update, in permille.
    pub performance_smoothing_permille: u32,
    /// Strength of the logarithmic dampening on opposing control deltas, in permille.
    pub control_dampening_permille: u32,
    /// Target visibility below which an attacking squad asks for a scan, in permille.
    pub scan_visibility_permille: u32,

    /// Subtractive decay floor, in thousandths of a threat point.
    pub decay_epsilon_milli: u32,

    /// Maximum hop count for threat diffusion.
    pub diffusion_max_hops: u32,
    /// Diffuse threat multiplier for regions holding a hostile base.
    pub kill_zone_multiplier: u32,
    /// Threat points that double a path edge cost under avoidance policies.
    pub avoidance_normalizer_points: u32,
    /// Border samples skipped between visibility probes.
    pub visibility_sample_stride: u32,
    /// Structures in one region that mark it as a base.
    pub base_structure_threshold: u32,
    /// Cap on the absolute value of the control integrator, in threat points.
    pub control_clamp_points: u32,

    /// Momentum at or above which a squad counts as winning.
    pub performance_win_threshold: i32,
    /// Momentum at or below which a squad counts as slightly losing.
    pub performance_lose_threshold: i32,
    /// Momentum at or below which a squad counts as badly losing.
    pub performance_rout_threshold: i32,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: 22,
            engaged_update_interval: 2,
            calm_update_interval: 11,
            path_refresh_interval: 44,
            threat_refresh_interval: 4,
            waypoint_tolerance_units: 96,
            merge_radius_units: 192,
            engage_radius_units: 320,
            contact_radius_units: 160,
            diffusion_spacing_units: 384,
            regroup_dispersion_units: 128,
            disperse_limit_units: 320,
            visibility_decay_permille: 950,
            threat_decay_seen_permille: 800,
            threat_decay_hidden_permille: 980,
            performance_smoothing_permille: 900,
            control_dampening_permille: 1000,
            scan_visibility_permille: 300,
            decay_epsilon_milli: 10,
            diffusion_max_hops: 6,
            kill_zone_multiplier: 3,
            avoidance_normalizer_points: 100,
            visibility_sample_stride: 4,
            base_structure_threshold: 3,
            control_clamp_points: 1000,
            performance_win_threshold: 15,
            performance_lose_threshold: -15,
            performance_rout_threshold: -50,
        }
    }
}

fn permille(value: u32) -> Fixed {
    Fixed::from_num(value) / Fixed::from_num(1000)
}

impl TuningConfig {
    /// Waypoint-reached tolerance.
    #[must_use]
    pub fn waypoint_tolerance(&self) -> Fixed {
        Fixed::from_num(self.waypoint_tolerance_units)
    }

    /// Parent-merge radius.
    #[must_use]
    pub fn merge_radius(&self) -> Fixed {
        Fixed::from_num(self.merge_radius_units)
    }

    /// Hostile army search radius.
    #[must_use]
    pub fn engage_radius(&self) -> Fixed {
        Fixed::from_num(self.engage_radius_units)
    }

    /// Member fighting-contact radius.
    #[must_use]
    pub fn contact_radius(&self) -> Fixed {
        Fixed::from_num(self.contact_radius_units)
    }

    /// Diffusion spacing constant.
    #[must_use]
    pub fn diffusion_spacing(&self) -> Fixed {
        Fixed::from_num(self.diffusion_spacing_units)
    }

    /// Gathered-squad dispersion bound.
    #[must_use]
    pub fn regroup_dispersion(&self) -> Fixed {
        Fixed::from_num(self.regroup_dispersion_units)
    }

    /// Scattered-squad dispersion bound.
    #[must_use]
    pub fn disperse_limit(&self) -> Fixed {
        Fixed::from_num(self.disperse_limit_units)
    }

    /// Visibility retention factor.
    #[must_use]
    pub fn visibility_decay(&self) -> Fixed {
        permille(self.visibility_decay_permille)
    }

    /// Threat retention factor under full visibility.
    #[must_use]
    pub fn threat_decay_seen(&self) -> Fixed {
        permille(self.threat_decay_seen_permille)
    }

    /// Threat retention factor with no visibility.
    #[must_use]
    pub fn threat_decay_hidden(&self) -> Fixed {
        permille(self.threat_decay_hidden_permille)
    }

    /// Momentum retention factor.
    #[must_use]
    pub fn performance_smoothing(&self) -> Fixed {
        permille(self.performance_smoothing_permille)
    }

    /// Control dampening strength.
    #[must_use]
    pub fn control_dampening(&self) -> Fixed {
        permille(self.control_dampening_permille)
    }

    /// Scan-request visibility bound.
    #[must_use]
    pub fn scan_visibility(&self) -> Fixed {
        permille(self.scan_visibility_permille)
    }

    /// Subtractive decay floor.
    #[must_use]
    pub fn decay_epsilon(&self) -> Fixed {
        Fixed::from_num(self.decay_epsilon_milli) / Fixed::from_num(1000)
    }

    /// Avoidance cost normalizer.
    #[must_use]
    pub fn avoidance_normalizer(&self) -> Fixed {
        Fixed::from_num(self.avoidance_normalizer_points)
    }

    /// Control integrator cap.
    #[must_use]
    pub fn control_clamp(&self) -> Fixed {
        Fixed::from_num(self.control_clamp_points)
    }

    /// Winning-momentum bound.
    #[must_use]
    pub fn win_threshold(&self) -> Fixed {
        Fixed::from_num(self.performance_win_threshold)
    }

    /// Slightly-losing momentum bound.
    #[must_use]
    pub fn lose_threshold(&self) -> Fixed {
        Fixed::from_num(self.performance_lose_threshold)
    }

    /// Badly-losing momentum bound.
    #[must_use]
    pub fn rout_threshold(&self) -> Fixed {
        Fixed::from_num(self.performance_rout_threshold)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTuning`] naming the first field whose
    /// value is outside its valid range.
    pub fn validate(&self) -> Result<()> {
        fn reject(field: &'static str, value: impl std::fmt::Display, reason: &'static str) -> Result<()> {
            Err(CoreError::InvalidTuning {
                field,
                value: value.to_string(),
                reason,
            })
        }

        if self.reconcile_interval == 0 {
            return reject("reconcile_interval", self.reconcile_interval, "must be at least one tick");
        }
        if self.engaged_update_interval == 0 {
            return reject("engaged_update_interval", self.engaged_update_interval, "must be at least one tick");
        }
        if self.calm_update_interval < self.engaged_update_interval {
            return reject("calm_update_interval", self.calm_update_interval, "must not be shorter than the engaged interval");
        }
        if self.path_refresh_interval == 0 {
            return reject("path_refresh_interval", self.path_refresh_interval, "must be at least one tick");
        }
        if self.threat_refresh_interval == 0 {
            return reject("threat_refresh_interval", self.threat_refresh_interval, "must be at least one tick");
        }
        if self.waypoint_tolerance_units == 0 {
            return reject("waypoint_tolerance_units", self.waypoint_tolerance_units, "must be positive");
        }
        if self.merge_radius_units == 0 {
            return reject("merge_radius_units", self.merge_radius_units, "must be positive");
        }
        if self.engage_radius_units == 0 {
            return reject("engage_radius_units", self.engage_radius_units, "must be positive");
        }
        if self.contact_radius_units == 0 || self.contact_radius_units > self.engage_radius_units {
            return reject("contact_radius_units", self.contact_radius_units, "must be positive and within the engage radius");
        }
        if self.diffusion_spacing_units == 0 {
            return reject("diffusion_spacing_units", self.diffusion_spacing_units, "must be positive");
        }
        if self.disperse_limit_units <= self.regroup_dispersion_units {
            return reject("disperse_limit_units", self.disperse_limit_units, "must exceed the regroup dispersion");
        }
        if self.visibility_decay_permille == 0 || self.visibility_decay_permille >= 1000 {
            return reject("visibility_decay_permille", self.visibility_decay_permille, "must lie strictly between 0 and 1000");
        }
        if self.threat_decay_seen_permille == 0 || self.threat_decay_seen_permille >= 1000 {
            return reject("threat_decay_seen_permille", self.threat_decay_seen_permille, "must lie strictly between 0 and 1000");
        }
        if self.threat_decay_hidden_permille == 0 || self.threat_decay_hidden_permille >= 1000 {
            return reject("threat_decay_hidden_permille", self.threat_decay_hidden_permille, "must lie strictly between 0 and 1000");
        }
        if self.threat_decay_seen_permille > self.threat_decay_hidden_permille {
            return reject("threat_decay_seen_permille", self.threat_decay_seen_permille, "a seen region must decay at least as fast as a hidden one");
        }
        if self.performance_smoothing_permille >= 1000 {
            return reject("performance_smoothing_permille", self.performance_smoothing_permille, "must be below 1000");
        }
        if self.scan_visibility_permille > 1000 {
            return reject("scan_visibility_permille", self.scan_visibility_permille, "must not exceed 1000");
        }
        if self.diffusion_max_hops == 0 {
            return reject("diffusion_max_hops", self.diffusion_max_hops, "must be at least one hop");
        }
        if self.kill_zone_multiplier == 0 {
            return reject("kill_zone_multiplier", self.kill_zone_multiplier, "must be positive");
        }
        if self.avoidance_normalizer_points == 0 {
            return reject("avoidance_normalizer_points", self.avoidance_normalizer_points, "must be positive");
        }
        if self.visibility_sample_stride == 0 {
            return reject("visibility_sample_stride", self.visibility_sample_stride, "must be positive");
        }
        if self.base_structure_threshold == 0 {
            return reject("base_structure_threshold", self.base_structure_threshold, "must be positive");
        }
        if self.control_clamp_points == 0 {
            return reject("control_clamp_points", self.control_clamp_points, "must be positive");
        }
        if self.performance_win_threshold <= 0 {
            return reject("performance_win_threshold", self.performance_win_threshold, "must be positive");
        }
        if self.performance_lose_threshold >= 0 {
            return reject("performance_lose_threshold", self.performance_lose_threshold, "must be negative");
        }
        if self.performance_rout_threshold >= self.performance_lose_threshold {
            return reject("performance_rout_threshold", self.performance_rout_threshold, "must lie below the losing threshold");
        }
        Ok(())
    }
}
