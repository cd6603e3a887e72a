//! Squad aggression states and their behaviour handlers.
//!
//! A squad is always in exactly one [`AggressionState`], and each state
//! has a stateless handler. A pass opens with
//! [`BehaviorHandler::on_army_step`], folds every held member through
//! [`BehaviorHandler::on_army_unit_step`], then closes with
//! [`BehaviorHandler::get_next_state`]; when the state changes, the
//! incoming handler's [`BehaviorHandler::on_enter_state`] runs once.
//! Handlers never touch the world or the scheduler; the squad task
//! computes the inputs and carries the finished context out.

use crate::config::TuningConfig;
use crate::math::{Fixed, Vec2Fixed};
use crate::pathing::AvoidancePolicy;
use crate::world::UnitSnapshot;
use serde::{Deserialize, Serialize};

/// The posture a squad is currently holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggressionState {
    /// Pressing toward the objective and fighting what it meets.
    Attacking,
    /// Gathering members at a rally point until cohesive.
    Regrouping,
    /// Withdrawing toward friendly ground.
    Retreating,
    /// Holding with nothing to do.
    Idle,
}

/// How the last few engagement samples are trending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FightPerformance {
    /// Momentum clearly positive.
    Winning,
    /// Momentum near zero.
    Stable,
    /// Momentum drifting negative.
    SlightlyLosing,
    /// Momentum collapsed.
    BadlyLosing,
}

/// Movement a handler asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementPlan {
    /// Stay put.
    Hold,
    /// Keep following the planned path toward the objective.
    Advance,
    /// Tighten the squad on this point.
    Rally(Vec2Fixed),
    /// Head for friendly ground instead of the objective.
    Withdraw,
}

/// One pass's view of a squad, as its handler sees it.
#[derive(Debug, Clone, Copy)]
pub struct StepInputs<'a> {
    /// Members currently held.
    pub unit_count: u32,
    /// Strength the squad was asked to gather.
    pub requested_size: u32,
    /// Centre of mass, while any member is alive.
    pub centre: Option<Vec2Fixed>,
    /// Point the squad gathers at.
    pub rally: Vec2Fixed,
    /// Root-mean-square spread of members around the centre.
    pub dispersion: Fixed,
    /// Whether the squad stands in its objective region.
    pub at_destination: bool,
    /// Classified engagement trend.
    pub performance: FightPerformance,
    /// Whether a hostile force sits within engagement range.
    pub enemy_nearby: bool,
    /// Scored threat of that force, zero when absent.
    pub enemy_threat: Fixed,
    /// Centre of that force, when it has one.
    pub enemy_position: Option<Vec2Fixed>,
    /// The squad's own scored power.
    pub own_power: Fixed,
    /// Tuning values in force.
    pub config: &'a TuningConfig,
}

/// Working state a handler accumulates over one pass.
///
/// Opened by [`BehaviorHandler::on_army_step`], threaded through the
/// per-member folds, then read back by the squad task after
/// [`BehaviorHandler::get_next_state`].
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// The inputs the pass opened with.
    pub inputs: StepInputs<'a>,
    /// Members standing within fighting contact of the hostile force.
    pub in_contact: u32,
    /// Movement to carry out now.
    pub movement: MovementPlan,
    /// Whether moves should engage targets along the way.
    pub engage: bool,
    /// Path style for any replanning this pass.
    pub policy: AvoidancePolicy,
    /// Ask nearby squads for reinforcement.
    pub request_support: bool,
    /// Tell everyone this squad is collapsing.
    pub declare_emergency: bool,
}

impl<'a> StepContext<'a> {
    fn quiet(inputs: StepInputs<'a>, movement: MovementPlan) -> Self {
        Self {
            inputs,
            in_contact: 0,
            movement,
            engage: false,
            policy: AvoidancePolicy::Normal,
            request_support: false,
            declare_emergency: false,
        }
    }
}

/// One-off work the squad performs on arriving in a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryActions {
    /// Throw away the planned path so the new state replans.
    pub drop_path: bool,
    /// Stop every member where it stands.
    pub halt_units: bool,
}

/// Pure per-state decision logic, run once per squad pass.
///
/// Implementations must not depend on the order members are folded in;
/// the squad task promises no particular one.
pub trait BehaviorHandler {
    /// The state this handler covers.
    fn state(&self) -> AggressionState;

    /// Open the pass from the squad-level inputs.
    fn on_army_step<'a>(&self, inputs: StepInputs<'a>) -> StepContext<'a>;

    /// Fold one held member into the pass.
    fn on_army_unit_step<'a>(
        &self,
        unit: &UnitSnapshot,
        ctx: StepContext<'a>,
    ) -> StepContext<'a> {
        let _ = unit;
        ctx
    }

    /// Close the pass with the follow-up state.
    ///
    /// Must return a state for every context the other hooks can
    /// produce.
    fn get_next_state(&self, ctx: &StepContext<'_>) -> AggressionState;

    /// One-off work for a squad arriving in this state.
    fn on_enter_state(&self) -> EntryActions {
        EntryActions {
            drop_path: true,
            halt_units: false,
        }
    }

    /// Whether members may leave the region they stand in this pass.
    fn should_move_from_region(&self, ctx: &StepContext<'_>) -> bool {
        let _ = ctx;
        true
    }
}

/// Handler for [`AggressionState::Idle`].
pub struct IdleHandler;

impl BehaviorHandler for IdleHandler {
    fn state(&self) -> AggressionState {
        AggressionState::Idle
    }

    fn on_army_step<'a>(&self, inputs: StepInputs<'a>) -> StepContext<'a> {
        StepContext::quiet(inputs, MovementPlan::Hold)
    }

    fn get_next_state(&self, ctx: &StepContext<'_>) -> AggressionState {
        if ctx.inputs.unit_count > 0 {
            AggressionState::Regrouping
        } else {
            AggressionState::Idle
        }
    }

    fn on_enter_state(&self) -> EntryActions {
        EntryActions {
            drop_path: true,
            halt_units: true,
        }
    }

    fn should_move_from_region(&self, _ctx: &StepContext<'_>) -> bool {
        false
    }
}

/// Handler for [`AggressionState::Regrouping`].
pub struct RegroupHandler;

impl BehaviorHandler for RegroupHandler {
    fn state(&self) -> AggressionState {
        AggressionState::Regrouping
    }

    fn on_army_step<'a>(&self, inputs: StepInputs<'a>) -> StepContext<'a> {
        StepContext {
            policy: AvoidancePolicy::AvoidEnemyArmy,
            ..StepContext::quiet(inputs, MovementPlan::Rally(inputs.rally))
        }
    }

    fn get_next_state(&self, ctx: &StepContext<'_>) -> AggressionState {
        let gathered = ctx.inputs.unit_count >= ctx.inputs.requested_size.max(1)
            && ctx.inputs.dispersion <= ctx.inputs.config.regroup_dispersion();
        if gathered {
            AggressionState::Attacking
        } else {
            AggressionState::Regrouping
        }
    }
}

/// Handler for [`AggressionState::Attacking`].
pub struct AttackHandler;

fn overmatched(inputs: &StepInputs<'_>) -> bool {
    inputs.enemy_nearby && inputs.enemy_threat > inputs.own_power * Fixed::from_num(2)
}

impl BehaviorHandler for AttackHandler {
    fn state(&self) -> AggressionState {
        AggressionState::Attacking
    }

    fn on_army_step<'a>(&self, inputs: StepInputs<'a>) -> StepContext<'a> {
        if inputs.unit_count == 0 {
            return StepContext::quiet(inputs, MovementPlan::Hold);
        }
        if matches!(inputs.performance, FightPerformance::BadlyLosing) || overmatched(&inputs) {
            return StepContext {
                policy: AvoidancePolicy::AvoidEnemyArmy,
                declare_emergency: true,
                ..StepContext::quiet(inputs, MovementPlan::Withdraw)
            };
        }
        if inputs.dispersion > inputs.config.disperse_limit() {
            let rally = inputs.centre.unwrap_or(inputs.rally);
            return StepContext {
                policy: AvoidancePolicy::AvoidEnemyArmy,
                ..StepContext::quiet(inputs, MovementPlan::Rally(rally))
            };
        }
        StepContext {
            inputs,
            in_contact: 0,
            movement: MovementPlan::Advance,
            engage: true,
            policy: AvoidancePolicy::AvoidKillZone,
            request_support: matches!(inputs.performance, FightPerformance::SlightlyLosing),
            declare_emergency: false,
        }
    }

    fn on_army_unit_step<'a>(
        &self,
        unit: &UnitSnapshot,
        mut ctx: StepContext<'a>,
    ) -> StepContext<'a> {
        if let Some(enemy) = ctx.inputs.enemy_position {
            let radius = ctx.inputs.config.contact_radius();
            if unit.position.distance_squared(enemy) <= radius * radius {
                ctx.in_contact += 1;
            }
        }
        ctx
    }

    fn get_next_state(&self, ctx: &StepContext<'_>) -> AggressionState {
        if ctx.inputs.unit_count == 0 {
            return AggressionState::Regrouping;
        }
        if matches!(ctx.inputs.performance, FightPerformance::BadlyLosing)
            || overmatched(&ctx.inputs)
        {
            return AggressionState::Retreating;
        }
        // A strung-out squad regathers, unless members are already
        // trading blows where they stand.
        if ctx.inputs.dispersion > ctx.inputs.config.disperse_limit() && ctx.in_contact == 0 {
            return AggressionState::Regrouping;
        }
        AggressionState::Attacking
    }

    /// Never walk out of a live fight.
    fn should_move_from_region(&self, ctx: &StepContext<'_>) -> bool {
        ctx.in_contact == 0
    }
}

/// Handler for [`AggressionState::Retreating`].
pub struct RetreatHandler;

impl BehaviorHandler for RetreatHandler {
    fn state(&self) -> AggressionState {
        AggressionState::Retreating
    }

    fn on_army_step<'a>(&self, inputs: StepInputs<'a>) -> StepContext<'a> {
        let movement = if inputs.unit_count == 0 {
            MovementPlan::Hold
        } else if inputs.at_destination {
            MovementPlan::Rally(inputs.rally)
        } else {
            MovementPlan::Withdraw
        };
        StepContext {
            policy: AvoidancePolicy::AvoidEnemyArmy,
            ..StepContext::quiet(inputs, movement)
        }
    }

    fn get_next_state(&self, ctx: &StepContext<'_>) -> AggressionState {
        if ctx.inputs.unit_count == 0 {
            AggressionState::Idle
        } else if ctx.inputs.at_destination {
            AggressionState::Regrouping
        } else {
            AggressionState::Retreating
        }
    }
}

/// The singleton handler for a state.
#[must_use]
pub fn handler_for(state: AggressionState) -> &'static dyn BehaviorHandler {
    match state {
        AggressionState::Attacking => &AttackHandler,
        AggressionState::Regrouping => &RegroupHandler,
        AggressionState::Retreating => &RetreatHandler,
        AggressionState::Idle => &IdleHandler,
    }
}

/// Classify a momentum reading against the configured thresholds.
#[must_use]
pub fn classify_momentum(momentum: Fixed, config: &TuningConfig) -> FightPerformance {
    if momentum > config.win_threshold() {
        FightPerformance::Winning
    } else if momentum >= config.lose_threshold() {
        FightPerformance::Stable
    } else if momentum > config.rout_threshold() {
        FightPerformance::SlightlyLosing
    } else {
        FightPerformance::BadlyLosing
    }
}
