//! The squad task: recruiting, marching, fighting, merging.
//!
//! An [`ArmyTask`] owns a set of reserved combat units and drives them
//! toward an objective region through the aggression state machine in
//! [`crate::behavior`]. Each decision pass it prunes dead members,
//! recruits toward its requested size, measures cohesion and the local
//! fight, runs the state handler's step protocol over the squad and
//! each member, and turns the finished context into unit orders along
//! a planned region path.
//!
//! Squads spawned as reinforcements carry a parent key; they gather at
//! home, march toward the parent, and fold themselves in through the
//! scheduler once the two centres of mass are close enough (or at once
//! when the parent holds nothing and so cannot come to them).

use crate::behavior::{
    classify_momentum, handler_for, AggressionState, FightPerformance, MovementPlan, StepContext,
    StepInputs,
};
use crate::config::TuningConfig;
use crate::math::{fixed_sqrt, Fixed, Vec2Fixed};
use crate::message::{Message, MessageDisposition, MessageEnvelope, MessageResponse, PromiseId};
use crate::pathing::plan_path;
use crate::region::RegionId;
use crate::scheduler::TaskContext;
use crate::task::{ArmyStatus, ResourceBudget, Task, TaskKey, TaskResult};
use crate::world::{Composition, UnitId, UnitIntent, UnitSnapshot, WorldSnapshot};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Exponentially smoothed engagement momentum.
///
/// Each sample folds the change in own power and in nearby enemy
/// threat into a running reading: gaining power or facing shrinking
/// threat pushes it positive, losses push it negative. The first
/// sample after a reset only sets the baseline.
#[derive(Debug, Clone, Default)]
pub struct FightTelemetry {
    momentum: Fixed,
    last_power: Option<Fixed>,
    last_threat: Fixed,
}

impl FightTelemetry {
    /// Fold in one engagement sample and return the updated momentum.
    pub fn observe(&mut self, own_power: Fixed, enemy_threat: Fixed, config: &TuningConfig) -> Fixed {
        if let Some(last_power) = self.last_power {
            let power_delta = own_power - last_power;
            let threat_delta = enemy_threat - self.last_threat;
            self.momentum =
                self.momentum * config.performance_smoothing() + power_delta - threat_delta;
        }
        self.last_power = Some(own_power);
        self.last_threat = enemy_threat;
        self.momentum
    }

    /// Current momentum reading.
    #[must_use]
    pub fn momentum(&self) -> Fixed {
        self.momentum
    }

    /// Drop all history, e.g. when a new engagement starts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A squad with an objective region.
pub struct ArmyTask {
    key: TaskKey,
    priority: i32,
    requested_size: u32,
    target: Option<RegionId>,
    home: RegionId,
    rally: Vec2Fixed,
    state: AggressionState,
    units: BTreeSet<UnitId>,
    cached_centre: Option<Vec2Fixed>,
    path: Vec<RegionId>,
    path_refreshed: u64,
    last_update: Option<u64>,
    engaged: bool,
    telemetry: FightTelemetry,
    parent: Option<TaskKey>,
    child_key: Option<TaskKey>,
    child_seen: bool,
    child_counter: u32,
    support_target: Option<RegionId>,
    pending_support: Vec<(PromiseId, RegionId)>,
    support_asked: bool,
    scan_asked: bool,
    abort_requested: bool,
    budget: ResourceBudget,
    complete: bool,
    result: Option<TaskResult>,
}

impl ArmyTask {
    /// New squad, starting in [`AggressionState::Regrouping`].
    #[must_use]
    pub fn new(
        key: TaskKey,
        priority: i32,
        requested_size: u32,
        target: RegionId,
        home: RegionId,
        rally: Vec2Fixed,
    ) -> Self {
        Self {
            key,
            priority,
            requested_size,
            target: Some(target),
            home,
            rally,
            state: AggressionState::Regrouping,
            units: BTreeSet::new(),
            cached_centre: None,
            path: Vec::new(),
            path_refreshed: 0,
            last_update: None,
            engaged: false,
            telemetry: FightTelemetry::default(),
            parent: None,
            child_key: None,
            child_seen: false,
            child_counter: 0,
            support_target: None,
            pending_support: Vec::new(),
            support_asked: false,
            scan_asked: false,
            abort_requested: false,
            budget: ResourceBudget::ZERO,
            complete: false,
            result: None,
        }
    }

    /// Mark this squad as a reinforcement for the named parent.
    #[must_use]
    pub fn with_parent(mut self, parent: TaskKey) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Earmark resources against the spendable totals.
    #[must_use]
    pub fn with_budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = budget;
        self
    }

    fn due(&self, tick: u64, config: &TuningConfig) -> bool {
        let Some(last) = self.last_update else {
            return true;
        };
        let interval = if self.engaged {
            config.engaged_update_interval
        } else {
            config.calm_update_interval
        };
        tick.saturating_sub(last) >= interval
    }

    fn objective(&self) -> RegionId {
        match self.state {
            AggressionState::Retreating => self.home,
            _ => self.target.unwrap_or(self.home),
        }
    }

    fn can_support(&self) -> bool {
        !self.abort_requested
            && !self.complete
            && self.parent.is_none()
            && self.support_target.is_none()
            && !self.units.is_empty()
            && self.state != AggressionState::Retreating
    }

    fn prune_members(&mut self, ctx: &mut TaskContext<'_>) {
        let world = ctx.world();
        let dead: Vec<UnitId> = self
            .units
            .iter()
            .copied()
            .filter(|id| !world.unit(*id).is_some_and(UnitSnapshot::is_alive))
            .collect();
        for unit in dead {
            self.units.remove(&unit);
            ctx.release(unit);
        }
    }

    fn recruit(&mut self, ctx: &mut TaskContext<'_>) {
        let anchor = self.cached_centre.unwrap_or(self.rally);
        while (self.units.len() as u32) < self.requested_size {
            let found = ctx.find_free_unit(
                |unit| unit.class.is_combatant(),
                |unit| unit.position.distance_squared(anchor),
            );
            let Some(unit) = found else { break };
            self.units.insert(unit);
            ctx.issue(UnitIntent::Move {
                unit,
                target: anchor,
            });
        }
    }

    fn centre_of_mass(&self, world: &dyn WorldSnapshot) -> Option<Vec2Fixed> {
        let mut weighted = Vec2Fixed::ZERO;
        let mut total = Fixed::ZERO;
        for id in &self.units {
            let Some(unit) = world.unit(*id) else { continue };
            if !unit.is_alive() {
                continue;
            }
            weighted = weighted + unit.position * unit.max_health;
            total += unit.max_health;
        }
        (total > Fixed::ZERO).then(|| weighted / total)
    }

    fn dispersion(&self, world: &dyn WorldSnapshot, centre: Option<Vec2Fixed>) -> Fixed {
        let Some(centre) = centre else {
            return Fixed::ZERO;
        };
        let mut sum = Fixed::ZERO;
        let mut count = 0u32;
        for id in &self.units {
            let Some(unit) = world.unit(*id) else { continue };
            if !unit.is_alive() {
                continue;
            }
            sum += unit.position.distance_squared(centre);
            count += 1;
        }
        if count == 0 {
            Fixed::ZERO
        } else {
            fixed_sqrt(sum / Fixed::from_num(count))
        }
    }

    fn composition(&self, world: &dyn WorldSnapshot) -> Composition {
        let mut composition = Composition::new();
        for id in &self.units {
            if let Some(unit) = world.unit(*id) {
                if unit.is_alive() {
                    *composition.entry(unit.class).or_insert(0) += 1;
                }
            }
        }
        composition
    }

    /// Stand the squad down. Reservations stay with the scheduler,
    /// which frees them when it sweeps this task out.
    fn stand_down(&mut self, ctx: &mut TaskContext<'_>) {
        for unit in std::mem::take(&mut self.units) {
            ctx.issue(UnitIntent::Stop { unit });
        }
    }

    fn resolve_pending(&mut self, ctx: &mut TaskContext<'_>) {
        for (ticket, region) in std::mem::take(&mut self.pending_support) {
            if self.can_support() {
                self.support_target = Some(region);
                ctx.resolve(
                    ticket,
                    MessageResponse::SupportCommitted {
                        key: self.key.clone(),
                    },
                );
            } else {
                ctx.resolve(ticket, MessageResponse::Declined);
            }
        }
    }

    /// Switch state, running the incoming handler's entry actions.
    fn enter_state(&mut self, ctx: &mut TaskContext<'_>, next: AggressionState) {
        debug!(army = %self.key, from = ?self.state, to = ?next, "state change");
        let entry = handler_for(next).on_enter_state();
        if entry.drop_path {
            self.path.clear();
        }
        if entry.halt_units {
            for &unit in &self.units {
                ctx.issue(UnitIntent::Stop { unit });
            }
        }
        if next == AggressionState::Attacking {
            self.telemetry.reset();
            self.support_asked = false;
            self.scan_asked = false;
        }
        self.state = next;
    }

    /// Reinforcement squads fold into their parent once the two
    /// centres are within merge range, or at once when the parent is
    /// empty. Returns `true` when this squad just asked to merge and
    /// marked itself complete.
    fn try_merge(&mut self, ctx: &mut TaskContext<'_>, centre: Option<Vec2Fixed>) -> bool {
        let Some(parent_key) = self.parent.clone() else {
            return false;
        };
        let Some(status) = ctx.board().status_of(&parent_key).cloned() else {
            debug!(army = %self.key, parent = %parent_key, "parent gone, promoting to independent");
            self.parent = None;
            return false;
        };
        if self.units.is_empty() {
            return false;
        }
        let Some(centre) = centre else { return false };
        let radius = ctx.config().merge_radius();
        let close_enough = match status.centre {
            None => true,
            Some(parent_centre) => parent_centre.distance_squared(centre) <= radius * radius,
        };
        if close_enough {
            info!(
                army = %self.key,
                parent = %parent_key,
                units = self.units.len(),
                "folding into parent"
            );
            ctx.request_merge_into(parent_key);
            self.complete = true;
            self.result = Some(TaskResult::succeeded());
            return true;
        }
        if let Some(parent_centre) = status.centre {
            if let Some(region) = ctx.graph().nearest(parent_centre) {
                if self.target != Some(region) {
                    self.target = Some(region);
                    self.path.clear();
                }
            }
        }
        false
    }

    fn spawn_reinforcement(&mut self, ctx: &mut TaskContext<'_>) {
        self.child_counter += 1;
        let key = TaskKey::new(format!("{}:r{}", self.key, self.child_counter));
        let child = Self::new(
            key.clone(),
            self.priority.saturating_sub(1),
            self.requested_size,
            self.home,
            self.home,
            self.rally,
        )
        .with_parent(self.key.clone());
        info!(army = %self.key, child = %key, "raising reinforcement squad");
        ctx.spawn_child(Box::new(child), 0);
        self.child_key = Some(key);
        self.child_seen = false;
    }

    fn note_child(&mut self, ctx: &mut TaskContext<'_>) {
        let Some(child) = self.child_key.clone() else {
            return;
        };
        if ctx.board().status_of(&child).is_some() {
            self.child_seen = true;
        } else if self.child_seen {
            debug!(army = %self.key, child = %child, "reinforcement squad gone");
            self.child_key = None;
            self.child_seen = false;
        }
    }

    fn issue_all(&self, ctx: &mut TaskContext<'_>, target: Vec2Fixed, engage: bool) {
        if !ctx.world().is_walkable(target) {
            debug!(army = %self.key, "target point unwalkable, holding");
            return;
        }
        for &unit in &self.units {
            let intent = if engage {
                UnitIntent::AttackMove { unit, target }
            } else {
                UnitIntent::Move { unit, target }
            };
            ctx.issue(intent);
        }
    }

    fn follow_path(
        &mut self,
        ctx: &mut TaskContext<'_>,
        centre: Option<Vec2Fixed>,
        goal: RegionId,
        step: &StepContext<'_>,
        may_move: bool,
        tick: u64,
    ) {
        let Some(centre) = centre else { return };
        let Some(current) = ctx.graph().nearest(centre) else {
            return;
        };
        let config = ctx.config();

        if current == goal {
            self.path.clear();
            if let Some(region) = ctx.graph().region(goal) {
                self.issue_all(ctx, region.centre, step.engage);
            }
            return;
        }

        let stale = tick.saturating_sub(self.path_refreshed) >= config.path_refresh_interval;
        if self.path.is_empty() || stale || self.path.last() != Some(&goal) {
            match plan_path(ctx.graph(), ctx.threat(), current, goal, step.policy, config) {
                Some(plan) => {
                    self.path = plan;
                    self.path_refreshed = tick;
                    if self.path.first() == Some(&current) {
                        self.path.remove(0);
                    }
                }
                None => {
                    debug!(army = %self.key, from = %current, to = %goal, "no route");
                    return;
                }
            }
        }

        // The handler pinned the squad; stand and fight here.
        if !may_move {
            if let Some(region) = ctx.graph().region(current) {
                self.issue_all(ctx, region.centre, true);
            }
            return;
        }

        let tolerance = config.waypoint_tolerance();
        while let Some(&next) = self.path.first() {
            let Some(region) = ctx.graph().region(next) else {
                self.path.remove(0);
                continue;
            };
            if !ctx.world().is_walkable(region.centre) {
                self.path.remove(0);
                continue;
            }
            if centre.distance(region.centre) <= tolerance {
                self.path.remove(0);
            } else {
                break;
            }
        }

        let next_point = match self.path.first() {
            Some(&next) => ctx.graph().region(next).map(|region| region.centre),
            None => ctx.graph().region(goal).map(|region| region.centre),
        };
        if let Some(point) = next_point {
            self.issue_all(ctx, point, step.engage);
        }
    }

    fn navigate(
        &mut self,
        ctx: &mut TaskContext<'_>,
        centre: Option<Vec2Fixed>,
        goal: RegionId,
        step: &StepContext<'_>,
        may_move: bool,
        tick: u64,
    ) {
        match step.movement {
            MovementPlan::Hold => {}
            MovementPlan::Rally(point) => self.issue_all(ctx, point, step.engage),
            MovementPlan::Advance => self.follow_path(ctx, centre, goal, step, may_move, tick),
            MovementPlan::Withdraw => {
                self.follow_path(ctx, centre, self.home, step, may_move, tick);
            }
        }
    }
}

impl Task for ArmyTask {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn result(&self) -> Option<TaskResult> {
        self.result.clone()
    }

    fn reserved_budget(&self) -> ResourceBudget {
        self.budget
    }

    fn update(&mut self, ctx: &mut TaskContext<'_>) {
        if self.complete {
            return;
        }
        self.resolve_pending(ctx);

        let tick = ctx.world().tick();
        let config = ctx.config();
        if !self.due(tick, config) {
            return;
        }
        self.last_update = Some(tick);

        self.prune_members(ctx);
        if !self.abort_requested
            && matches!(
                self.state,
                AggressionState::Regrouping | AggressionState::Idle
            )
        {
            self.recruit(ctx);
        }

        let world = ctx.world();
        let centre = self.centre_of_mass(world);
        self.cached_centre = centre;
        let dispersion = self.dispersion(world, centre);
        let composition = self.composition(world);
        let own_power = ctx.scorer().power_of(&composition, world.upgrade_level());
        let enemy = centre.and_then(|point| {
            ctx.enemies()
                .army_near(point, config.engage_radius(), world, ctx.scorer())
        });
        let enemy_nearby = enemy.is_some();
        let enemy_threat = enemy.as_ref().map_or(Fixed::ZERO, |army| army.threat);
        self.engaged = enemy_nearby;
        let current = centre.and_then(|point| ctx.graph().nearest(point));
        let here = current.unwrap_or(self.home);

        let performance = if enemy_nearby {
            let momentum = self.telemetry.observe(own_power, enemy_threat, config);
            classify_momentum(momentum, config)
        } else {
            self.telemetry.reset();
            FightPerformance::Stable
        };

        if self.abort_requested {
            let at_home = current == Some(self.home);
            if self.units.is_empty() || at_home {
                self.stand_down(ctx);
                self.complete = true;
                self.result = Some(TaskResult::failed("aborted"));
                info!(army = %self.key, "wound down after abort");
                return;
            }
            if self.state != AggressionState::Retreating {
                self.enter_state(ctx, AggressionState::Retreating);
            }
        }

        if self.try_merge(ctx, centre) {
            return;
        }

        if self.parent.is_none() && !self.abort_requested {
            if let Some(region) = self.support_target.take() {
                if self.target != Some(region) {
                    info!(army = %self.key, region = %region, "redirecting to support");
                    self.target = Some(region);
                    self.path.clear();
                    self.scan_asked = false;
                }
            }
        }

        let goal = self.objective();
        let at_destination = current == Some(goal);

        if self.state == AggressionState::Attacking
            && at_destination
            && !enemy_nearby
            && !self.abort_requested
        {
            let cleared = ctx
                .threat()
                .region(goal)
                .map_or(true, |data| data.threat <= Fixed::ZERO && !data.has_enemy_base);
            if cleared {
                info!(army = %self.key, region = %goal, "objective secured");
                self.stand_down(ctx);
                self.complete = true;
                self.result = Some(TaskResult::succeeded());
                return;
            }
        }

        let inputs = StepInputs {
            unit_count: self.units.len() as u32,
            requested_size: self.requested_size,
            centre,
            rally: self.rally,
            dispersion,
            at_destination,
            performance,
            enemy_nearby,
            enemy_threat,
            enemy_position: enemy.as_ref().and_then(|army| army.position),
            own_power,
            config,
        };
        let handler = handler_for(self.state);
        let mut step = handler.on_army_step(inputs);
        for id in &self.units {
            if let Some(unit) = world.unit(*id) {
                step = handler.on_army_unit_step(unit, step);
            }
        }
        let next_state = handler.get_next_state(&step);
        let may_move = handler.should_move_from_region(&step);
        if next_state != self.state {
            self.enter_state(ctx, next_state);
        }

        if step.declare_emergency {
            ctx.send(Message::EmergencyDetected { region: here });
        }
        if step.request_support && !self.support_asked {
            ctx.send(Message::SupportRequested { region: here });
            self.support_asked = true;
        }
        // A dark objective is worth a surveillance sweep before the
        // squad walks into it.
        if self.state == AggressionState::Attacking && !at_destination && !self.scan_asked {
            if let Some(region) = ctx.graph().region(goal) {
                if !ctx.world().is_visible(region.centre) {
                    ctx.send(Message::ScanRequested {
                        point: region.centre,
                    });
                    self.scan_asked = true;
                }
            }
        }

        self.navigate(ctx, centre, goal, &step, may_move, tick);

        if matches!(performance, FightPerformance::SlightlyLosing)
            && self.parent.is_none()
            && self.child_key.is_none()
            && !self.abort_requested
        {
            self.spawn_reinforcement(ctx);
        }
        self.note_child(ctx);
    }

    fn wants_unit(&self, unit: &UnitSnapshot, _world: &dyn WorldSnapshot) -> bool {
        !self.complete
            && !self.abort_requested
            && unit.class.is_combatant()
            && (self.units.len() as u32) < self.requested_size
    }

    fn accept_unit(&mut self, unit: UnitId) {
        self.units.insert(unit);
    }

    fn take_units(&mut self) -> Vec<UnitId> {
        std::mem::take(&mut self.units).into_iter().collect()
    }

    fn held_units(&self) -> Vec<UnitId> {
        self.units.iter().copied().collect()
    }

    fn forget_unit(&mut self, unit: UnitId) {
        self.units.remove(&unit);
    }

    fn on_message(
        &mut self,
        envelope: &MessageEnvelope,
        ticket: PromiseId,
    ) -> MessageDisposition {
        match &envelope.message {
            Message::AbortRequested { key } if *key == self.key => {
                info!(army = %self.key, "abort requested");
                self.abort_requested = true;
                MessageDisposition::Handled
            }
            Message::EmergencyDetected { region } => {
                if self.can_support() {
                    self.support_target = Some(*region);
                    MessageDisposition::Handled
                } else {
                    MessageDisposition::Ignored
                }
            }
            Message::SupportRequested { region } => {
                if self.can_support() {
                    self.pending_support.push((ticket, *region));
                    MessageDisposition::Deferred
                } else {
                    MessageDisposition::Ignored
                }
            }
            _ => MessageDisposition::Ignored,
        }
    }

    fn on_response(&mut self, _promise: PromiseId, response: &MessageResponse) {
        match response {
            MessageResponse::SupportCommitted { key } => {
                debug!(army = %self.key, supporter = %key, "support committed");
            }
            MessageResponse::ScanPerformed { success, .. } => {
                debug!(army = %self.key, success = *success, "scan resolved");
                if !*success {
                    self.scan_asked = false;
                }
            }
            MessageResponse::Declined => {}
        }
    }

    fn army_status(&self) -> Option<ArmyStatus> {
        Some(ArmyStatus {
            key: self.key.clone(),
            centre: self.cached_centre,
            unit_count: self.units.len() as u32,
        })
    }
}
