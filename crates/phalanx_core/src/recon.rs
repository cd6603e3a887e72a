//! Surveillance sweeps over fogged ground.
//!
//! [`SurveillanceTask`] is a standing service task. It holds no units;
//! it answers [`Message::ScanRequested`] broadcasts by deferring the
//! delivery ticket, then on a later pass fires a [`UnitIntent::Scan`]
//! at the point and resolves the promise with the outcome. Sweeps draw
//! from a shared energy pool that refills over time, so a burst of
//! requests drains the pool and the tail of the burst waits or fails.

use crate::math::{Fixed, Vec2Fixed};
use crate::message::{Message, MessageDisposition, MessageEnvelope, MessageResponse, PromiseId};
use crate::scheduler::TaskContext;
use crate::task::{Task, TaskKey, TaskResult};
use crate::world::UnitIntent;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Energy cost of one sweep.
const SWEEP_COST: i64 = 50;
/// Energy regained per tick.
const ENERGY_REGEN: i64 = 1;
/// Pool ceiling, also the starting charge.
const ENERGY_MAX: i64 = 200;
/// Ticks a queued request stays valid while the pool recharges.
const SWEEP_PATIENCE: u64 = 64;

struct PendingSweep {
    ticket: PromiseId,
    point: Vec2Fixed,
    deadline: Option<u64>,
}

/// Standing task that services scan requests from the rest of the
/// roster.
pub struct SurveillanceTask {
    key: TaskKey,
    priority: i32,
    energy: Fixed,
    last_update: Option<u64>,
    queue: VecDeque<PendingSweep>,
    abort_requested: bool,
    complete: bool,
    result: Option<TaskResult>,
}

impl SurveillanceTask {
    /// New surveillance service with a full energy pool.
    #[must_use]
    pub fn new(key: TaskKey, priority: i32) -> Self {
        Self {
            key,
            priority,
            energy: Fixed::from_num(ENERGY_MAX),
            last_update: None,
            queue: VecDeque::new(),
            abort_requested: false,
            complete: false,
            result: None,
        }
    }

    /// Current charge, for diagnostics.
    #[must_use]
    pub fn energy(&self) -> Fixed {
        self.energy
    }

    fn regenerate(&mut self, tick: u64) {
        if let Some(last) = self.last_update {
            let elapsed = tick.saturating_sub(last);
            let ceiling = Fixed::from_num(ENERGY_MAX);
            self.energy =
                (self.energy + Fixed::from_num(ENERGY_REGEN) * Fixed::from_num(elapsed)).min(ceiling);
        }
        self.last_update = Some(tick);
    }

    fn service_queue(&mut self, ctx: &mut TaskContext<'_>, tick: u64) {
        // Requests are put on the clock the first pass we see them.
        for pending in &mut self.queue {
            pending
                .deadline
                .get_or_insert(tick.saturating_add(SWEEP_PATIENCE));
        }
        let cost = Fixed::from_num(SWEEP_COST);
        while let Some(front) = self.queue.front() {
            // A requester past patience has moved on; a late reveal
            // would answer a stale question.
            if front.deadline.is_some_and(|deadline| tick > deadline) {
                if let Some(stale) = self.queue.pop_front() {
                    debug!(task = %self.key, "sweep request expired");
                    ctx.resolve(
                        stale.ticket,
                        MessageResponse::ScanPerformed {
                            point: stale.point,
                            success: false,
                        },
                    );
                }
                continue;
            }
            if self.energy < cost {
                break;
            }
            if let Some(ready) = self.queue.pop_front() {
                self.energy -= cost;
                ctx.issue(UnitIntent::Scan { point: ready.point });
                ctx.resolve(
                    ready.ticket,
                    MessageResponse::ScanPerformed {
                        point: ready.point,
                        success: true,
                    },
                );
            }
        }
    }

    fn fail_remaining(&mut self, ctx: &mut TaskContext<'_>) {
        for pending in self.queue.drain(..) {
            ctx.resolve(
                pending.ticket,
                MessageResponse::ScanPerformed {
                    point: pending.point,
                    success: false,
                },
            );
        }
    }
}

impl Task for SurveillanceTask {
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

    fn update(&mut self, ctx: &mut TaskContext<'_>) {
        if self.complete {
            return;
        }
        let tick = ctx.world().tick();
        self.regenerate(tick);

        if self.abort_requested {
            self.fail_remaining(ctx);
            self.complete = true;
            self.result = Some(TaskResult::failed("aborted"));
            info!(task = %self.key, "surveillance wound down");
            return;
        }
        self.service_queue(ctx, tick);
    }

    fn on_message(
        &mut self,
        envelope: &MessageEnvelope,
        ticket: PromiseId,
    ) -> MessageDisposition {
        match &envelope.message {
            Message::ScanRequested { point } => {
                debug!(task = %self.key, "sweep queued");
                self.queue.push_back(PendingSweep {
                    ticket,
                    point: *point,
                    deadline: None,
                });
                MessageDisposition::Deferred
            }
            Message::AbortRequested { key } if *key == self.key => {
                self.abort_requested = true;
                MessageDisposition::Handled
            }
            _ => MessageDisposition::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::army::ArmyTask;
    use crate::config::TuningConfig;
    use crate::enemy::SnapshotAwareness;
    use crate::region::{RegionGraph, RegionId};
    use crate::scheduler::{StepReport, TaskScheduler};
    use crate::threat::{NoIntel, StandardScorer, ThreatModel};
    use crate::world::UnitClass;
    use crate::fixtures::{vec2, RecordingSink, ScriptedWorld};
    use crate::maps;
    use crate::probe::ProbeTask;

    fn quick_config() -> TuningConfig {
        TuningConfig {
            engaged_update_interval: 1,
            calm_update_interval: 1,
            threat_refresh_interval: 1,
            ..TuningConfig::default()
        }
    }

    struct Rig {
        world: ScriptedWorld,
        threat: ThreatModel,
        graph: RegionGraph,
        sink: RecordingSink,
    }

    impl Rig {
        fn new(graph: RegionGraph) -> Self {
            Self {
                world: ScriptedWorld::new(),
                threat: ThreatModel::new(),
                graph,
                sink: RecordingSink::new(),
            }
        }

        fn step(&mut self, scheduler: &mut TaskScheduler) -> StepReport {
            self.threat.refresh(
                &self.world,
                &self.graph,
                scheduler.scorer(),
                &NoIntel,
                scheduler.config(),
            );
            scheduler.step(&self.world, &self.threat, &self.graph, &mut self.sink)
        }

        fn next_pass(&mut self, scheduler: &mut TaskScheduler) -> StepReport {
            self.world.advance(1);
            self.sink.clear();
            self.step(scheduler)
        }
    }

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(
            quick_config(),
            Box::new(StandardScorer),
            Box::new(SnapshotAwareness),
        )
        .unwrap()
    }

    fn surveillance() -> SurveillanceTask {
        SurveillanceTask::new(TaskKey::from("recon:sweep"), 20)
    }

    fn scan_points(sink: &RecordingSink) -> Vec<Vec2Fixed> {
        sink.intents
            .iter()
            .filter_map(|intent| match intent {
                crate::world::UnitIntent::Scan { point } => Some(*point),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_scan_request_sweeps_and_resolves() {
        let mut rig = Rig::new(maps::two_regions());
        let mut scheduler = scheduler();
        scheduler.add_task(Box::new(surveillance()), 0).id().unwrap();

        let (asker, asker_handle) = ProbeTask::new("cmd:ask", 50);
        asker_handle.state().outgoing.push(Message::ScanRequested {
            point: vec2(700, 300),
        });
        scheduler.add_task(Box::new(asker), 0).id().unwrap();

        // Request lands this pass, is serviced on the next.
        rig.step(&mut scheduler);
        assert!(scan_points(&rig.sink).is_empty());

        let report = rig.next_pass(&mut scheduler);
        assert_eq!(report.promises_resolved, 1);
        assert_eq!(scan_points(&rig.sink), vec![vec2(700, 300)]);

        let state = asker_handle.state();
        assert!(matches!(
            state.responses.as_slice(),
            [(_, MessageResponse::ScanPerformed { success: true, .. })]
        ));
    }

    #[test]
    fn test_burst_drains_pool_then_recharges() {
        let mut rig = Rig::new(maps::two_regions());
        let mut scheduler = scheduler();
        scheduler.add_task(Box::new(surveillance()), 0).id().unwrap();

        let (asker, asker_handle) = ProbeTask::new("cmd:ask", 50);
        for i in 0..5 {
            asker_handle.state().outgoing.push(Message::ScanRequested {
                point: vec2(100 * i, 0),
            });
        }
        scheduler.add_task(Box::new(asker), 0).id().unwrap();

        rig.step(&mut scheduler);
        // Four sweeps empty the pool; the fifth waits in the queue.
        let report = rig.next_pass(&mut scheduler);
        assert_eq!(scan_points(&rig.sink).len(), 4);
        assert_eq!(report.promises_resolved, 4);

        // Fifty ticks of regen buys the fifth sweep.
        rig.world.advance(50);
        rig.sink.clear();
        let report = rig.step(&mut scheduler);
        assert_eq!(scan_points(&rig.sink).len(), 1);
        assert_eq!(report.promises_resolved, 1);

        let state = asker_handle.state();
        assert_eq!(state.responses.len(), 5);
        assert!(state
            .responses
            .iter()
            .all(|(_, r)| matches!(r, MessageResponse::ScanPerformed { success: true, .. })));
    }

    #[test]
    fn test_queued_request_expires_without_energy() {
        let mut rig = Rig::new(maps::two_regions());
        let mut scheduler = scheduler();
        scheduler.add_task(Box::new(surveillance()), 0).id().unwrap();

        let (asker, asker_handle) = ProbeTask::new("cmd:ask", 50);
        for i in 0..6 {
            asker_handle.state().outgoing.push(Message::ScanRequested {
                point: vec2(100 * i, 0),
            });
        }
        scheduler.add_task(Box::new(asker), 0).id().unwrap();

        rig.step(&mut scheduler);
        rig.next_pass(&mut scheduler);

        // +50 ticks: the fifth fires, the sixth still lacks charge.
        rig.world.advance(50);
        rig.sink.clear();
        let report = rig.step(&mut scheduler);
        assert_eq!(report.promises_resolved, 1);

        // +50 more: the sixth is past patience and fails instead.
        rig.world.advance(50);
        rig.sink.clear();
        let report = rig.step(&mut scheduler);
        assert_eq!(report.promises_resolved, 1);
        assert!(scan_points(&rig.sink).is_empty());

        let state = asker_handle.state();
        let failures = state
            .responses
            .iter()
            .filter(|(_, r)| matches!(r, MessageResponse::ScanPerformed { success: false, .. }))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(state.responses.len(), 6);
    }

    #[test]
    fn test_abort_fails_outstanding_sweeps() {
        let mut rig = Rig::new(maps::two_regions());
        let mut scheduler = scheduler();
        scheduler.add_task(Box::new(surveillance()), 0).id().unwrap();

        let (asker, asker_handle) = ProbeTask::new("cmd:ask", 50);
        for i in 0..5 {
            asker_handle.state().outgoing.push(Message::ScanRequested {
                point: vec2(100 * i, 0),
            });
        }
        scheduler.add_task(Box::new(asker), 0).id().unwrap();
        rig.step(&mut scheduler);
        rig.next_pass(&mut scheduler);

        // The held fifth request is failed when the service stops.
        asker_handle.state().outgoing.push(Message::AbortRequested {
            key: TaskKey::from("recon:sweep"),
        });
        rig.next_pass(&mut scheduler);
        let report = rig.next_pass(&mut scheduler);
        assert_eq!(report.tasks_completed, 1);
        assert!(!scheduler.has_task(&TaskKey::from("recon:sweep")));

        let state = asker_handle.state();
        assert!(state
            .responses
            .iter()
            .any(|(_, r)| matches!(r, MessageResponse::ScanPerformed { success: false, .. })));
    }

    #[test]
    fn test_army_requests_sweep_of_dark_objective() {
        let mut rig = Rig::new(maps::two_regions());
        rig.world
            .add_own_squad(1, 2, UnitClass::Assault, vec2(0, 0));
        rig.world.hide_all();
        let mut scheduler = scheduler();
        scheduler.add_task(Box::new(surveillance()), 0).id().unwrap();
        scheduler
            .add_task(
                Box::new(ArmyTask::new(
                    TaskKey::from("army:east"),
                    30,
                    2,
                    RegionId(2),
                    RegionId(1),
                    vec2(0, 0),
                )),
                0,
            )
            .id()
            .unwrap();

        // The squad notices the dark objective on its first pass.
        rig.step(&mut scheduler);
        assert!(scan_points(&rig.sink).is_empty());

        // Sweep fires at the objective centre and resolves to the army.
        let report = rig.next_pass(&mut scheduler);
        assert_eq!(report.promises_resolved, 1);
        assert_eq!(scan_points(&rig.sink), vec![vec2(512, 0)]);
    }
}
