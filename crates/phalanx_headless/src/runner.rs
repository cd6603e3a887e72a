//! Single-run driver.
//!
//! One run owns the full loop: refresh the threat model, step the
//! scheduler, push the resulting intents into the [`SimWorld`] and
//! advance the clock. The run ends when every army order from the
//! scenario has wound down or the tick limit expires, whichever comes
//! first.

use phalanx_core::army::ArmyTask;
use phalanx_core::enemy::SnapshotAwareness;
use phalanx_core::recon::SurveillanceTask;
use phalanx_core::region::RegionId;
use phalanx_core::scheduler::{StepReport, TaskScheduler};
use phalanx_core::task::TaskKey;
use phalanx_core::threat::{StandardScorer, ThreatModel};
use phalanx_core::world::Alliance;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::scenario::{point, Scenario, ScenarioError};
use crate::world::{IntentBuffer, SimWorld};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every army order from the scenario ran to completion.
    ArmiesComplete,
    /// The tick limit expired with armies still standing.
    TickLimit,
}

/// Aggregated result of one scenario run.
///
/// Everything in here is integral, so two summaries compare exactly;
/// the determinism check relies on that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Scenario name.
    pub scenario: String,
    /// Seed used for hostile placement jitter.
    pub seed: u64,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Ticks simulated.
    pub ticks: u64,
    /// Own units alive at the end.
    pub own_survivors: u32,
    /// Hostile units alive at the end.
    pub enemy_survivors: u32,
    /// Unit intents issued across the run.
    pub intents_issued: u64,
    /// Surveillance sweeps the world executed.
    pub scans_requested: u64,
    /// Tasks removed by completion sweeps.
    pub tasks_completed: u64,
    /// Freed units adopted by other tasks.
    pub units_redistributed: u64,
    /// Units moved between tasks by merges.
    pub units_transferred: u64,
    /// Messages fanned out between tasks.
    pub messages_dispatched: u64,
    /// Deferred responses delivered to their senders.
    pub promises_resolved: u64,
    /// Child tasks registered mid-run.
    pub children_spawned: u64,
    /// Merge requests executed.
    pub merges_performed: u64,
    /// Fixes applied by reconciliation sweeps.
    pub reconcile_corrections: u64,
    /// Scheduler state fingerprint at the end.
    pub scheduler_hash: u64,
    /// Threat model state fingerprint at the end.
    pub threat_hash: u64,
}

#[derive(Debug, Default)]
struct Totals {
    tasks_completed: u64,
    units_redistributed: u64,
    units_transferred: u64,
    messages_dispatched: u64,
    promises_resolved: u64,
    children_spawned: u64,
    merges_performed: u64,
    reconcile_corrections: u64,
}

impl Totals {
    fn absorb(&mut self, report: &StepReport) {
        self.tasks_completed += u64::from(report.tasks_completed);
        self.units_redistributed += u64::from(report.units_redistributed);
        self.units_transferred += u64::from(report.units_transferred);
        self.messages_dispatched += u64::from(report.messages_dispatched);
        self.promises_resolved += u64::from(report.promises_resolved);
        self.children_spawned += u64::from(report.children_spawned);
        self.merges_performed += u64::from(report.merges_performed);
        self.reconcile_corrections += u64::from(report.reconcile_corrections);
    }
}

/// Run one scenario to completion or the tick limit.
pub fn run_scenario(scenario: &Scenario, seed: u64) -> Result<RunSummary, ScenarioError> {
    let graph = scenario.graph()?;
    let intel = scenario.intel();
    let mut world = SimWorld::from_scenario(scenario, seed);
    let mut scheduler = TaskScheduler::new(
        scenario.tuning.clone(),
        Box::new(StandardScorer),
        Box::new(SnapshotAwareness),
    )?;
    let mut threat = ThreatModel::new();

    let mut watched: Vec<TaskKey> = Vec::new();
    for order in &scenario.armies {
        let key = TaskKey::new(order.key.as_str());
        let task = ArmyTask::new(
            key.clone(),
            order.priority,
            order.size,
            RegionId(order.target),
            RegionId(order.home),
            point(order.rally),
        );
        if scheduler.add_task(Box::new(task), 0).is_added() {
            watched.push(key);
        } else {
            warn!(army = %order.key, "army order rejected, skipping");
        }
    }
    if scenario.surveillance {
        let recon = SurveillanceTask::new(TaskKey::new("recon:sweep"), 10);
        if !scheduler.add_task(Box::new(recon), 0).is_added() {
            warn!("surveillance task rejected");
        }
    }

    info!(
        scenario = %scenario.name,
        seed,
        regions = scenario.regions.len(),
        armies = watched.len(),
        "run started"
    );

    let mut sink = IntentBuffer::new();
    let mut totals = Totals::default();
    let mut intents_issued: u64 = 0;
    let mut outcome = RunOutcome::TickLimit;
    let mut ticks: u64 = 0;

    for _ in 0..scenario.max_ticks {
        threat.refresh(&world, &graph, scheduler.scorer(), &intel, scheduler.config());
        let report = scheduler.step(&world, &threat, &graph, &mut sink);
        totals.absorb(&report);
        intents_issued += sink.intents.len() as u64;
        for intent in sink.intents.drain(..) {
            world.apply(intent);
        }
        world.advance();
        ticks += 1;
        if ticks % 500 == 0 {
            debug!(
                tick = ticks,
                own = world.alive_count(Alliance::Own),
                enemy = world.alive_count(Alliance::Enemy),
                "run progress"
            );
        }
        if !watched.is_empty() && watched.iter().all(|key| !scheduler.has_task(key)) {
            outcome = RunOutcome::ArmiesComplete;
            break;
        }
    }

    let summary = RunSummary {
        scenario: scenario.name.clone(),
        seed,
        outcome,
        ticks,
        own_survivors: world.alive_count(Alliance::Own),
        enemy_survivors: world.alive_count(Alliance::Enemy),
        intents_issued,
        scans_requested: world.scans_requested(),
        tasks_completed: totals.tasks_completed,
        units_redistributed: totals.units_redistributed,
        units_transferred: totals.units_transferred,
        messages_dispatched: totals.messages_dispatched,
        promises_resolved: totals.promises_resolved,
        children_spawned: totals.children_spawned,
        merges_performed: totals.merges_performed,
        reconcile_corrections: totals.reconcile_corrections,
        scheduler_hash: scheduler.state_hash(),
        threat_hash: threat.state_hash(),
    };
    info!(
        outcome = ?summary.outcome,
        ticks = summary.ticks,
        own = summary.own_survivors,
        enemy = summary.enemy_survivors,
        "run finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scenario_completes() {
        let summary = run_scenario(&Scenario::default(), 7).unwrap();
        assert_eq!(summary.outcome, RunOutcome::ArmiesComplete);
        assert_eq!(summary.enemy_survivors, 0);
        assert!(summary.ticks < 1500);
        assert!(summary.intents_issued > 0);
        assert!(summary.tasks_completed >= 1);
    }

    #[test]
    fn test_same_seed_reproduces_exactly() {
        let scenario = Scenario::skirmish();
        let a = run_scenario(&scenario, 42).unwrap();
        let b = run_scenario(&scenario, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tick_limit_reports_honestly() {
        let mut scenario = Scenario::default();
        scenario.max_ticks = 5;
        let summary = run_scenario(&scenario, 0).unwrap();
        assert_eq!(summary.outcome, RunOutcome::TickLimit);
        assert_eq!(summary.ticks, 5);
    }

    #[test]
    fn test_summary_round_trips_as_json() {
        let summary = run_scenario(&Scenario::default(), 3).unwrap();
        let json = serde_json::to_string(&summary).unwrap();
        let back: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(summary, back);
    }
}
