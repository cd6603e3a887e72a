//! A scriptable task for exercising the scheduler from outside.
//!
//! [`ProbeTask`] does whatever its shared [`ProbeState`] tells it to
//! and records everything the scheduler does to it. Tests keep the
//! [`ProbeHandle`] half and inspect or reprogram the state between
//! passes.

use phalanx_core::math::Fixed;
use phalanx_core::math::Vec2Fixed;
use phalanx_core::message::{
    Message, MessageDisposition, MessageEnvelope, MessageResponse, PromiseId,
};
use phalanx_core::scheduler::TaskContext;
use phalanx_core::task::{ArmyStatus, ResourceBudget, Task, TaskKey};
use phalanx_core::world::{UnitId, UnitSnapshot, WorldSnapshot};
use std::cell::{RefCell, RefMut};
use std::collections::BTreeSet;
use std::rc::Rc;

/// Script and transcript of a [`ProbeTask`], fully public.
///
/// Fields up to `merge_into` are the script the probe follows; the
/// rest is the transcript it appends to as the scheduler drives it.
#[derive(Debug, Clone)]
pub struct ProbeState {
    /// Units the probe tries to keep reserved each pass.
    pub recruit_goal: u32,
    /// Recruit nearest to this point first; unset means lowest id first.
    pub recruit_origin: Option<Vec2Fixed>,
    /// Units reserved by name on the next pass, owners notwithstanding.
    pub steal: Vec<UnitId>,
    /// Complete on the first pass at or after this tick.
    pub complete_at: Option<u64>,
    /// Whether the probe reports itself complete.
    pub completed: bool,
    /// Units currently claimed.
    pub units: BTreeSet<UnitId>,
    /// Whether the probe adopts units freed by other tasks.
    pub wants_spares: bool,
    /// Messages broadcast on the next pass, drained as they go out.
    pub outgoing: Vec<Message>,
    /// Disposition returned for every delivered message.
    pub disposition: MessageDisposition,
    /// Every envelope delivered to the probe.
    pub seen: Vec<MessageEnvelope>,
    /// Tickets kept from deferred deliveries, with their messages.
    pub tickets: Vec<(PromiseId, Message)>,
    /// Resolutions pushed back to the scheduler on the next pass.
    pub resolutions: Vec<(PromiseId, MessageResponse)>,
    /// Responses delivered for messages the probe sent.
    pub responses: Vec<(PromiseId, MessageResponse)>,
    /// Fold into this task on the next pass, then complete.
    pub merge_into: Option<TaskKey>,
    /// Budget the probe declares as reserved.
    pub budget: ResourceBudget,
    /// Units claimed in `held_units` without a matching reservation.
    pub ghost_claims: BTreeSet<UnitId>,
    /// Units the scheduler force-released from the probe.
    pub forgotten: BTreeSet<UnitId>,
    /// Whether the probe publishes an army status entry.
    pub publish_status: bool,
    /// Unit counts of every other published status, per pass.
    pub board_counts: Vec<u32>,
    /// Times the scheduler called `update`.
    pub updates: u32,
}

impl Default for ProbeState {
    fn default() -> Self {
        Self {
            recruit_goal: 0,
            recruit_origin: None,
            steal: Vec::new(),
            complete_at: None,
            completed: false,
            units: BTreeSet::new(),
            wants_spares: false,
            outgoing: Vec::new(),
            disposition: MessageDisposition::Ignored,
            seen: Vec::new(),
            tickets: Vec::new(),
            resolutions: Vec::new(),
            responses: Vec::new(),
            merge_into: None,
            budget: ResourceBudget::ZERO,
            ghost_claims: BTreeSet::new(),
            forgotten: BTreeSet::new(),
            publish_status: false,
            board_counts: Vec::new(),
            updates: 0,
        }
    }
}

/// Test-side handle to a probe's shared state.
#[derive(Debug)]
pub struct ProbeHandle {
    state: Rc<RefCell<ProbeState>>,
}

impl ProbeHandle {
    /// Borrow the shared state mutably.
    ///
    /// The borrow must be dropped before the next scheduler pass.
    pub fn state(&self) -> RefMut<'_, ProbeState> {
        self.state.borrow_mut()
    }
}

/// Scheduler-side task driven entirely by its [`ProbeState`].
#[derive(Debug)]
pub struct ProbeTask {
    key: TaskKey,
    priority: i32,
    state: Rc<RefCell<ProbeState>>,
}

impl ProbeTask {
    /// Create a probe and the handle that scripts it.
    #[must_use]
    pub fn new(key: &str, priority: i32) -> (Self, ProbeHandle) {
        let state = Rc::new(RefCell::new(ProbeState::default()));
        let handle = ProbeHandle {
            state: Rc::clone(&state),
        };
        (
            Self {
                key: TaskKey::new(key),
                priority,
                state,
            },
            handle,
        )
    }
}

impl Task for ProbeTask {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_complete(&self) -> bool {
        self.state.borrow().completed
    }

    fn reserved_budget(&self) -> ResourceBudget {
        self.state.borrow().budget
    }

    fn update(&mut self, ctx: &mut TaskContext<'_>) {
        let mut state = self.state.borrow_mut();
        state.updates += 1;

        if let Some(at) = state.complete_at {
            if ctx.world().tick() >= at {
                state.completed = true;
            }
        }
        if state.completed {
            return;
        }

        for unit in std::mem::take(&mut state.steal) {
            ctx.reserve(unit);
            state.units.insert(unit);
        }
        while (state.units.len() as u32) < state.recruit_goal {
            let origin = state.recruit_origin;
            let found = ctx.find_free_unit(
                |_| true,
                move |unit| match origin {
                    Some(point) => unit.position.distance_squared(point),
                    None => Fixed::ZERO,
                },
            );
            match found {
                Some(unit) => {
                    state.units.insert(unit);
                }
                None => break,
            }
        }
        // A lowered goal sheds surplus units, highest id first.
        while (state.units.len() as u32) > state.recruit_goal {
            let Some(unit) = state.units.pop_last() else {
                break;
            };
            ctx.release(unit);
        }

        for message in state.outgoing.drain(..) {
            ctx.send(message);
        }
        for (promise, response) in state.resolutions.drain(..) {
            ctx.resolve(promise, response);
        }

        if let Some(target) = state.merge_into.take() {
            ctx.request_merge_into(target);
            state.completed = true;
        }

        let own = ctx.own_id();
        for (id, status) in ctx.board().entries() {
            if id != own {
                state.board_counts.push(status.unit_count);
            }
        }
    }

    fn wants_unit(&self, _unit: &UnitSnapshot, _world: &dyn WorldSnapshot) -> bool {
        self.state.borrow().wants_spares
    }

    fn accept_unit(&mut self, unit: UnitId) {
        self.state.borrow_mut().units.insert(unit);
    }

    fn take_units(&mut self) -> Vec<UnitId> {
        let mut state = self.state.borrow_mut();
        std::mem::take(&mut state.units).into_iter().collect()
    }

    fn held_units(&self) -> Vec<UnitId> {
        let state = self.state.borrow();
        state
            .units
            .iter()
            .chain(state.ghost_claims.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn forget_unit(&mut self, unit: UnitId) {
        let mut state = self.state.borrow_mut();
        state.units.remove(&unit);
        state.ghost_claims.remove(&unit);
        state.forgotten.insert(unit);
    }

    fn on_message(&mut self, envelope: &MessageEnvelope, ticket: PromiseId) -> MessageDisposition {
        let mut state = self.state.borrow_mut();
        state.seen.push(envelope.clone());
        if state.disposition == MessageDisposition::Deferred {
            state.tickets.push((ticket, envelope.message.clone()));
        }
        state.disposition
    }

    fn on_response(&mut self, promise: PromiseId, response: &MessageResponse) {
        self.state
            .borrow_mut()
            .responses
            .push((promise, response.clone()));
    }

    fn army_status(&self) -> Option<ArmyStatus> {
        let state = self.state.borrow();
        state.publish_status.then(|| ArmyStatus {
            key: self.key.clone(),
            centre: None,
            unit_count: state.units.len() as u32,
        })
    }
}
