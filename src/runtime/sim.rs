//! Deterministic single-threaded dispatcher.
//!
//! Every message and timer is an event on one [`Timeline`]. Events are handled
//! one at a time in due-time order, FIFO among equal due times, so a given
//! sequence of inputs always produces the same trace.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{trace, warn};

use crate::core::actor::{Actor, Context, Timer, TimerId};
use crate::core::error::SchedulerError;
use crate::core::messages::{ActorId, Message};
use crate::runtime::timeline::Timeline;
use crate::runtime::Participant;
use crate::util::clock::VirtualTime;

/// Something due on the simulated timeline.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// A message in flight.
    Deliver {
        /// Sender.
        from: ActorId,
        /// Receiver.
        to: ActorId,
        /// Payload.
        message: Message,
    },
    /// A timer owned by one actor.
    Timer {
        /// Actor that scheduled it.
        owner: ActorId,
        /// Payload.
        timer: Timer,
    },
}

type Actors = BTreeMap<ActorId, Participant>;

/// Context handed to an actor while the simulator runs one of its handlers.
struct SimContext<'a> {
    owner: &'a ActorId,
    timeline: &'a mut Timeline<SimEvent>,
    actors: &'a Actors,
    latency: Duration,
}

impl Context for SimContext<'_> {
    fn now(&self) -> VirtualTime {
        self.timeline.now()
    }

    fn send(&mut self, to: ActorId, message: Message) -> Result<(), SchedulerError> {
        if !self.is_reachable(&to) {
            return Err(SchedulerError::Unreachable(to));
        }
        trace!(from = %self.owner, %to, kind = message.kind(), "send");
        self.timeline.schedule_after(
            self.latency,
            SimEvent::Deliver {
                from: self.owner.clone(),
                to,
                message,
            },
        );
        Ok(())
    }

    fn is_reachable(&self, to: &ActorId) -> bool {
        to == self.owner || self.actors.contains_key(to)
    }

    fn schedule(&mut self, after: Duration, timer: Timer) -> TimerId {
        TimerId(self.timeline.schedule_after(
            after,
            SimEvent::Timer {
                owner: self.owner.clone(),
                timer,
            },
        ))
    }

    fn cancel(&mut self, timer: TimerId) -> bool {
        self.timeline.cancel(timer.0)
    }
}

/// Run `f` against the actor `id` with a simulator context. The actor is
/// taken out of the map for the duration, so it is private to the handler.
fn with_context<R>(
    timeline: &mut Timeline<SimEvent>,
    actors: &mut Actors,
    latency: Duration,
    id: &ActorId,
    f: impl FnOnce(&mut Participant, &mut dyn Context) -> R,
) -> Option<R> {
    let mut actor = actors.remove(id)?;
    let out = {
        let mut ctx = SimContext {
            owner: id,
            timeline,
            actors,
            latency,
        };
        f(&mut actor, &mut ctx)
    };
    actors.insert(id.clone(), actor);
    Some(out)
}

fn dispatch(
    timeline: &mut Timeline<SimEvent>,
    actors: &mut Actors,
    latency: Duration,
    event: SimEvent,
) -> bool {
    match event {
        SimEvent::Deliver { from, to, message } => {
            let kind = message.kind();
            let handled = with_context(timeline, actors, latency, &to, |actor, ctx| {
                actor.on_message(ctx, from, message);
            });
            if handled.is_none() {
                trace!(%to, kind, "message to departed actor dropped");
            }
            handled.is_some()
        }
        SimEvent::Timer { owner, timer } => {
            with_context(timeline, actors, latency, &owner, |actor, ctx| {
                actor.on_timer(ctx, timer);
            })
            .is_some()
        }
    }
}

/// Single-threaded, clock-stepped actor host.
pub struct Simulation {
    timeline: Timeline<SimEvent>,
    actors: Actors,
    order: Vec<ActorId>,
    latency: Duration,
    handled: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Simulation {
    /// Empty simulation whose messages take `latency` to arrive.
    pub fn new(latency: Duration) -> Self {
        Self {
            timeline: Timeline::new(),
            actors: BTreeMap::new(),
            order: Vec::new(),
            latency,
            handled: 0,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> VirtualTime {
        self.timeline.now()
    }

    /// Events handled so far.
    pub const fn handled(&self) -> u64 {
        self.handled
    }

    /// Events still scheduled.
    pub fn pending(&self) -> usize {
        self.timeline.pending()
    }

    /// Add an actor without starting it.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Config`] if an actor with the same id exists.
    pub fn spawn(&mut self, participant: Participant) -> Result<ActorId, SchedulerError> {
        let id = participant.id();
        if self.actors.contains_key(&id) {
            return Err(SchedulerError::Config(format!("actor {id} already exists")));
        }
        self.actors.insert(id.clone(), participant);
        self.order.push(id.clone());
        Ok(id)
    }

    /// Run `on_start` for `id`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] if `id` is not hosted here.
    pub fn start(&mut self, id: &ActorId) -> Result<(), SchedulerError> {
        self.invoke(id, |actor, ctx| actor.on_start(ctx))
    }

    /// Start every actor in spawn order.
    pub fn start_all(&mut self) {
        for id in self.order.clone() {
            if let Err(e) = self.start(&id) {
                warn!(%id, error = %e, "actor not started");
            }
        }
    }

    /// Run `f` against actor `id` with a live context, as if it were one of
    /// the actor's handlers.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] if `id` is not hosted here.
    pub fn invoke<R>(
        &mut self,
        id: &ActorId,
        f: impl FnOnce(&mut Participant, &mut dyn Context) -> R,
    ) -> Result<R, SchedulerError> {
        with_context(&mut self.timeline, &mut self.actors, self.latency, id, f)
            .ok_or_else(|| SchedulerError::UnknownActor(id.to_string()))
    }

    /// Read-only access to an actor.
    pub fn actor(&self, id: &ActorId) -> Option<&Participant> {
        self.actors.get(id)
    }

    /// Hosted actor ids in spawn order.
    pub fn actor_ids(&self) -> impl Iterator<Item = &ActorId> {
        self.order.iter().filter(|id| self.actors.contains_key(id))
    }

    /// Tear down one actor. Its pending timers and the messages still in
    /// flight to it are dropped, so a later actor with the same id starts
    /// clean.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] if `id` is not hosted here.
    pub fn stop(&mut self, id: &ActorId) -> Result<Participant, SchedulerError> {
        self.invoke(id, |actor, ctx| actor.on_stop(ctx))?;
        self.remove(id)
    }

    /// Remove an actor without running `on_stop`, as if its host vanished.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] if `id` is not hosted here.
    pub fn crash(&mut self, id: &ActorId) -> Result<Participant, SchedulerError> {
        self.remove(id)
    }

    fn remove(&mut self, id: &ActorId) -> Result<Participant, SchedulerError> {
        let participant = self
            .actors
            .remove(id)
            .ok_or_else(|| SchedulerError::UnknownActor(id.to_string()))?;
        self.order.retain(|o| o != id);
        let dropped = self.timeline.cancel_where(|event| match event {
            SimEvent::Deliver { to, .. } => to == id,
            SimEvent::Timer { owner, .. } => owner == id,
        });
        trace!(%id, dropped, "actor removed");
        Ok(participant)
    }

    /// Tear down every actor in reverse spawn order and drop pending events.
    pub fn stop_all(&mut self) -> Vec<Participant> {
        let mut stopped = Vec::new();
        for id in self.order.clone().iter().rev() {
            if let Ok(p) = self.stop(id) {
                stopped.push(p);
            }
        }
        self.timeline.clear();
        stopped
    }

    /// Handle every event due now, without moving the clock.
    pub fn settle(&mut self) -> usize {
        let Self {
            timeline,
            actors,
            latency,
            ..
        } = self;
        let latency = *latency;
        let n = timeline.run_due(|tl, _, event| {
            dispatch(tl, actors, latency, event);
        });
        self.handled += n as u64;
        n
    }

    /// Advance virtual time by `by`, handling every event that falls due on
    /// the way at its own due time. Returns the number of events handled.
    pub fn run_for(&mut self, by: Duration) -> usize {
        let Self {
            timeline,
            actors,
            latency,
            ..
        } = self;
        let latency = *latency;
        let n = timeline.advance_by(by, |tl, _, event| {
            dispatch(tl, actors, latency, event);
        });
        self.handled += n as u64;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, CoordinatorConfig, WorkerConfig};
    use crate::client::Client;
    use crate::coordinator::Coordinator;
    use crate::core::messages::{ClientId, NodeId};
    use crate::core::resources::{Requirement, Resources};
    use crate::core::task::TaskSpec;
    use crate::worker::Worker;

    fn build(latency: Duration) -> Simulation {
        let mut sim = Simulation::new(latency);
        sim.spawn(Coordinator::new(CoordinatorConfig::default()).into())
            .unwrap();
        sim.spawn(
            Worker::new(
                NodeId::new("n1"),
                Resources::parse("cpus:4;mem:1024").unwrap(),
                WorkerConfig::default(),
            )
            .into(),
        )
        .unwrap();
        let task = TaskSpec::batch("t", Requirement::parse("", "cpus:1;mem:512").unwrap(), 30.0);
        sim.spawn(Client::new(ClientId::new("c"), vec![task], &ClientConfig::default()).into())
            .unwrap();
        sim.start_all();
        sim
    }

    #[test]
    fn duplicate_spawn_is_rejected() {
        let mut sim = build(Duration::ZERO);
        let again = Coordinator::new(CoordinatorConfig::default());
        assert!(sim.spawn(again.into()).is_err());
    }

    #[test]
    fn same_inputs_same_trace() {
        let mut a = build(Duration::from_millis(5));
        let mut b = build(Duration::from_millis(5));
        assert_eq!(
            a.run_for(Duration::from_secs(40)),
            b.run_for(Duration::from_secs(40))
        );
        assert_eq!(a.handled(), b.handled());
    }

    #[test]
    fn events_to_crashed_actor_are_dropped() {
        let mut sim = build(Duration::ZERO);
        sim.settle();
        sim.crash(&ActorId::Client(ClientId::new("c"))).unwrap();
        sim.run_for(Duration::from_secs(60));
        assert!(sim.actor(&ActorId::Client(ClientId::new("c"))).is_none());
    }

    #[test]
    fn crash_cancels_timers_before_a_restart() {
        let mut sim = build(Duration::from_millis(5));
        sim.run_for(Duration::from_millis(20));
        let node = ActorId::Worker(NodeId::new("n1"));
        let before = sim.pending();
        sim.crash(&node).unwrap();
        assert_eq!(before - sim.pending(), 2);

        let restarted = Worker::new(
            NodeId::new("n1"),
            Resources::parse("cpus:4;mem:1024").unwrap(),
            WorkerConfig::default(),
        );
        sim.spawn(restarted.into()).unwrap();
        sim.start(&node).unwrap();
        sim.run_for(Duration::from_secs(40));
        let worker = sim.actor(&node).and_then(Participant::as_worker).unwrap();
        assert_eq!(worker.tasks().count(), 0);
        let coordinator = sim
            .actor(&ActorId::Coordinator)
            .and_then(Participant::as_coordinator)
            .unwrap();
        assert_eq!(coordinator.stats().nodes_lost, 1);
        coordinator.check_invariants().unwrap();
    }
}
