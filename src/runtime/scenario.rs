//! Scenario harness: one coordinator, any number of workers and clients, one
//! shared virtual clock.
//!
//! ```rust,ignore
//! let mut scenario = Scenario::new(ClusterConfig::default())?;
//! scenario.spawn_coordinator()?;
//! scenario.spawn_worker(Resources::parse("cpus:4;mem:1024")?)?;
//! scenario.spawn_client("batch", tasks)?;
//! scenario.finish_setup();
//! scenario.run_for_secs(30.1);
//! assert_eq!(scenario.get_client("batch").unwrap().count_pending(), 0);
//! scenario.stop();
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::client::Client;
use crate::config::ClusterConfig;
use crate::coordinator::Coordinator;
use crate::core::audit::{AuditEvent, InMemoryAuditSink, SharedAuditSink};
use crate::core::error::SchedulerError;
use crate::core::messages::{ActorId, ClientId, Message, NodeId};
use crate::core::resources::Resources;
use crate::core::task::{TaskId, TaskSpec};
use crate::runtime::sim::Simulation;
use crate::runtime::Participant;
use crate::util::clock::VirtualTime;
use crate::worker::monitor::{self, MonitorRequest, MonitorResponse};
use crate::worker::Worker;

const AUDIT_CAPACITY: usize = 100_000;

/// Test orchestrator over a deterministic [`Simulation`].
pub struct Scenario {
    config: ClusterConfig,
    sim: Simulation,
    audit: Arc<Mutex<InMemoryAuditSink>>,
    next_node: usize,
    started: bool,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("config", &self.config)
            .field("next_node", &self.next_node)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::with_valid_config(ClusterConfig::default())
    }
}

impl Scenario {
    /// Empty scenario with a paused clock at zero.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Config`] if `config` fails validation. A zero offer
    /// timeout or decline filter would otherwise let the clock stall.
    pub fn new(config: ClusterConfig) -> Result<Self, SchedulerError> {
        config
            .validate()
            .map_err(|e| SchedulerError::Config(format!("cluster config invalid: {e}")))?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: ClusterConfig) -> Self {
        let sim = Simulation::new(config.message_latency());
        Self {
            config,
            sim,
            audit: Arc::new(Mutex::new(InMemoryAuditSink::new(AUDIT_CAPACITY))),
            next_node: 1,
            started: false,
        }
    }

    /// Configuration in use.
    pub const fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Current virtual time.
    pub fn now(&self) -> VirtualTime {
        self.sim.now()
    }

    /// Underlying simulation.
    pub const fn simulation(&self) -> &Simulation {
        &self.sim
    }

    fn add(&mut self, participant: Participant) -> Result<ActorId, SchedulerError> {
        let id = self.sim.spawn(participant)?;
        if self.started {
            self.sim.start(&id)?;
        }
        Ok(id)
    }

    /// Spawn the coordinator.
    ///
    /// # Errors
    ///
    /// Fails if a coordinator already exists.
    pub fn spawn_coordinator(&mut self) -> Result<(), SchedulerError> {
        let sink: SharedAuditSink = self.audit.clone();
        let coordinator = Coordinator::new(self.config.coordinator.clone()).with_audit(sink);
        self.add(coordinator.into())?;
        Ok(())
    }

    /// Spawn a worker named `node-N` with fixed capacity `total`.
    ///
    /// # Errors
    ///
    /// Fails if the generated name is taken.
    pub fn spawn_worker(&mut self, total: Resources) -> Result<NodeId, SchedulerError> {
        let node = NodeId::new(format!("node-{}", self.next_node));
        self.next_node += 1;
        self.spawn_named_worker(node, total)
    }

    /// Spawn a worker with an explicit name.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken.
    pub fn spawn_named_worker(
        &mut self,
        node: NodeId,
        total: Resources,
    ) -> Result<NodeId, SchedulerError> {
        let worker = Worker::new(node.clone(), total, self.config.worker.clone());
        self.add(worker.into())?;
        Ok(node)
    }

    /// Spawn a client holding `tasks` as PENDING.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken.
    pub fn spawn_client(
        &mut self,
        name: &str,
        tasks: Vec<TaskSpec>,
    ) -> Result<ClientId, SchedulerError> {
        let id = ClientId::new(name);
        let client = Client::new(id.clone(), tasks, &self.config.client);
        self.add(client.into())?;
        Ok(id)
    }

    /// Start every actor and process the registrations they trigger at the
    /// current instant.
    pub fn finish_setup(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.sim.start_all();
        self.sim.settle();
        info!(actors = self.sim.actor_ids().count(), "scenario ready");
    }

    /// Advance virtual time by `by`, processing everything that happens on
    /// the way. Returns the number of events handled.
    pub fn run_for(&mut self, by: Duration) -> usize {
        self.sim.run_for(by)
    }

    /// [`Scenario::run_for`] in seconds. Negative or non-finite input runs
    /// for zero time.
    pub fn run_for_secs(&mut self, secs: f64) -> usize {
        self.run_for(Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
    }

    /// Read-only client handle.
    pub fn get_client(&self, name: &str) -> Option<&Client> {
        self.sim
            .actor(&ActorId::Client(ClientId::new(name)))
            .and_then(Participant::as_client)
    }

    /// Read-only worker handle.
    pub fn get_worker(&self, node: &NodeId) -> Option<&Worker> {
        self.sim
            .actor(&ActorId::Worker(node.clone()))
            .and_then(Participant::as_worker)
    }

    /// Read-only coordinator handle.
    pub fn coordinator(&self) -> Option<&Coordinator> {
        self.sim
            .actor(&ActorId::Coordinator)
            .and_then(Participant::as_coordinator)
    }

    /// Submit a task to a client at the current instant.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] for an unknown client.
    pub fn submit_task(&mut self, client: &str, spec: TaskSpec) -> Result<bool, SchedulerError> {
        let id = ActorId::Client(ClientId::new(client));
        self.sim
            .invoke(&id, |actor, ctx| {
                actor.as_client_mut().map(|c| c.submit(ctx, spec))
            })?
            .ok_or_else(|| SchedulerError::UnknownActor(id.to_string()))
    }

    /// Ask a client to kill one of its tasks.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] for an unknown client.
    pub fn kill_task(&mut self, client: &str, task: &TaskId) -> Result<bool, SchedulerError> {
        let id = ActorId::Client(ClientId::new(client));
        self.sim
            .invoke(&id, |actor, ctx| actor.as_client_mut().map(|c| c.kill(ctx, task)))?
            .ok_or_else(|| SchedulerError::UnknownActor(id.to_string()))
    }

    /// Send `message` to `to` on behalf of `from`, at the current instant.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] for an unknown sender and
    /// [`SchedulerError::Unreachable`] for an unknown receiver.
    pub fn send_as(
        &mut self,
        from: &ActorId,
        to: ActorId,
        message: Message,
    ) -> Result<(), SchedulerError> {
        self.sim.invoke(from, |_, ctx| ctx.send(to, message))?
    }

    /// Tear a worker down with an explicit notification to the coordinator.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] for an unknown worker.
    pub fn remove_worker(&mut self, node: &NodeId) -> Result<(), SchedulerError> {
        let id = ActorId::Worker(node.clone());
        let notify = Message::UnregisterWorker { node: node.clone() };
        self.sim
            .invoke(&id, |_, ctx| ctx.send(ActorId::Coordinator, notify))??;
        self.sim.stop(&id)?;
        info!(%node, "worker removed");
        Ok(())
    }

    /// Make a worker vanish silently; the coordinator finds out through the
    /// heartbeat timeout.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] for an unknown worker.
    pub fn crash_worker(&mut self, node: &NodeId) -> Result<(), SchedulerError> {
        self.sim.crash(&ActorId::Worker(node.clone()))?;
        info!(%node, "worker crashed");
        Ok(())
    }

    /// Answer a monitoring request for a worker.
    pub fn monitor(&self, node: &NodeId, request: MonitorRequest) -> Option<MonitorResponse> {
        let now = self.now();
        self.get_worker(node).map(|w| monitor::answer(w, request, now))
    }

    /// Recorded audit trail.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().events()
    }

    /// Audit events with one action.
    pub fn audit_actions(&self, action: &str) -> Vec<AuditEvent> {
        self.audit.lock().with_action(action)
    }

    /// Check the coordinator's and every worker's books.
    ///
    /// # Errors
    ///
    /// Describes the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        if let Some(c) = self.coordinator() {
            c.check_invariants()?;
        }
        for id in self.sim.actor_ids() {
            if let Some(w) = self.sim.actor(id).and_then(Participant::as_worker) {
                w.check_invariants()?;
            }
        }
        Ok(())
    }

    /// Tear down every actor. Outstanding resources are released without
    /// terminal reports.
    pub fn stop(&mut self) {
        let stopped = self.sim.stop_all();
        info!(actors = stopped.len(), at = %self.now(), "scenario stopped");
        self.started = false;
    }
}
