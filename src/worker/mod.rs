//! Worker actor: admits launched tasks under strict isolation and runs them to
//! completion on the virtual clock.
//!
//! Admission rechecks capacity locally instead of trusting the coordinator's
//! books. An admitted task progresses at exactly its granted rate, so its
//! completion time is fixed at admission and scheduled as a timer.

pub mod monitor;

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::core::actor::{Actor, Context, Timer, TimerId};
use crate::core::messages::{ActorId, ClientId, Message, NodeId, StatusUpdate, TaskDescription};
use crate::core::resources::{fits, Resources};
use crate::core::task::{TaskId, TaskKind, TaskState, Workload};
use crate::util::clock::VirtualTime;

pub use monitor::{MonitorRequest, MonitorResponse, NodeView, TaskSummary, WorkerCounters};

/// A task held by a worker.
#[derive(Debug, Clone)]
pub struct RunningTask {
    /// Launch instruction as received.
    pub description: TaskDescription,
    /// Current state.
    pub state: TaskState,
    /// Admission time.
    pub started_at: VirtualTime,
    /// Progress rate derived from the grant.
    pub rate: f64,
    /// Scheduled completion, if the workload ever ends.
    pub expected_finish: Option<VirtualTime>,
    timer: Option<TimerId>,
}

impl RunningTask {
    /// Granted slice.
    pub fn grant(&self) -> &Resources {
        &self.description.launch.grant
    }

    /// Work left at `now`. `None` for a service, which never runs out.
    pub fn remaining(&self, now: VirtualTime) -> Option<f64> {
        let kind = &self.description.launch.kind;
        if matches!(kind, TaskKind::Service) {
            return None;
        }
        Some(kind.progress(self.rate, now - self.started_at))
    }
}

/// One node's execution agent.
pub struct Worker {
    node: NodeId,
    total: Resources,
    allocated: Resources,
    config: WorkerConfig,
    coordinator: Option<ActorId>,
    tasks: BTreeMap<(ClientId, TaskId), RunningTask>,
    next_update: u64,
    heartbeat: Option<TimerId>,
    counters: WorkerCounters,
}

impl Worker {
    /// Worker for `node` with fixed capacity `total`.
    pub fn new(node: NodeId, total: Resources, config: WorkerConfig) -> Self {
        Self {
            node,
            total,
            allocated: Resources::new(),
            config,
            coordinator: None,
            tasks: BTreeMap::new(),
            next_update: 0,
            heartbeat: None,
            counters: WorkerCounters::default(),
        }
    }

    /// Node identity.
    pub const fn node(&self) -> &NodeId {
        &self.node
    }

    /// Capacity not granted to tasks.
    pub fn free(&self) -> Resources {
        self.total.checked_sub(&self.allocated).unwrap_or_default()
    }

    /// Held task, if any.
    pub fn task(&self, client: &ClientId, task: &TaskId) -> Option<&RunningTask> {
        self.tasks.get(&(client.clone(), task.clone()))
    }

    /// Held tasks in key order.
    pub fn tasks(&self) -> impl Iterator<Item = &RunningTask> {
        self.tasks.values()
    }

    /// Check `allocated <= total` and `allocated == sum(grants)`.
    ///
    /// # Errors
    ///
    /// Describes the violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.total.fits(&self.allocated) {
            return Err(format!(
                "node {}: allocated {} exceeds total {}",
                self.node, self.allocated, self.total
            ));
        }
        let granted = self
            .tasks
            .values()
            .fold(Resources::new(), |acc, t| &acc + t.grant());
        if !granted.approx_eq(&self.allocated) {
            return Err(format!(
                "node {}: allocated {} differs from task grants {granted}",
                self.node, self.allocated
            ));
        }
        Ok(())
    }

    fn report(
        &mut self,
        ctx: &mut dyn Context,
        client: ClientId,
        task: TaskId,
        state: TaskState,
        reason: Option<String>,
    ) {
        self.next_update += 1;
        let update = StatusUpdate {
            node: self.node.clone(),
            client,
            task,
            state,
            update_id: self.next_update,
            reason,
        };
        if let Err(e) = ctx.send(ActorId::Coordinator, Message::StatusUpdate(update)) {
            warn!(node = %self.node, error = %e, "status update not delivered");
        }
    }

    /// Why `description` cannot be admitted right now, if anything.
    fn admission_error(&self, description: &TaskDescription) -> Option<String> {
        let launch = &description.launch;
        if !fits(&self.free(), &launch.grant) {
            return Some(format!(
                "grant {} exceeds free capacity {}",
                launch.grant,
                self.free()
            ));
        }
        if !launch.requirement.accepts(&launch.grant) {
            return Some(format!("grant {} outside requirement band", launch.grant));
        }
        let rate = launch.kind.rate(&launch.grant);
        if !matches!(launch.kind, TaskKind::Service) && launch.kind.completion_after(rate).is_none()
        {
            return Some(format!("grant {} gives no progress", launch.grant));
        }
        None
    }

    fn launch(&mut self, ctx: &mut dyn Context, description: TaskDescription) {
        let client = description.client.clone();
        let task = description.launch.task.clone();
        let key = (client.clone(), task.clone());
        if self.tasks.contains_key(&key) {
            warn!(node = %self.node, %client, %task, "duplicate launch ignored");
            return;
        }
        self.counters.launched += 1;

        if let Some(reason) = self.admission_error(&description) {
            warn!(node = %self.node, %client, %task, %reason, "task rejected");
            self.counters.failed += 1;
            self.report(ctx, client, task, TaskState::Failed, Some(reason));
            return;
        }

        let now = ctx.now();
        let launch = &description.launch;
        let rate = launch.kind.rate(&launch.grant);
        let completion = launch.kind.completion_after(rate);
        self.allocated += &launch.grant;
        let timer = completion.map(|after| {
            ctx.schedule(
                after,
                Timer::TaskCompleted {
                    client: client.clone(),
                    task: task.clone(),
                },
            )
        });
        let expected_finish = completion.map(|after| now + after);
        info!(
            node = %self.node,
            %client,
            %task,
            grant = %launch.grant,
            rate,
            finish = ?expected_finish.map(VirtualTime::as_secs_f64),
            "task running"
        );
        self.tasks.insert(
            key,
            RunningTask {
                description,
                state: TaskState::Running,
                started_at: now,
                rate,
                expected_finish,
                timer,
            },
        );
        self.report(ctx, client, task, TaskState::Running, None);
    }

    fn complete(&mut self, ctx: &mut dyn Context, client: ClientId, task: TaskId) {
        let Some(running) = self.tasks.remove(&(client.clone(), task.clone())) else {
            return;
        };
        self.allocated -= running.grant();
        self.counters.finished += 1;
        info!(node = %self.node, %client, %task, "task finished");
        self.report(ctx, client, task, TaskState::Finished, None);
    }

    fn kill(&mut self, ctx: &mut dyn Context, client: ClientId, task: TaskId) {
        let Some(running) = self.tasks.remove(&(client.clone(), task.clone())) else {
            debug!(node = %self.node, %client, %task, "kill for unknown task");
            return;
        };
        if let Some(timer) = running.timer {
            ctx.cancel(timer);
        }
        self.allocated -= running.grant();
        self.counters.killed += 1;
        info!(node = %self.node, %client, %task, "task killed");
        self.report(ctx, client, task, TaskState::Killed, Some("killed on request".into()));
    }

    fn heartbeat(&mut self, ctx: &mut dyn Context) {
        let node = self.node.clone();
        if let Err(e) = ctx.send(ActorId::Coordinator, Message::Heartbeat { node }) {
            debug!(node = %self.node, error = %e, "heartbeat not delivered");
        }
        self.heartbeat = Some(ctx.schedule(self.config.heartbeat_interval(), Timer::Heartbeat));
    }
}

impl NodeView for Worker {
    fn node_id(&self) -> &NodeId {
        &self.node
    }

    fn total(&self) -> &Resources {
        &self.total
    }

    fn allocated(&self) -> &Resources {
        &self.allocated
    }

    fn coordinator(&self) -> Option<&ActorId> {
        self.coordinator.as_ref()
    }

    fn counters(&self) -> WorkerCounters {
        self.counters
    }

    fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn task_summaries(&self, now: VirtualTime) -> Vec<TaskSummary> {
        self.tasks
            .values()
            .map(|t| TaskSummary {
                client: t.description.client.clone(),
                task: t.description.launch.task.clone(),
                state: t.state,
                grant: t.grant().clone(),
                started_at: t.started_at,
                expected_finish: t.expected_finish,
                remaining_work: t.remaining(now),
            })
            .collect()
    }
}

impl Actor for Worker {
    fn id(&self) -> ActorId {
        ActorId::Worker(self.node.clone())
    }

    fn on_start(&mut self, ctx: &mut dyn Context) {
        let message = Message::RegisterWorker {
            node: self.node.clone(),
            total: self.total.clone(),
        };
        if let Err(e) = ctx.send(ActorId::Coordinator, message) {
            warn!(node = %self.node, error = %e, "registration not delivered");
        }
        self.heartbeat = Some(ctx.schedule(self.config.heartbeat_interval(), Timer::Heartbeat));
    }

    fn on_message(&mut self, ctx: &mut dyn Context, from: ActorId, message: Message) {
        match message {
            Message::WorkerRegistered { .. } => {
                debug!(node = %self.node, coordinator = %from, "registered with coordinator");
                self.coordinator = Some(from);
            }
            Message::LaunchTasks { tasks } => {
                for description in tasks {
                    self.launch(ctx, description);
                }
            }
            Message::KillTask { client, task } => self.kill(ctx, client, task),
            other => {
                debug!(node = %self.node, %from, kind = other.kind(), "worker ignores message");
            }
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn Context, timer: Timer) {
        match timer {
            Timer::TaskCompleted { client, task } => self.complete(ctx, client, task),
            Timer::Heartbeat => self.heartbeat(ctx),
            _ => {}
        }
    }

    /// Every held task becomes LOST. No reports are sent: the coordinator
    /// learns of the loss from the teardown notification or a heartbeat timeout.
    fn on_stop(&mut self, ctx: &mut dyn Context) {
        if let Some(timer) = self.heartbeat.take() {
            ctx.cancel(timer);
        }
        for (_, mut running) in std::mem::take(&mut self.tasks) {
            if let Some(timer) = running.timer.take() {
                ctx.cancel(timer);
            }
            self.counters.lost += 1;
        }
        self.allocated = Resources::new();
        info!(node = %self.node, lost = self.counters.lost, "worker stopped");
    }
}
