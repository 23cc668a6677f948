//! Client actor: holds pending tasks, answers offers, tracks outcomes.

pub mod policy;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, RetryPolicy};
use crate::core::actor::{Actor, Context, Timer};
use crate::core::error::ProtocolError;
use crate::core::messages::{ActorId, ClientId, Message, NodeId, Offer, OfferId, StatusUpdate};
use crate::core::resources::Resources;
use crate::core::task::{TaskId, TaskSpec, TaskState};
use crate::util::clock::VirtualTime;

pub use policy::{
    choose_grant, pack_in_order, packing_from_config, FirstFit, LargestFirst, PackingPolicy,
};

/// A task in the client's active bookkeeping.
#[derive(Debug, Clone)]
pub struct ClientTask {
    /// As submitted.
    pub spec: TaskSpec,
    /// Current state.
    pub state: TaskState,
    /// Re-queues used so far.
    pub retries: u32,
    /// Offer the task was packed into.
    pub offer: Option<OfferId>,
    /// Node it was launched on.
    pub node: Option<NodeId>,
    /// Granted slice.
    pub grant: Option<Resources>,
    seq: u64,
}

/// A task that left active bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Task.
    pub task: TaskId,
    /// Terminal state.
    pub state: TaskState,
    /// Node it last ran on.
    pub node: Option<NodeId>,
    /// When it ended.
    pub at: VirtualTime,
    /// Failure or loss reason.
    pub reason: Option<String>,
}

/// A work-submitting scheduler.
pub struct Client {
    id: ClientId,
    retry: RetryPolicy,
    packing: Box<dyn PackingPolicy>,
    tasks: BTreeMap<TaskId, ClientTask>,
    outcomes: Vec<TaskOutcome>,
    attempts: BTreeMap<TaskId, u32>,
    next_seq: u64,
    registered: bool,
    suppressed: bool,
    offers_received: u64,
}

impl Client {
    /// Client named `id` holding `tasks` as PENDING.
    pub fn new(id: ClientId, tasks: Vec<TaskSpec>, config: &ClientConfig) -> Self {
        let mut client = Self {
            id,
            retry: config.retry,
            packing: policy::packing_from_config(config.packing),
            tasks: BTreeMap::new(),
            outcomes: Vec::new(),
            attempts: BTreeMap::new(),
            next_seq: 0,
            registered: false,
            suppressed: false,
            offers_received: 0,
        };
        for spec in tasks {
            client.insert(spec);
        }
        client
    }

    /// Replace the packing policy.
    #[must_use]
    pub fn with_packing(mut self, packing: Box<dyn PackingPolicy>) -> Self {
        self.packing = packing;
        self
    }

    fn insert(&mut self, spec: TaskSpec) -> bool {
        if self.tasks.contains_key(&spec.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert(
            spec.id.clone(),
            ClientTask {
                spec,
                state: TaskState::Pending,
                retries: 0,
                offer: None,
                node: None,
                grant: None,
                seq,
            },
        );
        true
    }

    /// Client name.
    pub const fn name(&self) -> &ClientId {
        &self.id
    }

    /// Whether the coordinator acknowledged this client.
    pub const fn is_registered(&self) -> bool {
        self.registered
    }

    /// Tasks waiting for an offer.
    pub fn count_pending(&self) -> usize {
        self.count(TaskState::Pending)
    }

    /// Tasks LAUNCHING or RUNNING.
    pub fn count_running(&self) -> usize {
        self.tasks.values().filter(|t| t.state.is_active()).count()
    }

    fn count(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    /// Active task, if any.
    pub fn task(&self, id: &TaskId) -> Option<&ClientTask> {
        self.tasks.get(id)
    }

    /// Tasks that reached a terminal state, in order.
    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    /// Latest outcome for `id`.
    pub fn outcome(&self, id: &TaskId) -> Option<&TaskOutcome> {
        self.outcomes.iter().rev().find(|o| &o.task == id)
    }

    /// Offers received so far.
    pub const fn offers_received(&self) -> u64 {
        self.offers_received
    }

    fn send(&self, ctx: &mut dyn Context, message: Message) {
        if let Err(e) = ctx.send(ActorId::Coordinator, message) {
            warn!(client = %self.id, error = %e, "message to coordinator not delivered");
        }
    }

    fn has_pending(&self) -> bool {
        self.tasks.values().any(|t| t.state == TaskState::Pending)
    }

    fn revive(&mut self, ctx: &mut dyn Context) {
        if self.suppressed && self.has_pending() {
            self.suppressed = false;
            self.send(
                ctx,
                Message::ReviveOffers {
                    client: self.id.clone(),
                },
            );
        }
    }

    fn suppress(&mut self, ctx: &mut dyn Context) {
        if !self.suppressed {
            self.suppressed = true;
            self.send(
                ctx,
                Message::SuppressOffers {
                    client: self.id.clone(),
                },
            );
        }
    }

    /// Add a task at run time. Returns false if the id is already active.
    pub fn submit(&mut self, ctx: &mut dyn Context, spec: TaskSpec) -> bool {
        let id = spec.id.clone();
        if !self.insert(spec) {
            warn!(client = %self.id, task = %id, "duplicate submission ignored");
            return false;
        }
        info!(client = %self.id, task = %id, "task submitted");
        self.revive(ctx);
        true
    }

    /// Kill a task. A pending task ends locally; a launched one is killed
    /// through the coordinator. Returns false for an unknown task.
    pub fn kill(&mut self, ctx: &mut dyn Context, id: &TaskId) -> bool {
        let Some(task) = self.tasks.get(id) else {
            return false;
        };
        if task.state == TaskState::Pending {
            let reason = Some("killed while pending".into());
            self.finish(ctx.now(), id, TaskState::Killed, None, reason);
        } else {
            self.send(
                ctx,
                Message::KillTask {
                    client: self.id.clone(),
                    task: id.clone(),
                },
            );
        }
        true
    }

    fn finish(
        &mut self,
        at: VirtualTime,
        id: &TaskId,
        state: TaskState,
        node: Option<NodeId>,
        reason: Option<String>,
    ) {
        if self.tasks.remove(id).is_some() {
            self.outcomes.push(TaskOutcome {
                task: id.clone(),
                state,
                node,
                at,
                reason,
            });
        }
    }

    fn on_offer(&mut self, ctx: &mut dyn Context, offer: Offer) {
        self.offers_received += 1;
        let mut pending: Vec<&ClientTask> = self
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .collect();
        pending.sort_by_key(|t| t.seq);
        let specs: Vec<&TaskSpec> = pending.iter().map(|t| &t.spec).collect();
        let mut launches = if specs.is_empty() {
            Vec::new()
        } else {
            self.packing.pack(&offer.resources, &specs)
        };

        if launches.is_empty() {
            debug!(client = %self.id, offer = %offer.id, pending = specs.len(), "declining offer");
            self.send(
                ctx,
                Message::DeclineOffer {
                    offer: offer.id,
                    client: self.id.clone(),
                },
            );
            if specs.is_empty() {
                self.suppress(ctx);
            }
            return;
        }

        for launch in &mut launches {
            let attempt = self.attempts.entry(launch.task.clone()).or_default();
            *attempt += 1;
            launch.attempt = *attempt;
            if let Some(task) = self.tasks.get_mut(&launch.task) {
                task.state = TaskState::Launching;
                task.offer = Some(offer.id);
                task.node = Some(offer.node.clone());
                task.grant = Some(launch.grant.clone());
            }
        }
        info!(
            client = %self.id,
            offer = %offer.id,
            node = %offer.node,
            tasks = launches.len(),
            "accepting offer"
        );
        self.send(
            ctx,
            Message::AcceptOffer {
                offer: offer.id,
                client: self.id.clone(),
                launches,
            },
        );
        if !self.has_pending() {
            self.suppress(ctx);
        }
    }

    /// Return every task packed into `offer` to PENDING. Returns how many.
    fn revert(&mut self, offer: OfferId, only: Option<&[TaskId]>) -> usize {
        let mut reverted = 0;
        for task in self.tasks.values_mut() {
            let named = only.is_none_or(|ids| ids.contains(&task.spec.id));
            if task.state == TaskState::Launching && task.offer == Some(offer) && named {
                task.state = TaskState::Pending;
                task.offer = None;
                task.node = None;
                task.grant = None;
                reverted += 1;
            }
        }
        reverted
    }

    fn on_violation(&mut self, ctx: &mut dyn Context, offer: OfferId, error: &ProtocolError) {
        warn!(client = %self.id, %offer, %error, "request refused");
        if self.revert(offer, None) > 0
            && !matches!(
                error,
                ProtocolError::UnknownOffer(_) | ProtocolError::NotOfferHolder(_)
            )
        {
            self.send(
                ctx,
                Message::DeclineOffer {
                    offer,
                    client: self.id.clone(),
                },
            );
        }
        self.revive(ctx);
    }

    fn on_status(&mut self, ctx: &mut dyn Context, update: StatusUpdate) {
        let retry = self.retry;
        let Some(task) = self.tasks.get_mut(&update.task) else {
            let (task, state) = (&update.task, update.state);
            debug!(client = %self.id, %task, %state, "update for inactive task ignored");
            return;
        };
        match update.state {
            TaskState::Running => {
                if task.state == TaskState::Launching {
                    task.state = TaskState::Running;
                    task.node = Some(update.node);
                }
            }
            TaskState::Failed | TaskState::Lost if task.retries < retry.max_retries => {
                task.retries += 1;
                task.state = TaskState::Pending;
                task.offer = None;
                task.node = None;
                task.grant = None;
                info!(
                    client = %self.id,
                    task = %update.task,
                    state = %update.state,
                    retry = task.retries,
                    "task re-queued"
                );
                self.revive(ctx);
            }
            state if state.is_terminal() => {
                info!(client = %self.id, task = %update.task, %state, "task ended");
                self.finish(ctx.now(), &update.task, state, Some(update.node), update.reason);
            }
            _ => {}
        }
    }
}

impl Actor for Client {
    fn id(&self) -> ActorId {
        ActorId::Client(self.id.clone())
    }

    fn on_start(&mut self, ctx: &mut dyn Context) {
        let wants_offers = self.has_pending();
        self.suppressed = !wants_offers;
        self.send(
            ctx,
            Message::RegisterClient {
                client: self.id.clone(),
                wants_offers,
            },
        );
    }

    fn on_message(&mut self, ctx: &mut dyn Context, from: ActorId, message: Message) {
        match message {
            Message::ClientRegistered { .. } => self.registered = true,
            Message::ResourceOffer(offer) => self.on_offer(ctx, offer),
            Message::OfferRescinded { offer } => {
                debug!(client = %self.id, %offer, "offer rescinded");
            }
            Message::ProtocolViolation { offer, error } => self.on_violation(ctx, offer, &error),
            Message::LaunchAborted {
                offer,
                tasks,
                reason,
            } => {
                warn!(client = %self.id, %offer, %reason, "launch aborted");
                self.revert(offer, Some(tasks.as_slice()));
                self.revive(ctx);
            }
            Message::StatusUpdate(update) => self.on_status(ctx, update),
            other => {
                debug!(client = %self.id, %from, kind = other.kind(), "client ignores message");
            }
        }
    }

    fn on_timer(&mut self, _ctx: &mut dyn Context, _timer: Timer) {}
}
