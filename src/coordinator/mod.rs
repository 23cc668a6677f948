//! Coordinator actor: cluster view, offer generation, and launch routing.
//!
//! Per node slice the coordinator moves resources between three states:
//! free, offered to one client, and allocated to launched tasks. Offers are
//! resolved exactly once (accept, decline, or deadline), and every mutation of
//! the books happens inside this actor's handlers.

pub mod allocator;
pub mod cluster;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::core::actor::{Actor, Context, Timer, TimerId};
use crate::core::audit::{build_audit_event, SharedAuditSink};
use crate::core::error::ProtocolError;
use crate::core::messages::{
    ActorId, ClientId, Message, NodeId, Offer, OfferId, StatusUpdate, TaskDescription,
    TaskLaunch,
};
use crate::core::resources::Resources;
use crate::core::task::{TaskId, TaskState};
use crate::util::clock::VirtualTime;

pub use allocator::{
    policy_from_config, AllocationPolicy, ClientShare, DominantShare, RoundRobin,
};
pub use cluster::{ClusterSnapshot, ClusterView, NodeEntry, NodeSnapshot, TaskSnapshot};

/// Per-client registration state.
#[derive(Debug, Default)]
struct ClientEntry {
    /// Wants offers.
    active: bool,
    /// Nodes withheld from this client until the given time.
    filters: BTreeMap<NodeId, VirtualTime>,
    /// Highest launch attempt forwarded per task.
    launched: BTreeMap<TaskId, u32>,
}

impl ClientEntry {
    fn filtered(&self, node: &NodeId, now: VirtualTime) -> bool {
        self.filters.get(node).is_some_and(|until| *until > now)
    }
}

/// Per-worker liveness state.
#[derive(Debug, Default)]
struct WorkerEntry {
    timeout: Option<TimerId>,
    last_update: u64,
}

/// Protocol counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Offers sent.
    pub offers_made: u64,
    /// Offers accepted.
    pub offers_accepted: u64,
    /// Offers declined.
    pub offers_declined: u64,
    /// Offers rescinded at their deadline.
    pub offers_expired: u64,
    /// Offers rescinded because their node went away.
    pub offers_rescinded: u64,
    /// Tasks forwarded to workers.
    pub tasks_launched: u64,
    /// Accepted launches that could not be forwarded.
    pub launches_aborted: u64,
    /// Requests refused with a protocol violation.
    pub protocol_violations: u64,
    /// Status updates ignored as duplicates.
    pub duplicate_updates: u64,
    /// Nodes dropped from the view.
    pub nodes_lost: u64,
}

/// The central resource broker.
pub struct Coordinator {
    config: CoordinatorConfig,
    view: ClusterView,
    clients: BTreeMap<ClientId, ClientEntry>,
    workers: BTreeMap<NodeId, WorkerEntry>,
    policy: Box<dyn AllocationPolicy>,
    next_offer: u64,
    stats: CoordinatorStats,
    audit: Option<SharedAuditSink>,
}

impl Coordinator {
    /// Coordinator using the configured allocation policy.
    pub fn new(config: CoordinatorConfig) -> Self {
        let policy = policy_from_config(config.allocation_policy);
        Self {
            config,
            view: ClusterView::new(),
            clients: BTreeMap::new(),
            workers: BTreeMap::new(),
            policy,
            next_offer: 1,
            stats: CoordinatorStats::default(),
            audit: None,
        }
    }

    /// Replace the allocation policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Box<dyn AllocationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Record protocol events into `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: SharedAuditSink) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Read access to the books.
    pub const fn view(&self) -> &ClusterView {
        &self.view
    }

    /// Serializable copy of the books.
    pub fn snapshot(&self) -> ClusterSnapshot {
        self.view.snapshot()
    }

    /// Protocol counters.
    pub const fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// Name of the allocation policy in use.
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Registered clients.
    pub fn client_ids(&self) -> impl Iterator<Item = &ClientId> {
        self.clients.keys()
    }

    /// Check conservation and exclusivity on the books.
    ///
    /// # Errors
    ///
    /// Describes the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.view.check_invariants()
    }

    fn record(
        &self,
        action: &str,
        at: VirtualTime,
        client: Option<&ClientId>,
        node: Option<&NodeId>,
        subject: Option<String>,
        detail: Option<String>,
    ) {
        if let Some(sink) = &self.audit {
            sink.lock().record(build_audit_event(
                action,
                client.map(ToString::to_string),
                node.map(ToString::to_string),
                subject,
                at,
                detail,
            ));
        }
    }

    fn reply(ctx: &mut dyn Context, to: ActorId, message: Message) {
        if let Err(e) = ctx.send(to, message) {
            debug!(error = %e, "reply dropped");
        }
    }

    fn violation(
        &mut self,
        ctx: &mut dyn Context,
        to: ActorId,
        offer: OfferId,
        error: ProtocolError,
    ) {
        warn!(%to, %offer, %error, "protocol violation");
        self.stats.protocol_violations += 1;
        self.record(
            "violation",
            ctx.now(),
            None,
            None,
            Some(offer.to_string()),
            Some(error.to_string()),
        );
        Self::reply(ctx, to, Message::ProtocolViolation { offer, error });
    }

    fn arm_worker_timeout(&mut self, ctx: &mut dyn Context, node: &NodeId) {
        let after = self.config.worker_timeout();
        let Some(entry) = self.workers.get_mut(node) else {
            return;
        };
        if let Some(old) = entry.timeout.take() {
            ctx.cancel(old);
        }
        entry.timeout = Some(ctx.schedule(after, Timer::WorkerTimeout(node.clone())));
    }

    /// A known node registering again has restarted: its previous tasks are
    /// gone and its update ids start over.
    fn on_register_worker(&mut self, ctx: &mut dyn Context, node: NodeId, total: Resources) {
        if self.workers.contains_key(&node) || self.view.node(&node).is_some() {
            self.node_lost(ctx, &node, "worker re-registered");
        }
        if self.view.add_node(node.clone(), total.clone()) {
            info!(%node, %total, "worker registered");
            self.workers.insert(node.clone(), WorkerEntry::default());
            let detail = Some(total.to_string());
            self.record("register_worker", ctx.now(), None, Some(&node), None, detail);
        }
        self.arm_worker_timeout(ctx, &node);
        Self::reply(ctx, ActorId::Worker(node.clone()), Message::WorkerRegistered { node });
        self.allocate(ctx);
    }

    fn on_heartbeat(&mut self, ctx: &mut dyn Context, node: &NodeId) {
        if self.workers.contains_key(node) {
            self.arm_worker_timeout(ctx, node);
        } else {
            warn!(%node, "heartbeat from unknown worker");
        }
    }

    fn on_register_client(&mut self, ctx: &mut dyn Context, client: ClientId, wants_offers: bool) {
        info!(%client, wants_offers, "client registered");
        let entry = self.clients.entry(client.clone()).or_default();
        entry.active = wants_offers;
        self.record("register_client", ctx.now(), Some(&client), None, None, None);
        Self::reply(
            ctx,
            ActorId::Client(client.clone()),
            Message::ClientRegistered { client },
        );
        self.allocate(ctx);
    }

    fn on_revive(&mut self, ctx: &mut dyn Context, client: &ClientId) {
        if let Some(entry) = self.clients.get_mut(client) {
            debug!(%client, "offers revived");
            entry.active = true;
            entry.filters.clear();
            self.allocate(ctx);
        }
    }

    fn on_suppress(&mut self, client: &ClientId) {
        if let Some(entry) = self.clients.get_mut(client) {
            debug!(%client, "offers suppressed");
            entry.active = false;
        }
    }

    /// Check an accept against its offer without touching any state.
    fn validate_accept(
        &self,
        offer: &Offer,
        client: &ClientId,
        launches: &[TaskLaunch],
    ) -> Result<(), ProtocolError> {
        if &offer.client != client {
            return Err(ProtocolError::NotOfferHolder(offer.id));
        }
        let launched = self.clients.get(client).map(|entry| &entry.launched);
        let mut seen = BTreeSet::new();
        let mut requested = Resources::new();
        for launch in launches {
            if !seen.insert(&launch.task) {
                return Err(ProtocolError::DuplicateLaunch(launch.task.clone()));
            }
            let placed = self
                .view
                .placement(&(client.clone(), launch.task.clone()))
                .is_some();
            let stale = launched
                .and_then(|l| l.get(&launch.task))
                .is_some_and(|last| launch.attempt <= *last);
            if placed || stale {
                return Err(ProtocolError::TaskNotPending(launch.task.clone()));
            }
            if !launch.requirement.accepts(&launch.grant) {
                return Err(ProtocolError::GrantOutsideBand {
                    task: launch.task.clone(),
                    grant: launch.grant.to_string(),
                });
            }
            requested += &launch.grant;
        }
        if !offer.resources.fits(&requested) {
            return Err(ProtocolError::ExceedsOffer {
                requested: requested.to_string(),
                offered: offer.resources.to_string(),
            });
        }
        Ok(())
    }

    fn on_accept(
        &mut self,
        ctx: &mut dyn Context,
        from: ActorId,
        id: OfferId,
        client: ClientId,
        launches: Vec<TaskLaunch>,
    ) {
        if !self.clients.contains_key(&client) {
            self.violation(ctx, from, id, ProtocolError::UnknownClient(client.to_string()));
            return;
        }
        if launches.is_empty() {
            self.on_decline(ctx, from, id, client);
            return;
        }
        let Some(outstanding) = self.view.offer(id) else {
            self.violation(ctx, from, id, ProtocolError::UnknownOffer(id));
            return;
        };
        if let Err(error) = self.validate_accept(&outstanding.offer, &client, &launches) {
            self.violation(ctx, from, id, error);
            return;
        }

        let Some(outstanding) = self.view.take_offer(id) else {
            return;
        };
        if let Some(timer) = outstanding.timer {
            ctx.cancel(timer);
        }
        self.stats.offers_accepted += 1;
        let node = outstanding.offer.node;
        let tasks: Vec<TaskId> = launches.iter().map(|l| l.task.clone()).collect();
        self.record(
            "accept",
            ctx.now(),
            Some(&client),
            Some(&node),
            Some(id.to_string()),
            Some(format!("{} task(s)", tasks.len())),
        );

        if let Err(reason) = self.forward_launch(ctx, &node, &client, launches) {
            warn!(%client, %node, offer = %id, %reason, "launch aborted");
            self.stats.launches_aborted += 1;
            self.record(
                "launch_aborted",
                ctx.now(),
                Some(&client),
                Some(&node),
                Some(id.to_string()),
                Some(reason.clone()),
            );
            Self::reply(
                ctx,
                ActorId::Client(client),
                Message::LaunchAborted {
                    offer: id,
                    tasks,
                    reason,
                },
            );
        }
        self.allocate(ctx);
    }

    /// Allocate every grant and forward them as one instruction. On any
    /// failure every grant is released again.
    fn forward_launch(
        &mut self,
        ctx: &mut dyn Context,
        node: &NodeId,
        client: &ClientId,
        launches: Vec<TaskLaunch>,
    ) -> Result<(), String> {
        let worker = ActorId::Worker(node.clone());
        if !ctx.is_reachable(&worker) {
            return Err(format!("worker {node} is unreachable"));
        }
        let mut allocated = Vec::with_capacity(launches.len());
        for launch in &launches {
            let key = (client.clone(), launch.task.clone());
            if let Err(e) = self.view.allocate(node, key.clone(), launch.grant.clone()) {
                for key in &allocated {
                    self.view.release(key);
                }
                return Err(e.to_string());
            }
            allocated.push(key);
        }
        let count = launches.len() as u64;
        let attempts: Vec<(TaskId, u32)> =
            launches.iter().map(|l| (l.task.clone(), l.attempt)).collect();
        let descriptions = launches
            .into_iter()
            .map(|launch| TaskDescription {
                client: client.clone(),
                launch,
            })
            .collect::<Vec<_>>();
        for d in &descriptions {
            let (task, grant) = (&d.launch.task, &d.launch.grant);
            info!(%client, %node, %task, %grant, attempt = d.launch.attempt, "launching task");
            let (subject, detail) = (Some(task.to_string()), Some(grant.to_string()));
            self.record("launch", ctx.now(), Some(client), Some(node), subject, detail);
        }
        if let Err(e) = ctx.send(worker, Message::LaunchTasks { tasks: descriptions }) {
            for key in &allocated {
                self.view.release(key);
            }
            return Err(e.to_string());
        }
        self.stats.tasks_launched += count;
        if let Some(entry) = self.clients.get_mut(client) {
            entry.launched.extend(attempts);
        }
        Ok(())
    }

    fn on_decline(&mut self, ctx: &mut dyn Context, from: ActorId, id: OfferId, client: ClientId) {
        match self.view.offer(id) {
            None => {
                self.violation(ctx, from, id, ProtocolError::UnknownOffer(id));
                return;
            }
            Some(o) if o.offer.client != client => {
                self.violation(ctx, from, id, ProtocolError::NotOfferHolder(id));
                return;
            }
            Some(_) => {}
        }
        let Some(outstanding) = self.view.take_offer(id) else {
            return;
        };
        if let Some(timer) = outstanding.timer {
            ctx.cancel(timer);
        }
        self.stats.offers_declined += 1;
        let node = outstanding.offer.node;
        debug!(%client, %node, offer = %id, "offer declined");
        self.record("decline", ctx.now(), Some(&client), Some(&node), Some(id.to_string()), None);

        let filter = self.config.decline_filter();
        if let Some(entry) = self.clients.get_mut(&client) {
            entry.filters.insert(node.clone(), ctx.now() + filter);
            ctx.schedule(filter, Timer::FilterExpired { client, node });
        }
        self.allocate(ctx);
    }

    fn on_status(&mut self, ctx: &mut dyn Context, update: StatusUpdate) {
        let Some(worker) = self.workers.get_mut(&update.node) else {
            debug!(node = %update.node, task = %update.task, "status from unknown worker ignored");
            return;
        };
        if update.update_id != 0 {
            if update.update_id <= worker.last_update {
                let update_id = update.update_id;
                debug!(node = %update.node, update_id, "duplicate status update ignored");
                self.stats.duplicate_updates += 1;
                return;
            }
            worker.last_update = update.update_id;
        }
        info!(
            client = %update.client,
            node = %update.node,
            task = %update.task,
            state = %update.state,
            "task status"
        );
        self.record(
            "status",
            ctx.now(),
            Some(&update.client),
            Some(&update.node),
            Some(update.task.to_string()),
            Some(update.state.to_string()),
        );
        let terminal = update.state.is_terminal();
        if terminal {
            self.view
                .release(&(update.client.clone(), update.task.clone()));
        }
        Self::reply(ctx, ActorId::Client(update.client.clone()), Message::StatusUpdate(update));
        if terminal {
            self.allocate(ctx);
        }
    }

    fn on_kill(&mut self, ctx: &mut dyn Context, client: ClientId, task: TaskId) {
        let key = (client, task);
        match self.view.placement(&key).cloned() {
            Some(node) => {
                info!(client = %key.0, task = %key.1, %node, "forwarding kill");
                let subject = Some(key.1.to_string());
                self.record("kill", ctx.now(), Some(&key.0), Some(&node), subject, None);
                Self::reply(
                    ctx,
                    ActorId::Worker(node),
                    Message::KillTask {
                        client: key.0,
                        task: key.1,
                    },
                );
            }
            None => debug!(client = %key.0, task = %key.1, "kill for unplaced task ignored"),
        }
    }

    fn rescind(ctx: &mut dyn Context, offer: &Offer) {
        Self::reply(
            ctx,
            ActorId::Client(offer.client.clone()),
            Message::OfferRescinded { offer: offer.id },
        );
    }

    fn on_offer_expired(&mut self, ctx: &mut dyn Context, id: OfferId) {
        let Some(outstanding) = self.view.take_offer(id) else {
            return;
        };
        let (client, node) = (&outstanding.offer.client, &outstanding.offer.node);
        info!(offer = %id, %client, %node, "offer expired");
        self.stats.offers_expired += 1;
        self.record(
            "expire",
            ctx.now(),
            Some(&outstanding.offer.client),
            Some(&outstanding.offer.node),
            Some(id.to_string()),
            None,
        );
        Self::rescind(ctx, &outstanding.offer);
        self.allocate(ctx);
    }

    fn node_lost(&mut self, ctx: &mut dyn Context, node: &NodeId, reason: &str) {
        if let Some(entry) = self.workers.remove(node) {
            if let Some(timer) = entry.timeout {
                ctx.cancel(timer);
            }
        }
        let Some(removed) = self.view.remove_node(node) else {
            return;
        };
        warn!(%node, reason, tasks = removed.tasks.len(), "worker lost");
        self.stats.nodes_lost += 1;
        self.record("node_lost", ctx.now(), None, Some(node), None, Some(reason.to_string()));
        for outstanding in removed.offers {
            if let Some(timer) = outstanding.timer {
                ctx.cancel(timer);
            }
            self.stats.offers_rescinded += 1;
            Self::rescind(ctx, &outstanding.offer);
        }
        for (client, task) in removed.tasks {
            let update = StatusUpdate {
                node: node.clone(),
                client: client.clone(),
                task,
                state: TaskState::Lost,
                update_id: 0,
                reason: Some(reason.to_string()),
            };
            Self::reply(ctx, ActorId::Client(client), Message::StatusUpdate(update));
        }
        self.allocate(ctx);
    }

    /// Offer every reachable node's free capacity to the first eligible
    /// client the policy names. A node whose worker cannot be reached stays
    /// on the books until its heartbeat timeout but is not offered.
    fn allocate(&mut self, ctx: &mut dyn Context) {
        let now = ctx.now();
        let total = self.view.total();
        let nodes: Vec<NodeId> = self.view.node_ids().cloned().collect();
        for node in nodes {
            let Some(free) = self.view.free(&node) else {
                continue;
            };
            if free.is_empty() || !ctx.is_reachable(&ActorId::Worker(node.clone())) {
                continue;
            }
            let candidates: Vec<ClientShare> = self
                .clients
                .iter()
                .filter(|(id, entry)| {
                    entry.active
                        && !entry.filtered(&node, now)
                        && ctx.is_reachable(&ActorId::Client((*id).clone()))
                })
                .map(|(id, _)| ClientShare {
                    client: id.clone(),
                    allocated: self.view.allocated_to(id),
                })
                .collect();
            if candidates.is_empty() {
                continue;
            }
            if let Some(client) = self.policy.order(&candidates, &total).into_iter().next() {
                self.make_offer(ctx, node, client, free);
            }
        }
    }

    fn make_offer(
        &mut self,
        ctx: &mut dyn Context,
        node: NodeId,
        client: ClientId,
        resources: Resources,
    ) {
        let now = ctx.now();
        let timeout = self.config.offer_timeout();
        let id = OfferId(self.next_offer);
        self.next_offer += 1;
        let offer = Offer {
            id,
            node: node.clone(),
            client: client.clone(),
            resources,
            created_at: now,
            deadline: now + timeout,
        };
        if let Err(e) = self.view.reserve_offer(offer.clone()) {
            warn!(%node, %client, error = %e, "offer not reserved");
            return;
        }
        let detail = offer.resources.to_string();
        if let Err(e) = ctx.send(ActorId::Client(client.clone()), Message::ResourceOffer(offer)) {
            warn!(%client, error = %e, "offer not delivered");
            self.view.take_offer(id);
            return;
        }
        let timer = ctx.schedule(timeout, Timer::OfferExpired(id));
        self.view.set_offer_timer(id, timer);
        self.policy.offered(&client);
        self.stats.offers_made += 1;
        debug!(offer = %id, %client, %node, resources = %detail, "offer sent");
        self.record("offer", now, Some(&client), Some(&node), Some(id.to_string()), Some(detail));
    }
}

impl Actor for Coordinator {
    fn id(&self) -> ActorId {
        ActorId::Coordinator
    }

    fn on_start(&mut self, _ctx: &mut dyn Context) {
        info!(policy = self.policy.name(), "coordinator started");
    }

    fn on_message(&mut self, ctx: &mut dyn Context, from: ActorId, message: Message) {
        match message {
            Message::RegisterWorker { node, total } => self.on_register_worker(ctx, node, total),
            Message::Heartbeat { node } => self.on_heartbeat(ctx, &node),
            Message::UnregisterWorker { node } => self.node_lost(ctx, &node, "worker unregistered"),
            Message::RegisterClient {
                client,
                wants_offers,
            } => self.on_register_client(ctx, client, wants_offers),
            Message::ReviveOffers { client } => self.on_revive(ctx, &client),
            Message::SuppressOffers { client } => self.on_suppress(&client),
            Message::AcceptOffer {
                offer,
                client,
                launches,
            } => self.on_accept(ctx, from, offer, client, launches),
            Message::DeclineOffer { offer, client } => self.on_decline(ctx, from, offer, client),
            Message::StatusUpdate(update) => self.on_status(ctx, update),
            Message::KillTask { client, task } => self.on_kill(ctx, client, task),
            other => debug!(%from, kind = other.kind(), "coordinator ignores message"),
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn Context, timer: Timer) {
        match timer {
            Timer::OfferExpired(id) => self.on_offer_expired(ctx, id),
            Timer::WorkerTimeout(node) => self.node_lost(ctx, &node, "heartbeat timeout"),
            Timer::FilterExpired { client, node } => {
                let now = ctx.now();
                if let Some(entry) = self.clients.get_mut(&client) {
                    if entry.filters.get(&node).is_some_and(|until| *until <= now) {
                        entry.filters.remove(&node);
                    }
                }
                self.allocate(ctx);
            }
            Timer::TaskCompleted { .. } | Timer::Heartbeat => {}
        }
    }
}
