//! Actor identities and the messages of the offer protocol.
//!
//! Cross-actor calls are request/response pairs correlated by an identifier:
//! an [`OfferId`] ties `ResourceOffer` to its accept or decline, and a
//! per-node update id ties a `StatusUpdate` to its deduplication.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::ProtocolError;
use crate::core::resources::{Requirement, Resources};
use crate::core::task::{TaskId, TaskKind, TaskState};
use crate::util::clock::VirtualTime;

/// Worker node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Wrap a name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client (work-submitting scheduler) identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    /// Wrap a name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of an actor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorId {
    /// The single coordinator.
    Coordinator,
    /// A worker, by node.
    Worker(NodeId),
    /// A client, by name.
    Client(ClientId),
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinator => f.write_str("coordinator"),
            Self::Worker(node) => write!(f, "worker/{node}"),
            Self::Client(client) => write!(f, "client/{client}"),
        }
    }
}

/// Offer identifier, assigned by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(pub u64);

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offer-{}", self.0)
    }
}

/// Time-bounded, exclusive grant of one node's resources to one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Correlation id.
    pub id: OfferId,
    /// Node the resources live on.
    pub node: NodeId,
    /// Sole holder.
    pub client: ClientId,
    /// Reserved slice.
    pub resources: Resources,
    /// Creation time.
    pub created_at: VirtualTime,
    /// The offer is rescinded at this time if unanswered.
    pub deadline: VirtualTime,
}

/// One task a client launches out of an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLaunch {
    /// Task identifier.
    pub task: TaskId,
    /// Requirement band the grant must fall within.
    pub requirement: Requirement,
    /// Workload.
    pub kind: TaskKind,
    /// Slice of the offer granted to this task.
    pub grant: Resources,
    /// Launch attempt for this task id, counted by the client from 1. The
    /// coordinator refuses an attempt not above the last one it forwarded.
    #[serde(default)]
    pub attempt: u32,
}

/// A launch instruction as delivered to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    /// Owning client.
    pub client: ClientId,
    /// Task to run.
    pub launch: TaskLaunch,
}

/// Task status report, emitted by workers and forwarded to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Node that ran the task.
    pub node: NodeId,
    /// Owning client.
    pub client: ClientId,
    /// Task.
    pub task: TaskId,
    /// New state.
    pub state: TaskState,
    /// Per-node increasing id; zero for updates synthesized by the coordinator.
    pub update_id: u64,
    /// Why the task failed or was lost.
    pub reason: Option<String>,
}

/// Protocol messages exchanged between actors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Worker announces itself and its fixed capacity.
    RegisterWorker {
        /// Node.
        node: NodeId,
        /// Total capacity.
        total: Resources,
    },
    /// Coordinator acknowledges a worker.
    WorkerRegistered {
        /// Node.
        node: NodeId,
    },
    /// Worker liveness signal.
    Heartbeat {
        /// Node.
        node: NodeId,
    },
    /// Explicit teardown notification for a worker.
    UnregisterWorker {
        /// Node.
        node: NodeId,
    },
    /// Client announces itself.
    RegisterClient {
        /// Client.
        client: ClientId,
        /// Whether it currently has pending tasks.
        wants_offers: bool,
    },
    /// Coordinator acknowledges a client.
    ClientRegistered {
        /// Client.
        client: ClientId,
    },
    /// Client has pending tasks again.
    ReviveOffers {
        /// Client.
        client: ClientId,
    },
    /// Client has nothing to launch.
    SuppressOffers {
        /// Client.
        client: ClientId,
    },
    /// Coordinator proposes a slice to a client.
    ResourceOffer(Offer),
    /// Client accepts an offer for some of its pending tasks.
    AcceptOffer {
        /// Offer being accepted.
        offer: OfferId,
        /// Accepting client.
        client: ClientId,
        /// Tasks to launch out of the offer.
        launches: Vec<TaskLaunch>,
    },
    /// Client turns an offer down.
    DeclineOffer {
        /// Offer being declined.
        offer: OfferId,
        /// Declining client.
        client: ClientId,
    },
    /// Coordinator withdrew an offer (deadline or node loss).
    OfferRescinded {
        /// Withdrawn offer.
        offer: OfferId,
    },
    /// Coordinator refused a request that broke the protocol.
    ProtocolViolation {
        /// Offer the request referred to.
        offer: OfferId,
        /// What was wrong.
        error: ProtocolError,
    },
    /// Coordinator could not forward an accepted launch; the tasks are pending again.
    LaunchAborted {
        /// Offer the launch came from.
        offer: OfferId,
        /// Tasks that were not launched.
        tasks: Vec<TaskId>,
        /// Why.
        reason: String,
    },
    /// Coordinator forwards accepted tasks to a worker.
    LaunchTasks {
        /// Tasks to run.
        tasks: Vec<TaskDescription>,
    },
    /// Kill request, client to coordinator and coordinator to worker.
    KillTask {
        /// Owning client.
        client: ClientId,
        /// Task.
        task: TaskId,
    },
    /// Task status, worker to coordinator and coordinator to client.
    StatusUpdate(StatusUpdate),
}

impl Message {
    /// Short name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RegisterWorker { .. } => "register_worker",
            Self::WorkerRegistered { .. } => "worker_registered",
            Self::Heartbeat { .. } => "heartbeat",
            Self::UnregisterWorker { .. } => "unregister_worker",
            Self::RegisterClient { .. } => "register_client",
            Self::ClientRegistered { .. } => "client_registered",
            Self::ReviveOffers { .. } => "revive_offers",
            Self::SuppressOffers { .. } => "suppress_offers",
            Self::ResourceOffer(_) => "resource_offer",
            Self::AcceptOffer { .. } => "accept_offer",
            Self::DeclineOffer { .. } => "decline_offer",
            Self::OfferRescinded { .. } => "offer_rescinded",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::LaunchAborted { .. } => "launch_aborted",
            Self::LaunchTasks { .. } => "launch_tasks",
            Self::KillTask { .. } => "kill_task",
            Self::StatusUpdate(_) => "status_update",
        }
    }
}
