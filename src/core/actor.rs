//! Actor and context traits.
//!
//! Every participant (coordinator, worker, client) is an actor: private state
//! mutated only from its own handlers. Handlers never block. Anything that has
//! to wait is either a message from a peer or a timer scheduled through the
//! [`Context`], which lets the same actor code run under the deterministic
//! simulator and under the threaded runtime.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::messages::{ActorId, ClientId, Message, NodeId, OfferId};
use crate::core::task::TaskId;
use crate::infra::queue::EventId;
use crate::util::clock::VirtualTime;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(pub EventId);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0 .0)
    }
}

/// Timer payloads. Each is delivered back to the actor that scheduled it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timer {
    /// An offer's deadline passed.
    OfferExpired(OfferId),
    /// A worker missed its heartbeats.
    WorkerTimeout(NodeId),
    /// A decline filter lapsed; offers may flow to the client again.
    FilterExpired {
        /// Client that declined.
        client: ClientId,
        /// Node that was filtered.
        node: NodeId,
    },
    /// A running task reached its completion time.
    TaskCompleted {
        /// Owning client.
        client: ClientId,
        /// Task.
        task: TaskId,
    },
    /// Time for a worker to heartbeat.
    Heartbeat,
}

/// Capabilities a runtime hands to an actor while it handles one event.
pub trait Context {
    /// Current virtual time.
    fn now(&self) -> VirtualTime;

    /// Send `message` to `to`, preserving order per sender/receiver pair.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unreachable`] if `to` does not exist. Nothing
    /// is enqueued in that case.
    fn send(&mut self, to: ActorId, message: Message) -> Result<(), SchedulerError>;

    /// Whether `to` currently exists.
    fn is_reachable(&self, to: &ActorId) -> bool;

    /// Deliver `timer` back to the calling actor after `after`.
    fn schedule(&mut self, after: Duration, timer: Timer) -> TimerId;

    /// Cancel a timer. Returns false if it already fired or was cancelled.
    fn cancel(&mut self, timer: TimerId) -> bool;
}

/// A participant in the protocol.
pub trait Actor: Send {
    /// This actor's address.
    fn id(&self) -> ActorId;

    /// Called once when the runtime starts the actor.
    fn on_start(&mut self, ctx: &mut dyn Context);

    /// Handle one message.
    fn on_message(&mut self, ctx: &mut dyn Context, from: ActorId, message: Message);

    /// Handle one of this actor's timers.
    fn on_timer(&mut self, ctx: &mut dyn Context, timer: Timer);

    /// Called when the actor is torn down. Must not emit terminal reports.
    fn on_stop(&mut self, _ctx: &mut dyn Context) {}
}
