//! Runtimes that host actors: a deterministic simulator, the scenario harness
//! built on it, and a threaded runtime with one mailbox per actor.

pub mod scenario;
pub mod sim;
pub mod threaded;
pub mod timeline;

use crate::client::Client;
use crate::coordinator::Coordinator;
use crate::core::actor::{Actor, Context, Timer};
use crate::core::messages::{ActorId, Message};
use crate::worker::Worker;

pub use scenario::Scenario;
pub use sim::{SimEvent, Simulation};
pub use threaded::ThreadedRuntime;
pub use timeline::Timeline;

/// Any actor a runtime can host. Keeping the concrete type lets the harness
/// hand out typed read-only handles.
pub enum Participant {
    /// The coordinator.
    Coordinator(Box<Coordinator>),
    /// A worker.
    Worker(Worker),
    /// A client.
    Client(Client),
}

impl Participant {
    fn actor(&self) -> &dyn Actor {
        match self {
            Self::Coordinator(c) => c.as_ref(),
            Self::Worker(w) => w,
            Self::Client(c) => c,
        }
    }

    fn actor_mut(&mut self) -> &mut dyn Actor {
        match self {
            Self::Coordinator(c) => c.as_mut(),
            Self::Worker(w) => w,
            Self::Client(c) => c,
        }
    }

    /// The coordinator, if this is it.
    pub fn as_coordinator(&self) -> Option<&Coordinator> {
        match self {
            Self::Coordinator(c) => Some(c),
            _ => None,
        }
    }

    /// The worker, if this is one.
    pub const fn as_worker(&self) -> Option<&Worker> {
        match self {
            Self::Worker(w) => Some(w),
            _ => None,
        }
    }

    /// The client, if this is one.
    pub const fn as_client(&self) -> Option<&Client> {
        match self {
            Self::Client(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable client access, for harness-driven submissions.
    pub fn as_client_mut(&mut self) -> Option<&mut Client> {
        match self {
            Self::Client(c) => Some(c),
            _ => None,
        }
    }
}

impl Actor for Participant {
    fn id(&self) -> ActorId {
        self.actor().id()
    }

    fn on_start(&mut self, ctx: &mut dyn Context) {
        self.actor_mut().on_start(ctx);
    }

    fn on_message(&mut self, ctx: &mut dyn Context, from: ActorId, message: Message) {
        self.actor_mut().on_message(ctx, from, message);
    }

    fn on_timer(&mut self, ctx: &mut dyn Context, timer: Timer) {
        self.actor_mut().on_timer(ctx, timer);
    }

    fn on_stop(&mut self, ctx: &mut dyn Context) {
        self.actor_mut().on_stop(ctx);
    }
}

impl From<Coordinator> for Participant {
    fn from(c: Coordinator) -> Self {
        Self::Coordinator(Box::new(c))
    }
}

impl From<Worker> for Participant {
    fn from(w: Worker) -> Self {
        Self::Worker(w)
    }
}

impl From<Client> for Participant {
    fn from(c: Client) -> Self {
        Self::Client(c)
    }
}
