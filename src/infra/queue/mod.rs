//! Scheduled-event queues.

pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::clock::VirtualTime;

pub use memory::InMemoryEventQueue;

/// Handle to a scheduled event, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event-{}", self.0)
    }
}

/// Abstraction for event queue backends.
pub trait EventQueue<E> {
    /// Schedule `event` to fire at `due`.
    fn schedule(&mut self, due: VirtualTime, event: E) -> EventId;
    /// Cancel a pending event. Returns false if it already fired or was cancelled.
    fn cancel(&mut self, id: EventId) -> bool;
    /// Remove and return the next event due at or before `until`.
    fn pop_due(&mut self, until: VirtualTime) -> Option<(VirtualTime, EventId, E)>;
    /// Due time of the next live event.
    fn next_due(&mut self) -> Option<VirtualTime>;
    /// Number of live events.
    fn len(&self) -> usize;
    /// True when no live events remain.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Cancel every pending event matching `doomed`. Returns how many.
    fn cancel_where(&mut self, doomed: &mut dyn FnMut(&E) -> bool) -> usize;
    /// Drop every pending event.
    fn clear(&mut self);
}
