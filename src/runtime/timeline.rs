//! Clock plus scheduled-event queue.
//!
//! A [`Timeline`] is the single source of time for a runtime. While the clock
//! is paused, popping an event moves the clock to the event's due time, so
//! handlers observe `now()` equal to the instant they were scheduled for.

use std::time::Duration;

use crate::infra::queue::{EventId, EventQueue, InMemoryEventQueue};
use crate::util::clock::{Clock, VirtualTime};

/// Virtual clock driving a queue of pending events.
pub struct Timeline<E> {
    clock: Clock,
    queue: InMemoryEventQueue<E>,
}

impl<E> Default for Timeline<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Timeline<E> {
    /// Paused timeline at time zero with no events.
    pub fn new() -> Self {
        Self {
            clock: Clock::new(),
            queue: InMemoryEventQueue::new(),
        }
    }

    /// Current time.
    pub fn now(&self) -> VirtualTime {
        self.clock.now()
    }

    /// True while time only moves through [`Timeline::advance_by`].
    pub const fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    /// Freeze the clock.
    pub fn pause(&mut self) {
        self.clock.pause();
    }

    /// Let the clock follow wall time again.
    pub fn resume(&mut self) {
        self.clock.resume();
    }

    /// Schedule `event` at `now + after`.
    pub fn schedule_after(&mut self, after: Duration, event: E) -> EventId {
        let due = self.now() + after;
        self.queue.schedule(due, event)
    }

    /// Cancel a pending event.
    pub fn cancel(&mut self, id: EventId) -> bool {
        self.queue.cancel(id)
    }

    /// Cancel every pending event matching `doomed`. Returns how many.
    pub fn cancel_where(&mut self, mut doomed: impl FnMut(&E) -> bool) -> usize {
        self.queue.cancel_where(&mut doomed)
    }

    /// Due time of the next live event.
    pub fn next_due(&mut self) -> Option<VirtualTime> {
        self.queue.next_due()
    }

    /// Number of pending events.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drop every pending event.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Pop the next event due at or before `until`. A paused clock jumps to the
    /// event's due time.
    pub fn pop_due(&mut self, until: VirtualTime) -> Option<(EventId, E)> {
        let (due, id, event) = self.queue.pop_due(until)?;
        self.clock.advance_to(due);
        Some((id, event))
    }

    /// Deliver every event due now, in order, including events the handler
    /// schedules for the current instant.
    pub fn run_due<F>(&mut self, mut handle: F) -> usize
    where
        F: FnMut(&mut Self, EventId, E),
    {
        let mut handled = 0;
        let now = self.now();
        while let Some((id, event)) = self.pop_due(now) {
            handle(self, id, event);
            handled += 1;
        }
        handled
    }

    /// Advance a paused clock by `by`, delivering every event that falls due on
    /// the way at its own due time. Events due exactly at the end are
    /// delivered. The clock ends at `now + by`.
    ///
    /// On a running clock nothing is delivered and time is left alone.
    pub fn advance_by<F>(&mut self, by: Duration, mut handle: F) -> usize
    where
        F: FnMut(&mut Self, EventId, E),
    {
        if !self.is_paused() {
            return 0;
        }
        let end = self.now() + by;
        let mut handled = 0;
        while let Some((id, event)) = self.pop_due(end) {
            handle(self, id, event);
            handled += 1;
        }
        self.clock.advance_to(end);
        handled
    }
}
