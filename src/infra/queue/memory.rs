//! In-memory event queue ordered by due time, FIFO within the same due time.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::infra::queue::{EventId, EventQueue};
use crate::util::clock::VirtualTime;

/// Wrapper to make a scheduled event orderable by due time (earliest first)
/// and scheduling order within the same due time.
struct PendingEvent<E> {
    due: VirtualTime,
    id: EventId,
    event: E,
}

impl<E> PartialEq for PendingEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<E> Eq for PendingEvent<E> {}

impl<E> PartialOrd for PendingEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for PendingEvent<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for the max-heap: earliest due, then lowest id, pops first.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Event queue backed by a binary heap.
///
/// Cancellation is lazy: cancelled entries stay in the heap and are skipped
/// when they reach the top.
pub struct InMemoryEventQueue<E> {
    heap: BinaryHeap<PendingEvent<E>>,
    live: HashSet<EventId>,
    next_id: u64,
}

impl<E> Default for InMemoryEventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryEventQueue<E> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashSet::new(),
            next_id: 0,
        }
    }

    fn discard_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.live.contains(&top.id) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl<E> EventQueue<E> for InMemoryEventQueue<E> {
    fn schedule(&mut self, due: VirtualTime, event: E) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.live.insert(id);
        self.heap.push(PendingEvent { due, id, event });
        id
    }

    fn cancel(&mut self, id: EventId) -> bool {
        self.live.remove(&id)
    }

    fn pop_due(&mut self, until: VirtualTime) -> Option<(VirtualTime, EventId, E)> {
        self.discard_cancelled();
        if self.heap.peek()?.due > until {
            return None;
        }
        let next = self.heap.pop()?;
        self.live.remove(&next.id);
        Some((next.due, next.id, next.event))
    }

    fn next_due(&mut self) -> Option<VirtualTime> {
        self.discard_cancelled();
        self.heap.peek().map(|e| e.due)
    }

    fn len(&self) -> usize {
        self.live.len()
    }

    fn cancel_where(&mut self, doomed: &mut dyn FnMut(&E) -> bool) -> usize {
        let mut cancelled = 0;
        for pending in &self.heap {
            if self.live.contains(&pending.id) && doomed(&pending.event) {
                self.live.remove(&pending.id);
                cancelled += 1;
            }
        }
        cancelled
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: f64) -> VirtualTime {
        VirtualTime::from_secs_f64(secs)
    }

    #[test]
    fn test_due_time_ordering() {
        let mut q = InMemoryEventQueue::new();
        q.schedule(at(3.0), "c");
        q.schedule(at(1.0), "a");
        q.schedule(at(2.0), "b");

        let order: Vec<_> = std::iter::from_fn(|| q.pop_due(at(10.0)))
            .map(|(_, _, e)| e)
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fifo_within_due_time() {
        let mut q = InMemoryEventQueue::new();
        for name in ["first", "second", "third"] {
            q.schedule(at(5.0), name);
        }
        assert_eq!(q.pop_due(at(5.0)).unwrap().2, "first");
        assert_eq!(q.pop_due(at(5.0)).unwrap().2, "second");
        assert_eq!(q.pop_due(at(5.0)).unwrap().2, "third");
    }

    #[test]
    fn test_pop_due_respects_limit() {
        let mut q = InMemoryEventQueue::new();
        q.schedule(at(2.0), 2);
        assert!(q.pop_due(at(1.999)).is_none());
        assert_eq!(q.next_due(), Some(at(2.0)));
        assert_eq!(q.pop_due(at(2.0)).unwrap().2, 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut q = InMemoryEventQueue::new();
        let a = q.schedule(at(1.0), "a");
        q.schedule(at(2.0), "b");
        assert!(q.cancel(a));
        assert!(!q.cancel(a));
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_due(), Some(at(2.0)));
        assert_eq!(q.pop_due(at(10.0)).unwrap().2, "b");
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let mut q = InMemoryEventQueue::new();
        let a = q.schedule(at(1.0), "a");
        assert!(q.pop_due(at(1.0)).is_some());
        assert!(!q.cancel(a));
    }

    #[test]
    fn test_cancel_where() {
        let mut q = InMemoryEventQueue::new();
        q.schedule(at(1.0), 1);
        let two = q.schedule(at(2.0), 2);
        q.schedule(at(3.0), 3);
        q.cancel(two);
        assert_eq!(q.cancel_where(&mut |e| e % 2 == 1), 2);
        assert!(q.is_empty());
        assert!(q.pop_due(at(10.0)).is_none());
    }

    #[test]
    fn test_empty_queue() {
        let mut q = InMemoryEventQueue::<u8>::new();
        assert!(q.pop_due(at(100.0)).is_none());
        assert_eq!(q.next_due(), None);
        assert_eq!(q.len(), 0);
    }
}
