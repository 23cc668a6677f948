//! Per-actor mailboxes for the threaded runtime.

pub mod memory;

use crate::core::error::SchedulerError;

pub use memory::{InMemoryMailbox, MailboxHandle};

/// Posting side of a mailbox.
pub trait Mailbox<T>: Send + Sync {
    /// Enqueue `item`. Items from one poster are received in posting order.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Shutdown`] once the receiving side is gone.
    fn post(&self, item: T) -> Result<(), SchedulerError>;

    /// Items waiting to be received.
    fn len(&self) -> usize;

    /// True when nothing is waiting.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
