//! Unbounded in-memory mailbox over a crossbeam channel.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::core::error::SchedulerError;
use crate::infra::mailbox::Mailbox;

/// Cloneable posting handle.
pub struct MailboxHandle<T> {
    tx: Sender<T>,
}

impl<T> Clone for MailboxHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send> Mailbox<T> for MailboxHandle<T> {
    fn post(&self, item: T) -> Result<(), SchedulerError> {
        self.tx.send(item).map_err(|_| SchedulerError::Shutdown)
    }

    fn len(&self) -> usize {
        self.tx.len()
    }
}

/// Receiving side, owned by exactly one actor thread.
pub struct InMemoryMailbox<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Default for InMemoryMailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InMemoryMailbox<T> {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// A new posting handle.
    pub fn handle(&self) -> MailboxHandle<T> {
        MailboxHandle {
            tx: self.tx.clone(),
        }
    }

    /// Block until an item arrives.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Block for at most `timeout`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Shutdown`] if the channel is disconnected.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>, SchedulerError> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SchedulerError::Shutdown),
        }
    }

    /// Take an item if one is waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Items waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
