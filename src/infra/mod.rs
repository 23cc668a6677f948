//! Infrastructure adapters: scheduled-event queues and actor mailboxes.

pub mod mailbox;
pub mod queue;

pub use mailbox::{InMemoryMailbox, Mailbox, MailboxHandle};
pub use queue::{EventId, EventQueue, InMemoryEventQueue};
