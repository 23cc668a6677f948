//! Error types for the offer protocol and its runtimes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::messages::{ActorId, OfferId};
use crate::core::task::TaskId;

/// Malformed resource or requirement text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Token has no `name:value` separator.
    #[error("missing ':' in resource token `{0}`")]
    MissingSeparator(String),
    /// Resource name is empty or contains whitespace.
    #[error("invalid resource name in token `{0}`")]
    InvalidName(String),
    /// Amount is not a finite number.
    #[error("invalid amount `{value}` for resource `{name}`")]
    InvalidAmount {
        /// Resource name.
        name: String,
        /// Offending amount text.
        value: String,
    },
    /// Amount is below zero.
    #[error("negative amount `{value}` for resource `{name}`")]
    NegativeAmount {
        /// Resource name.
        name: String,
        /// Offending amount text.
        value: String,
    },
    /// The same resource name appears twice.
    #[error("duplicate resource `{0}`")]
    Duplicate(String),
    /// A requirement band whose minimum exceeds its maximum.
    #[error("requirement minimum `{min}` exceeds maximum `{max}`")]
    InvertedBand {
        /// Minimum, in textual form.
        min: String,
        /// Maximum, in textual form.
        max: String,
    },
}

/// A message that breaks the offer protocol. Reported back to the sender
/// without mutating any state.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ProtocolError {
    /// The offer is unknown, or was already resolved.
    #[error("offer {0} is not outstanding")]
    UnknownOffer(OfferId),
    /// The offer belongs to another client.
    #[error("offer {0} is held by another client")]
    NotOfferHolder(OfferId),
    /// The accept names a task that is already launched or running.
    #[error("task {0} is not pending")]
    TaskNotPending(TaskId),
    /// A task appears twice in a single accept.
    #[error("task {0} named twice in one accept")]
    DuplicateLaunch(TaskId),
    /// A grant lies outside the task's requirement band.
    #[error("grant `{grant}` for task {task} is outside its requirement band")]
    GrantOutsideBand {
        /// Offending task.
        task: TaskId,
        /// Grant, in textual form.
        grant: String,
    },
    /// The combined grants do not fit the offered slice.
    #[error("combined grants `{requested}` exceed offered `{offered}`")]
    ExceedsOffer {
        /// Sum of grants, in textual form.
        requested: String,
        /// Offered slice, in textual form.
        offered: String,
    },
    /// The accepting client never registered.
    #[error("client {0} is not registered")]
    UnknownClient(String),
}

/// Errors produced by actors and runtimes.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Resource text failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// A protocol rule was broken.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// An allocation would exceed a node's total.
    #[error("capacity exceeded")]
    CapacityExceeded,
    /// The destination actor does not exist (never spawned or torn down).
    #[error("actor {0} is unreachable")]
    Unreachable(ActorId),
    /// No actor with this name is known to the runtime.
    #[error("unknown actor: {0}")]
    UnknownActor(String),
    /// Configuration failed validation.
    #[error("config invalid: {0}")]
    Config(String),
    /// The runtime has been shut down.
    #[error("runtime has been shut down")]
    Shutdown,
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
