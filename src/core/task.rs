//! Task identity, lifecycle states, and workload kinds.
//!
//! A task carries a kind-specific workload. Progress is computed through the
//! [`Workload`] contract so the worker never needs to know which kind it runs.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::resources::{Requirement, Resources};

/// Task identifier, unique per client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Wrap a name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Known to the client, not yet dispatched.
    Pending,
    /// Launch instruction sent or received.
    Launching,
    /// Admitted by a worker and making progress.
    Running,
    /// Completed its workload.
    Finished,
    /// Rejected by a worker or failed while running.
    Failed,
    /// Killed on request.
    Killed,
    /// Its node disappeared.
    Lost,
}

impl TaskState {
    /// No further transitions happen from a terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Killed | Self::Lost)
    }

    /// Launching or running.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Launching | Self::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Launching => "LAUNCHING",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
            Self::Lost => "LOST",
        };
        f.write_str(s)
    }
}

/// Progress contract shared by every task kind.
pub trait Workload {
    /// Progress rate the workload gets out of `grant`. Isolation is strict:
    /// only the grant counts, never idle capacity elsewhere on the node.
    fn rate(&self, grant: &Resources) -> f64;

    /// Work left after running `elapsed` at `rate`.
    fn progress(&self, rate: f64, elapsed: Duration) -> f64;

    /// Time needed to finish at `rate`, or `None` if the workload never ends
    /// at that rate.
    fn completion_after(&self, rate: f64) -> Option<Duration>;
}

/// Compute-bound work whose throughput equals the granted cpus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchWork {
    /// Work units to complete.
    pub total_work: f64,
}

impl Workload for BatchWork {
    fn rate(&self, grant: &Resources) -> f64 {
        grant.cpus()
    }

    fn progress(&self, rate: f64, elapsed: Duration) -> f64 {
        (self.total_work - rate * elapsed.as_secs_f64()).max(0.0)
    }

    fn completion_after(&self, rate: f64) -> Option<Duration> {
        if rate <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(self.total_work / rate).ok()
    }
}

/// Work that takes a fixed time no matter the grant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedWork {
    /// Run time.
    pub duration: Duration,
}

impl Workload for TimedWork {
    fn rate(&self, _grant: &Resources) -> f64 {
        1.0
    }

    fn progress(&self, _rate: f64, elapsed: Duration) -> f64 {
        self.duration.saturating_sub(elapsed).as_secs_f64()
    }

    fn completion_after(&self, _rate: f64) -> Option<Duration> {
        Some(self.duration)
    }
}

/// Kind discriminator plus its workload payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Compute-bound task.
    Batch(BatchWork),
    /// Fixed-duration task.
    Timed(TimedWork),
    /// Long-running task; ends only when killed or lost.
    Service,
}

impl TaskKind {
    /// Batch task with `total_work` units.
    pub const fn batch(total_work: f64) -> Self {
        Self::Batch(BatchWork { total_work })
    }

    /// Task that runs for `duration`.
    pub const fn timed(duration: Duration) -> Self {
        Self::Timed(TimedWork { duration })
    }
}

impl Workload for TaskKind {
    fn rate(&self, grant: &Resources) -> f64 {
        match self {
            Self::Batch(w) => w.rate(grant),
            Self::Timed(w) => w.rate(grant),
            Self::Service => 1.0,
        }
    }

    fn progress(&self, rate: f64, elapsed: Duration) -> f64 {
        match self {
            Self::Batch(w) => w.progress(rate, elapsed),
            Self::Timed(w) => w.progress(rate, elapsed),
            Self::Service => f64::INFINITY,
        }
    }

    fn completion_after(&self, rate: f64) -> Option<Duration> {
        match self {
            Self::Batch(w) => w.completion_after(rate),
            Self::Timed(w) => w.completion_after(rate),
            Self::Service => None,
        }
    }
}

/// A task as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Identifier, unique within the client.
    pub id: TaskId,
    /// Acceptable allocation band.
    pub requirement: Requirement,
    /// Workload.
    pub kind: TaskKind,
}

impl TaskSpec {
    /// Build a spec.
    pub fn new(id: impl Into<String>, requirement: Requirement, kind: TaskKind) -> Self {
        Self {
            id: TaskId::new(id),
            requirement,
            kind,
        }
    }

    /// Batch task with `total_work` units.
    pub fn batch(id: impl Into<String>, requirement: Requirement, total_work: f64) -> Self {
        Self::new(id, requirement, TaskKind::batch(total_work))
    }
}
