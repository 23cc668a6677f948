//! Read-only monitoring endpoints for a worker.
//!
//! Everything here works off a [`NodeView`], so the monitor depends on the
//! worker's capability surface and never on the worker itself.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::messages::{ActorId, ClientId, NodeId};
use crate::core::resources::Resources;
use crate::core::task::{TaskId, TaskState};
use crate::util::clock::VirtualTime;

/// Lifetime counters kept by a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounters {
    /// Launch instructions received.
    pub launched: u64,
    /// Tasks that ran to completion.
    pub finished: u64,
    /// Tasks rejected at admission or failed while running.
    pub failed: u64,
    /// Tasks killed on request.
    pub killed: u64,
    /// Tasks dropped by a teardown.
    pub lost: u64,
}

/// One task as seen by monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Owner.
    pub client: ClientId,
    /// Task.
    pub task: TaskId,
    /// Current state.
    pub state: TaskState,
    /// Granted slice.
    pub grant: Resources,
    /// Admission time.
    pub started_at: VirtualTime,
    /// Scheduled completion, if the workload ever ends.
    pub expected_finish: Option<VirtualTime>,
    /// Work left when the summary was taken. `None` for services.
    pub remaining_work: Option<f64>,
}

/// Read-only capability a worker hands to monitoring.
pub trait NodeView {
    /// Node identity.
    fn node_id(&self) -> &NodeId;
    /// Fixed capacity.
    fn total(&self) -> &Resources;
    /// Capacity granted to running tasks.
    fn allocated(&self) -> &Resources;
    /// Coordinator that acknowledged this worker, if any.
    fn coordinator(&self) -> Option<&ActorId>;
    /// Whether the coordinator acknowledged this worker.
    fn is_registered(&self) -> bool {
        self.coordinator().is_some()
    }
    /// Lifetime counters.
    fn counters(&self) -> WorkerCounters;
    /// Number of tasks currently held.
    fn task_count(&self) -> usize;
    /// Tasks currently held, with progress as of `now`.
    fn task_summaries(&self, now: VirtualTime) -> Vec<TaskSummary>;
}

/// A monitoring request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorRequest {
    /// Plain-text variables.
    Vars,
    /// JSON statistics.
    Stats,
    /// JSON state.
    State,
}

/// A monitoring response.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorResponse {
    /// `key value` lines.
    Text(String),
    /// JSON document.
    Json(Value),
}

/// Answer `request` against `view` at time `now`.
pub fn answer(view: &dyn NodeView, request: MonitorRequest, now: VirtualTime) -> MonitorResponse {
    match request {
        MonitorRequest::Vars => MonitorResponse::Text(vars(view)),
        MonitorRequest::Stats => MonitorResponse::Json(stats(view)),
        MonitorRequest::State => MonitorResponse::Json(state(view, now)),
    }
}

/// `key value` lines, one per variable. Keys contain no spaces.
pub fn vars(view: &dyn NodeView) -> String {
    let counters = view.counters();
    let mut out = String::new();
    let _ = writeln!(out, "node {}", view.node_id());
    let _ = writeln!(out, "registered {}", view.is_registered());
    for (name, amount) in view.total().iter() {
        let _ = writeln!(out, "total_{name} {amount}");
        let _ = writeln!(out, "allocated_{name} {}", view.allocated().get(name));
    }
    let _ = writeln!(out, "tasks_running {}", view.task_count());
    let _ = writeln!(out, "tasks_launched {}", counters.launched);
    let _ = writeln!(out, "tasks_finished {}", counters.finished);
    let _ = writeln!(out, "tasks_failed {}", counters.failed);
    let _ = writeln!(out, "tasks_killed {}", counters.killed);
    let _ = writeln!(out, "tasks_lost {}", counters.lost);
    out
}

/// Current statistics as JSON.
pub fn stats(view: &dyn NodeView) -> Value {
    let total = view.total();
    let allocated = view.allocated();
    let free = total.checked_sub(allocated).unwrap_or_default();
    json!({
        "node": view.node_id(),
        "registered": view.is_registered(),
        "total": total,
        "allocated": allocated,
        "free": free,
        "tasks_running": view.task_count(),
        "counters": view.counters(),
    })
}

/// The node's known state as JSON: identity, the coordinator it answers to,
/// capacity, and held tasks both flat and grouped by owning client.
pub fn state(view: &dyn NodeView, now: VirtualTime) -> Value {
    let tasks = view.task_summaries(now);
    let mut clients: BTreeMap<String, Vec<&TaskSummary>> = BTreeMap::new();
    for task in &tasks {
        clients.entry(task.client.to_string()).or_default().push(task);
    }
    json!({
        "id": view.node_id(),
        "registered": view.is_registered(),
        "coordinator": view.coordinator().map(ToString::to_string),
        "resources": view.total(),
        "allocated": view.allocated(),
        "tasks": tasks,
        "clients": clients,
    })
}
