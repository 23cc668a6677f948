//! Build a ready [`Scenario`] from a JSON description.
//!
//! ```json
//! {
//!   "config": { "coordinator": { "offer_timeout_secs": 10.0 } },
//!   "workers": [ { "resources": "cpus:4;mem:1024", "count": 2 } ],
//!   "clients": [
//!     { "name": "batch",
//!       "tasks": [ { "id": "t1", "max": "cpus:1;mem:512",
//!                    "kind": { "type": "batch", "total_work": 30.0 } } ] }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::config::ClusterConfig;
use crate::core::error::{AppResult, SchedulerError};
use crate::core::resources::{Requirement, Resources};
use crate::core::task::{TaskKind, TaskSpec};
use crate::runtime::Scenario;

/// Task workload as written in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKindConfig {
    /// Compute-bound task.
    Batch {
        /// Work units.
        total_work: f64,
    },
    /// Fixed-duration task.
    Timed {
        /// Run time in seconds.
        duration_secs: f64,
    },
    /// Runs until killed or lost.
    Service,
}

impl TaskKindConfig {
    fn to_kind(&self) -> Result<TaskKind, String> {
        match *self {
            Self::Batch { total_work } if total_work.is_finite() && total_work >= 0.0 => {
                Ok(TaskKind::batch(total_work))
            }
            Self::Batch { total_work } => Err(format!(
                "total_work must be finite and >= 0, got {total_work}"
            )),
            Self::Timed { duration_secs } => Duration::try_from_secs_f64(duration_secs)
                .map(TaskKind::timed)
                .map_err(|_| format!("duration_secs must be finite and >= 0, got {duration_secs}")),
            Self::Service => Ok(TaskKind::Service),
        }
    }
}

/// One task of a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task id, unique within its client.
    pub id: String,
    /// Band minimum; empty means the band is exactly `max`.
    #[serde(default)]
    pub min: String,
    /// Band maximum.
    pub max: String,
    /// Workload.
    pub kind: TaskKindConfig,
}

impl TaskConfig {
    /// Parse into a task spec.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Parse`] for bad resource text and
    /// [`SchedulerError::Config`] for a bad workload.
    pub fn to_spec(&self) -> Result<TaskSpec, SchedulerError> {
        let requirement = Requirement::parse(&self.min, &self.max)?;
        let kind = self
            .kind
            .to_kind()
            .map_err(|e| SchedulerError::Config(format!("task {}: {e}", self.id)))?;
        Ok(TaskSpec::new(self.id.clone(), requirement, kind))
    }
}

/// A group of identical workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpecConfig {
    /// Capacity of each worker, in resource text.
    pub resources: String,
    /// How many to spawn.
    #[serde(default = "default_count")]
    pub count: usize,
}

const fn default_count() -> usize {
    1
}

/// A client and its initial tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSpecConfig {
    /// Client name.
    pub name: String,
    /// Tasks held as PENDING at start.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Whole-scenario description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Cluster-wide settings.
    pub config: ClusterConfig,
    /// Worker groups, spawned in order.
    pub workers: Vec<WorkerSpecConfig>,
    /// Clients, spawned in order.
    pub clients: Vec<ClientSpecConfig>,
}

impl ScenarioConfig {
    /// Validate names and counts on top of [`ClusterConfig::validate`].
    ///
    /// # Errors
    ///
    /// Describes the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.config.validate()?;
        if self.workers.iter().all(|w| w.count == 0) {
            return Err("scenario needs at least one worker".into());
        }
        let mut names = HashSet::new();
        for client in &self.clients {
            if client.name.trim().is_empty() {
                return Err("client name must not be empty".into());
            }
            if !names.insert(client.name.as_str()) {
                return Err(format!("duplicate client `{}`", client.name));
            }
            let mut ids = HashSet::new();
            for task in &client.tasks {
                if !ids.insert(task.id.as_str()) {
                    let (name, id) = (&client.name, &task.id);
                    return Err(format!("client `{name}` has duplicate task `{id}`"));
                }
            }
        }
        Ok(())
    }
}

/// Construct and set up a scenario. The coordinator, workers, and clients are
/// spawned and registered; the clock is still at zero.
///
/// # Errors
///
/// [`SchedulerError::Config`] for invalid configuration and
/// [`SchedulerError::Parse`] for bad resource text.
pub fn build_scenario(cfg: &ScenarioConfig) -> Result<Scenario, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::Config(format!("scenario invalid: {e}")))?;

    let mut scenario = Scenario::new(cfg.config.clone())?;
    scenario.spawn_coordinator()?;
    for group in &cfg.workers {
        let total = Resources::parse(&group.resources)?;
        for _ in 0..group.count {
            scenario.spawn_worker(total.clone())?;
        }
    }
    for client in &cfg.clients {
        let tasks = client
            .tasks
            .iter()
            .map(TaskConfig::to_spec)
            .collect::<Result<Vec<_>, _>>()?;
        scenario.spawn_client(&client.name, tasks)?;
    }
    scenario.finish_setup();
    Ok(scenario)
}

/// Read a scenario description from a JSON file and build it.
///
/// # Errors
///
/// Fails if the file cannot be read, parsed, or built.
pub fn load_scenario(path: impl AsRef<Path>) -> AppResult<Scenario> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    let cfg: ScenarioConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing scenario {}", path.display()))?;
    let scenario = build_scenario(&cfg)
        .with_context(|| format!("building scenario {}", path.display()))?;
    Ok(scenario)
}
