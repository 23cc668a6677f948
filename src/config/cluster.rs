//! Coordinator, worker, and client configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Order in which the coordinator considers clients for each node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicyConfig {
    /// Rotate through clients.
    #[default]
    RoundRobin,
    /// Lowest dominant share first.
    DominantShare,
}

/// How a client packs pending tasks into an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackingConfig {
    /// Submission order, first fit.
    #[default]
    FirstFit,
    /// Largest maximum cpus first, ties in submission order.
    LargestFirst,
}

/// Whether FAILED or LOST tasks go back to PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Re-queues allowed per task. Zero makes every failure final.
    pub max_retries: u32,
}

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Seconds before an unanswered offer is rescinded.
    pub offer_timeout_secs: f64,
    /// Seconds a declined node is withheld from the declining client.
    pub decline_filter_secs: f64,
    /// Seconds without a heartbeat before a worker is considered lost.
    pub worker_timeout_secs: f64,
    /// Client ordering policy.
    pub allocation_policy: AllocationPolicyConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            offer_timeout_secs: 10.0,
            decline_filter_secs: 1.0,
            worker_timeout_secs: 30.0,
            allocation_policy: AllocationPolicyConfig::RoundRobin,
        }
    }
}

impl CoordinatorConfig {
    /// Offer deadline.
    pub fn offer_timeout(&self) -> Duration {
        secs(self.offer_timeout_secs)
    }

    /// Decline filter length.
    pub fn decline_filter(&self) -> Duration {
        secs(self.decline_filter_secs)
    }

    /// Heartbeat silence tolerated before declaring a worker lost.
    pub fn worker_timeout(&self) -> Duration {
        secs(self.worker_timeout_secs)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds between heartbeats.
    pub heartbeat_interval_secs: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5.0,
        }
    }
}

impl WorkerConfig {
    /// Heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        secs(self.heartbeat_interval_secs)
    }
}

/// Client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Packing policy.
    pub packing: PackingConfig,
    /// Retry policy.
    pub retry: RetryPolicy,
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Coordinator settings.
    pub coordinator: CoordinatorConfig,
    /// Worker settings.
    pub worker: WorkerConfig,
    /// Client settings.
    pub client: ClientConfig,
    /// Delivery delay applied to every message in simulation.
    pub message_latency_ms: u64,
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn positive(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("{name} must be a positive number of seconds"))
    }
}

impl ClusterConfig {
    /// Validate all values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        positive("offer_timeout_secs", self.coordinator.offer_timeout_secs)?;
        positive("decline_filter_secs", self.coordinator.decline_filter_secs)?;
        positive("worker_timeout_secs", self.coordinator.worker_timeout_secs)?;
        positive(
            "heartbeat_interval_secs",
            self.worker.heartbeat_interval_secs,
        )?;
        if self.coordinator.worker_timeout_secs <= self.worker.heartbeat_interval_secs {
            return Err(
                "worker_timeout_secs must be greater than heartbeat_interval_secs".into(),
            );
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `BROKER_*` environment variables, after loading
    /// a `.env` file if one exists.
    ///
    /// Recognized: `BROKER_OFFER_TIMEOUT_SECS`, `BROKER_DECLINE_FILTER_SECS`,
    /// `BROKER_WORKER_TIMEOUT_SECS`, `BROKER_HEARTBEAT_INTERVAL_SECS`,
    /// `BROKER_ALLOCATION_POLICY`, `BROKER_PACKING`, `BROKER_MAX_RETRIES`,
    /// `BROKER_MESSAGE_LATENCY_MS`.
    ///
    /// # Errors
    ///
    /// Returns a message for unparsable variables or invalid results.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Some(v) = env_parse("BROKER_OFFER_TIMEOUT_SECS")? {
            cfg.coordinator.offer_timeout_secs = v;
        }
        if let Some(v) = env_parse("BROKER_DECLINE_FILTER_SECS")? {
            cfg.coordinator.decline_filter_secs = v;
        }
        if let Some(v) = env_parse("BROKER_WORKER_TIMEOUT_SECS")? {
            cfg.coordinator.worker_timeout_secs = v;
        }
        if let Some(v) = env_parse("BROKER_HEARTBEAT_INTERVAL_SECS")? {
            cfg.worker.heartbeat_interval_secs = v;
        }
        if let Some(v) = env_parse("BROKER_MAX_RETRIES")? {
            cfg.client.retry.max_retries = v;
        }
        if let Some(v) = env_parse("BROKER_MESSAGE_LATENCY_MS")? {
            cfg.message_latency_ms = v;
        }
        if let Ok(v) = std::env::var("BROKER_ALLOCATION_POLICY") {
            cfg.coordinator.allocation_policy = serde_json::from_value(v.clone().into())
                .map_err(|_| format!("BROKER_ALLOCATION_POLICY: unknown policy `{v}`"))?;
        }
        if let Ok(v) = std::env::var("BROKER_PACKING") {
            cfg.client.packing = serde_json::from_value(v.clone().into())
                .map_err(|_| format!("BROKER_PACKING: unknown policy `{v}`"))?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Simulated message delay.
    pub const fn message_latency(&self) -> Duration {
        Duration::from_millis(self.message_latency_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{name}: cannot parse `{raw}`")),
        Err(_) => Ok(None),
    }
}
