//! Configuration models for the coordinator, workers, and clients.

pub mod cluster;

pub use cluster::{
    AllocationPolicyConfig, ClientConfig, ClusterConfig, CoordinatorConfig, PackingConfig,
    RetryPolicy, WorkerConfig,
};
