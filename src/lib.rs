//! # Prometheus Resource Broker
//!
//! A two-level resource-offer protocol between a coordinator, a fleet of
//! workers, and work-submitting clients, plus a deterministic virtual-clock
//! harness that runs the whole protocol reproducibly.
//!
//! ## Core Problem Solved
//!
//! Several independent schedulers share one cluster. Nobody sees the whole
//! picture: the coordinator knows what is free, clients know what they need,
//! and workers know what actually runs. Consistency of the global resource
//! ledger rests on the offer handshake alone:
//!
//! - **Offers**: the coordinator reserves a node's free slice for one client
//! - **Accept / decline**: the client packs pending tasks into the slice or
//!   hands it back; unanswered offers expire
//! - **Launch**: the worker rechecks capacity locally before admitting a task
//! - **Reconcile**: terminal status updates release resources on both books
//!
//! ## Deterministic Simulation
//!
//! Every participant is an [`core::Actor`]. Actors only see the world through
//! a [`core::Context`], so the same code runs under the single-threaded
//! [`runtime::Simulation`] (paused virtual clock, FIFO tie-breaking) and the
//! [`runtime::ThreadedRuntime`] (one thread and mailbox per actor).
//!
//! ```rust,ignore
//! use prometheus_resource_broker::config::ClusterConfig;
//! use prometheus_resource_broker::core::{Requirement, Resources, TaskSpec};
//! use prometheus_resource_broker::runtime::Scenario;
//!
//! let mut scenario = Scenario::new(ClusterConfig::default())?;
//! scenario.spawn_coordinator()?;
//! scenario.spawn_worker(Resources::parse("cpus:4;mem:1024")?)?;
//! let band = Requirement::parse("", "cpus:1;mem:512")?;
//! scenario.spawn_client("batch", vec![TaskSpec::batch("t1", band, 30.0)])?;
//! scenario.finish_setup();
//! scenario.run_for_secs(30.1);
//! assert_eq!(scenario.get_client("batch").unwrap().count_pending(), 0);
//! scenario.stop();
//! ```
//!
//! Scenarios can also be described in JSON and built with
//! [`builders::build_scenario`].

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Protocol data model, actor seam, audit trail, and errors.
pub mod core;
/// Configuration models for the coordinator, workers, and clients.
pub mod config;
/// Builders to construct scenarios from configuration.
pub mod builders;
/// Infrastructure adapters: scheduled-event queue and actor mailboxes.
pub mod infra;
/// Runtimes that host actors.
pub mod runtime;
/// Resource accounting and the offer allocator.
pub mod coordinator;
/// Node agent running tasks under isolation.
pub mod worker;
/// Work-submitting scheduler.
pub mod client;
/// Shared utilities.
pub mod util;
