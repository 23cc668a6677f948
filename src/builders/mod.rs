//! Builders to construct scenarios from configuration.

pub mod scenario_builder;

pub use scenario_builder::{
    build_scenario, load_scenario, ClientSpecConfig, ScenarioConfig, TaskConfig, TaskKindConfig,
    WorkerSpecConfig,
};
