//! Tests for configuration validation

use std::time::Duration;

use prometheus_resource_broker::config::{
    AllocationPolicyConfig, ClusterConfig, PackingConfig,
};

#[test]
fn test_default_config_is_valid() {
    let cfg = ClusterConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.coordinator.allocation_policy, AllocationPolicyConfig::RoundRobin);
    assert_eq!(cfg.client.packing, PackingConfig::FirstFit);
    assert_eq!(cfg.client.retry.max_retries, 0);
    assert_eq!(cfg.message_latency(), Duration::ZERO);
}

#[test]
fn test_invalid_offer_timeout() {
    let mut cfg = ClusterConfig::default();
    cfg.coordinator.offer_timeout_secs = 0.0;
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("offer_timeout_secs"));

    cfg.coordinator.offer_timeout_secs = f64::NAN;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_worker_timeout_must_exceed_heartbeat() {
    let mut cfg = ClusterConfig::default();
    cfg.coordinator.worker_timeout_secs = cfg.worker.heartbeat_interval_secs;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_partial_json_keeps_defaults() {
    let cfg = ClusterConfig::from_json_str(
        r#"{
            "coordinator": { "allocation_policy": "dominant_share", "decline_filter_secs": 2.5 },
            "client": { "packing": "largest_first", "retry": { "max_retries": 3 } },
            "message_latency_ms": 5
        }"#,
    )
    .unwrap();
    let defaults = ClusterConfig::default();

    assert_eq!(cfg.coordinator.allocation_policy, AllocationPolicyConfig::DominantShare);
    assert_eq!(cfg.coordinator.decline_filter(), Duration::from_millis(2500));
    assert_eq!(cfg.coordinator.offer_timeout_secs, defaults.coordinator.offer_timeout_secs);
    assert_eq!(cfg.worker, defaults.worker);
    assert_eq!(cfg.client.packing, PackingConfig::LargestFirst);
    assert_eq!(cfg.client.retry.max_retries, 3);
    assert_eq!(cfg.message_latency(), Duration::from_millis(5));
}

#[test]
fn test_json_rejects_unknown_policy_and_invalid_values() {
    let err = ClusterConfig::from_json_str(r#"{"coordinator": {"allocation_policy": "lottery"}}"#)
        .unwrap_err();
    assert!(err.starts_with("parse error"));

    let err = ClusterConfig::from_json_str(r#"{"worker": {"heartbeat_interval_secs": -1}}"#)
        .unwrap_err();
    assert!(err.contains("heartbeat_interval_secs"));
}

#[test]
fn test_config_round_trips_through_json() {
    let mut cfg = ClusterConfig::default();
    cfg.coordinator.allocation_policy = AllocationPolicyConfig::DominantShare;
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(ClusterConfig::from_json_str(&json).unwrap(), cfg);
}

// ============================================================================
// ENVIRONMENT OVERRIDES
// ============================================================================

const ENV_KEYS: [&str; 5] = [
    "BROKER_DECLINE_FILTER_SECS",
    "BROKER_MAX_RETRIES",
    "BROKER_MESSAGE_LATENCY_MS",
    "BROKER_ALLOCATION_POLICY",
    "BROKER_PACKING",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn test_env_overrides_defaults() {
    clear_env();
    std::env::set_var("BROKER_DECLINE_FILTER_SECS", "2.5");
    std::env::set_var("BROKER_MAX_RETRIES", "4");
    std::env::set_var("BROKER_MESSAGE_LATENCY_MS", "7");
    std::env::set_var("BROKER_ALLOCATION_POLICY", "dominant_share");
    std::env::set_var("BROKER_PACKING", "largest_first");
    let cfg = ClusterConfig::from_env();
    clear_env();

    let cfg = cfg.unwrap();
    let defaults = ClusterConfig::default();
    assert_eq!(cfg.coordinator.decline_filter(), Duration::from_millis(2500));
    assert_eq!(cfg.coordinator.offer_timeout_secs, defaults.coordinator.offer_timeout_secs);
    assert_eq!(cfg.coordinator.allocation_policy, AllocationPolicyConfig::DominantShare);
    assert_eq!(cfg.client.packing, PackingConfig::LargestFirst);
    assert_eq!(cfg.client.retry.max_retries, 4);
    assert_eq!(cfg.message_latency(), Duration::from_millis(7));

    std::env::set_var("BROKER_DECLINE_FILTER_SECS", "0");
    let zero = ClusterConfig::from_env();
    std::env::set_var("BROKER_DECLINE_FILTER_SECS", "soon");
    let garbled = ClusterConfig::from_env();
    clear_env();
    std::env::set_var("BROKER_ALLOCATION_POLICY", "lottery");
    let unknown = ClusterConfig::from_env();
    clear_env();

    assert!(zero.unwrap_err().contains("decline_filter_secs"));
    assert!(garbled.unwrap_err().contains("BROKER_DECLINE_FILTER_SECS"));
    assert!(unknown.unwrap_err().contains("lottery"));
}
