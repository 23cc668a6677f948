//! Tests for worker monitoring output

use prometheus_resource_broker::config::WorkerConfig;
use prometheus_resource_broker::core::{NodeId, Resources};
use prometheus_resource_broker::util::VirtualTime;
use prometheus_resource_broker::worker::monitor::{answer, state, stats, vars};
use prometheus_resource_broker::worker::{MonitorRequest, MonitorResponse, Worker};

fn idle_worker() -> Worker {
    Worker::new(
        NodeId::new("node-1"),
        Resources::parse("cpus:4;mem:1024").unwrap(),
        WorkerConfig::default(),
    )
}

#[test]
fn test_vars_are_key_value_lines() {
    let worker = idle_worker();
    let text = vars(&worker);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "node node-1");
    assert!(lines.contains(&"registered false"));
    assert!(lines.contains(&"total_cpus 4"));
    assert!(lines.contains(&"allocated_mem 0"));
    assert!(lines.contains(&"tasks_running 0"));
    for line in lines {
        assert_eq!(line.split(' ').count(), 2, "malformed line `{line}`");
    }
}

#[test]
fn test_stats_and_state_json() {
    let worker = idle_worker();
    let stats = stats(&worker);
    assert_eq!(stats["node"], "node-1");
    assert_eq!(stats["free"]["mem"], 1024.0);
    assert_eq!(stats["counters"]["finished"], 0);

    let state = state(&worker, VirtualTime::ZERO);
    assert_eq!(state["id"], "node-1");
    assert!(state["coordinator"].is_null());
    assert_eq!(state["resources"]["cpus"], 4.0);
    assert!(state["tasks"].as_array().unwrap().is_empty());
    assert!(state["clients"].as_object().unwrap().is_empty());
}

#[test]
fn test_answer_dispatches_by_request() {
    let worker = idle_worker();
    let ask = |request| answer(&worker, request, VirtualTime::ZERO);
    assert!(matches!(ask(MonitorRequest::Vars), MonitorResponse::Text(_)));
    assert!(matches!(ask(MonitorRequest::Stats), MonitorResponse::Json(_)));
    assert!(matches!(ask(MonitorRequest::State), MonitorResponse::Json(_)));
}
