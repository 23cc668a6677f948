//! End-to-end scenarios on the deterministic harness.
//!
//! Every scenario runs on a fresh virtual clock, so timings are exact.

use prometheus_resource_broker::config::ClusterConfig;
use prometheus_resource_broker::core::{
    Requirement, Resources, SchedulerError, TaskId, TaskSpec, TaskState,
};
use prometheus_resource_broker::runtime::Scenario;
use prometheus_resource_broker::util::{init_tracing, VirtualTime};

// ============================================================================
// HELPERS
// ============================================================================

const NODE: &str = "cpus:4;mem:1024";

fn batch_tasks(count: usize, min: &str, max: &str, work: f64) -> Vec<TaskSpec> {
    (1..=count)
        .map(|i| {
            TaskSpec::batch(
                format!("task-{i}"),
                Requirement::parse(min, max).unwrap(),
                work,
            )
        })
        .collect()
}

fn scenario(workers: usize, tasks: Vec<TaskSpec>) -> Scenario {
    init_tracing();
    let mut scenario = Scenario::new(ClusterConfig::default()).unwrap();
    scenario.spawn_coordinator().unwrap();
    for _ in 0..workers {
        scenario.spawn_worker(Resources::parse(NODE).unwrap()).unwrap();
    }
    scenario.spawn_client("batch", tasks).unwrap();
    scenario.finish_setup();
    scenario
}

/// One cpu and 512 mem per task, work 30.
fn batch_test(workers: usize, tasks: usize, time: f64) {
    let mut s = scenario(workers, batch_tasks(tasks, "mem:512", "cpus:1;mem:512", 30.0));
    s.run_for_secs(time);
    let client = s.get_client("batch").unwrap();
    assert_eq!(client.count_pending(), 0, "{workers} worker(s), {tasks} task(s)");
    assert_eq!(client.count_running(), 0, "{workers} worker(s), {tasks} task(s)");
    assert_eq!(client.outcomes().len(), tasks);
    assert!(client.outcomes().iter().all(|o| o.state == TaskState::Finished));
    s.check_invariants().unwrap();
    s.stop();
}

// ============================================================================
// BASIC SCENARIOS
// ============================================================================

#[test]
fn test_one_node_one_task() {
    let mut s = scenario(1, batch_tasks(1, "", "cpus:1;mem:512", 30.0));
    s.run_for_secs(30.1);
    let client = s.get_client("batch").unwrap();
    assert_eq!(client.count_pending(), 0);
    assert_eq!(client.count_running(), 0);
    s.stop();
}

#[test]
fn test_two_nodes_one_task() {
    let mut s = scenario(2, batch_tasks(1, "", "cpus:1;mem:512", 30.0));
    s.run_for_secs(30.1);
    let client = s.get_client("batch").unwrap();
    assert_eq!(client.count_pending(), 0);
    assert_eq!(client.count_running(), 0);
    s.stop();
}

#[test]
fn test_one_node_two_concurrent_tasks() {
    let mut s = scenario(1, batch_tasks(2, "", "cpus:1;mem:512", 30.0));
    s.run_for_secs(30.1);
    let client = s.get_client("batch").unwrap();
    assert_eq!(client.count_pending(), 0);
    assert_eq!(client.count_running(), 0);
    for outcome in client.outcomes() {
        assert_eq!(outcome.at, VirtualTime::from_secs_f64(30.0));
    }
    s.stop();
}

#[test]
fn test_one_node_three_capped_tasks() {
    let mut s = scenario(1, batch_tasks(3, "", "cpus:1;mem:256", 30.0));
    s.run_for_secs(30.1);
    let client = s.get_client("batch").unwrap();
    assert_eq!(client.count_pending(), 0);
    assert_eq!(client.count_running(), 0);
    assert_eq!(client.outcomes().len(), 3);
    s.stop();
}

#[test]
fn test_insufficient_time_leaves_task_running() {
    let mut s = scenario(1, batch_tasks(1, "", "cpus:1;mem:512", 30.0));
    s.run_for_secs(10.0);
    let client = s.get_client("batch").unwrap();
    assert_eq!(client.count_pending(), 0);
    assert_eq!(client.count_running(), 1);
    assert_eq!(
        client.task(&TaskId::new("task-1")).unwrap().state,
        TaskState::Running
    );
    s.stop();
}

#[test]
fn test_zero_periods_are_rejected() {
    let mut config = ClusterConfig::default();
    config.coordinator.decline_filter_secs = 0.0;
    let Err(SchedulerError::Config(message)) = Scenario::new(config) else {
        panic!("zero decline filter accepted");
    };
    assert!(message.contains("decline_filter_secs"), "{message}");

    let mut config = ClusterConfig::default();
    config.coordinator.offer_timeout_secs = 0.0;
    assert!(matches!(Scenario::new(config), Err(SchedulerError::Config(_))));
    assert!(Scenario::new(ClusterConfig::default()).is_ok());
}

// ============================================================================
// BATCH MATRIX
// ============================================================================

#[test]
fn test_batch_matrix() {
    batch_test(1, 1, 30.1);
    batch_test(2, 1, 30.1);
    batch_test(1, 2, 30.1);
    batch_test(1, 3, 60.1);
    batch_test(2, 3, 30.1);
    batch_test(2, 3, 60.1);
}

#[test]
fn test_third_task_waits_for_memory() {
    let mut s = scenario(1, batch_tasks(3, "mem:512", "cpus:1;mem:512", 30.0));
    s.run_for_secs(30.1);
    let client = s.get_client("batch").unwrap();
    assert_eq!(client.outcomes().len(), 2);
    assert_eq!(client.count_running(), 1);
    s.run_for_secs(30.0);
    assert_eq!(s.get_client("batch").unwrap().count_running(), 0);
    s.stop();
}

// ============================================================================
// ISOLATION AND TIMING
// ============================================================================

#[test]
fn test_completion_time_ignores_idle_capacity() {
    let mut s = scenario(1, batch_tasks(1, "", "cpus:1;mem:512", 30.0));
    s.run_for_secs(29.9);
    assert_eq!(s.get_client("batch").unwrap().count_running(), 1);
    s.run_for_secs(0.2);
    let client = s.get_client("batch").unwrap();
    assert_eq!(client.count_running(), 0);
    assert_eq!(
        client.outcome(&TaskId::new("task-1")).unwrap().at,
        VirtualTime::from_secs_f64(30.0)
    );
    s.stop();
}

#[test]
fn test_wider_grant_finishes_sooner() {
    let mut s = scenario(1, batch_tasks(1, "cpus:1;mem:512", "cpus:3;mem:512", 30.0));
    s.run_for_secs(10.1);
    let client = s.get_client("batch").unwrap();
    let outcome = client.outcome(&TaskId::new("task-1")).unwrap();
    assert_eq!(outcome.state, TaskState::Finished);
    assert_eq!(outcome.at, VirtualTime::from_secs_f64(10.0));
    s.stop();
}

#[test]
fn test_message_latency_delays_completion() {
    init_tracing();
    let config = ClusterConfig {
        message_latency_ms: 100,
        ..ClusterConfig::default()
    };
    let mut s = Scenario::new(config).unwrap();
    s.spawn_coordinator().unwrap();
    s.spawn_worker(Resources::parse(NODE).unwrap()).unwrap();
    s.spawn_client("batch", batch_tasks(1, "", "cpus:1;mem:512", 30.0))
        .unwrap();
    s.finish_setup();
    s.run_for_secs(30.1);
    assert_eq!(s.get_client("batch").unwrap().count_running(), 1);
    s.run_for_secs(1.0);
    assert_eq!(s.get_client("batch").unwrap().count_running(), 0);
    s.stop();
}

// ============================================================================
// TERMINATION AND STARVATION
// ============================================================================

#[test]
fn test_starvation_keeps_tasks_pending() {
    let mut s = scenario(1, batch_tasks(1, "", "cpus:1;mem:2048", 30.0));
    s.run_for_secs(300.0);
    let client = s.get_client("batch").unwrap();
    assert_eq!(client.count_pending(), 1);
    assert!(client.outcomes().is_empty());
    assert!(client.offers_received() > 0);
    s.check_invariants().unwrap();
    s.stop();
}

#[test]
fn test_many_tasks_drain_eventually() {
    let mut s = scenario(2, batch_tasks(10, "", "cpus:1;mem:256", 30.0));
    s.run_for_secs(29.9);
    assert_eq!(s.get_client("batch").unwrap().count_pending(), 2);
    assert_eq!(s.get_client("batch").unwrap().count_running(), 8);
    s.run_for_secs(30.2);
    let client = s.get_client("batch").unwrap();
    assert_eq!(client.count_pending(), 0);
    assert_eq!(client.count_running(), 0);
    assert_eq!(client.outcomes().len(), 10);
    s.stop();
}

#[test]
fn test_stop_releases_without_reports() {
    let mut s = scenario(1, batch_tasks(1, "", "cpus:1;mem:512", 30.0));
    s.run_for_secs(5.0);
    let before = s.audit_actions("status").len();
    s.stop();
    assert_eq!(s.audit_actions("status").len(), before);
    assert!(s.get_client("batch").is_none());
}

#[test]
fn test_identical_runs_produce_identical_traces() {
    let trace = || {
        let mut s = scenario(2, batch_tasks(5, "mem:256", "cpus:2;mem:512", 20.0));
        s.run_for_secs(60.0);
        let actions: Vec<(String, Option<String>, Option<String>)> = s
            .audit_events()
            .into_iter()
            .map(|e| (e.action, e.node, e.subject))
            .collect();
        s.stop();
        actions
    };
    assert_eq!(trace(), trace());
}
