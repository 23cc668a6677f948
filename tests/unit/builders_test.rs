//! Tests for builder modules

use std::io::Write;

use prometheus_resource_broker::builders::{
    build_scenario, load_scenario, ScenarioConfig, TaskConfig, TaskKindConfig,
};
use prometheus_resource_broker::core::{SchedulerError, TaskId, TaskKind, TaskState};

const SCENARIO: &str = r#"{
    "config": { "coordinator": { "allocation_policy": "dominant_share" } },
    "workers": [ { "resources": "cpus:4;mem:1024", "count": 2 } ],
    "clients": [
        { "name": "batch",
          "tasks": [
            { "id": "t1", "max": "cpus:1;mem:512",
              "kind": { "type": "batch", "total_work": 30.0 } },
            { "id": "t2", "min": "cpus:1", "max": "cpus:2;mem:256",
              "kind": { "type": "timed", "duration_secs": 5.0 } }
          ] },
        { "name": "web",
          "tasks": [ { "id": "svc", "max": "cpus:1", "kind": { "type": "service" } } ] }
    ]
}"#;

fn parsed() -> ScenarioConfig {
    serde_json::from_str(SCENARIO).unwrap()
}

#[test]
fn test_build_scenario_from_json() {
    let mut scenario = build_scenario(&parsed()).unwrap();
    let coordinator = scenario.coordinator().unwrap();
    assert_eq!(coordinator.view().node_count(), 2);
    assert_eq!(coordinator.policy_name(), "dominant_share");

    scenario.run_for_secs(30.1);
    let batch = scenario.get_client("batch").unwrap();
    assert_eq!(batch.outcomes().len(), 2);
    assert!(batch.outcomes().iter().all(|o| o.state == TaskState::Finished));
    let web = scenario.get_client("web").unwrap();
    assert_eq!(web.task(&TaskId::new("svc")).unwrap().state, TaskState::Running);
    scenario.stop();
}

#[test]
fn test_task_config_to_spec() {
    let task = TaskConfig {
        id: "t".into(),
        min: String::new(),
        max: "cpus:2".into(),
        kind: TaskKindConfig::Service,
    };
    let spec = task.to_spec().unwrap();
    assert_eq!(spec.requirement.min(), spec.requirement.max());
    assert_eq!(spec.kind, TaskKind::Service);

    let bad_work = TaskConfig {
        kind: TaskKindConfig::Batch { total_work: -1.0 },
        ..task.clone()
    };
    assert!(matches!(bad_work.to_spec(), Err(SchedulerError::Config(_))));

    let bad_band = TaskConfig {
        min: "cpus:4".into(),
        ..task
    };
    assert!(matches!(bad_band.to_spec(), Err(SchedulerError::Parse(_))));
}

#[test]
fn test_validation_rejects_bad_scenarios() {
    let mut no_workers = parsed();
    no_workers.workers.clear();
    assert!(no_workers.validate().is_err());

    let mut duplicate_client = parsed();
    duplicate_client.clients[1].name = "batch".into();
    assert!(duplicate_client.validate().unwrap_err().contains("duplicate client"));

    let mut duplicate_task = parsed();
    duplicate_task.clients[0].tasks[1].id = "t1".into();
    assert!(duplicate_task.validate().unwrap_err().contains("duplicate task"));

    let mut blank_name = parsed();
    blank_name.clients[0].name = "  ".into();
    assert!(matches!(
        build_scenario(&blank_name),
        Err(SchedulerError::Config(_))
    ));
}

#[test]
fn test_bad_worker_resources_fail_to_build() {
    let mut cfg = parsed();
    cfg.workers[0].resources = "cpus=4".into();
    assert!(matches!(build_scenario(&cfg), Err(SchedulerError::Parse(_))));
}

#[test]
fn test_load_scenario_from_file() {
    let path = std::env::temp_dir().join(format!("broker-scenario-{}.json", std::process::id()));
    std::fs::File::create(&path)
        .unwrap()
        .write_all(SCENARIO.as_bytes())
        .unwrap();
    let scenario = load_scenario(&path);
    let _ = std::fs::remove_file(&path);
    let mut scenario = scenario.unwrap();
    assert!(scenario.get_client("web").is_some());
    scenario.stop();
}

#[test]
fn test_load_scenario_missing_file() {
    let err = load_scenario("/nonexistent/broker/scenario.json").unwrap_err();
    assert!(format!("{err:#}").contains("reading scenario"));
}
