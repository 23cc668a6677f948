//! Benchmarks for the offer protocol and its deterministic harness.
//!
//! Benchmarks cover:
//! - Resource text parsing and arithmetic
//! - Event queue scheduling
//! - End-to-end simulated batch scenarios

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use prometheus_resource_broker::config::{AllocationPolicyConfig, ClusterConfig};
use prometheus_resource_broker::core::{Requirement, Resources, TaskSpec};
use prometheus_resource_broker::infra::{EventQueue, InMemoryEventQueue};
use prometheus_resource_broker::runtime::Scenario;
use prometheus_resource_broker::util::VirtualTime;

// ============================================================================
// Helper Functions
// ============================================================================

fn batch_tasks(count: usize) -> Vec<TaskSpec> {
    (0..count)
        .map(|i| {
            TaskSpec::batch(
                format!("task-{i}"),
                Requirement::parse("cpus:1;mem:128", "cpus:2;mem:256").unwrap(),
                10.0 + (i % 7) as f64,
            )
        })
        .collect()
}

fn run_scenario(
    workers: usize,
    clients: usize,
    tasks: usize,
    policy: AllocationPolicyConfig,
) -> usize {
    let mut config = ClusterConfig::default();
    config.coordinator.allocation_policy = policy;
    let mut scenario = Scenario::new(config).unwrap();
    scenario.spawn_coordinator().unwrap();
    for _ in 0..workers {
        scenario
            .spawn_worker(Resources::parse("cpus:8;mem:2048").unwrap())
            .unwrap();
    }
    for c in 0..clients {
        scenario
            .spawn_client(&format!("client-{c}"), batch_tasks(tasks))
            .unwrap();
    }
    scenario.finish_setup();
    let events = scenario.run_for_secs(600.0);
    scenario.stop();
    events
}

// ============================================================================
// Resources
// ============================================================================

fn bench_resources_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("resources_parse");

    for text in ["cpus:1", "cpus:4;mem:1024", "cpus:4;mem:1024;disk:500;gpus:2;ports:10"] {
        group.bench_with_input(BenchmarkId::from_parameter(text), &text, |b, text| {
            b.iter(|| Resources::parse(black_box(text)).unwrap());
        });
    }

    group.finish();
}

fn bench_resources_arithmetic(c: &mut Criterion) {
    let total = Resources::parse("cpus:64;mem:262144;disk:10000").unwrap();
    let slice = Resources::parse("cpus:1.5;mem:2048").unwrap();

    c.bench_function("resources_fit_and_subtract", |b| {
        b.iter(|| {
            let mut free = total.clone();
            while free.fits(&slice) {
                free -= &slice;
            }
            black_box(free)
        });
    });
}

// ============================================================================
// Event Queue
// ============================================================================

fn bench_event_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_queue_schedule_pop");

    for size in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut queue = InMemoryEventQueue::new();
                for i in 0..size {
                    let due = VirtualTime::from_secs_f64(((i * 7919) % size) as f64 / 10.0);
                    queue.schedule(due, i);
                }
                let horizon = VirtualTime::from_secs_f64(size as f64);
                let mut popped = 0;
                while queue.pop_due(horizon).is_some() {
                    popped += 1;
                }
                black_box(popped)
            });
        });
    }

    group.finish();
}

// ============================================================================
// End-to-end Scenarios
// ============================================================================

fn bench_batch_scenario(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulated_batch");
    group.sample_size(20);

    for (workers, clients, tasks) in [(1, 1, 10), (4, 2, 50), (16, 4, 100)] {
        let label = format!("{workers}w_{clients}c_{tasks}t");
        group.throughput(Throughput::Elements((clients * tasks) as u64));
        group.bench_function(BenchmarkId::new("round_robin", &label), |b| {
            b.iter(|| run_scenario(workers, clients, tasks, AllocationPolicyConfig::RoundRobin));
        });
        group.bench_function(BenchmarkId::new("dominant_share", &label), |b| {
            b.iter(|| run_scenario(workers, clients, tasks, AllocationPolicyConfig::DominantShare));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_resources_parse,
    bench_resources_arithmetic,
    bench_event_queue,
    bench_batch_scenario
);
criterion_main!(benches);
