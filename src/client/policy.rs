//! Offer packing policies.
//!
//! A policy decides which pending tasks go into an offer and how much of the
//! offer each gets. Output depends only on the offer and the pending list, so
//! a given input order always packs the same way.

use std::cmp::Ordering;

use crate::config::PackingConfig;
use crate::core::messages::TaskLaunch;
use crate::core::resources::Resources;
use crate::core::task::{TaskKind, TaskSpec, Workload};

/// Chooses tasks and grants out of one offer.
pub trait PackingPolicy: Send {
    /// Policy name for logs.
    fn name(&self) -> &'static str;

    /// Pack `pending` (in submission order) into `offered`.
    fn pack(&self, offered: &Resources, pending: &[&TaskSpec]) -> Vec<TaskLaunch>;
}

/// Grant for `spec` out of `remaining`: the band maximum when it fits,
/// otherwise the minimum. `None` when neither fits or the grant would make
/// no progress.
pub fn choose_grant(spec: &TaskSpec, remaining: &Resources) -> Option<Resources> {
    let band = &spec.requirement;
    let grant = if remaining.fits(band.max()) {
        band.max().clone()
    } else if remaining.fits(band.min()) {
        band.min().clone()
    } else {
        return None;
    };
    let progresses = matches!(spec.kind, TaskKind::Service)
        || spec.kind.completion_after(spec.kind.rate(&grant)).is_some();
    progresses.then_some(grant)
}

/// Greedy packing in the given order.
pub fn pack_in_order<'a, I>(offered: &Resources, order: I) -> Vec<TaskLaunch>
where
    I: IntoIterator<Item = &'a TaskSpec>,
{
    let mut remaining = offered.clone();
    let mut launches = Vec::new();
    for spec in order {
        if let Some(grant) = choose_grant(spec, &remaining) {
            remaining -= &grant;
            launches.push(TaskLaunch {
                task: spec.id.clone(),
                requirement: spec.requirement.clone(),
                kind: spec.kind.clone(),
                grant,
                attempt: 0,
            });
        }
    }
    launches
}

/// First fit in submission order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstFit;

impl PackingPolicy for FirstFit {
    fn name(&self) -> &'static str {
        "first_fit"
    }

    fn pack(&self, offered: &Resources, pending: &[&TaskSpec]) -> Vec<TaskLaunch> {
        pack_in_order(offered, pending.iter().copied())
    }
}

/// Largest maximum cpus first; equal sizes keep submission order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LargestFirst;

impl PackingPolicy for LargestFirst {
    fn name(&self) -> &'static str {
        "largest_first"
    }

    fn pack(&self, offered: &Resources, pending: &[&TaskSpec]) -> Vec<TaskLaunch> {
        let mut order = pending.to_vec();
        order.sort_by(|a, b| {
            b.requirement
                .max()
                .cpus()
                .partial_cmp(&a.requirement.max().cpus())
                .unwrap_or(Ordering::Equal)
        });
        pack_in_order(offered, order)
    }
}

/// Build the configured policy.
pub fn packing_from_config(cfg: PackingConfig) -> Box<dyn PackingPolicy> {
    match cfg {
        PackingConfig::FirstFit => Box::new(FirstFit),
        PackingConfig::LargestFirst => Box::new(LargestFirst),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resources::Requirement;

    fn res(text: &str) -> Resources {
        Resources::parse(text).unwrap()
    }

    fn task(id: &str, min: &str, max: &str) -> TaskSpec {
        TaskSpec::batch(id, Requirement::parse(min, max).unwrap(), 10.0)
    }

    fn ids(launches: &[TaskLaunch]) -> Vec<&str> {
        launches.iter().map(|l| l.task.0.as_str()).collect()
    }

    #[test]
    fn grant_prefers_max_then_min() {
        let t = task("t", "cpus:1", "cpus:3");
        assert_eq!(choose_grant(&t, &res("cpus:4")), Some(res("cpus:3")));
        assert_eq!(choose_grant(&t, &res("cpus:2")), Some(res("cpus:1")));
        assert_eq!(choose_grant(&t, &res("cpus:0.5")), None);
    }

    #[test]
    fn grant_without_cpus_is_skipped_for_batch() {
        let t = task("t", "", "mem:10");
        assert_eq!(choose_grant(&t, &res("cpus:4;mem:100")), None);
    }

    #[test]
    fn first_fit_keeps_submission_order() {
        let a = task("a", "", "cpus:1;mem:512");
        let b = task("b", "", "cpus:1;mem:512");
        let c = task("c", "", "cpus:1;mem:512");
        let launches = FirstFit.pack(&res("cpus:4;mem:1024"), &[&a, &b, &c]);
        assert_eq!(ids(&launches), ["a", "b"]);
    }

    #[test]
    fn first_fit_skips_what_does_not_fit() {
        let big = task("big", "", "cpus:8");
        let small = task("small", "", "cpus:1");
        let launches = FirstFit.pack(&res("cpus:4"), &[&big, &small]);
        assert_eq!(ids(&launches), ["small"]);
    }

    #[test]
    fn largest_first_orders_by_max_cpus() {
        let a = task("a", "", "cpus:1");
        let b = task("b", "", "cpus:3");
        let c = task("c", "", "cpus:1");
        let launches = LargestFirst.pack(&res("cpus:4"), &[&a, &b, &c]);
        assert_eq!(ids(&launches), ["b", "a"]);
    }
}
