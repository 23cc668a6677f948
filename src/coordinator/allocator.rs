//! Pluggable client ordering for the allocation pass.
//!
//! For each node with free capacity the coordinator asks the policy for an
//! ordered list of candidate clients and offers the node to the first one that
//! is eligible. The policy only orders; eligibility (active, not filtered,
//! registered) is decided by the coordinator.

use std::cmp::Ordering;

use crate::config::AllocationPolicyConfig;
use crate::core::messages::ClientId;
use crate::core::resources::Resources;

/// A client competing for a node, with what it already holds.
#[derive(Debug, Clone)]
pub struct ClientShare {
    /// Client.
    pub client: ClientId,
    /// Resources currently granted to its tasks.
    pub allocated: Resources,
}

/// Orders candidate clients for one node.
pub trait AllocationPolicy: Send {
    /// Policy name for logs.
    fn name(&self) -> &'static str;

    /// Candidates in the order they should be offered to. `candidates` arrive
    /// sorted by client id.
    fn order(&mut self, candidates: &[ClientShare], cluster_total: &Resources) -> Vec<ClientId>;

    /// Called after `client` received an offer.
    fn offered(&mut self, _client: &ClientId) {}
}

/// Rotate through clients, starting after the last one offered to.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last: Option<ClientId>,
}

impl AllocationPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn order(&mut self, candidates: &[ClientShare], _cluster_total: &Resources) -> Vec<ClientId> {
        let start = self
            .last
            .as_ref()
            .map_or(0, |last| candidates.partition_point(|c| &c.client <= last));
        candidates[start..]
            .iter()
            .chain(&candidates[..start])
            .map(|c| c.client.clone())
            .collect()
    }

    fn offered(&mut self, client: &ClientId) {
        self.last = Some(client.clone());
    }
}

/// Lowest dominant share first; ties go to the lower client id.
#[derive(Debug, Default)]
pub struct DominantShare;

impl AllocationPolicy for DominantShare {
    fn name(&self) -> &'static str {
        "dominant_share"
    }

    fn order(&mut self, candidates: &[ClientShare], cluster_total: &Resources) -> Vec<ClientId> {
        let mut ranked: Vec<(f64, &ClientId)> = candidates
            .iter()
            .map(|c| (c.allocated.dominant_share(cluster_total), &c.client))
            .collect();
        ranked.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        ranked.into_iter().map(|(_, c)| c.clone()).collect()
    }
}

/// Build the configured policy.
pub fn policy_from_config(cfg: AllocationPolicyConfig) -> Box<dyn AllocationPolicy> {
    match cfg {
        AllocationPolicyConfig::RoundRobin => Box::new(RoundRobin::default()),
        AllocationPolicyConfig::DominantShare => Box::new(DominantShare),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(name: &str, text: &str) -> ClientShare {
        ClientShare {
            client: ClientId::new(name),
            allocated: Resources::parse(text).unwrap(),
        }
    }

    fn names(ids: &[ClientId]) -> Vec<&str> {
        ids.iter().map(|c| c.0.as_str()).collect()
    }

    #[test]
    fn round_robin_rotates_after_last_offer() {
        let mut rr = RoundRobin::default();
        let total = Resources::parse("cpus:8").unwrap();
        let c = vec![share("a", ""), share("b", ""), share("c", "")];
        assert_eq!(names(&rr.order(&c, &total)), ["a", "b", "c"]);
        rr.offered(&ClientId::new("a"));
        assert_eq!(names(&rr.order(&c, &total)), ["b", "c", "a"]);
        rr.offered(&ClientId::new("c"));
        assert_eq!(names(&rr.order(&c, &total)), ["a", "b", "c"]);
    }

    #[test]
    fn round_robin_survives_departed_client() {
        let mut rr = RoundRobin::default();
        let total = Resources::parse("cpus:8").unwrap();
        rr.offered(&ClientId::new("b"));
        let c = vec![share("a", ""), share("c", "")];
        assert_eq!(names(&rr.order(&c, &total)), ["c", "a"]);
    }

    #[test]
    fn dominant_share_prefers_smallest_holder() {
        let mut drf = DominantShare;
        let total = Resources::parse("cpus:10;mem:100").unwrap();
        let c = vec![
            share("a", "cpus:5"),
            share("b", "mem:10"),
            share("c", "cpus:1;mem:60"),
        ];
        assert_eq!(names(&drf.order(&c, &total)), ["b", "a", "c"]);
    }

    #[test]
    fn dominant_share_breaks_ties_by_id() {
        let mut drf = DominantShare;
        let total = Resources::parse("cpus:10").unwrap();
        let c = vec![share("a", ""), share("b", "")];
        assert_eq!(names(&drf.order(&c, &total)), ["a", "b"]);
    }
}
