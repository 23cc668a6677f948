//! Coordinator-side bookkeeping of node capacity, outstanding offers, and
//! allocated tasks.
//!
//! Each node's capacity is split three ways: free, offered (reserved by an
//! outstanding offer), and allocated (granted to launched tasks). The view
//! keeps `offered + allocated <= total` for every node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::actor::TimerId;
use crate::core::error::SchedulerError;
use crate::core::messages::{ClientId, NodeId, Offer, OfferId};
use crate::core::resources::Resources;
use crate::core::task::TaskId;

/// Key of an allocated task in the view.
pub type TaskKey = (ClientId, TaskId);

/// Capacity books for one node.
#[derive(Debug, Clone, Default)]
pub struct NodeEntry {
    /// Fixed capacity.
    pub total: Resources,
    /// Sum of grants of launched tasks.
    pub allocated: Resources,
    /// Sum of outstanding offers.
    pub offered: Resources,
    /// Grant per launched task.
    pub tasks: BTreeMap<TaskKey, Resources>,
}

impl NodeEntry {
    fn new(total: Resources) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Capacity neither offered nor allocated.
    pub fn free(&self) -> Resources {
        let used = &self.allocated + &self.offered;
        self.total.checked_sub(&used).unwrap_or_default()
    }
}

/// An offer the coordinator is waiting on.
#[derive(Debug, Clone)]
pub struct OutstandingOffer {
    /// The offer as sent.
    pub offer: Offer,
    /// Deadline timer.
    pub timer: Option<TimerId>,
}

/// Node and offer bookkeeping.
#[derive(Debug, Default)]
pub struct ClusterView {
    nodes: BTreeMap<NodeId, NodeEntry>,
    offers: BTreeMap<OfferId, OutstandingOffer>,
    placements: BTreeMap<TaskKey, NodeId>,
}

/// What was dropped along with a node.
#[derive(Debug, Default)]
pub struct RemovedNode {
    /// Offers that were outstanding against it.
    pub offers: Vec<OutstandingOffer>,
    /// Tasks that were allocated on it.
    pub tasks: Vec<TaskKey>,
}

impl ClusterView {
    /// Empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Returns false if the node is already known.
    pub fn add_node(&mut self, node: NodeId, total: Resources) -> bool {
        if self.nodes.contains_key(&node) {
            return false;
        }
        self.nodes.insert(node, NodeEntry::new(total));
        true
    }

    /// Drop a node together with its offers and allocations. Resources are not
    /// returned anywhere: the capacity no longer exists.
    pub fn remove_node(&mut self, node: &NodeId) -> Option<RemovedNode> {
        let entry = self.nodes.remove(node)?;
        let offer_ids: Vec<OfferId> = self
            .offers
            .iter()
            .filter(|(_, o)| &o.offer.node == node)
            .map(|(id, _)| *id)
            .collect();
        let offers = offer_ids
            .iter()
            .filter_map(|id| self.offers.remove(id))
            .collect();
        let tasks: Vec<TaskKey> = entry.tasks.into_keys().collect();
        for key in &tasks {
            self.placements.remove(key);
        }
        Some(RemovedNode { offers, tasks })
    }

    /// Node ids in order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Books for one node.
    pub fn node(&self, node: &NodeId) -> Option<&NodeEntry> {
        self.nodes.get(node)
    }

    /// Number of known nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Sum of every node's capacity.
    pub fn total(&self) -> Resources {
        self.nodes
            .values()
            .fold(Resources::new(), |acc, n| &acc + &n.total)
    }

    /// Free capacity of a node.
    pub fn free(&self, node: &NodeId) -> Option<Resources> {
        self.nodes.get(node).map(NodeEntry::free)
    }

    /// Reserve `offer.resources` on `offer.node`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] for an unknown node and
    /// [`SchedulerError::CapacityExceeded`] if the slice is not free.
    pub fn reserve_offer(&mut self, offer: Offer) -> Result<(), SchedulerError> {
        let entry = self
            .nodes
            .get_mut(&offer.node)
            .ok_or_else(|| SchedulerError::UnknownActor(offer.node.to_string()))?;
        if !entry.free().fits(&offer.resources) {
            return Err(SchedulerError::CapacityExceeded);
        }
        entry.offered += &offer.resources;
        self.offers.insert(
            offer.id,
            OutstandingOffer {
                offer,
                timer: None,
            },
        );
        Ok(())
    }

    /// Remember the deadline timer of an outstanding offer.
    pub fn set_offer_timer(&mut self, id: OfferId, timer: TimerId) {
        if let Some(o) = self.offers.get_mut(&id) {
            o.timer = Some(timer);
        }
    }

    /// Outstanding offer, if any.
    pub fn offer(&self, id: OfferId) -> Option<&OutstandingOffer> {
        self.offers.get(&id)
    }

    /// Outstanding offers in id order.
    pub fn offers(&self) -> impl Iterator<Item = &OutstandingOffer> {
        self.offers.values()
    }

    /// Resolve an offer, returning its reservation to the free pool. A second
    /// call for the same id returns `None` and changes nothing.
    pub fn take_offer(&mut self, id: OfferId) -> Option<OutstandingOffer> {
        let outstanding = self.offers.remove(&id)?;
        if let Some(entry) = self.nodes.get_mut(&outstanding.offer.node) {
            entry.offered -= &outstanding.offer.resources;
        }
        Some(outstanding)
    }

    /// Node a task is allocated on.
    pub fn placement(&self, key: &TaskKey) -> Option<&NodeId> {
        self.placements.get(key)
    }

    /// Number of allocated tasks.
    pub fn task_count(&self) -> usize {
        self.placements.len()
    }

    /// Move `grant` from free to allocated for a task.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] for an unknown node and
    /// [`SchedulerError::CapacityExceeded`] if the grant is not free.
    pub fn allocate(
        &mut self,
        node: &NodeId,
        key: TaskKey,
        grant: Resources,
    ) -> Result<(), SchedulerError> {
        let entry = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| SchedulerError::UnknownActor(node.to_string()))?;
        if !entry.free().fits(&grant) {
            return Err(SchedulerError::CapacityExceeded);
        }
        entry.allocated += &grant;
        entry.tasks.insert(key.clone(), grant);
        self.placements.insert(key, node.clone());
        Ok(())
    }

    /// Return a task's grant to its node's free pool. `None` if the task was
    /// not allocated (already released, or its node is gone).
    pub fn release(&mut self, key: &TaskKey) -> Option<(NodeId, Resources)> {
        let node = self.placements.remove(key)?;
        let entry = self.nodes.get_mut(&node)?;
        let grant = entry.tasks.remove(key)?;
        entry.allocated -= &grant;
        Some((node, grant))
    }

    /// Sum of grants held by `client` across the cluster.
    pub fn allocated_to(&self, client: &ClientId) -> Resources {
        let mut sum = Resources::new();
        for entry in self.nodes.values() {
            for ((owner, _), grant) in &entry.tasks {
                if owner == client {
                    sum += grant;
                }
            }
        }
        sum
    }

    /// Check conservation and exclusivity on every node.
    ///
    /// # Errors
    ///
    /// Describes the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (id, entry) in &self.nodes {
            let used = &entry.allocated + &entry.offered;
            if !entry.total.fits(&used) {
                return Err(format!(
                    "node {id}: offered {} + allocated {} exceeds total {}",
                    entry.offered, entry.allocated, entry.total
                ));
            }
            let granted = entry
                .tasks
                .values()
                .fold(Resources::new(), |acc, g| &acc + g);
            if !granted.approx_eq(&entry.allocated) {
                return Err(format!(
                    "node {id}: allocated {} differs from task grants {granted}",
                    entry.allocated
                ));
            }
            let reserved = self
                .offers
                .values()
                .filter(|o| &o.offer.node == id)
                .fold(Resources::new(), |acc, o| &acc + &o.offer.resources);
            if !reserved.approx_eq(&entry.offered) {
                return Err(format!(
                    "node {id}: offered {} differs from outstanding offers {reserved}",
                    entry.offered
                ));
            }
        }
        Ok(())
    }

    /// Serializable copy of the view.
    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            nodes: self
                .nodes
                .iter()
                .map(|(id, e)| NodeSnapshot {
                    id: id.clone(),
                    total: e.total.clone(),
                    allocated: e.allocated.clone(),
                    offered: e.offered.clone(),
                    free: e.free(),
                })
                .collect(),
            offers: self.offers.values().map(|o| o.offer.clone()).collect(),
            tasks: self
                .nodes
                .iter()
                .flat_map(|(node, e)| {
                    e.tasks.iter().map(move |((client, task), grant)| TaskSnapshot {
                        client: client.clone(),
                        task: task.clone(),
                        node: node.clone(),
                        grant: grant.clone(),
                    })
                })
                .collect(),
        }
    }
}

/// Node entry in a [`ClusterSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Node.
    pub id: NodeId,
    /// Capacity.
    pub total: Resources,
    /// Granted to tasks.
    pub allocated: Resources,
    /// Reserved by offers.
    pub offered: Resources,
    /// Neither.
    pub free: Resources,
}

/// Task entry in a [`ClusterSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Owner.
    pub client: ClientId,
    /// Task.
    pub task: TaskId,
    /// Host.
    pub node: NodeId,
    /// Grant.
    pub grant: Resources,
}

/// Point-in-time copy of the coordinator's view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Nodes in id order.
    pub nodes: Vec<NodeSnapshot>,
    /// Outstanding offers.
    pub offers: Vec<Offer>,
    /// Allocated tasks.
    pub tasks: Vec<TaskSnapshot>,
}
