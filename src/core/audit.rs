//! Audit trail of protocol decisions.
//!
//! The coordinator records every offer, resolution, launch, and status change
//! into an [`AuditSink`]. Timestamps are virtual so a simulated trail is
//! reproducible; event ids are unique per event.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::VirtualTime;

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Action taken (offer, accept, decline, expire, launch, status, node_lost, ...).
    pub action: String,
    /// Related client, if any.
    pub client: Option<String>,
    /// Related node, if any.
    pub node: Option<String>,
    /// Related offer or task, if any.
    pub subject: Option<String>,
    /// Virtual timestamp.
    pub at: VirtualTime,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Audit sink shared between the coordinator and whoever reads the trail.
pub type SharedAuditSink = Arc<Mutex<dyn AuditSink>>;

/// In-memory audit sink with a bounded buffer.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Stored events with the given action.
    pub fn with_action(&self, action: &str) -> Vec<AuditEvent> {
        self.events
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Sink that forwards every event to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::debug!(
            action = %event.action,
            client = ?event.client,
            node = ?event.node,
            subject = ?event.subject,
            at = %event.at,
            "audit"
        );
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    action: impl Into<String>,
    client: Option<String>,
    node: Option<String>,
    subject: Option<String>,
    at: VirtualTime,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        action: action.into(),
        client,
        node,
        subject,
        at,
        detail,
    }
}
