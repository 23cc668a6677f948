//! Tests for audit sink

use prometheus_resource_broker::core::{build_audit_event, AuditSink, InMemoryAuditSink};
use prometheus_resource_broker::util::VirtualTime;

fn offer_event(offer: &str) -> prometheus_resource_broker::core::AuditEvent {
    build_audit_event(
        "offer",
        Some("client1".to_string()),
        Some("node-1".to_string()),
        Some(offer.to_string()),
        VirtualTime::from_secs_f64(1.5),
        None,
    )
}

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    sink.record(offer_event("1"));
    sink.record(build_audit_event(
        "decline",
        Some("client1".to_string()),
        Some("node-1".to_string()),
        Some("1".to_string()),
        VirtualTime::from_secs_f64(2.0),
        None,
    ));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, "offer");
    assert_eq!(events[1].action, "decline");
    assert_eq!(sink.with_action("decline").len(), 1);
    assert!(sink.with_action("launch").is_empty());
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    sink.record(offer_event("1"));
    sink.record(offer_event("2"));
    sink.record(offer_event("3"));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject.as_deref(), Some("2")); // First one popped
    assert_eq!(events[1].subject.as_deref(), Some("3"));
}

#[test]
fn test_zero_capacity_sink_records_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(offer_event("1"));
    assert!(sink.events().is_empty());
}

#[test]
fn test_build_audit_event() {
    let a = offer_event("1");
    let b = offer_event("1");

    assert_eq!(a.action, "offer");
    assert_eq!(a.client.as_deref(), Some("client1"));
    assert_eq!(a.node.as_deref(), Some("node-1"));
    assert_eq!(a.at, VirtualTime::from_secs_f64(1.5));
    assert_eq!(a.detail, None);
    assert!(!a.event_id.is_empty());
    assert_ne!(a.event_id, b.event_id);
}
