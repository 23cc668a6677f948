//! Tests for error types

use prometheus_resource_broker::core::{
    ActorId, NodeId, OfferId, ParseError, ProtocolError, Resources, SchedulerError, TaskId,
};

#[test]
fn test_capacity_exceeded_error() {
    let err = SchedulerError::CapacityExceeded;
    assert_eq!(format!("{}", err), "capacity exceeded");
}

#[test]
fn test_unreachable_error_names_actor() {
    let err = SchedulerError::Unreachable(ActorId::Worker(NodeId::new("node-1")));
    assert_eq!(format!("{}", err), "actor worker/node-1 is unreachable");
}

#[test]
fn test_config_error() {
    let err = SchedulerError::Config("bad timeout".to_string());
    assert_eq!(format!("{}", err), "config invalid: bad timeout");
}

#[test]
fn test_parse_error_converts_transparently() {
    let parse = Resources::parse("cpus").unwrap_err();
    assert_eq!(parse, ParseError::MissingSeparator("cpus".to_string()));
    let err: SchedulerError = parse.into();
    assert_eq!(format!("{}", err), "missing ':' in resource token `cpus`");
}

#[test]
fn test_parse_error_variants() {
    assert!(matches!(
        Resources::parse("cpus:-1"),
        Err(ParseError::NegativeAmount { .. })
    ));
    assert!(matches!(
        Resources::parse("cpus:lots"),
        Err(ParseError::InvalidAmount { .. })
    ));
    assert!(matches!(
        Resources::parse("cpus:1;cpus:2"),
        Err(ParseError::Duplicate(name)) if name == "cpus"
    ));
    assert!(matches!(
        Resources::parse(":1"),
        Err(ParseError::InvalidName(_))
    ));
}

#[test]
fn test_protocol_error_messages() {
    assert_eq!(
        ProtocolError::UnknownOffer(OfferId(7)).to_string(),
        "offer offer-7 is not outstanding"
    );
    assert_eq!(
        ProtocolError::TaskNotPending(TaskId::new("t1")).to_string(),
        "task t1 is not pending"
    );
}

#[test]
fn test_protocol_error_serializes() {
    let err = ProtocolError::NotOfferHolder(OfferId(3));
    let json = serde_json::to_string(&err).unwrap();
    let back: ProtocolError = serde_json::from_str(&json).unwrap();
    assert_eq!(back, err);
}
