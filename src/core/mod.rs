//! Protocol data model, actor seam, and error taxonomy.

pub mod actor;
pub mod audit;
pub mod error;
pub mod messages;
pub mod resources;
pub mod task;

pub use actor::{Actor, Context, Timer, TimerId};
pub use audit::{
    AuditEvent, AuditSink, InMemoryAuditSink, SharedAuditSink, TracingAuditSink,
    build_audit_event,
};
pub use error::{AppResult, ParseError, ProtocolError, SchedulerError};
pub use messages::{
    ActorId, ClientId, Message, NodeId, Offer, OfferId, StatusUpdate, TaskDescription, TaskLaunch,
};
pub use resources::{CPUS, MEM, Requirement, Resources, fits};
pub use task::{BatchWork, TaskId, TaskKind, TaskSpec, TaskState, TimedWork, Workload};
