//! Cluster agent library
//!
//! This crate provides the resource synchronization engine:
//! - Watch sources mirroring cluster objects into local stores
//! - Per-kind collectors with incremental, acknowledgement-driven reporting
//! - The gRPC reporter talking to the topology control plane
//! - Health checks and observability

pub mod collector;
pub mod error;
pub mod health;
pub mod identifier;
pub mod metadata;
pub mod models;
pub mod observability;
pub mod proto;
pub mod source;
pub mod sync;

pub use collector::{
    build_collectors, CollectorContext, CycleOutcome, CycleReport, CycleStats, ResourceCollector,
    SyncLoop, SyncLoopBuilder,
};
pub use error::{ReportError, SourceError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use identifier::IdentifierCache;
pub use metadata::AgentMetadata;
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
