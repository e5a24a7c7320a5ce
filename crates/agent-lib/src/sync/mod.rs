//! Synchronization with the topology control plane
//!
//! This module provides:
//! - The [`Reporter`] boundary used by collectors
//! - Acknowledgement parsing
//! - A gRPC client with optional mTLS implementing [`Reporter`]

mod ack;
mod client;
mod reporter;

pub use ack::Acks;
pub use client::{ClientConfig, SyncClient, SyncClientBuilder, TlsPaths};
pub use reporter::{ReportBatch, ReportResponse, Reporter};
