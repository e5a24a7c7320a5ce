//! Error types for watch sources and report delivery

use crate::models::ResourceKind;
use thiserror::Error;

/// Failures raised while listing or watching cluster objects
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("kubernetes api request failed: {0}")]
    Api(#[from] kube::Error),

    #[error(
        "expected resource version to have {expected} parts to match the number of sources, got {actual}"
    )]
    ResourceVersionMismatch { expected: usize, actual: usize },

    #[error("watch stream failed: {0}")]
    Watch(String),
}

/// Failures raised while delivering a batch to the control plane
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to encode {kind} batch: {source}")]
    Encode {
        kind: ResourceKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed acknowledgement for {kind}: {reason}")]
    MalformedAck { kind: ResourceKind, reason: String },
}

impl From<tonic::Status> for ReportError {
    fn from(status: tonic::Status) -> Self {
        ReportError::Transport(format!("{}: {}", status.code(), status.message()))
    }
}
