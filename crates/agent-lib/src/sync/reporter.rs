//! Report boundary between collectors and the transport

use crate::error::ReportError;
use crate::models::ResourceKind;
use async_trait::async_trait;
use serde::Serialize;

/// One batch of snapshots or tombstones for a resource kind
#[derive(Debug, Clone, PartialEq)]
pub struct ReportBatch {
    pub kind: ResourceKind,
    /// false for tombstone batches
    pub exists: bool,
    /// JSON array of records
    pub payload: String,
    pub size: usize,
}

impl ReportBatch {
    pub fn encode<T: Serialize>(
        kind: ResourceKind,
        exists: bool,
        records: &[T],
    ) -> Result<Self, ReportError> {
        let payload = serde_json::to_string(records)
            .map_err(|source| ReportError::Encode { kind, source })?;
        Ok(Self {
            kind,
            exists,
            payload,
            size: records.len(),
        })
    }
}

/// Control plane answer to a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportResponse {
    pub success: bool,
    pub code: i32,
    pub error: String,
    /// Acknowledgement document, if any
    pub result: Option<serde_json::Value>,
}

impl ReportResponse {
    pub fn accepted(result: serde_json::Value) -> Self {
        Self {
            success: true,
            code: 200,
            error: String::new(),
            result: Some(result),
        }
    }

    pub fn rejected(code: i32, error: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            error: error.into(),
            result: None,
        }
    }
}

/// Sends batches to the control plane
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, batch: ReportBatch) -> Result<ReportResponse, ReportError>;
}
