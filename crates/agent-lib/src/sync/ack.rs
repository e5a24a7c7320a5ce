//! Parsing of `uid -> cid` acknowledgements

use crate::error::ReportError;
use crate::models::ResourceKind;
use serde::Deserialize;
use std::collections::HashMap;

/// Cids assigned by the control plane to reported objects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acks {
    pub primary: HashMap<String, String>,
    /// Pods nested under virtual nodes
    pub secondary: HashMap<String, String>,
}

#[derive(Deserialize)]
struct VirtualNodeAcks {
    #[serde(default, rename = "virtualNodes")]
    virtual_nodes: HashMap<String, String>,
    #[serde(default)]
    pods: HashMap<String, String>,
}

impl Acks {
    pub fn parse(kind: ResourceKind, result: Option<&serde_json::Value>) -> Result<Self, ReportError> {
        let malformed = |reason: String| ReportError::MalformedAck { kind, reason };
        let value = result.ok_or_else(|| malformed("missing result".to_string()))?;

        match kind {
            ResourceKind::VirtualNode => {
                let nested = VirtualNodeAcks::deserialize(value)
                    .map_err(|e| malformed(e.to_string()))?;
                Ok(Self {
                    primary: nested.virtual_nodes,
                    secondary: nested.pods,
                })
            }
            _ => {
                let primary = HashMap::<String, String>::deserialize(value)
                    .map_err(|e| malformed(e.to_string()))?;
                Ok(Self {
                    primary,
                    secondary: HashMap::new(),
                })
            }
        }
    }
}
