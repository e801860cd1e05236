//! Data types sent to the client over WebSocket.
//! Keep this module minimal and stable: it defines the wire format.

use serde::{Deserialize, Serialize};

use crate::format::NOT_AVAILABLE;

/// Header of every broadcast produced by the monitor.
pub const MONITORING_HEADER: &str = "Monitoring";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreReport {
    pub index: u32,
    pub model: String,
    pub speed: u64,
    pub usage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuReport {
    pub count: String,
    pub usage: String,
    pub cores: Vec<CoreReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamReport {
    pub total: String,
    pub usage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemReport {
    pub cpu: CpuReport,
    pub ram: RamReport,
}

/// Outer wrapper: `{"Header": ..., "Payload": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub header: String,
    pub payload: SystemReport,
}

impl CpuReport {
    pub fn disabled() -> Self {
        Self {
            count: NOT_AVAILABLE.to_string(),
            usage: NOT_AVAILABLE.to_string(),
            cores: Vec::new(),
        }
    }
}

impl RamReport {
    pub fn disabled() -> Self {
        Self {
            total: NOT_AVAILABLE.to_string(),
            usage: NOT_AVAILABLE.to_string(),
        }
    }
}

impl Envelope {
    pub fn monitoring(payload: SystemReport) -> Self {
        Self {
            header: MONITORING_HEADER.to_string(),
            payload,
        }
    }
}
