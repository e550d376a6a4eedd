//! Scan lifecycle events.
//!
//! The orchestrator publishes these on an optional channel so a caller or
//! UI can follow a scan while it runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DeviceType, ScanId, ScanStatus};

/// Unique identifier for an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub id: EventId,
    pub scan_id: ScanId,
    pub timestamp: DateTime<Utc>,
    pub payload: ScanEventPayload,
}

impl ScanEvent {
    pub fn new(scan_id: ScanId, payload: ScanEventPayload) -> Self {
        Self {
            id: EventId::new(),
            scan_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ScanEventPayload {
    ScanStarted {
        target: String,
    },
    /// The orchestrator moved to a new phase.
    PhaseChanged {
        phase: String,
    },
    /// One host finished its per-host audits.
    HostAudited {
        host: String,
        device_type: DeviceType,
        findings: u32,
        errors: u32,
    },
    /// A stage failed without failing the scan.
    StageDegraded {
        stage: String,
        reason: String,
    },
    ScanFinished {
        status: ScanStatus,
        findings: u32,
        duration_ms: u64,
    },
    /// A diff against the previous scan crossed the alert threshold.
    ChangeAlert {
        previous_scan_id: ScanId,
        changes: u32,
        risk_delta: f64,
    },
}
