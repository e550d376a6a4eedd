//! perimeter-core: Shared types for the Perimeter attack-surface scanner.
//!
//! This crate provides the data model every scan stage speaks:
//! - Hosts and service descriptors produced by discovery
//! - Findings with typed, per-kind detail
//! - TLS audit snapshots and grades
//! - Scan results and the change reports computed between two scans
//! - Scan lifecycle events

pub mod change;
pub mod error;
pub mod events;
pub mod types;

pub use change::{Change, ChangeDetection, ChangeType};
pub use error::CoreError;
pub use types::{
    DeviceType, Finding, FindingDetail, FindingKind, FindingStatus, Host, IdentityKey, ScanId,
    ScanResult, ScanStatus, ServiceDescriptor, Severity,
};
