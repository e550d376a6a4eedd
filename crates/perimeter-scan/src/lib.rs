//! perimeter-scan: Attack-surface scanning for a network segment.
//!
//! Discovers hosts with nmap (falling back to naabu), classifies devices,
//! audits configuration and TLS posture, aggregates nuclei findings, and
//! diffs successive scans into risk-weighted change reports.

pub mod audit;
pub mod classify;
pub mod config;
pub mod diff;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod naabu;
pub mod nmap_xml;
pub mod orchestrator;
pub mod scheduler;
pub mod target;
pub mod tls;
pub mod vuln;

pub use error::ScanError;
pub use orchestrator::ScanOrchestrator;
