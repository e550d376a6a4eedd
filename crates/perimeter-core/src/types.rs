//! Core domain types for the Perimeter scanner.
//!
//! These types are the externally visible payloads of a scan: every stage
//! (discovery, classification, auditing, vulnerability aggregation) reads
//! or produces them, and they serialize to JSON with stable field names.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// ── Identifiers ───────────────────────────────────────────────────

/// Unique identifier for a scan run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScanId(pub Uuid);

impl ScanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a single finding. Never part of its identity key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FindingId(pub Uuid);

impl FindingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FindingId {
    fn default() -> Self {
        Self::new()
    }
}

// ── Hosts ─────────────────────────────────────────────────────────

/// What discovery learned about the service listening on one port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServiceDescriptor {
    pub name: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub extra_info: Option<String>,
}

impl ServiceDescriptor {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Banner text: `product version` when both are known, otherwise the
    /// bare service name.
    pub fn banner(&self) -> String {
        match (&self.product, &self.version) {
            (Some(p), Some(v)) => format!("{p} {v}"),
            _ => self.name.clone(),
        }
    }
}

/// A host observed during one discovery pass. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Host {
    pub address: String,
    pub hostname: Option<String>,
    pub open_ports: Vec<u16>,
    pub services: BTreeMap<u16, ServiceDescriptor>,
    pub banners: BTreeMap<u16, String>,
    pub os_guess: Option<String>,
    pub os_version_guess: Option<String>,
}

impl Host {
    /// Service name per port, the shape the classifier and auditor consume.
    pub fn service_names(&self) -> BTreeMap<u16, String> {
        self.services
            .iter()
            .map(|(port, svc)| (*port, svc.name.clone()))
            .collect()
    }
}

/// Coarse device category assigned by the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Switch,
    Router,
    Iot,
    Phone,
    Server,
    #[default]
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::Router => "router",
            Self::Iot => "iot",
            Self::Phone => "phone",
            Self::Server => "server",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Findings ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Port,
    Config,
    Tls,
    Vuln,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Port => "port",
            Self::Config => "config",
            Self::Tls => "tls",
            Self::Vuln => "vuln",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FindingKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "port" => Ok(Self::Port),
            "config" => Ok(Self::Config),
            "tls" => Ok(Self::Tls),
            "vuln" => Ok(Self::Vuln),
            other => Err(CoreError::UnknownFindingKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Map an external severity token, case-insensitively. Unknown tokens
    /// are treated as medium.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            "info" => Self::Info,
            _ => Self::Medium,
        }
    }

    /// Risk weight used by change detection.
    pub fn risk_weight(&self) -> f64 {
        match self {
            Self::Critical => 100.0,
            Self::High => 75.0,
            Self::Medium => 40.0,
            Self::Low => 10.0,
            Self::Info => 5.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    #[default]
    Open,
    Filtered,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Other(String),
}

impl Protocol {
    pub fn parse(proto: &str) -> Self {
        match proto.to_lowercase().as_str() {
            "tcp" | "" => Self::Tcp,
            "udp" => Self::Udp,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Kind-specific detail attached to a finding.
///
/// Tool-specific data with no typed home goes in [`Finding::extra`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FindingDetail {
    #[default]
    None,
    Port {
        device_type: DeviceType,
        confidence: f64,
        os: Option<String>,
        os_version: Option<String>,
        banner: Option<String>,
    },
    Config(ConfigDetail),
    Tls {
        issue_type: String,
        grade: TlsGrade,
    },
    Vuln(VulnDetail),
}

/// Which configuration rule produced a finding, with the rule's evidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ConfigDetail {
    DefaultCredentials { username: String },
    InsecureProtocol { protocol: String },
    ManagementInterface { interface: String, encrypted: Option<bool> },
    UnnecessaryPort { reason: String },
    WeakEncryption { verification_needed: bool },
    EndOfLifeOs { os: String },
}

/// Template match metadata from the vulnerability scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VulnDetail {
    pub template_id: String,
    pub template_path: Option<String>,
    pub matched_at: String,
    #[serde(default)]
    pub extracted_results: Vec<String>,
    pub curl_command: Option<String>,
    #[serde(default)]
    pub cve_ids: Vec<String>,
    pub cvss_score: Option<f64>,
}

/// The tuple that correlates findings across scans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub host: String,
    pub port: u16,
    pub kind: FindingKind,
    pub description: String,
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.host, self.port, self.kind, self.description
        )
    }
}

/// A single observed security-relevant fact about a host/port/protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub id: FindingId,
    pub kind: FindingKind,
    pub severity: Severity,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub service_name: String,
    pub description: String,
    pub remediation: String,
    pub discovered_at: DateTime<Utc>,
    pub status: FindingStatus,
    #[serde(default)]
    pub detail: FindingDetail,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Finding {
    /// Create an open TCP finding with a fresh id and timestamp.
    pub fn new(
        kind: FindingKind,
        severity: Severity,
        host: &str,
        port: u16,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: FindingId::new(),
            kind,
            severity,
            host: host.to_string(),
            port,
            protocol: Protocol::Tcp,
            service_name: String::new(),
            description: description.into(),
            remediation: String::new(),
            discovered_at: Utc::now(),
            status: FindingStatus::Open,
            detail: FindingDetail::None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = remediation.into();
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_detail(mut self, detail: FindingDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            host: self.host.clone(),
            port: self.port,
            kind: self.kind,
            description: self.description.clone(),
        }
    }
}

// ── TLS ───────────────────────────────────────────────────────────

/// Coarse three-tier TLS grade.
///
/// Only critical and high issues move the grade; medium and lower issues
/// are reported without affecting it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TlsGrade {
    #[default]
    A,
    B,
    F,
}

impl fmt::Display for TlsGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::B => "B",
            Self::F => "F",
        };
        f.write_str(s)
    }
}

/// Attributes of one certificate in a presented chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub self_signed: bool,
    pub key_algorithm: String,
    pub key_size: Option<u32>,
    pub signature_algorithm: String,
    #[serde(default)]
    pub sans: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SslIssue {
    pub severity: Severity,
    #[serde(rename = "type")]
    pub issue_type: String,
    pub description: String,
    pub remediation: String,
}

/// TLS posture of one host:port at the time of the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SslAudit {
    pub host: String,
    pub port: u16,
    pub protocol_version: String,
    pub cipher_suite: String,
    pub certificate_chain: Vec<Certificate>,
    pub issues: Vec<SslIssue>,
    pub grade: TlsGrade,
}

// ── Scan Results ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Completed,
    Partial,
    Failed,
}

/// Summary data recorded alongside a scan's findings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScanMetadata {
    #[serde(default)]
    pub target: String,
    pub discovery_method: Option<String>,
    #[serde(default)]
    pub total_hosts: usize,
    #[serde(default)]
    pub findings_by_kind: BTreeMap<FindingKind, usize>,
    #[serde(default)]
    pub device_types: BTreeMap<String, DeviceType>,
    #[serde(default)]
    pub tls_grades: BTreeMap<String, TlsGrade>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The outcome of one scan invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanResult {
    pub id: ScanId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ScanStatus,
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub metadata: ScanMetadata,
}

impl ScanResult {
    /// Count findings per kind, used to fill `metadata.findings_by_kind`.
    pub fn count_by_kind(&self) -> BTreeMap<FindingKind, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.kind).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_ignores_id_and_timestamp() {
        let a = Finding::new(FindingKind::Config, Severity::High, "10.0.0.5", 23, "telnet");
        let mut b = a.clone();
        b.id = FindingId::new();
        b.discovered_at = Utc::now() + chrono::TimeDelta::hours(1);
        b.remediation = "different".to_string();

        assert_ne!(a.id, b.id);
        assert_eq!(a.identity_key(), b.identity_key());
        assert_eq!(a.identity_key().to_string(), "10.0.0.5:23:config:telnet");
    }

    #[test]
    fn severity_tokens_are_case_insensitive() {
        assert_eq!(Severity::from_token("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::from_token("High"), Severity::High);
        assert_eq!(Severity::from_token("info"), Severity::Info);
        assert_eq!(Severity::from_token("unknown"), Severity::Medium);
        assert_eq!(Severity::from_token(""), Severity::Medium);
    }

    #[test]
    fn service_banner_needs_product_and_version() {
        let svc = ServiceDescriptor {
            name: "http".to_string(),
            product: Some("nginx".to_string()),
            version: Some("1.24.0".to_string()),
            extra_info: None,
        };
        assert_eq!(svc.banner(), "nginx 1.24.0");
        assert_eq!(ServiceDescriptor::named("ssh").banner(), "ssh");

        let product_only = ServiceDescriptor {
            product: Some("OpenSSH".to_string()),
            ..ServiceDescriptor::named("ssh")
        };
        assert_eq!(product_only.banner(), "ssh");
    }

    #[test]
    fn finding_detail_serializes_tagged() {
        let finding = Finding::new(FindingKind::Config, Severity::Medium, "10.0.0.1", 21, "ftp")
            .with_detail(FindingDetail::Config(ConfigDetail::InsecureProtocol {
                protocol: "ftp".to_string(),
            }));

        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["kind"], "config");
        assert_eq!(json["severity"], "medium");
        assert_eq!(json["detail"]["type"], "config");
        assert_eq!(json["detail"]["rule"], "insecure_protocol");
        assert!(json.get("extra").is_none());

        let back: Finding = serde_json::from_value(json).unwrap();
        assert_eq!(back, finding);
    }

    #[test]
    fn scan_result_counts_by_kind() {
        let result = ScanResult {
            id: ScanId::new(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            status: ScanStatus::Completed,
            findings: vec![
                Finding::new(FindingKind::Port, Severity::Info, "h", 22, "a"),
                Finding::new(FindingKind::Port, Severity::Info, "h", 80, "b"),
                Finding::new(FindingKind::Vuln, Severity::High, "h", 80, "c"),
            ],
            metadata: ScanMetadata::default(),
        };

        let counts = result.count_by_kind();
        assert_eq!(counts.get(&FindingKind::Port), Some(&2));
        assert_eq!(counts.get(&FindingKind::Vuln), Some(&1));
        assert_eq!(counts.get(&FindingKind::Tls), None);
    }
}
