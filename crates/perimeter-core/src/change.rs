//! Attack-surface change reports produced by diffing two scans.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{FindingKind, ScanId, Severity};

/// Risk impact above which a single change warrants an alert on its own.
pub const ALERT_RISK_THRESHOLD: f64 = 50.0;

/// `new-<kind>` or `fixed-<kind>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ChangeType {
    New(FindingKind),
    Fixed(FindingKind),
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New(kind) => write!(f, "new-{kind}"),
            Self::Fixed(kind) => write!(f, "fixed-{kind}"),
        }
    }
}

impl FromStr for ChangeType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || CoreError::UnknownChangeType(s.to_string());
        if let Some(kind) = s.strip_prefix("new-") {
            return kind.parse().map(Self::New).map_err(|_| unknown());
        }
        if let Some(kind) = s.strip_prefix("fixed-") {
            return kind.parse().map(Self::Fixed).map_err(|_| unknown());
        }
        Err(unknown())
    }
}

impl From<ChangeType> for String {
    fn from(value: ChangeType) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for ChangeType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A single detected change between two scans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Change {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub severity: Severity,
    pub description: String,
    /// Identity key string of the finding that appeared or disappeared.
    pub entity: String,
    pub old_value: String,
    pub new_value: String,
    pub risk_impact: f64,
}

/// The result of one diff between a current and a previous scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeDetection {
    pub scan_id: ScanId,
    pub previous_scan_id: ScanId,
    pub timestamp: DateTime<Utc>,
    pub changes: Vec<Change>,
    pub risk_delta: f64,
}

impl ChangeDetection {
    /// Whether any individual change warrants an immediate alert.
    ///
    /// Evaluated per change, never on the aggregate `risk_delta`.
    pub fn should_alert(&self) -> bool {
        self.changes.iter().any(|change| {
            matches!(change.severity, Severity::Critical | Severity::High)
                || change.risk_impact > ALERT_RISK_THRESHOLD
        })
    }

    pub fn count(&self, change_type: ChangeType) -> usize {
        self.changes
            .iter()
            .filter(|c| c.change_type == change_type)
            .count()
    }

    /// One-line human-readable summary of the report.
    pub fn summary(&self) -> String {
        format!(
            "Attack Surface Change Report: {} new ports, {} closed ports, {} new vulnerabilities, {} fixed vulnerabilities. Risk Delta: {:.2}",
            self.count(ChangeType::New(FindingKind::Port)),
            self.count(ChangeType::Fixed(FindingKind::Port)),
            self.count(ChangeType::New(FindingKind::Vuln)),
            self.count(ChangeType::Fixed(FindingKind::Vuln)),
            self.risk_delta
        )
    }
}
