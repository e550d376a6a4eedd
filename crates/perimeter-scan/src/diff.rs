//! Change detection between two scans of the same target.
//!
//! Findings are matched by identity key (`host:port:kind:description`).
//! Keys only in the current scan are new; keys only in the previous scan
//! are fixed. A finding whose non-identity fields changed is not reported.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;

use perimeter_core::change::{Change, ChangeDetection, ChangeType};
use perimeter_core::types::{Finding, ScanResult, Severity};

use crate::error::Result;

/// Diff `current` against `previous`.
///
/// New changes come first, then fixed ones, each ordered by identity key.
pub fn detect(current: &ScanResult, previous: &ScanResult) -> ChangeDetection {
    let current_keys = index(&current.findings);
    let previous_keys = index(&previous.findings);

    let mut changes = Vec::new();

    for (key, finding) in &current_keys {
        if previous_keys.contains_key(key) {
            continue;
        }
        changes.push(Change {
            change_type: ChangeType::New(finding.kind),
            severity: finding.severity,
            description: format!(
                "New finding: {} on {}:{}",
                finding.description, finding.host, finding.port
            ),
            entity: key.clone(),
            old_value: "absent".to_string(),
            new_value: "present".to_string(),
            risk_impact: finding.severity.risk_weight(),
        });
    }

    for (key, finding) in &previous_keys {
        if current_keys.contains_key(key) {
            continue;
        }
        changes.push(Change {
            change_type: ChangeType::Fixed(finding.kind),
            severity: Severity::Info,
            description: format!(
                "Finding removed: {} on {}:{}",
                finding.description, finding.host, finding.port
            ),
            entity: key.clone(),
            old_value: "present".to_string(),
            new_value: "absent".to_string(),
            risk_impact: -finding.severity.risk_weight(),
        });
    }

    let risk_delta: f64 = changes.iter().map(|c| c.risk_impact).sum();

    tracing::debug!(
        scan_id = %current.id,
        previous_scan_id = %previous.id,
        changes = changes.len(),
        risk_delta,
        "Computed scan diff"
    );

    ChangeDetection {
        scan_id: current.id,
        previous_scan_id: previous.id,
        timestamp: Utc::now(),
        changes,
        risk_delta,
    }
}

/// Identity key string to finding. The first finding wins on duplicates.
fn index(findings: &[Finding]) -> BTreeMap<String, &Finding> {
    let mut map = BTreeMap::new();
    for finding in findings {
        map.entry(finding.identity_key().to_string())
            .or_insert(finding);
    }
    map
}

/// Read a `ScanResult` previously written as JSON.
pub fn read_scan(path: &Path) -> Result<ScanResult> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
