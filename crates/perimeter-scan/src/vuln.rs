//! Vulnerability aggregation through nuclei.
//!
//! All discovered hosts go to one batched nuclei run. Its `-json` output is
//! one match per line; each line becomes a `vuln` finding.

use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use perimeter_core::types::{Finding, FindingDetail, FindingKind, Severity, VulnDetail};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::executor::CommandExecutor;

/// One line of nuclei JSON output.
#[derive(Debug, Clone, Deserialize)]
pub struct NucleiResult {
    #[serde(rename = "template-id", default)]
    pub template_id: String,
    #[serde(rename = "template-path", default)]
    pub template_path: Option<String>,
    #[serde(default)]
    pub info: NucleiInfo,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(rename = "matched-at", default)]
    pub matched_at: String,
    #[serde(rename = "extracted-results", default)]
    pub extracted_results: Option<Vec<String>>,
    #[serde(rename = "curl-command", default)]
    pub curl_command: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NucleiInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub remediation: Option<String>,
    #[serde(default)]
    pub classification: Option<NucleiClassification>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NucleiClassification {
    #[serde(rename = "cve-id", default)]
    pub cve_id: Option<Vec<String>>,
    #[serde(rename = "cwe-id", default)]
    pub cwe_id: Option<Vec<String>>,
    #[serde(rename = "cvss-score", default)]
    pub cvss_score: Option<f64>,
}

pub struct NucleiScanner {
    executor: Arc<dyn CommandExecutor>,
    nuclei_path: String,
    rate_limit: u32,
    request_timeout_secs: u32,
}

impl NucleiScanner {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: &ScanConfig) -> Self {
        Self {
            executor,
            nuclei_path: config.nuclei_path.clone(),
            rate_limit: config.nuclei_rate_limit,
            request_timeout_secs: config.nuclei_timeout_secs,
        }
    }

    pub fn args(&self, targets: &[String]) -> Vec<String> {
        let mut args = vec![
            "-json".to_string(),
            "-silent".to_string(),
            "-no-color".to_string(),
            "-rate-limit".to_string(),
            self.rate_limit.to_string(),
            "-timeout".to_string(),
            self.request_timeout_secs.to_string(),
        ];
        for target in targets {
            args.push("-target".to_string());
            args.push(target.clone());
        }
        args
    }

    /// Run nuclei once against every distinct host in `targets`.
    ///
    /// A non-zero exit still yields findings when nuclei printed any; only a
    /// failing run with no output is an error.
    pub async fn scan_vulnerabilities(
        &self,
        targets: &[String],
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Finding>> {
        let targets = dedup_by_host(targets);
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        tracing::info!(targets = targets.len(), "Starting nuclei scan");

        let output = self
            .executor
            .run(&self.nuclei_path, &self.args(&targets), cancel, budget)
            .await?;

        if !output.success() {
            if output.stdout.is_empty() {
                return Err(ScanError::ToolFailed {
                    tool: "nuclei".to_string(),
                    code: output.exit_code.unwrap_or(-1),
                    stderr: output.stderr_lossy(),
                });
            }
            tracing::warn!(exit_code = ?output.exit_code, "Nuclei exited non-zero, keeping its output");
        }

        let findings = parse_output(&output.stdout);
        tracing::info!(
            findings = findings.len(),
            duration_ms = start.elapsed().as_millis(),
            "Nuclei scan complete"
        );
        Ok(findings)
    }
}

/// Keep the first target seen for each host.
fn dedup_by_host(targets: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .filter(|t| !t.trim().is_empty())
        .filter(|t| seen.insert(extract_host_port(t).0))
        .cloned()
        .collect()
}

/// Parse nuclei JSON lines, skipping any that do not decode.
pub fn parse_output(output: &[u8]) -> Vec<Finding> {
    String::from_utf8_lossy(output)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<NucleiResult>(line) {
            Ok(result) => Some(to_finding(result)),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed nuclei line");
                None
            }
        })
        .collect()
}

fn to_finding(result: NucleiResult) -> Finding {
    let (mut host, port) = extract_host_port(&result.matched_at);
    if host.is_empty() {
        host = result.host.clone().or(result.ip.clone()).unwrap_or_default();
    }

    let info = result.info;
    let description = info
        .description
        .clone()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| info.name.clone());
    let remediation = info
        .remediation
        .clone()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| fallback_remediation(&info.severity).to_string());
    let classification = info.classification.unwrap_or_default();

    let mut finding = Finding::new(
        FindingKind::Vuln,
        Severity::from_token(&info.severity),
        &host,
        port,
        description,
    )
    .with_service(info.name)
    .with_remediation(remediation)
    .with_detail(FindingDetail::Vuln(VulnDetail {
        template_id: result.template_id,
        template_path: result.template_path,
        matched_at: result.matched_at,
        extracted_results: result.extracted_results.unwrap_or_default(),
        curl_command: result.curl_command,
        cve_ids: classification.cve_id.unwrap_or_default(),
        cvss_score: classification.cvss_score,
    }));

    if let Some(cwe) = classification.cwe_id.filter(|c| !c.is_empty()) {
        finding = finding.with_extra("cwe_ids", serde_json::json!(cwe));
    }
    finding
}

/// Generic advice by severity for templates that carry none.
fn fallback_remediation(severity: &str) -> &'static str {
    match severity.trim().to_lowercase().as_str() {
        "critical" | "high" => "Address this vulnerability immediately. Apply security patches or updates. If no patch is available, implement compensating controls.",
        "medium" => "Review and address this vulnerability. Apply patches or updates when available.",
        "low" | "info" => "Review this finding. Consider addressing if it poses a risk to your environment.",
        _ => "Review this finding and determine appropriate remediation.",
    }
}

/// Recover host and port from a matched-at value such as
/// `https://10.0.0.5:8443/admin`, `http://gw.local/`, `10.0.0.5:22` or a
/// bare `2001:db8::1`.
/// Without an explicit port, https means 443 and anything else 80.
pub fn extract_host_port(matched_at: &str) -> (String, u16) {
    let trimmed = matched_at.trim();
    let (rest, default_port) = if let Some(rest) = trimmed.strip_prefix("https://") {
        (rest, 443)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        (rest, 80)
    } else {
        (trimmed, 80)
    };

    let authority = rest.split('/').next().unwrap_or_default();

    // Bracketed IPv6: [::1]:8443
    if let Some(inner) = authority.strip_prefix('[') {
        let (addr, after) = inner.split_once(']').unwrap_or((inner, ""));
        let port = after
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .unwrap_or(default_port);
        return (addr.to_string(), port);
    }

    // Unbracketed IPv6 carries no port.
    if authority.parse::<Ipv6Addr>().is_ok() {
        return (authority.to_string(), default_port);
    }

    match authority.split_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(default_port)),
        None => (authority.to_string(), default_port),
    }
}
