//! Scan orchestration.
//!
//! One scan moves through discovery, per-host auditing and vulnerability
//! scanning. Per-host work runs on a `JoinSet` bounded by a semaphore and
//! reports back over an `mpsc` channel; this module is the only collector.
//! A single deadline derived from the scan budget, together with the
//! caller's cancellation token, governs the whole run.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use perimeter_core::events::{ScanEvent, ScanEventPayload};
use perimeter_core::types::{
    DeviceType, Finding, FindingDetail, FindingKind, Host, ScanId, ScanMetadata, ScanResult,
    ScanStatus, Severity, TlsGrade,
};

use crate::audit::ConfigAuditor;
use crate::classify::classify;
use crate::config::ScanConfig;
use crate::discovery::Discovery;
use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::target::TargetSpec;
use crate::tls::{findings_from_audit, TlsAuditor, TlsProbe};
use crate::vuln::NucleiScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Initialized,
    Discovering,
    PerHostAuditing,
    VulnerabilityScanning,
    Completed,
    Partial,
    Failed,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Discovering => "discovering",
            Self::PerHostAuditing => "per_host_auditing",
            Self::VulnerabilityScanning => "vulnerability_scanning",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one per-host worker learned.
#[derive(Debug)]
struct HostReport {
    address: String,
    device_type: DeviceType,
    findings: Vec<Finding>,
    tls_grades: Vec<(u16, TlsGrade)>,
    errors: Vec<String>,
}

/// Shared, read-only state handed to every per-host worker.
struct HostAuditContext {
    config: Arc<ScanConfig>,
    auditor: ConfigAuditor,
    tls: Arc<TlsAuditor>,
}

pub struct ScanOrchestrator {
    config: Arc<ScanConfig>,
    discovery: Discovery,
    nuclei: NucleiScanner,
    context: Arc<HostAuditContext>,
    events: Option<mpsc::UnboundedSender<ScanEvent>>,
}

impl ScanOrchestrator {
    pub fn new(
        config: ScanConfig,
        executor: Arc<dyn CommandExecutor>,
        probe: Arc<dyn TlsProbe>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            discovery: Discovery::new(executor.clone(), (*config).clone()),
            nuclei: NucleiScanner::new(executor, &config),
            context: Arc::new(HostAuditContext {
                config: config.clone(),
                auditor: ConfigAuditor::default(),
                tls: Arc::new(TlsAuditor::new(probe, config.tls_timeout())),
            }),
            config,
            events: None,
        }
    }

    /// Replace the built-in configuration rules.
    pub fn with_auditor(mut self, auditor: ConfigAuditor) -> Self {
        self.context = Arc::new(HostAuditContext {
            config: self.config.clone(),
            auditor,
            tls: self.context.tls.clone(),
        });
        self
    }

    /// Publish lifecycle events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ScanEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run one scan of `target`.
    ///
    /// Returns an error only for an invalid target or when both discovery
    /// strategies fail. Budget expiry and cancellation yield a `Partial`
    /// result holding whatever was gathered.
    pub async fn run(&self, target: &str, cancel: &CancellationToken) -> Result<ScanResult> {
        let spec: TargetSpec = target.parse()?;
        let scan_id = ScanId::new();
        let start_time = Utc::now();
        let started = Instant::now();
        let budget = self.config.scan_budget();

        let scan_cancel = cancel.child_token();
        let deadline = tokio::spawn({
            let scan_cancel = scan_cancel.clone();
            async move {
                tokio::time::sleep(budget).await;
                scan_cancel.cancel();
            }
        });

        tracing::info!(scan_id = %scan_id, target = %spec, budget_secs = budget.as_secs(), "Scan started");
        self.emit(scan_id, ScanEventPayload::ScanStarted { target: spec.to_string() });
        self.phase(scan_id, ScanPhase::Initialized);

        let mut metadata = ScanMetadata {
            target: spec.to_string(),
            ..Default::default()
        };
        let mut findings = Vec::new();
        let mut interrupted = false;

        // ── Discovery ──
        self.phase(scan_id, ScanPhase::Discovering);
        let hosts = match self.discovery.discover(&spec, budget, &scan_cancel).await {
            Ok(outcome) => {
                metadata.discovery_method = Some(outcome.method.to_string());
                metadata.warnings.extend(outcome.warnings);
                outcome.hosts
            }
            Err(e) if e.is_interruption() => {
                interrupted = true;
                Vec::new()
            }
            Err(e) => {
                deadline.abort();
                tracing::error!(scan_id = %scan_id, target = %spec, error = %e, "Discovery failed");
                self.phase(scan_id, ScanPhase::Failed);
                self.emit(
                    scan_id,
                    ScanEventPayload::ScanFinished {
                        status: ScanStatus::Failed,
                        findings: 0,
                        duration_ms: started.elapsed().as_millis() as u64,
                    },
                );
                return Err(e);
            }
        };
        metadata.total_hosts = hosts.len();

        // ── Per-host audits ──
        if !interrupted {
            self.phase(scan_id, ScanPhase::PerHostAuditing);
            interrupted = self
                .audit_hosts(scan_id, &hosts, &scan_cancel, &mut findings, &mut metadata)
                .await;
        }

        // ── Vulnerability scan ──
        if !interrupted && !hosts.is_empty() {
            self.phase(scan_id, ScanPhase::VulnerabilityScanning);
            let targets: Vec<String> = hosts.iter().map(|h| h.address.clone()).collect();
            let remaining = budget.saturating_sub(started.elapsed());

            match self
                .nuclei
                .scan_vulnerabilities(&targets, remaining, &scan_cancel)
                .await
            {
                Ok(vulns) => findings.extend(vulns),
                Err(e) if e.is_interruption() => interrupted = true,
                Err(e) => {
                    tracing::warn!(scan_id = %scan_id, error = %e, "Vulnerability scan degraded");
                    metadata
                        .warnings
                        .push(format!("vulnerability scan skipped: {e}"));
                    self.emit(
                        scan_id,
                        ScanEventPayload::StageDegraded {
                            stage: ScanPhase::VulnerabilityScanning.to_string(),
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }

        deadline.abort();

        let status = if interrupted {
            let reason = if cancel.is_cancelled() {
                "scan cancelled".to_string()
            } else {
                format!("scan budget of {}s exhausted", budget.as_secs())
            };
            tracing::warn!(scan_id = %scan_id, reason = %reason, "Scan interrupted, keeping partial results");
            metadata.warnings.push(reason);
            self.phase(scan_id, ScanPhase::Partial);
            ScanStatus::Partial
        } else {
            self.phase(scan_id, ScanPhase::Completed);
            ScanStatus::Completed
        };

        let mut result = ScanResult {
            id: scan_id,
            start_time,
            end_time: Utc::now(),
            status,
            findings,
            metadata,
        };
        result.metadata.findings_by_kind = result.count_by_kind();

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            scan_id = %scan_id,
            target = %spec,
            status = ?result.status,
            hosts = result.metadata.total_hosts,
            findings = result.findings.len(),
            duration_ms,
            "Scan finished"
        );
        self.emit(
            scan_id,
            ScanEventPayload::ScanFinished {
                status: result.status,
                findings: result.findings.len() as u32,
                duration_ms,
            },
        );

        Ok(result)
    }

    /// Fan hosts out to workers and collect their reports. Returns true when
    /// the scan token fired before every host reported.
    async fn audit_hosts(
        &self,
        scan_id: ScanId,
        hosts: &[Host],
        scan_cancel: &CancellationToken,
        findings: &mut Vec<Finding>,
        metadata: &mut ScanMetadata,
    ) -> bool {
        if hosts.is_empty() {
            return false;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_hosts.max(1)));
        let (tx, mut rx) = mpsc::channel::<HostReport>(hosts.len());
        let mut workers = JoinSet::new();

        for host in hosts.iter().cloned() {
            let context = self.context.clone();
            let semaphore = semaphore.clone();
            let cancel = scan_cancel.clone();
            let tx = tx.clone();

            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                let report = context.audit_host(host, &cancel).await;
                let _ = tx.send(report).await;
            });
        }
        drop(tx);

        let mut interrupted = false;
        loop {
            tokio::select! {
                report = rx.recv() => match report {
                    Some(report) => self.merge(scan_id, report, findings, metadata),
                    None => break,
                },
                _ = scan_cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
            }
        }

        if interrupted {
            workers.abort_all();
            // Reports that landed before the deadline still count.
            while let Ok(report) = rx.try_recv() {
                self.merge(scan_id, report, findings, metadata);
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!(scan_id = %scan_id, error = %e, "Host audit task panicked");
                }
            }
        }

        interrupted
    }

    fn merge(
        &self,
        scan_id: ScanId,
        report: HostReport,
        findings: &mut Vec<Finding>,
        metadata: &mut ScanMetadata,
    ) {
        tracing::info!(
            scan_id = %scan_id,
            host = %report.address,
            device_type = %report.device_type,
            findings = report.findings.len(),
            errors = report.errors.len(),
            "Host audited"
        );
        self.emit(
            scan_id,
            ScanEventPayload::HostAudited {
                host: report.address.clone(),
                device_type: report.device_type,
                findings: report.findings.len() as u32,
                errors: report.errors.len() as u32,
            },
        );

        metadata
            .device_types
            .insert(report.address.clone(), report.device_type);
        for (port, grade) in report.tls_grades {
            metadata
                .tls_grades
                .insert(format!("{}:{port}", report.address), grade);
        }
        metadata.warnings.extend(report.errors);
        findings.extend(report.findings);
    }

    fn phase(&self, scan_id: ScanId, phase: ScanPhase) {
        tracing::debug!(scan_id = %scan_id, phase = %phase, "Scan phase changed");
        self.emit(
            scan_id,
            ScanEventPayload::PhaseChanged {
                phase: phase.to_string(),
            },
        );
    }

    fn emit(&self, scan_id: ScanId, payload: ScanEventPayload) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(ScanEvent::new(scan_id, payload));
        }
    }
}

impl HostAuditContext {
    /// Classify, emit port findings, run the config rules, then audit TLS
    /// on every open port listed in `tls_ports`.
    async fn audit_host(&self, host: Host, cancel: &CancellationToken) -> HostReport {
        let services = host.service_names();
        let os = host.os_guess.as_deref().unwrap_or_default();
        let classification = classify(&host.open_ports, &services, os, &host.banners);

        let mut findings: Vec<Finding> = host
            .open_ports
            .iter()
            .map(|port| {
                let service = services
                    .get(port)
                    .filter(|s| !s.is_empty())
                    .map(String::as_str)
                    .unwrap_or("unknown");
                Finding::new(
                    FindingKind::Port,
                    Severity::Info,
                    &host.address,
                    *port,
                    // Service and device type live in the detail; the
                    // description is part of the identity key.
                    format!("Open port {port} discovered"),
                )
                .with_service(service)
                .with_remediation("Review if this service is necessary and secure it properly")
                .with_detail(FindingDetail::Port {
                    device_type: classification.device_type,
                    confidence: classification.confidence,
                    os: host.os_guess.clone(),
                    os_version: host.os_version_guess.clone(),
                    banner: host.banners.get(port).cloned(),
                })
            })
            .collect();

        findings.extend(self.auditor.audit_host(&host, &self.config.credentials));

        let mut tls_grades = Vec::new();
        let mut errors = Vec::new();
        let tls_ports = host
            .open_ports
            .iter()
            .copied()
            .filter(|port| self.config.tls_ports.contains(port));

        for port in tls_ports {
            let audit = tokio::select! {
                audit = self.tls.audit_tls(&host.address, port) => audit,
                _ = cancel.cancelled() => break,
            };
            match audit {
                Ok(audit) => {
                    tls_grades.push((port, audit.grade));
                    findings.extend(findings_from_audit(&audit));
                }
                Err(e) => {
                    tracing::warn!(host = %host.address, port, error = %e, "TLS audit failed");
                    errors.push(e.to_string());
                }
            }
        }

        HostReport {
            address: host.address,
            device_type: classification.device_type,
            findings,
            tls_grades,
            errors,
        }
    }
}
