//! End-to-end scans against canned tool output.

mod common;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use perimeter_core::events::ScanEventPayload;
use perimeter_core::types::{FindingDetail, FindingKind, ScanStatus, Severity, TlsGrade};
use perimeter_scan::config::ScanConfig;
use perimeter_scan::ScanError;

use common::{orchestrator, orchestrator_with, FakeExecutor, Reply, NAABU_JSON, NMAP_XML, NUCLEI_JSON};

#[tokio::test]
async fn full_scan_collects_every_finding_kind() {
    let executor = FakeExecutor::new(&[
        ("nmap", Reply::Output(NMAP_XML, 0)),
        ("nuclei", Reply::Output(NUCLEI_JSON, 0)),
    ]);
    let result = orchestrator(executor.clone())
        .run("10.0.1.0/24", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, ScanStatus::Completed);
    assert_eq!(executor.programs(), ["nmap", "nuclei"]);
    assert!(result.start_time <= result.end_time);

    let meta = &result.metadata;
    assert_eq!(meta.target, "10.0.1.0/24");
    assert_eq!(meta.discovery_method.as_deref(), Some("nmap"));
    assert_eq!(meta.total_hosts, 1);
    assert!(meta.device_types.contains_key("10.0.1.5"));
    assert_eq!(meta.tls_grades.get("10.0.1.5:443"), Some(&TlsGrade::A));
    assert_eq!(meta.tls_grades.get("10.0.1.5:8443"), Some(&TlsGrade::F));

    // Filtered 3389 is not an open port.
    let ports: Vec<u16> = result
        .findings
        .iter()
        .filter(|f| f.kind == FindingKind::Port)
        .map(|f| f.port)
        .collect();
    assert_eq!(ports, [22, 23, 443, 8443]);

    let ssh = result
        .findings
        .iter()
        .find(|f| f.kind == FindingKind::Port && f.port == 22)
        .unwrap();
    assert_eq!(ssh.severity, Severity::Info);
    assert_eq!(ssh.description, "Open port 22 discovered");
    assert_eq!(ssh.service_name, "ssh");
    match &ssh.detail {
        FindingDetail::Port { os, banner, .. } => {
            assert_eq!(os.as_deref(), Some("Linux 5.15"));
            assert_eq!(banner.as_deref(), Some("OpenSSH 9.6"));
        }
        other => panic!("unexpected detail: {other:?}"),
    }

    let telnet: Vec<_> = result
        .findings
        .iter()
        .filter(|f| f.kind == FindingKind::Config && f.port == 23)
        .collect();
    assert_eq!(telnet.len(), 2);
    assert!(telnet.iter().all(|f| f.severity == Severity::High));

    let tls: Vec<_> = result
        .findings
        .iter()
        .filter(|f| f.kind == FindingKind::Tls)
        .collect();
    assert_eq!(tls.len(), 1);
    assert_eq!(tls[0].port, 8443);
    assert_eq!(tls[0].severity, Severity::Critical);

    let vuln = result
        .findings
        .iter()
        .find(|f| f.kind == FindingKind::Vuln)
        .unwrap();
    assert_eq!(vuln.host, "10.0.1.5");
    assert_eq!(vuln.port, 443);
    assert_eq!(vuln.severity, Severity::High);

    assert_eq!(meta.findings_by_kind.get(&FindingKind::Port), Some(&4));
    assert_eq!(meta.findings_by_kind.get(&FindingKind::Tls), Some(&1));
    assert_eq!(meta.findings_by_kind.get(&FindingKind::Vuln), Some(&1));
    let total: usize = meta.findings_by_kind.values().sum();
    assert_eq!(total, result.findings.len());
}

#[tokio::test]
async fn missing_nmap_falls_back_to_naabu() {
    let executor = FakeExecutor::new(&[
        ("nmap", Reply::Missing),
        ("naabu", Reply::Output(NAABU_JSON, 0)),
        ("nuclei", Reply::Output("", 0)),
    ]);
    let result = orchestrator(executor.clone())
        .run("10.0.1.0/24", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, ScanStatus::Completed);
    assert_eq!(executor.programs(), ["nmap", "naabu", "nuclei"]);
    assert_eq!(result.metadata.discovery_method.as_deref(), Some("naabu"));
    assert!(result
        .metadata
        .warnings
        .iter()
        .any(|w| w.contains("hosts carry ports only")));

    let ports: Vec<u16> = result
        .findings
        .iter()
        .filter(|f| f.kind == FindingKind::Port)
        .map(|f| f.port)
        .collect();
    assert_eq!(ports, [80, 443]);
    assert!(result
        .findings
        .iter()
        .filter(|f| f.kind == FindingKind::Port)
        .all(|f| f.service_name == "unknown"));
    assert_eq!(result.metadata.tls_grades.get("10.0.1.7:443"), Some(&TlsGrade::A));
}

#[tokio::test]
async fn missing_nuclei_degrades_without_failing() {
    let executor = FakeExecutor::new(&[("nmap", Reply::Output(NMAP_XML, 0))]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = orchestrator(executor)
        .with_events(tx)
        .run("10.0.1.0/24", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, ScanStatus::Completed);
    assert!(result.findings.iter().all(|f| f.kind != FindingKind::Vuln));
    assert!(result
        .metadata
        .warnings
        .iter()
        .any(|w| w.starts_with("vulnerability scan skipped:")));

    let mut degraded = false;
    while let Ok(event) = rx.try_recv() {
        if let ScanEventPayload::StageDegraded { stage, .. } = event.payload {
            assert_eq!(stage, "vulnerability_scanning");
            degraded = true;
        }
    }
    assert!(degraded);
}

#[tokio::test]
async fn both_discovery_tools_missing_fails_the_scan() {
    let executor = FakeExecutor::new(&[]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let err = orchestrator(executor.clone())
        .with_events(tx)
        .run("10.0.1.0/24", &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ScanError::DiscoveryExhausted { target, reason } => {
            assert_eq!(target, "10.0.1.0/24");
            assert!(reason.contains("nmap"));
            assert!(reason.contains("naabu"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(executor.programs(), ["nmap", "naabu"]);

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event.payload);
    }
    assert!(matches!(
        last,
        Some(ScanEventPayload::ScanFinished {
            status: ScanStatus::Failed,
            ..
        })
    ));
}

#[tokio::test]
async fn invalid_target_runs_nothing() {
    let executor = FakeExecutor::new(&[("nmap", Reply::Output(NMAP_XML, 0))]);
    let err = orchestrator(executor.clone())
        .run("not a target!", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::InvalidTarget(_)));
    assert!(executor.programs().is_empty());
}

#[tokio::test]
async fn cancelled_scan_is_partial() {
    let executor = FakeExecutor::new(&[("nmap", Reply::Output(NMAP_XML, 0))]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator(executor.clone())
        .run("10.0.1.0/24", &cancel)
        .await
        .unwrap();

    assert_eq!(result.status, ScanStatus::Partial);
    assert!(result.findings.is_empty());
    assert!(result.metadata.warnings.iter().any(|w| w == "scan cancelled"));
    assert_eq!(executor.programs(), ["nmap"]);
}

#[tokio::test]
async fn exhausted_budget_keeps_host_findings() {
    let executor = FakeExecutor::new(&[
        ("nmap", Reply::Output(NMAP_XML, 0)),
        ("nuclei", Reply::Hang),
    ]);
    let config = ScanConfig {
        scan_budget_secs: 1,
        ..Default::default()
    };

    let result = orchestrator_with(config, executor)
        .run("10.0.1.0/24", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, ScanStatus::Partial);
    assert_eq!(
        result.metadata.findings_by_kind.get(&FindingKind::Port),
        Some(&4)
    );
    assert!(result
        .metadata
        .warnings
        .iter()
        .any(|w| w == "scan budget of 1s exhausted"));
}

#[tokio::test]
async fn lifecycle_events_bracket_the_scan() {
    let executor = FakeExecutor::new(&[
        ("nmap", Reply::Output(NMAP_XML, 0)),
        ("nuclei", Reply::Output(NUCLEI_JSON, 0)),
    ]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = orchestrator(executor)
        .with_events(tx)
        .run("10.0.1.0/24", &CancellationToken::new())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.scan_id, result.id);
        events.push(event.payload);
    }

    assert!(matches!(
        events.first(),
        Some(ScanEventPayload::ScanStarted { target }) if target == "10.0.1.0/24"
    ));
    assert!(matches!(
        events.last(),
        Some(ScanEventPayload::ScanFinished {
            status: ScanStatus::Completed,
            ..
        })
    ));

    let phases: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ScanEventPayload::PhaseChanged { phase } => Some(phase.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        [
            "initialized",
            "discovering",
            "per_host_auditing",
            "vulnerability_scanning",
            "completed"
        ]
    );

    let audited = events
        .iter()
        .filter(|e| matches!(e, ScanEventPayload::HostAudited { host, .. } if host == "10.0.1.5"))
        .count();
    assert_eq!(audited, 1);
}
