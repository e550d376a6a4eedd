//! Scan results written to disk and diffed back, the way `perimeter diff`
//! consumes them.

mod common;

use std::io::Write;

use tokio_util::sync::CancellationToken;

use perimeter_core::change::ChangeType;
use perimeter_core::types::{FindingKind, ScanResult, ScanStatus, Severity};
use perimeter_scan::diff;
use perimeter_scan::scheduler::run_single_scan;
use perimeter_scan::ScanError;

use common::{orchestrator, FakeExecutor, Reply, NMAP_XML, NMAP_XML_NO_OS, NUCLEI_JSON};

fn write_scan(result: &ScanResult) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(serde_json::to_string_pretty(result).unwrap().as_bytes())
        .unwrap();
    file
}

async fn scan(nuclei: Reply) -> ScanResult {
    let executor = FakeExecutor::new(&[("nmap", Reply::Output(NMAP_XML, 0)), ("nuclei", nuclei)]);
    orchestrator(executor)
        .run("10.0.1.0/24", &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn saved_scan_reads_back_unchanged() {
    let result = scan(Reply::Output(NUCLEI_JSON, 0)).await;
    let file = write_scan(&result);

    let loaded = diff::read_scan(file.path()).unwrap();
    assert_eq!(loaded.id, result.id);
    assert_eq!(loaded.status, result.status);
    assert_eq!(loaded.findings.len(), result.findings.len());
    assert_eq!(loaded.metadata.tls_grades, result.metadata.tls_grades);
    assert!(diff::detect(&loaded, &result).changes.is_empty());
}

#[tokio::test]
async fn fixed_vulnerability_between_saved_scans() {
    let before = scan(Reply::Output(NUCLEI_JSON, 0)).await;
    let after = scan(Reply::Output("", 0)).await;
    let previous = write_scan(&before);
    let current = write_scan(&after);

    let report = diff::detect(
        &diff::read_scan(current.path()).unwrap(),
        &diff::read_scan(previous.path()).unwrap(),
    );

    assert_eq!(report.scan_id, after.id);
    assert_eq!(report.previous_scan_id, before.id);
    assert_eq!(report.changes.len(), 1);
    let change = &report.changes[0];
    assert_eq!(change.change_type, ChangeType::Fixed(FindingKind::Vuln));
    assert_eq!(change.severity, Severity::Info);
    assert_eq!(change.risk_impact, -Severity::High.risk_weight());
    assert!(!report.should_alert());
    assert!(report.summary().contains("1 fixed vulnerabilities"));
}

#[tokio::test]
async fn lost_os_detection_does_not_churn_ports() {
    let before = scan(Reply::Output("", 0)).await;
    let executor = FakeExecutor::new(&[
        ("nmap", Reply::Output(NMAP_XML_NO_OS, 0)),
        ("nuclei", Reply::Output("", 0)),
    ]);
    let after = orchestrator(executor)
        .run("10.0.1.0/24", &CancellationToken::new())
        .await
        .unwrap();
    let previous = write_scan(&before);
    let current = write_scan(&after);

    let report = diff::detect(
        &diff::read_scan(current.path()).unwrap(),
        &diff::read_scan(previous.path()).unwrap(),
    );

    assert_eq!(report.count(ChangeType::New(FindingKind::Port)), 0);
    assert_eq!(report.count(ChangeType::Fixed(FindingKind::Port)), 0);
    assert!(report.changes.is_empty());
    assert!(!report.should_alert());
}

#[tokio::test]
async fn new_vulnerability_alerts_on_rescan() {
    let baseline = scan(Reply::Output("", 0)).await;
    let executor = FakeExecutor::new(&[
        ("nmap", Reply::Output(NMAP_XML, 0)),
        ("nuclei", Reply::Output(NUCLEI_JSON, 0)),
    ]);

    let (result, report) = run_single_scan(
        &orchestrator(executor),
        "10.0.1.0/24",
        Some(&baseline),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.status, ScanStatus::Completed);
    let report = report.unwrap();
    assert_eq!(report.count(ChangeType::New(FindingKind::Vuln)), 1);
    assert!(report.should_alert());
}

#[tokio::test]
async fn partial_rescan_is_not_diffed() {
    let baseline = scan(Reply::Output(NUCLEI_JSON, 0)).await;
    let executor = FakeExecutor::new(&[("nmap", Reply::Output(NMAP_XML, 0))]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (result, report) = run_single_scan(&orchestrator(executor), "10.0.1.0/24", Some(&baseline), &cancel)
        .await
        .unwrap();

    assert_eq!(result.status, ScanStatus::Partial);
    assert!(report.is_none());
}

#[test]
fn unreadable_scan_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{\"id\": 42}").unwrap();

    assert!(matches!(diff::read_scan(file.path()), Err(ScanError::Json(_))));

    let missing = file.path().with_extension("missing");
    assert!(matches!(diff::read_scan(&missing), Err(ScanError::Io(_))));
}
