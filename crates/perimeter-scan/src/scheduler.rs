//! Periodic re-scanning for watch mode.
//!
//! Spawns one tokio task per enabled target. Each task scans at its own
//! interval, diffs the result against the last completed scan of the same
//! target, and raises an alert when the diff warrants one. A semaphore
//! limits how many scans run at once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use perimeter_core::change::ChangeDetection;
use perimeter_core::events::{ScanEvent, ScanEventPayload};
use perimeter_core::types::{ScanResult, ScanStatus};

use crate::config::TargetSchedule;
use crate::diff;
use crate::error::Result;
use crate::orchestrator::ScanOrchestrator;

pub struct ScanScheduler {
    orchestrator: Arc<ScanOrchestrator>,
    targets: Vec<TargetSchedule>,
    concurrency: Arc<Semaphore>,
    alerts: Option<mpsc::UnboundedSender<ScanEvent>>,
}

impl ScanScheduler {
    /// Schedule the targets listed in the orchestrator's configuration.
    pub fn new(orchestrator: ScanOrchestrator) -> Self {
        let targets = orchestrator.config().targets.clone();
        let concurrency = Arc::new(Semaphore::new(
            orchestrator.config().max_concurrent_scans.max(1),
        ));
        Self {
            orchestrator: Arc::new(orchestrator),
            targets,
            concurrency,
            alerts: None,
        }
    }

    /// Publish `ChangeAlert` events to `tx`.
    pub fn with_alerts(mut self, tx: mpsc::UnboundedSender<ScanEvent>) -> Self {
        self.alerts = Some(tx);
        self
    }

    /// Run until `cancel` fires or every target loop has ended.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut handles = Vec::new();

        for schedule in &self.targets {
            if !schedule.enabled {
                tracing::info!(target = %schedule.target, "Target disabled, skipping");
                continue;
            }

            let orchestrator = self.orchestrator.clone();
            let schedule = schedule.clone();
            let semaphore = self.concurrency.clone();
            let alerts = self.alerts.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                run_target_loop(orchestrator, schedule, semaphore, alerts, cancel).await;
            }));
        }

        tracing::info!(target_count = handles.len(), "Scheduler started");

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Target scan task panicked");
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

async fn run_target_loop(
    orchestrator: Arc<ScanOrchestrator>,
    schedule: TargetSchedule,
    semaphore: Arc<Semaphore>,
    alerts: Option<mpsc::UnboundedSender<ScanEvent>>,
    cancel: CancellationToken,
) {
    let name = schedule.name.as_deref().unwrap_or(&schedule.target);
    let mut ticker = interval(Duration::from_secs(schedule.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut baseline: Option<ScanResult> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }

        tracing::info!(target = %schedule.target, name, "Scheduled scan triggered");

        let _permit = tokio::select! {
            permit = semaphore.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = cancel.cancelled() => break,
        };

        match run_single_scan(&orchestrator, &schedule.target, baseline.as_ref(), &cancel).await {
            Ok((result, report)) => {
                if let Some(report) = report {
                    handle_report(&report, name, alerts.as_ref());
                }
                if result.status == ScanStatus::Completed {
                    baseline = Some(result);
                }
            }
            Err(e) => {
                tracing::error!(target = %schedule.target, name, error = %e, "Scheduled scan failed");
            }
        }
    }
}

/// Scan `target` once and diff it against `previous`, if any.
///
/// Partial scans are not diffed: findings missing from an interrupted scan
/// would read as fixed.
pub async fn run_single_scan(
    orchestrator: &ScanOrchestrator,
    target: &str,
    previous: Option<&ScanResult>,
    cancel: &CancellationToken,
) -> Result<(ScanResult, Option<ChangeDetection>)> {
    let result = orchestrator.run(target, cancel).await?;

    let report = match previous {
        Some(previous) if result.status == ScanStatus::Completed => {
            Some(diff::detect(&result, previous))
        }
        Some(_) => {
            tracing::warn!(scan_id = %result.id, target, "Skipping diff of partial scan");
            None
        }
        None => None,
    };

    Ok((result, report))
}

fn handle_report(
    report: &ChangeDetection,
    name: &str,
    alerts: Option<&mpsc::UnboundedSender<ScanEvent>>,
) {
    if !report.should_alert() {
        tracing::info!(
            scan_id = %report.scan_id,
            name,
            changes = report.changes.len(),
            risk_delta = report.risk_delta,
            "Attack surface diff"
        );
        return;
    }

    tracing::warn!(
        scan_id = %report.scan_id,
        previous_scan_id = %report.previous_scan_id,
        name,
        changes = report.changes.len(),
        risk_delta = report.risk_delta,
        summary = %report.summary(),
        "Attack surface alert"
    );

    if let Some(tx) = alerts {
        let _ = tx.send(ScanEvent::new(
            report.scan_id,
            ScanEventPayload::ChangeAlert {
                previous_scan_id: report.previous_scan_id,
                changes: report.changes.len() as u32,
                risk_delta: report.risk_delta,
            },
        ));
    }
}
