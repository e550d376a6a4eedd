//! Host discovery: nmap with OS and service detection, falling back to a
//! port-only naabu sweep when nmap is missing, fails, or finds nothing.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use perimeter_core::types::Host;

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::executor::CommandExecutor;
use crate::naabu;
use crate::nmap_xml;
use crate::target::TargetSpec;

/// nmap's share of the discovery budget; naabu gets whatever is left.
const NMAP_BUDGET_NUMERATOR: u32 = 2;
const NMAP_BUDGET_DENOMINATOR: u32 = 3;

/// Which tool produced the host list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMethod {
    Nmap,
    Naabu,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nmap => "nmap",
            Self::Naabu => "naabu",
        }
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub hosts: Vec<Host>,
    pub method: DiscoveryMethod,
    /// Degradations worth surfacing in scan metadata.
    pub warnings: Vec<String>,
}

pub struct Discovery {
    executor: Arc<dyn CommandExecutor>,
    config: ScanConfig,
}

impl Discovery {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: ScanConfig) -> Self {
        Self { executor, config }
    }

    /// Discover hosts for `target` within `budget`. nmap gets two thirds of
    /// it so a slow or hung nmap still leaves naabu time to run; a nmap
    /// timeout is a fallback trigger like any other tool failure.
    ///
    /// Fails with `DiscoveryExhausted` only when neither tool yields an
    /// in-scope host, and with `Cancelled` as soon as `cancel` fires.
    pub async fn discover(
        &self,
        target: &TargetSpec,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome> {
        let start = Instant::now();
        let mut warnings = Vec::new();

        let nmap_budget = budget * NMAP_BUDGET_NUMERATOR / NMAP_BUDGET_DENOMINATOR;
        let primary_reason = match self.run_nmap(target, nmap_budget, cancel).await {
            Ok(hosts) => match retain_in_scope(target, hosts, &mut warnings) {
                hosts if !hosts.is_empty() => {
                    tracing::info!(
                        target = %target,
                        hosts = hosts.len(),
                        duration_ms = start.elapsed().as_millis(),
                        "Discovery complete via nmap"
                    );
                    return Ok(DiscoveryOutcome {
                        hosts,
                        method: DiscoveryMethod::Nmap,
                        warnings,
                    });
                }
                _ => "nmap found no hosts in scope".to_string(),
            },
            Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
            Err(e) => e.to_string(),
        };

        tracing::warn!(target = %target, reason = %primary_reason, "Nmap discovery failed, falling back to naabu");

        let naabu_budget = budget.saturating_sub(start.elapsed());
        let fallback_reason = match self.run_naabu(target, naabu_budget, cancel).await {
            Ok((hosts, skipped)) => {
                if skipped > 0 {
                    warnings.push(format!("naabu: skipped {skipped} malformed output lines"));
                }
                let hosts = retain_in_scope(target, hosts, &mut warnings);
                if hosts.is_empty() {
                    "naabu found no hosts in scope".to_string()
                } else {
                    warnings.push(format!(
                        "primary discovery failed ({primary_reason}); hosts carry ports only"
                    ));
                    tracing::info!(
                        target = %target,
                        hosts = hosts.len(),
                        duration_ms = start.elapsed().as_millis(),
                        "Discovery complete via naabu"
                    );
                    return Ok(DiscoveryOutcome {
                        hosts,
                        method: DiscoveryMethod::Naabu,
                        warnings,
                    });
                }
            }
            Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
            Err(e) => e.to_string(),
        };

        Err(ScanError::DiscoveryExhausted {
            target: target.to_string(),
            reason: format!("{primary_reason}; {fallback_reason}"),
        })
    }

    pub fn nmap_args(&self, target: &TargetSpec) -> Vec<String> {
        let mut args = vec![
            self.config.nmap_timing.flag().to_string(),
            "-O".to_string(),
            "-sV".to_string(),
            "--script".to_string(),
            self.config.nmap_scripts.clone(),
        ];
        if self.config.skip_host_discovery {
            args.push("-Pn".to_string());
        }
        args.extend(["-oX".to_string(), "-".to_string(), target.to_string()]);
        args
    }

    pub fn naabu_args(&self, target: &TargetSpec) -> Vec<String> {
        vec![
            "-host".to_string(),
            target.to_string(),
            "-json".to_string(),
            "-silent".to_string(),
        ]
    }

    async fn run_nmap(
        &self,
        target: &TargetSpec,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Host>> {
        tracing::info!(target = %target, timing = self.config.nmap_timing.flag(), "Starting nmap discovery");

        let output = self
            .executor
            .run(&self.config.nmap_path, &self.nmap_args(target), cancel, budget)
            .await?;

        if !output.success() {
            return Err(ScanError::ToolFailed {
                tool: "nmap".to_string(),
                code: output.exit_code.unwrap_or(-1),
                stderr: output.stderr_lossy(),
            });
        }

        let run = nmap_xml::parse_nmap_xml(&output.stdout)?;

        let mut hosts = Vec::new();
        for nmap_host in run.hosts.iter().filter(|h| h.is_up()) {
            match nmap_host.to_host() {
                // With -Pn every address in the range reports up; keep only
                // hosts where something was actually observed.
                Some(host) if !host.open_ports.is_empty() || host.os_guess.is_some() => {
                    hosts.push(host)
                }
                Some(_) => {}
                None => tracing::warn!("Skipping nmap host with no usable address"),
            }
        }
        Ok(hosts)
    }

    async fn run_naabu(
        &self,
        target: &TargetSpec,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Host>, usize)> {
        tracing::info!(target = %target, "Starting naabu port sweep");

        let output = self
            .executor
            .run(&self.config.naabu_path, &self.naabu_args(target), cancel, budget)
            .await?;

        if !output.success() && output.stdout.is_empty() {
            return Err(ScanError::ToolFailed {
                tool: "naabu".to_string(),
                code: output.exit_code.unwrap_or(-1),
                stderr: output.stderr_lossy(),
            });
        }

        Ok(naabu::hosts_from_output(&output.stdout))
    }
}

/// Drop hosts whose address lies outside an IP or CIDR target. Tools can
/// report neighbours they touched along the way.
fn retain_in_scope(target: &TargetSpec, hosts: Vec<Host>, warnings: &mut Vec<String>) -> Vec<Host> {
    if matches!(target, TargetSpec::Hostname(_)) {
        return hosts;
    }
    let (kept, dropped): (Vec<Host>, Vec<Host>) = hosts.into_iter().partition(|host| {
        host.address
            .parse::<IpAddr>()
            .map(|addr| target.contains(&addr))
            .unwrap_or(false)
    });
    for host in &dropped {
        tracing::warn!(host = %host.address, target = %target, "Dropping host outside target");
        warnings.push(format!("host {} is outside target {target}", host.address));
    }
    kept
}
