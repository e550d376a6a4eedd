//! Configuration for the perimeter scanner.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

/// Top-level scan configuration.
///
/// Loaded from `perimeter.toml` `[scan]` section or
/// `PERIMETER_SCAN__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Path to the nmap binary (default: "nmap").
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// Path to the naabu binary used when nmap fails (default: "naabu").
    #[serde(default = "default_naabu_path")]
    pub naabu_path: String,

    /// Path to the nuclei binary (default: "nuclei").
    #[serde(default = "default_nuclei_path")]
    pub nuclei_path: String,

    /// Overall budget for one scan, in seconds.
    #[serde(default = "default_scan_budget")]
    pub scan_budget_secs: u64,

    /// Per-host TLS handshake timeout, in seconds.
    #[serde(default = "default_tls_timeout")]
    pub tls_timeout_secs: u64,

    /// Maximum hosts audited concurrently.
    #[serde(default = "default_max_concurrent_hosts")]
    pub max_concurrent_hosts: usize,

    /// Maximum scans the scheduler runs at once.
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,

    /// Nmap timing template.
    #[serde(default)]
    pub nmap_timing: NmapTiming,

    /// Nmap script selection.
    #[serde(default = "default_nmap_scripts")]
    pub nmap_scripts: String,

    /// Treat every target as up (`-Pn`).
    #[serde(default = "default_true")]
    pub skip_host_discovery: bool,

    /// Nuclei requests per second.
    #[serde(default = "default_nuclei_rate_limit")]
    pub nuclei_rate_limit: u32,

    /// Nuclei per-request timeout, in seconds.
    #[serde(default = "default_nuclei_timeout")]
    pub nuclei_timeout_secs: u32,

    /// Open ports that get a live TLS audit.
    #[serde(default = "default_tls_ports")]
    pub tls_ports: Vec<u16>,

    /// Credentials in use on the scanned segment, checked against known
    /// defaults. Empty means the default-credential rule never fires.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,

    /// Targets scanned periodically in watch mode.
    #[serde(default)]
    pub targets: Vec<TargetSchedule>,
}

/// A target with its scan schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSchedule {
    /// IP, CIDR, or hostname.
    pub target: String,

    /// Human-readable name for this target.
    pub name: Option<String>,

    /// Scan interval in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Whether this target is enabled for scanning.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Nmap timing templates.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NmapTiming {
    /// `-T3`
    Normal,
    /// `-T4`
    #[default]
    Aggressive,
    /// `-T5`
    Insane,
}

impl NmapTiming {
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Normal => "-T3",
            Self::Aggressive => "-T4",
            Self::Insane => "-T5",
        }
    }
}

impl ScanConfig {
    pub fn scan_budget(&self) -> Duration {
        Duration::from_secs(self.scan_budget_secs)
    }

    pub fn tls_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_timeout_secs)
    }
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_naabu_path() -> String {
    "naabu".to_string()
}

fn default_nuclei_path() -> String {
    "nuclei".to_string()
}

fn default_scan_budget() -> u64 {
    300
}

fn default_tls_timeout() -> u64 {
    4
}

fn default_max_concurrent_hosts() -> usize {
    16
}

fn default_max_concurrent_scans() -> usize {
    2
}

fn default_nmap_scripts() -> String {
    "default,safe".to_string()
}

fn default_nuclei_rate_limit() -> u32 {
    150
}

fn default_nuclei_timeout() -> u32 {
    10
}

fn default_tls_ports() -> Vec<u16> {
    vec![443, 8443, 9443, 993, 995, 465, 636]
}

fn default_interval() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            nmap_path: default_nmap_path(),
            naabu_path: default_naabu_path(),
            nuclei_path: default_nuclei_path(),
            scan_budget_secs: default_scan_budget(),
            tls_timeout_secs: default_tls_timeout(),
            max_concurrent_hosts: default_max_concurrent_hosts(),
            max_concurrent_scans: default_max_concurrent_scans(),
            nmap_timing: NmapTiming::default(),
            nmap_scripts: default_nmap_scripts(),
            skip_host_discovery: true,
            nuclei_rate_limit: default_nuclei_rate_limit(),
            nuclei_timeout_secs: default_nuclei_timeout(),
            tls_ports: default_tls_ports(),
            credentials: BTreeMap::new(),
            targets: Vec::new(),
        }
    }
}
