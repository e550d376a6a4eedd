//! Configuration auditing as a table of independent rules.
//!
//! Each [`AuditRule`] inspects a host's observed surface and returns zero or
//! more `config` findings. Rules never see each other's output, so one port
//! can collect findings from several rules. Descriptions depend only on the
//! inputs, which keeps identity keys stable from one scan to the next.

use std::collections::BTreeMap;

use perimeter_core::types::{ConfigDetail, Finding, FindingDetail, FindingKind, Host, Severity};

/// What a rule may look at for one host.
#[derive(Debug, Clone, Copy)]
pub struct HostSurface<'a> {
    pub host: &'a str,
    pub ports: &'a [u16],
    pub services: &'a BTreeMap<u16, String>,
    pub banners: &'a BTreeMap<u16, String>,
    pub os_guess: Option<&'a str>,
    /// Credentials supplied by the operator; never guessed.
    pub credentials: &'a BTreeMap<String, String>,
}

impl HostSurface<'_> {
    /// Service name observed on `port`, or `fallback` when discovery had none.
    fn service_or(&self, port: u16, fallback: &str) -> String {
        self.services
            .get(&port)
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }

    fn config_finding(&self, severity: Severity, port: u16, description: String) -> Finding {
        Finding::new(FindingKind::Config, severity, self.host, port, description)
    }
}

pub trait AuditRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn evaluate(&self, surface: &HostSurface<'_>) -> Vec<Finding>;
}

/// Runs every registered rule against a host.
pub struct ConfigAuditor {
    rules: Vec<Box<dyn AuditRule>>,
}

impl ConfigAuditor {
    /// An auditor with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn register(&mut self, rule: Box<dyn AuditRule>) -> &mut Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn audit(
        &self,
        host: &str,
        ports: &[u16],
        services: &BTreeMap<u16, String>,
        banners: &BTreeMap<u16, String>,
        credentials: &BTreeMap<String, String>,
    ) -> Vec<Finding> {
        self.evaluate(&HostSurface {
            host,
            ports,
            services,
            banners,
            os_guess: None,
            credentials,
        })
    }

    /// Audit a discovered host, including OS-based rules.
    pub fn audit_host(&self, host: &Host, credentials: &BTreeMap<String, String>) -> Vec<Finding> {
        let services = host.service_names();
        self.evaluate(&HostSurface {
            host: &host.address,
            ports: &host.open_ports,
            services: &services,
            banners: &host.banners,
            os_guess: host.os_guess.as_deref(),
            credentials,
        })
    }

    pub fn evaluate(&self, surface: &HostSurface<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for rule in &self.rules {
            let produced = rule.evaluate(surface);
            if !produced.is_empty() {
                tracing::debug!(host = surface.host, rule = rule.id(), findings = produced.len(), "Audit rule matched");
            }
            findings.extend(produced);
        }
        findings
    }
}

impl Default for ConfigAuditor {
    fn default() -> Self {
        let mut auditor = Self::empty();
        auditor
            .register(Box::new(DefaultCredentials))
            .register(Box::new(InsecureProtocols))
            .register(Box::new(ManagementInterfaces))
            .register(Box::new(UnnecessaryPorts))
            .register(Box::new(WeakEncryption))
            .register(Box::new(EndOfLifeOs));
        auditor
    }
}

// ── Built-in rules ────────────────────────────────────────────────

/// Known factory passwords per username.
const DEFAULT_CREDENTIALS: &[(&str, &[&str])] = &[
    ("admin", &["admin", "password", "1234", "default"]),
    ("root", &["root", "toor", "password"]),
    ("cisco", &["cisco"]),
    ("user", &["user"]),
    ("guest", &["guest"]),
    ("service", &["service"]),
    ("support", &["support"]),
    ("test", &["test"]),
];

pub struct DefaultCredentials;

impl AuditRule for DefaultCredentials {
    fn id(&self) -> &'static str {
        "default-credentials"
    }

    fn evaluate(&self, surface: &HostSurface<'_>) -> Vec<Finding> {
        DEFAULT_CREDENTIALS
            .iter()
            .filter_map(|(username, defaults)| {
                let supplied = surface.credentials.get(*username)?;
                let password = defaults.iter().find(|d| **d == supplied.as_str())?;
                Some(
                    surface
                        .config_finding(
                            Severity::High,
                            0,
                            format!("Default credentials detected: {username}/{password}"),
                        )
                        .with_service("authentication")
                        .with_remediation(
                            "Change default credentials immediately. Use strong, unique passwords.",
                        )
                        .with_detail(FindingDetail::Config(ConfigDetail::DefaultCredentials {
                            username: username.to_string(),
                        })),
                )
            })
            .collect()
    }
}

/// Protocols that carry data in cleartext by default.
const INSECURE_PROTOCOLS: &[(u16, &str)] = &[
    (23, "telnet"),
    (21, "ftp"),
    (161, "snmp-v1"),
    (162, "snmp-v2"),
    (1433, "mssql"),
    (3306, "mysql"),
];

pub struct InsecureProtocols;

impl AuditRule for InsecureProtocols {
    fn id(&self) -> &'static str {
        "insecure-protocol"
    }

    fn evaluate(&self, surface: &HostSurface<'_>) -> Vec<Finding> {
        surface
            .ports
            .iter()
            .filter_map(|port| {
                let (port, protocol) = INSECURE_PROTOCOLS.iter().find(|(p, _)| p == port)?;
                let severity = if *port == 23 {
                    Severity::High
                } else {
                    Severity::Medium
                };
                Some(
                    surface
                        .config_finding(
                            severity,
                            *port,
                            format!(
                                "Insecure protocol detected: {protocol} on port {port}. Data transmitted may be unencrypted."
                            ),
                        )
                        .with_service(surface.service_or(*port, protocol))
                        .with_remediation(format!(
                            "Disable {protocol} or use encrypted alternatives (SSH instead of Telnet, SFTP/FTPS instead of FTP, SNMPv3 instead of SNMPv1/v2)."
                        ))
                        .with_detail(FindingDetail::Config(ConfigDetail::InsecureProtocol {
                            protocol: protocol.to_string(),
                        })),
                )
            })
            .collect()
    }
}

/// Ports that expose device or host management.
const MANAGEMENT_INTERFACES: &[(u16, &str)] = &[
    (22, "SSH"),
    (23, "Telnet"),
    (80, "HTTP"),
    (443, "HTTPS"),
    (161, "SNMP"),
    (3389, "RDP"),
    (5985, "WinRM"),
    (5986, "WinRM-HTTPS"),
];

/// Flags web management for an authentication check and Telnet outright.
/// The remaining management ports are recognised but produce no finding,
/// since nothing about their authentication can be told from a port scan.
pub struct ManagementInterfaces;

impl AuditRule for ManagementInterfaces {
    fn id(&self) -> &'static str {
        "management-interface"
    }

    fn evaluate(&self, surface: &HostSurface<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for port in surface.ports {
            let Some((port, interface)) = MANAGEMENT_INTERFACES.iter().find(|(p, _)| p == port)
            else {
                continue;
            };
            let service = surface.service_or(*port, interface);

            match *port {
                80 | 443 => findings.push(
                    surface
                        .config_finding(
                            Severity::Medium,
                            *port,
                            format!(
                                "Management interface ({interface}) accessible on port {port}. Verify authentication is required."
                            ),
                        )
                        .with_service(service)
                        .with_remediation(
                            "Ensure all management interfaces require strong authentication. Use multi-factor authentication when possible.",
                        )
                        .with_detail(FindingDetail::Config(ConfigDetail::ManagementInterface {
                            interface: interface.to_string(),
                            encrypted: None,
                        })),
                ),
                23 => findings.push(
                    surface
                        .config_finding(
                            Severity::High,
                            *port,
                            format!("Unencrypted management interface (Telnet) detected on port {port}."),
                        )
                        .with_service(service)
                        .with_remediation("Disable Telnet and use SSH instead for secure remote management.")
                        .with_detail(FindingDetail::Config(ConfigDetail::ManagementInterface {
                            interface: interface.to_string(),
                            encrypted: Some(false),
                        })),
                ),
                _ => {}
            }
        }
        findings
    }
}

/// Services commonly exposed beyond where they are needed.
const UNNECESSARY_PORTS: &[(u16, &str)] = &[
    (135, "RPC Endpoint Mapper"),
    (139, "NetBIOS Session Service"),
    (445, "SMB (if not needed)"),
    (1433, "MSSQL (if not needed)"),
    (3306, "MySQL (if not needed)"),
    (5432, "PostgreSQL (if not needed)"),
    (6379, "Redis (if not needed)"),
    (27017, "MongoDB (if not needed)"),
];

pub struct UnnecessaryPorts;

impl AuditRule for UnnecessaryPorts {
    fn id(&self) -> &'static str {
        "unnecessary-port"
    }

    fn evaluate(&self, surface: &HostSurface<'_>) -> Vec<Finding> {
        surface
            .ports
            .iter()
            .filter_map(|port| {
                let (port, reason) = UNNECESSARY_PORTS.iter().find(|(p, _)| p == port)?;
                Some(
                    surface
                        .config_finding(
                            Severity::Low,
                            *port,
                            format!(
                                "Potentially unnecessary port {port} ({reason}) is open. Verify if this service is required."
                            ),
                        )
                        .with_service(surface.service_or(*port, reason))
                        .with_remediation(format!(
                            "Review if port {port} is necessary. If not, disable the service or restrict access using firewall rules."
                        ))
                        .with_detail(FindingDetail::Config(ConfigDetail::UnnecessaryPort {
                            reason: reason.to_string(),
                        })),
                )
            })
            .collect()
    }
}

const HTTPS_PORTS: &[u16] = &[443, 8443, 9443];

/// Marks HTTPS listeners for TLS review. The verdict itself comes from the
/// TLS audit; this rule never claims a weakness.
pub struct WeakEncryption;

impl AuditRule for WeakEncryption {
    fn id(&self) -> &'static str {
        "weak-encryption"
    }

    fn evaluate(&self, surface: &HostSurface<'_>) -> Vec<Finding> {
        surface
            .ports
            .iter()
            .filter(|port| HTTPS_PORTS.contains(port))
            .map(|port| {
                surface
                    .config_finding(
                        Severity::Medium,
                        *port,
                        format!(
                            "HTTPS service detected on port {port}. Verify SSL/TLS configuration uses strong ciphers and TLS 1.2+."
                        ),
                    )
                    .with_service(surface.service_or(*port, "HTTPS"))
                    .with_remediation(
                        "Ensure TLS 1.2 or higher is used. Disable weak cipher suites. Use strong certificate key sizes (2048+ bits).",
                    )
                    .with_detail(FindingDetail::Config(ConfigDetail::WeakEncryption {
                        verification_needed: true,
                    }))
            })
            .collect()
    }
}

const END_OF_LIFE_OS: &[&str] = &["windows xp", "windows 7", "windows server 2003"];

pub struct EndOfLifeOs;

impl AuditRule for EndOfLifeOs {
    fn id(&self) -> &'static str {
        "end-of-life-os"
    }

    fn evaluate(&self, surface: &HostSurface<'_>) -> Vec<Finding> {
        let Some(os) = surface.os_guess.filter(|os| !os.is_empty()) else {
            return Vec::new();
        };
        let lower = os.to_lowercase();
        if !END_OF_LIFE_OS.iter().any(|eol| lower.contains(eol)) {
            return Vec::new();
        }
        vec![surface
            .config_finding(
                Severity::Critical,
                0,
                format!("Unsupported or end-of-life operating system detected: {os}"),
            )
            .with_service("operating_system")
            .with_remediation(
                "Upgrade to a supported operating system version that receives security updates.",
            )
            .with_detail(FindingDetail::Config(ConfigDetail::EndOfLifeOs {
                os: os.to_string(),
            }))]
    }
}
