//! TLS posture auditing.
//!
//! A [`TlsProbe`] performs the live handshake and reports what the server
//! presented; [`evaluate`] turns that snapshot into issues and a grade
//! without touching the network. [`RustlsProbe`] and [`LegacyTlsProbe`]
//! accept any certificate chain so expired, self-signed and mismatched
//! certificates can still be inspected; [`FallbackProbe`] chains the two so
//! servers stuck on TLS 1.0 or RC4 are graded instead of dropped.

use std::fmt;
use std::net::{TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ProtocolVersion, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::der_parser::oid::Oid;
use x509_parser::extensions::GeneralName;
use x509_parser::objects::{oid2sn, oid_registry};
use x509_parser::prelude::parse_x509_certificate;
use x509_parser::public_key::PublicKey;

use perimeter_core::types::{
    Certificate, Finding, FindingDetail, FindingKind, Severity, SslAudit, SslIssue, TlsGrade,
};

use crate::error::{Result, ScanError};

const EXPIRY_WARNING_DAYS: i64 = 30;
const MIN_RSA_BITS: u32 = 2048;
// IANA names from rustls, OpenSSL names from the legacy probe.
const WEAK_CIPHER_MARKERS: &[&str] = &[
    "RC4", "3DES", "DES_CBC3", "_DES_", "NULL", "EXPORT", "ANON", "DES-CBC", "EXP-", "ADH-", "AECDH-",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Ssl3,
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// Anything older than TLS 1.2.
    pub fn is_weak(&self) -> bool {
        *self < Self::Tls12
    }

    fn from_rustls(version: ProtocolVersion) -> Option<Self> {
        match version {
            ProtocolVersion::SSLv3 => Some(Self::Ssl3),
            ProtocolVersion::TLSv1_0 => Some(Self::Tls10),
            ProtocolVersion::TLSv1_1 => Some(Self::Tls11),
            ProtocolVersion::TLSv1_2 => Some(Self::Tls12),
            ProtocolVersion::TLSv1_3 => Some(Self::Tls13),
            _ => None,
        }
    }

    /// Map OpenSSL's `SSL_get_version` string.
    fn from_openssl(version: &str) -> Option<Self> {
        match version {
            "SSLv3" => Some(Self::Ssl3),
            "TLSv1" => Some(Self::Tls10),
            "TLSv1.1" => Some(Self::Tls11),
            "TLSv1.2" => Some(Self::Tls12),
            "TLSv1.3" => Some(Self::Tls13),
            _ => None,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ssl3 => "SSL 3.0",
            Self::Tls10 => "TLS 1.0",
            Self::Tls11 => "TLS 1.1",
            Self::Tls12 => "TLS 1.2",
            Self::Tls13 => "TLS 1.3",
        };
        f.write_str(s)
    }
}

/// What one completed handshake revealed.
#[derive(Debug, Clone)]
pub struct HandshakeSnapshot {
    pub protocol: TlsVersion,
    pub cipher_suite: String,
    /// Leaf first, as presented.
    pub chain: Vec<Certificate>,
}

#[async_trait]
pub trait TlsProbe: Send + Sync {
    async fn handshake(&self, host: &str, port: u16, timeout: Duration) -> Result<HandshakeSnapshot>;
}

// ── Evaluation ────────────────────────────────────────────────────

pub fn evaluate(host: &str, port: u16, snapshot: &HandshakeSnapshot, now: DateTime<Utc>) -> SslAudit {
    let mut issues = Vec::new();

    for cert in &snapshot.chain {
        let remaining = cert.not_after - now;
        if remaining < TimeDelta::zero() {
            issues.push(SslIssue {
                severity: Severity::Critical,
                issue_type: "expired-certificate".to_string(),
                description: format!("Certificate for {} has expired.", cert.subject),
                remediation: "Renew the SSL/TLS certificate immediately.".to_string(),
            });
        } else if remaining > TimeDelta::zero() && remaining < TimeDelta::days(EXPIRY_WARNING_DAYS) {
            issues.push(SslIssue {
                severity: Severity::High,
                issue_type: "expiring-soon-certificate".to_string(),
                description: format!("Certificate for {} expires in under 30 days.", cert.subject),
                remediation: "Renew the SSL/TLS certificate soon.".to_string(),
            });
        }

        if cert.key_algorithm == "RSA" {
            if let Some(bits) = cert.key_size.filter(|bits| *bits < MIN_RSA_BITS) {
                issues.push(SslIssue {
                    severity: Severity::High,
                    issue_type: "weak-key-size".to_string(),
                    description: format!(
                        "RSA key size of {bits} bits for {} is considered weak.",
                        cert.subject
                    ),
                    remediation: "Use at least a 2048-bit RSA key or switch to an ECC key."
                        .to_string(),
                });
            }
        }
    }

    if snapshot.protocol.is_weak() {
        issues.push(SslIssue {
            severity: Severity::Critical,
            issue_type: "weak-protocol".to_string(),
            description: format!(
                "The server negotiated a weak TLS protocol version: {}.",
                snapshot.protocol
            ),
            remediation: "Disable TLS 1.0 and 1.1. Enable TLS 1.2 and TLS 1.3.".to_string(),
        });
    }

    if is_weak_cipher(&snapshot.cipher_suite) {
        issues.push(SslIssue {
            severity: Severity::High,
            issue_type: "weak-cipher".to_string(),
            description: format!(
                "The server is using a weak cipher suite: {}.",
                snapshot.cipher_suite
            ),
            remediation: "Disable weak cipher suites (like RC4, 3DES) and prioritize modern, secure ciphers (like AES-GCM).".to_string(),
        });
    }

    let grade = grade_for(&issues);
    SslAudit {
        host: host.to_string(),
        port,
        protocol_version: snapshot.protocol.to_string(),
        cipher_suite: snapshot.cipher_suite.clone(),
        certificate_chain: snapshot.chain.clone(),
        issues,
        grade,
    }
}

/// Any critical issue fails the endpoint outright; otherwise any high issue
/// caps it at B. Medium and lower issues never move the grade.
pub fn grade_for(issues: &[SslIssue]) -> TlsGrade {
    let mut grade = TlsGrade::A;
    for issue in issues {
        match issue.severity {
            Severity::Critical => return TlsGrade::F,
            Severity::High => grade = TlsGrade::B,
            _ => {}
        }
    }
    grade
}

fn is_weak_cipher(name: &str) -> bool {
    let upper = name.to_uppercase();
    WEAK_CIPHER_MARKERS.iter().any(|m| upper.contains(m))
}

/// One `tls` finding per issue. Issue descriptions carry no timestamps, so
/// the findings' identity keys hold steady while the condition persists.
pub fn findings_from_audit(audit: &SslAudit) -> Vec<Finding> {
    audit
        .issues
        .iter()
        .map(|issue| {
            Finding::new(
                FindingKind::Tls,
                issue.severity,
                &audit.host,
                audit.port,
                issue.description.clone(),
            )
            .with_service("ssl/tls")
            .with_remediation(issue.remediation.clone())
            .with_detail(FindingDetail::Tls {
                issue_type: issue.issue_type.clone(),
                grade: audit.grade,
            })
        })
        .collect()
}

/// Probe plus evaluation for one endpoint.
pub struct TlsAuditor {
    probe: Arc<dyn TlsProbe>,
    timeout: Duration,
}

impl TlsAuditor {
    pub fn new(probe: Arc<dyn TlsProbe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    /// Audit `host:port`. A failed handshake yields an error and no partial
    /// audit.
    pub async fn audit_tls(&self, host: &str, port: u16) -> Result<SslAudit> {
        let snapshot = self.probe.handshake(host, port, self.timeout).await?;
        let audit = evaluate(host, port, &snapshot, Utc::now());
        tracing::debug!(
            host,
            port,
            protocol = %snapshot.protocol,
            grade = %audit.grade,
            issues = audit.issues.len(),
            "TLS audit complete"
        );
        Ok(audit)
    }
}

// ── rustls probe ──────────────────────────────────────────────────

/// Handshakes with rustls. Servers that only speak protocol versions or
/// cipher suites rustls refuses (TLS 1.1 and older, RC4, 3DES) fail the
/// handshake and surface as [`ScanError::Tls`]; [`FallbackProbe`] retries
/// those with [`LegacyTlsProbe`].
pub struct RustlsProbe {
    connector: TlsConnector,
}

impl RustlsProbe {
    pub fn new() -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ScanError::Config(format!("TLS client: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl TlsProbe for RustlsProbe {
    async fn handshake(&self, host: &str, port: u16, timeout: Duration) -> Result<HandshakeSnapshot> {
        let tls_error = |reason: String| ScanError::Tls {
            host: host.to_string(),
            port,
            reason,
        };

        let server_name =
            ServerName::try_from(host.to_string()).map_err(|e| tls_error(e.to_string()))?;

        let connect = async {
            let tcp = TcpStream::connect((host, port)).await?;
            self.connector.connect(server_name, tcp).await
        };
        let stream = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| tls_error(format!("handshake timed out after {}s", timeout.as_secs())))?
            .map_err(|e| tls_error(e.to_string()))?;

        let (_, connection) = stream.get_ref();

        let protocol = connection
            .protocol_version()
            .and_then(TlsVersion::from_rustls)
            .ok_or_else(|| tls_error("unrecognised protocol version".to_string()))?;
        let cipher_suite = connection
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
            .unwrap_or_default();

        let mut chain = Vec::new();
        for der in connection.peer_certificates().unwrap_or_default() {
            match decode_certificate(der) {
                Ok(cert) => chain.push(cert),
                Err(e) => tracing::warn!(host, port, error = %e, "Skipping undecodable certificate"),
            }
        }

        Ok(HandshakeSnapshot {
            protocol,
            cipher_suite,
            chain,
        })
    }
}

// ── OpenSSL probe ─────────────────────────────────────────────────

/// Handshakes with OpenSSL at security level 0 and no minimum protocol, so
/// TLS 1.0/1.1, export and RC4 suites negotiate when the server insists on
/// them. SSL 3.0 works only where the linked OpenSSL was built with it.
pub struct LegacyTlsProbe {
    connector: SslConnector,
}

impl LegacyTlsProbe {
    pub fn new() -> Result<Self> {
        let config_error = |e: openssl::error::ErrorStack| ScanError::Config(format!("legacy TLS client: {e}"));

        let mut builder = SslConnector::builder(SslMethod::tls_client()).map_err(config_error)?;
        builder.set_verify(SslVerifyMode::NONE);
        builder.set_min_proto_version(None).map_err(config_error)?;
        builder.set_max_proto_version(None).map_err(config_error)?;
        builder
            .set_cipher_list("ALL:COMPLEMENTOFALL:@SECLEVEL=0")
            .map_err(config_error)?;

        Ok(Self {
            connector: builder.build(),
        })
    }
}

#[async_trait]
impl TlsProbe for LegacyTlsProbe {
    async fn handshake(&self, host: &str, port: u16, timeout: Duration) -> Result<HandshakeSnapshot> {
        let connector = self.connector.clone();
        let target = host.to_string();

        let task = tokio::task::spawn_blocking(move || openssl_handshake(&connector, &target, port, timeout));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ScanError::Tls {
                host: host.to_string(),
                port,
                reason: format!("handshake task failed: {e}"),
            }),
            Err(_) => Err(ScanError::Tls {
                host: host.to_string(),
                port,
                reason: format!("handshake timed out after {}s", timeout.as_secs()),
            }),
        }
    }
}

fn openssl_handshake(
    connector: &SslConnector,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<HandshakeSnapshot> {
    let tls_error = |reason: String| ScanError::Tls {
        host: host.to_string(),
        port,
        reason,
    };

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| tls_error(e.to_string()))?
        .next()
        .ok_or_else(|| tls_error("no address resolved".to_string()))?;
    let tcp = StdTcpStream::connect_timeout(&addr, timeout).map_err(|e| tls_error(e.to_string()))?;
    tcp.set_read_timeout(Some(timeout))
        .and_then(|_| tcp.set_write_timeout(Some(timeout)))
        .map_err(|e| tls_error(e.to_string()))?;

    let stream = connector
        .configure()
        .map_err(|e| tls_error(e.to_string()))?
        .verify_hostname(false)
        .connect(host, tcp)
        .map_err(|e| tls_error(e.to_string()))?;
    let ssl = stream.ssl();

    let protocol = TlsVersion::from_openssl(ssl.version_str())
        .ok_or_else(|| tls_error(format!("unrecognised protocol version {}", ssl.version_str())))?;
    let cipher_suite = ssl
        .current_cipher()
        .map(|cipher| cipher.name().to_string())
        .unwrap_or_default();

    let mut ders = Vec::new();
    match ssl.peer_cert_chain() {
        Some(stack) => {
            for cert in stack {
                ders.push(cert.to_der());
            }
        }
        None => {
            if let Some(cert) = ssl.peer_certificate() {
                ders.push(cert.to_der());
            }
        }
    }

    let mut chain = Vec::new();
    for der in ders {
        let decoded = der
            .map_err(|e| ScanError::Parse(format!("certificate: {e}")))
            .and_then(|der| decode_certificate(&der));
        match decoded {
            Ok(cert) => chain.push(cert),
            Err(e) => tracing::warn!(host, port, error = %e, "Skipping undecodable certificate"),
        }
    }

    Ok(HandshakeSnapshot {
        protocol,
        cipher_suite,
        chain,
    })
}

// ── Fallback ──────────────────────────────────────────────────────

/// Tries `primary` first and retries with `legacy` when the handshake
/// fails. Interruptions and non-handshake errors pass straight through.
pub struct FallbackProbe {
    primary: Arc<dyn TlsProbe>,
    legacy: Arc<dyn TlsProbe>,
}

impl FallbackProbe {
    pub fn new(primary: Arc<dyn TlsProbe>, legacy: Arc<dyn TlsProbe>) -> Self {
        Self { primary, legacy }
    }

    /// rustls for modern servers, OpenSSL for the rest.
    pub fn system() -> Result<Self> {
        Ok(Self::new(
            Arc::new(RustlsProbe::new()?),
            Arc::new(LegacyTlsProbe::new()?),
        ))
    }
}

#[async_trait]
impl TlsProbe for FallbackProbe {
    async fn handshake(&self, host: &str, port: u16, timeout: Duration) -> Result<HandshakeSnapshot> {
        match self.primary.handshake(host, port, timeout).await {
            Err(ScanError::Tls { reason, .. }) => {
                tracing::debug!(host, port, reason = %reason, "Primary handshake failed, retrying with legacy TLS");
                self.legacy.handshake(host, port, timeout).await
            }
            other => other,
        }
    }
}

/// Decode a DER certificate into the attributes the audit inspects.
pub fn decode_certificate(der: &[u8]) -> Result<Certificate> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| ScanError::Parse(format!("certificate: {e}")))?;

    let validity = cert.validity();
    let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0).unwrap_or_default();
    let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0).unwrap_or_default();

    let spki = cert.public_key();
    let (key_algorithm, key_size) = match spki.parsed() {
        Ok(PublicKey::RSA(rsa)) => ("RSA".to_string(), Some(rsa.key_size() as u32)),
        Ok(PublicKey::EC(point)) => ("EC".to_string(), Some(point.key_size() as u32)),
        _ => (oid_name(&spki.algorithm.algorithm), None),
    };

    let sans = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let subject = cert.subject().to_string();
    let issuer = cert.issuer().to_string();

    Ok(Certificate {
        self_signed: subject == issuer,
        subject,
        issuer,
        not_before,
        not_after,
        key_algorithm,
        key_size,
        signature_algorithm: oid_name(&cert.signature_algorithm.algorithm),
        sans,
    })
}

fn oid_name(oid: &Oid<'_>) -> String {
    oid2sn(oid, oid_registry())
        .map(String::from)
        .unwrap_or_else(|_| oid.to_id_string())
}

/// Skips chain and name validation; handshake signatures are still
/// verified against the presented key.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
