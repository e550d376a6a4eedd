//! Fakes shared by the integration tests: canned tool output and a scripted
//! TLS endpoint. No test here needs network access or scanner binaries.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use perimeter_core::types::Certificate;
use perimeter_scan::config::ScanConfig;
use perimeter_scan::error::Result;
use perimeter_scan::executor::{CommandExecutor, CommandOutput};
use perimeter_scan::tls::{HandshakeSnapshot, TlsProbe, TlsVersion};
use perimeter_scan::{ScanError, ScanOrchestrator};

pub const NMAP_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -T4 -O -sV -oX - 10.0.1.0/24">
  <host>
    <status state="up" reason="echo-reply"/>
    <address addr="10.0.1.5" addrtype="ipv4"/>
    <hostnames><hostname name="gw.lab.internal" type="PTR"/></hostnames>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="9.6"/>
      </port>
      <port protocol="tcp" portid="23">
        <state state="open" reason="syn-ack"/>
        <service name="telnet"/>
      </port>
      <port protocol="tcp" portid="443">
        <state state="open" reason="syn-ack"/>
        <service name="https" product="nginx" version="1.25.3"/>
      </port>
      <port protocol="tcp" portid="8443">
        <state state="open" reason="syn-ack"/>
        <service name="https-alt"/>
      </port>
      <port protocol="tcp" portid="3389">
        <state state="filtered" reason="no-response"/>
        <service name="ms-wbt-server"/>
      </port>
    </ports>
    <os>
      <osmatch name="Linux 5.15" accuracy="96">
        <osclass type="general purpose" vendor="Linux" osfamily="Linux" osgen="5.X"/>
      </osmatch>
    </os>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="10.0.1.6" addrtype="ipv4"/>
  </host>
  <runstats><hosts up="1" down="1" total="2"/></runstats>
</nmaprun>"#;

/// The same host as [`NMAP_XML`] on a run where OS detection came back empty.
pub const NMAP_XML_NO_OS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -T4 -O -sV -oX - 10.0.1.0/24">
  <host>
    <status state="up" reason="echo-reply"/>
    <address addr="10.0.1.5" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="9.6"/>
      </port>
      <port protocol="tcp" portid="23">
        <state state="open" reason="syn-ack"/>
        <service name="telnet"/>
      </port>
      <port protocol="tcp" portid="443">
        <state state="open" reason="syn-ack"/>
        <service name="https" product="nginx" version="1.25.3"/>
      </port>
      <port protocol="tcp" portid="8443">
        <state state="open" reason="syn-ack"/>
        <service name="https-alt"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;

pub const NAABU_JSON: &str = r#"{"ip":"10.0.1.7","port":80,"protocol":"tcp"}
not json at all
{"ip":"10.0.1.7","port":443,"protocol":"tcp"}
{"ip":"10.0.1.7","port":80,"protocol":"tcp"}
"#;

pub const NUCLEI_JSON: &str = r#"{"template-id":"CVE-2023-44487","info":{"name":"HTTP/2 Rapid Reset","severity":"high","description":"HTTP/2 rapid reset denial of service.","classification":{"cve-id":["cve-2023-44487"],"cvss-score":7.5}},"host":"10.0.1.5","matched-at":"https://10.0.1.5:443"}
"#;

#[derive(Clone)]
pub enum Reply {
    /// Canned stdout and exit code.
    Output(&'static str, i32),
    /// The binary is not installed.
    Missing,
    /// Never finishes; only cancellation ends it.
    Hang,
}

/// Answers each program from a fixed table and records what ran.
pub struct FakeExecutor {
    replies: Vec<(String, Reply)>,
    calls: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new(replies: &[(&str, Reply)]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies
                .iter()
                .map(|(program, reply)| (program.to_string(), reply.clone()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn run(
        &self,
        program: &str,
        _args: &[String],
        cancel: &CancellationToken,
        _timeout: Duration,
    ) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(program.to_string());
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let reply = self
            .replies
            .iter()
            .find(|(p, _)| p == program)
            .map(|(_, r)| r.clone())
            .unwrap_or(Reply::Missing);

        match reply {
            Reply::Output(stdout, code) => Ok(CommandOutput {
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
                exit_code: Some(code),
            }),
            Reply::Missing => Err(ScanError::ToolUnavailable {
                tool: program.to_string(),
            }),
            Reply::Hang => {
                cancel.cancelled().await;
                Err(ScanError::Cancelled)
            }
        }
    }
}

/// Port 443 presents a healthy chain, 8443 an expired one, anything else
/// refuses the handshake.
pub struct FakeTls;

#[async_trait]
impl TlsProbe for FakeTls {
    async fn handshake(&self, host: &str, port: u16, _timeout: Duration) -> Result<HandshakeSnapshot> {
        let now = Utc::now();
        let not_after = match port {
            443 => now + TimeDelta::days(200),
            8443 => now - TimeDelta::days(3),
            _ => {
                return Err(ScanError::Tls {
                    host: host.to_string(),
                    port,
                    reason: "connection refused".to_string(),
                })
            }
        };

        Ok(HandshakeSnapshot {
            protocol: TlsVersion::Tls13,
            cipher_suite: "TLS13_AES_128_GCM_SHA256".to_string(),
            chain: vec![Certificate {
                subject: format!("CN={host}"),
                issuer: "CN=Lab CA".to_string(),
                not_before: not_after - TimeDelta::days(365),
                not_after,
                self_signed: false,
                key_algorithm: "RSA".to_string(),
                key_size: Some(2048),
                signature_algorithm: "sha256WithRSAEncryption".to_string(),
                sans: vec![host.to_string()],
            }],
        })
    }
}

pub fn orchestrator(executor: Arc<FakeExecutor>) -> ScanOrchestrator {
    orchestrator_with(ScanConfig::default(), executor)
}

pub fn orchestrator_with(config: ScanConfig, executor: Arc<FakeExecutor>) -> ScanOrchestrator {
    ScanOrchestrator::new(config, executor, Arc::new(FakeTls))
}
