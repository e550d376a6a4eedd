//! Naabu JSON-lines output parsing.
//!
//! With `-json`, naabu writes one object per discovered port:
//! `{"host":"gw.local","ip":"10.0.1.1","port":22,"protocol":"tcp"}`.

use std::collections::BTreeMap;

use serde::Deserialize;

use perimeter_core::types::Host;

/// One per-host port result.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NaabuResult {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub protocol: Option<String>,
}

impl NaabuResult {
    /// The address to report: IP when naabu resolved one, else the host.
    pub fn address(&self) -> Option<&str> {
        self.ip
            .as_deref()
            .or(self.host.as_deref())
            .filter(|a| !a.is_empty())
    }
}

/// Walk naabu output line by line, calling `on_result` for each valid
/// port result. Malformed lines are skipped. Returns the number skipped.
pub fn for_each_result(output: &[u8], mut on_result: impl FnMut(NaabuResult)) -> usize {
    let mut skipped = 0;
    for line in String::from_utf8_lossy(output).lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<NaabuResult>(line) {
            Ok(result) => on_result(result),
            Err(e) => {
                skipped += 1;
                tracing::debug!(error = %e, line, "Skipping malformed naabu line");
            }
        }
    }
    skipped
}

/// Group naabu results into port-only hosts, ordered by address.
pub fn hosts_from_output(output: &[u8]) -> (Vec<Host>, usize) {
    let mut by_address: BTreeMap<String, Host> = BTreeMap::new();

    let skipped = for_each_result(output, |result| {
        let Some(address) = result.address() else {
            return;
        };
        let host = by_address
            .entry(address.to_string())
            .or_insert_with(|| Host {
                address: address.to_string(),
                hostname: result.host.clone().filter(|h| h != address),
                ..Default::default()
            });
        host.open_ports.push(result.port);
    });

    let hosts = by_address
        .into_values()
        .map(|mut host| {
            host.open_ports.sort_unstable();
            host.open_ports.dedup();
            host
        })
        .collect();

    (hosts, skipped)
}
