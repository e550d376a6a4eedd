//! Nmap XML output deserialization.
//!
//! Nmap's `-oX -` flag writes structured XML to stdout. The structs here
//! mirror the subset of that document discovery consumes: addresses, port
//! states, service/version probes, and OS matches with their classes.

use std::collections::BTreeMap;

use serde::Deserialize;

use perimeter_core::types::{Host, ServiceDescriptor};

use crate::error::{Result, ScanError};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "@args")]
    pub args: Option<String>,
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
    pub runstats: Option<RunStats>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub hostnames: Option<Hostnames>,
    pub ports: Option<Ports>,
    pub os: Option<OsMatches>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<Hostname>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<NmapPort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapPort {
    #[serde(rename = "@protocol")]
    pub protocol: String,
    #[serde(rename = "@portid")]
    pub port_id: u16,
    pub state: PortState,
    pub service: Option<NmapService>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortState {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapService {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@product")]
    pub product: Option<String>,
    #[serde(rename = "@version")]
    pub version: Option<String>,
    #[serde(rename = "@extrainfo")]
    pub extra_info: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatches {
    #[serde(rename = "osmatch", default)]
    pub matches: Vec<OsMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatch {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@accuracy")]
    pub accuracy: Option<String>,
    #[serde(rename = "osclass", default)]
    pub classes: Vec<OsClass>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsClass {
    #[serde(rename = "@type")]
    pub class_type: Option<String>,
    #[serde(rename = "@vendor")]
    pub vendor: Option<String>,
    #[serde(rename = "@osfamily")]
    pub os_family: Option<String>,
    #[serde(rename = "@osgen")]
    pub os_gen: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStats {
    pub hosts: Option<RunStatsHosts>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStatsHosts {
    #[serde(rename = "@up")]
    pub up: Option<String>,
    #[serde(rename = "@total")]
    pub total: Option<String>,
}

impl NmapHost {
    /// Preferred address: IPv4, then IPv6.
    pub fn address(&self) -> Option<&str> {
        ["ipv4", "ipv6"].iter().find_map(|kind| {
            self.addresses
                .iter()
                .find(|a| a.addr_type == *kind)
                .map(|a| a.addr.as_str())
        })
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostnames
            .as_ref()
            .and_then(|hn| hn.hostnames.first())
            .map(|h| h.name.as_str())
    }

    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }

    /// Ports nmap reported in the `open` state.
    pub fn open_ports(&self) -> impl Iterator<Item = &NmapPort> {
        self.ports
            .iter()
            .flat_map(|p| p.ports.iter())
            .filter(|p| p.state.state == "open")
    }

    /// First OS match only. Nmap orders matches by accuracy, and no attempt
    /// is made to reconcile competing candidates.
    pub fn os_name(&self) -> Option<&str> {
        self.first_os_match().map(|m| m.name.as_str())
    }

    /// Generation of the first match's first class (e.g. "10", "5.X"),
    /// falling back to the class type.
    pub fn os_version(&self) -> Option<&str> {
        let class = self.first_os_match()?.classes.first()?;
        class
            .os_gen
            .as_deref()
            .or(class.class_type.as_deref())
            .filter(|s| !s.is_empty())
    }

    fn first_os_match(&self) -> Option<&OsMatch> {
        self.os.as_ref().and_then(|os| os.matches.first())
    }

    /// Convert to a discovered [`Host`]. Hosts with no usable address are
    /// skipped by returning `None`.
    pub fn to_host(&self) -> Option<Host> {
        let address = self.address()?;

        let mut open_ports = Vec::new();
        let mut services = BTreeMap::new();
        let mut banners = BTreeMap::new();

        for port in self.open_ports() {
            open_ports.push(port.port_id);

            if let Some(svc) = &port.service {
                let descriptor = ServiceDescriptor {
                    name: svc.name.clone(),
                    product: svc.product.clone().filter(|p| !p.is_empty()),
                    version: svc.version.clone().filter(|v| !v.is_empty()),
                    extra_info: svc.extra_info.clone(),
                };
                let banner = descriptor.banner();
                if !banner.is_empty() {
                    banners.insert(port.port_id, banner);
                }
                if !descriptor.name.is_empty() {
                    services.insert(port.port_id, descriptor);
                }
            }
        }

        open_ports.sort_unstable();
        open_ports.dedup();

        Some(Host {
            address: address.to_string(),
            hostname: self.hostname().map(String::from),
            open_ports,
            services,
            banners,
            os_guess: self.os_name().map(String::from),
            os_version_guess: self.os_version().map(String::from),
        })
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| ScanError::Parse(format!("nmap XML: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE_SCAN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -T4 -O -sV --script default,safe -Pn -oX - 10.0.1.1" startstr="Mon Feb 24 10:05:00 2026">
  <host>
    <status state="up" reason="user-set"/>
    <address addr="10.0.1.1" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:01" addrtype="mac" vendor="Cisco"/>
    <hostnames>
      <hostname name="core-sw1.local" type="PTR"/>
    </hostnames>
    <ports>
      <port protocol="tcp" portid="23">
        <state state="open" reason="syn-ack"/>
        <service name="telnet" product="Cisco router telnetd"/>
      </port>
      <port protocol="tcp" portid="443">
        <state state="open" reason="syn-ack"/>
        <service name="https" product="nginx" version="1.24.0" extrainfo="Ubuntu"/>
      </port>
      <port protocol="tcp" portid="3306">
        <state state="filtered" reason="no-response"/>
        <service name="mysql"/>
      </port>
      <port protocol="tcp" portid="8080">
        <state state="open" reason="syn-ack"/>
      </port>
    </ports>
    <os>
      <osmatch name="Cisco IOS 15.1" accuracy="95">
        <osclass type="switch" vendor="Cisco" osfamily="IOS" osgen="15.X" accuracy="95"/>
      </osmatch>
      <osmatch name="Cisco IOS 12.4" accuracy="90">
        <osclass type="router" vendor="Cisco" osfamily="IOS" osgen="12.X" accuracy="90"/>
      </osmatch>
    </os>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="10.0.1.99" addrtype="ipv4"/>
  </host>
  <runstats>
    <finished time="1740400100" elapsed="15.30"/>
    <hosts up="1" down="1" total="2"/>
  </runstats>
</nmaprun>"#;

    #[test]
    fn test_parse_service_scan() {
        let run = parse_nmap_xml(SERVICE_SCAN_XML.as_bytes()).unwrap();
        assert_eq!(run.hosts.len(), 2);
        assert_eq!(run.hosts.iter().filter(|h| h.is_up()).count(), 1);

        let host = &run.hosts[0];
        assert_eq!(host.address(), Some("10.0.1.1"));
        assert_eq!(host.hostname(), Some("core-sw1.local"));
        assert_eq!(host.os_name(), Some("Cisco IOS 15.1"));
        assert_eq!(host.os_version(), Some("15.X"));

        let open: Vec<u16> = host.open_ports().map(|p| p.port_id).collect();
        assert_eq!(open, vec![23, 443, 8080]);

        let hosts = run.runstats.as_ref().and_then(|s| s.hosts.as_ref()).unwrap();
        assert_eq!(hosts.up.as_deref(), Some("1"));
        assert_eq!(hosts.total.as_deref(), Some("2"));
    }

    #[test]
    fn test_to_host_banners_and_services() {
        let run = parse_nmap_xml(SERVICE_SCAN_XML.as_bytes()).unwrap();
        let host = run.hosts[0].to_host().unwrap();

        assert_eq!(host.open_ports, vec![23, 443, 8080]);
        assert_eq!(host.banners.get(&443).map(String::as_str), Some("nginx 1.24.0"));
        // Product without a version: banner is the service name.
        assert_eq!(host.banners.get(&23).map(String::as_str), Some("telnet"));
        assert_eq!(host.services.get(&443).map(|s| s.name.as_str()), Some("https"));
        // Filtered ports are not part of the surface.
        assert!(!host.services.contains_key(&3306));
        // Open with no service probe result: port kept, no service.
        assert!(!host.services.contains_key(&8080));
        assert!(!host.banners.contains_key(&8080));
        assert_eq!(host.os_version_guess.as_deref(), Some("15.X"));
    }

    #[test]
    fn test_os_version_falls_back_to_class_type() {
        let xml = r#"<nmaprun>
  <host>
    <status state="up"/>
    <address addr="10.0.1.7" addrtype="ipv4"/>
    <os><osmatch name="Linux 5.15" accuracy="95"><osclass type="general purpose" vendor="Linux"/></osmatch></os>
  </host>
</nmaprun>"#;
        let run = parse_nmap_xml(xml.as_bytes()).unwrap();
        assert_eq!(run.hosts[0].os_version(), Some("general purpose"));
    }

    #[test]
    fn test_parse_empty_scan() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -Pn 192.168.99.0/24">
  <runstats>
    <finished elapsed="1.00"/>
    <hosts up="0" down="256" total="256"/>
  </runstats>
</nmaprun>"#;

        let run = parse_nmap_xml(xml.as_bytes()).unwrap();
        assert!(run.hosts.is_empty());
    }

    #[test]
    fn test_truncated_xml_is_parse_error() {
        let err = parse_nmap_xml(b"<nmaprun><host><status state=\"up\"").unwrap_err();
        assert!(matches!(err, ScanError::Parse(_)));
    }

    #[test]
    fn test_host_without_address_is_skipped() {
        let host = NmapHost {
            status: Some(HostStatus {
                state: "up".to_string(),
            }),
            addresses: vec![Address {
                addr: "AA:BB:CC:DD:EE:10".to_string(),
                addr_type: "mac".to_string(),
            }],
            hostnames: None,
            ports: None,
            os: None,
        };

        assert_eq!(host.address(), None);
        assert!(host.to_host().is_none());
    }
}
