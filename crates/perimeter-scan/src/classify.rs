//! Heuristic device classification from observed ports, services, banners
//! and OS guess.
//!
//! Rules are tried in a fixed priority order because their signal sets
//! overlap (a Cisco box matches both switch and router keywords):
//! switch, router, iot, phone, server, then unknown.

use std::collections::BTreeMap;

use serde::Serialize;

use perimeter_core::types::DeviceType;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub device_type: DeviceType,
    /// Share of the decided type's indicator checks that matched, in [0, 1].
    /// Diagnostic only.
    pub confidence: f64,
}

const SNMP_PORT: u16 = 161;
const SWITCH_SERVICES: &[&str] = &["snmp", "switch", "cisco", "hp-procurve", "juniper"];
const SWITCH_BANNERS: &[&str] = &["cisco ios", "switch", "procurve", "juniper"];

/// BGP, RIP, OSPF.
const ROUTING_PORTS: &[u16] = &[179, 520, 88];
const ROUTER_SERVICES: &[&str] = &["bgp", "ospf", "rip", "router", "cisco", "juniper"];
const ROUTER_BANNERS: &[&str] = &["cisco ios", "router", "juniper", "mikrotik"];

/// MQTT, MQTT over TLS, CoAP, CoAP over DTLS, SSDP, UPnP.
const IOT_PORTS: &[u16] = &[1883, 8883, 5683, 5684, 1900, 49152];
const IOT_CONFIDENCE_PORTS: &[u16] = &[1883, 8883, 5683, 5684];
const IOT_SERVICES: &[&str] = &["mqtt", "coap", "upnp", "iot", "smart"];
const IOT_BANNERS: &[&str] = &["mqtt", "coap", "iot", "smart", "philips hue", "nest", "echo"];

const MOBILE_OS: &[&str] = &["android", "ios", "iphone", "mobile"];
const MOBILE_CONFIDENCE_OS: &[&str] = &["android", "ios"];
const PHONE_SERVICES: &[&str] = &["airplay", "airprint", "dlna"];
const PHONE_BANNERS: &[&str] = &["iphone", "android", "airplay"];

const SERVER_PORTS: &[u16] = &[22, 80, 443, 3306, 5432, 1433, 3389, 5985, 5986];
const SERVER_CONFIDENCE_PORTS: &[u16] = &[22, 80, 443, 3306, 5432];
const SERVER_SERVICES: &[&str] = &["http", "https", "ssh", "mysql", "postgres", "mssql", "rdp"];
const SERVER_OS: &[&str] = &["linux", "windows", "unix", "server"];

/// Classify a host. Pure: the same inputs always give the same output.
pub fn classify(
    ports: &[u16],
    services: &BTreeMap<u16, String>,
    os_guess: &str,
    banners: &BTreeMap<u16, String>,
) -> Classification {
    let signals = Signals::new(ports, services, os_guess, banners);

    let device_type = if signals.is_switch() {
        DeviceType::Switch
    } else if signals.is_router() {
        DeviceType::Router
    } else if signals.is_iot() {
        DeviceType::Iot
    } else if signals.is_phone() {
        DeviceType::Phone
    } else if signals.is_server() {
        DeviceType::Server
    } else {
        DeviceType::Unknown
    };

    Classification {
        device_type,
        confidence: signals.confidence(device_type),
    }
}

/// Lowercased views of the inputs, shared by every rule.
struct Signals<'a> {
    ports: &'a [u16],
    services: Vec<String>,
    banners: Vec<String>,
    os: String,
}

impl<'a> Signals<'a> {
    fn new(
        ports: &'a [u16],
        services: &BTreeMap<u16, String>,
        os_guess: &str,
        banners: &BTreeMap<u16, String>,
    ) -> Self {
        Self {
            ports,
            services: services.values().map(|s| s.to_lowercase()).collect(),
            banners: banners.values().map(|b| b.to_lowercase()).collect(),
            os: os_guess.to_lowercase(),
        }
    }

    fn has_port(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    fn count_ports(&self, wanted: &[u16]) -> usize {
        wanted.iter().filter(|p| self.has_port(**p)).count()
    }

    fn service_matches(&self, keywords: &[&str]) -> bool {
        self.services
            .iter()
            .any(|s| keywords.iter().any(|k| s.contains(k)))
    }

    fn banner_matches(&self, keywords: &[&str]) -> bool {
        self.banners
            .iter()
            .any(|b| keywords.iter().any(|k| b.contains(k)))
    }

    fn os_matches(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.os.contains(k))
    }

    fn is_switch(&self) -> bool {
        // An SNMP listener alone is not enough; plenty of hosts run an agent.
        self.has_port(SNMP_PORT)
            && (self.service_matches(SWITCH_SERVICES) || self.banner_matches(SWITCH_BANNERS))
    }

    fn is_router(&self) -> bool {
        self.count_ports(ROUTING_PORTS) > 0
            || self.service_matches(ROUTER_SERVICES)
            || self.banner_matches(ROUTER_BANNERS)
    }

    fn is_iot(&self) -> bool {
        self.count_ports(IOT_PORTS) > 0
            || self.service_matches(IOT_SERVICES)
            || self.banner_matches(IOT_BANNERS)
    }

    fn is_phone(&self) -> bool {
        self.os_matches(MOBILE_OS)
            || self.service_matches(PHONE_SERVICES)
            || self.banner_matches(PHONE_BANNERS)
    }

    fn is_server(&self) -> bool {
        (self.count_ports(SERVER_PORTS) > 0 || self.service_matches(SERVER_SERVICES))
            && self.os_matches(SERVER_OS)
    }

    /// Indicators matched over indicator checks for the decided type.
    fn confidence(&self, device_type: DeviceType) -> f64 {
        let (matched, checks) = match device_type {
            DeviceType::Switch => {
                let mut matched = 0;
                if self.has_port(SNMP_PORT) {
                    matched += 1;
                }
                if self.service_matches(&["snmp", "switch"]) {
                    matched += 1;
                }
                (matched, 2)
            }
            DeviceType::Router => (self.count_ports(ROUTING_PORTS), 1),
            DeviceType::Iot => (self.count_ports(IOT_CONFIDENCE_PORTS), 1),
            DeviceType::Phone => (usize::from(self.os_matches(MOBILE_CONFIDENCE_OS)), 1),
            DeviceType::Server => (self.count_ports(SERVER_CONFIDENCE_PORTS), 1),
            DeviceType::Unknown => return 0.0,
        };
        (matched as f64 / checks as f64).clamp(0.0, 1.0)
    }
}
