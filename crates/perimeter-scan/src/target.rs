//! Target specification parsing: single IP, CIDR block, or hostname.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::ScanError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Ip(IpAddr),
    Cidr(IpNet),
    Hostname(String),
}

impl TargetSpec {
    /// Whether `addr` falls inside this target. Hostnames never match an
    /// address since resolution is left to the tools.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match self {
            Self::Ip(ip) => ip == addr,
            Self::Cidr(net) => net.contains(addr),
            Self::Hostname(_) => false,
        }
    }
}

impl FromStr for TargetSpec {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScanError::InvalidTarget("empty target".to_string()));
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::Ip(ip));
        }
        if s.contains('/') {
            return s
                .parse::<IpNet>()
                .map(Self::Cidr)
                .map_err(|e| ScanError::InvalidTarget(format!("{s}: {e}")));
        }
        if is_valid_hostname(s) {
            return Ok(Self::Hostname(s.to_lowercase()));
        }
        Err(ScanError::InvalidTarget(s.to_string()))
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Cidr(net) => write!(f, "{net}"),
            Self::Hostname(name) => f.write_str(name),
        }
    }
}

fn is_valid_hostname(s: &str) -> bool {
    let s = s.strip_suffix('.').unwrap_or(s);
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_form() {
        assert_eq!(
            "10.0.0.5".parse::<TargetSpec>().unwrap(),
            TargetSpec::Ip("10.0.0.5".parse().unwrap())
        );
        assert_eq!(
            "10.0.1.0/24".parse::<TargetSpec>().unwrap().to_string(),
            "10.0.1.0/24"
        );
        assert_eq!(
            "Gateway.Local".parse::<TargetSpec>().unwrap(),
            TargetSpec::Hostname("gateway.local".to_string())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<TargetSpec>().is_err());
        assert!("10.0.0.0/99".parse::<TargetSpec>().is_err());
        assert!("bad host!".parse::<TargetSpec>().is_err());
        assert!("-leading.example".parse::<TargetSpec>().is_err());
    }

    #[test]
    fn cidr_containment() {
        let spec: TargetSpec = "10.0.1.0/24".parse().unwrap();
        assert!(spec.contains(&"10.0.1.77".parse().unwrap()));
        assert!(!spec.contains(&"10.0.2.1".parse().unwrap()));
    }
}
