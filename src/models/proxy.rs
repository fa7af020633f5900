use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PacError, Result};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks5" | "socks5h" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks4 | ProxyProtocol::Socks5)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, ProxyProtocol::Http | ProxyProtocol::Https)
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized identity of a candidate proxy
///
/// Two descriptors compare equal when protocol and lowercased address match,
/// whichever source produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyDescriptor {
    protocol: ProxyProtocol,
    address: String,
    host: String,
    port: u16,
}

impl ProxyDescriptor {
    /// Build a descriptor from a `host:port` address
    pub fn new(protocol: ProxyProtocol, address: &str) -> Result<Self> {
        let (host, port) = parse_host_port(address)?;
        let address = format_tcp_addr(&host, port);

        Ok(Self {
            protocol,
            address,
            host,
            port,
        })
    }

    /// Build a descriptor from separate host and port fields
    pub fn from_parts(protocol: ProxyProtocol, host: &str, port: u16) -> Result<Self> {
        Self::new(protocol, &format_tcp_addr(host.trim(), port))
    }

    pub fn protocol(&self) -> ProxyProtocol {
        self.protocol
    }

    /// Normalized `host:port` (IPv6 hosts bracketed)
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Host without IPv6 brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address)
    }
}

/// Result of probing one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    descriptor: ProxyDescriptor,
    latency: Option<Duration>,
    attempts: u32,
}

impl ProbeOutcome {
    pub fn live(descriptor: ProxyDescriptor, latency: Duration, attempts: u32) -> Self {
        Self {
            descriptor,
            latency: Some(latency),
            attempts,
        }
    }

    pub fn dead(descriptor: ProxyDescriptor, attempts: u32) -> Self {
        Self {
            descriptor,
            latency: None,
            attempts,
        }
    }

    pub fn descriptor(&self) -> &ProxyDescriptor {
        &self.descriptor
    }

    pub fn is_live(&self) -> bool {
        self.latency.is_some()
    }

    /// Latency of the successful attempt; `None` when not live
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Live proxy with the latency it was ranked by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedProxy {
    pub descriptor: ProxyDescriptor,
    pub latency: Duration,
}

/// Split `host:port`, accepting bracketed IPv6 hosts
fn parse_host_port(addr: &str) -> Result<(String, u16)> {
    let addr = addr.trim().to_lowercase();

    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        PacError::InvalidProxyAddress(format!("Invalid address '{}': missing port", addr))
    })?;

    let port = port
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| {
            PacError::InvalidProxyAddress(format!("Invalid address '{}': bad port", addr))
        })?;

    if host.is_empty() {
        return Err(PacError::InvalidProxyAddress(format!(
            "Invalid address '{}': missing host",
            addr
        )));
    }

    url::Host::parse(host).map_err(|e| {
        PacError::InvalidProxyAddress(format!("Invalid address '{}': {}", addr, e))
    })?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    Ok((host.to_string(), port))
}

pub(crate) fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
