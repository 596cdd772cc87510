//! Proxy data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Proxy protocol enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    /// Parse a protocol name as announced by the feed
    pub fn from_protocol(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "http" => Some(ProxyType::Http),
            "https" => Some(ProxyType::Https),
            "socks4" => Some(ProxyType::Socks4),
            "socks5" => Some(ProxyType::Socks5),
            _ => None,
        }
    }

    /// SOCKS proxies are the only ones that need a live check
    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyType::Socks4 | ProxyType::Socks5)
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Https => write!(f, "https"),
            ProxyType::Socks4 => write!(f, "socks4"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}

/// One directory entry describing a candidate proxy
///
/// `host` and `port` form the natural key; two records with the same key are
/// the same proxy observed at different times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProxyRecord {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub anonymity: String,
    pub asn: String,
    pub city: String,
    pub country: String,
    pub isp: String,
    pub org: String,
    pub region: Option<String>,
    /// Protocol names exactly as announced, unknown ones included
    pub protocols: Vec<String>,
    pub latency: f64,
    pub response_time: i64,
    pub speed: i64,
    pub working_percent: Option<f64>,
    pub up_time: f64,
    pub up_time_success_count: i64,
    pub up_time_try_count: i64,
    pub google: bool,
    pub created_at: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
    /// Commit time, assigned by the store
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    /// Create a bare record for the given address
    pub fn new(host: impl Into<String>, port: u16, protocols: &[&str]) -> Self {
        Self {
            host: host.into(),
            port,
            protocols: protocols.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Natural key in `host:port` form
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// SOCKS protocols this proxy claims, in announced order
    pub fn socks_protocols(&self) -> Vec<ProxyType> {
        self.protocols
            .iter()
            .filter_map(|p| ProxyType::from_protocol(p))
            .filter(ProxyType::is_socks)
            .collect()
    }

    pub fn requires_check(&self) -> bool {
        !self.socks_protocols().is_empty()
    }

    /// Get the proxy URL string for the given protocol
    pub fn url(&self, proxy_type: ProxyType) -> String {
        format!("{}://{}:{}", proxy_type, self.host, self.port)
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.key(), self.protocols.join(","))
    }
}

/// Result of validating one record during a cycle
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub record: ProxyRecord,
    pub valid: bool,
}

impl ValidationOutcome {
    pub fn valid(record: ProxyRecord) -> Self {
        Self {
            record,
            valid: true,
        }
    }

    pub fn invalid(record: ProxyRecord) -> Self {
        Self {
            record,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// How an incoming record relates to what the store already holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClassification {
    New,
    Changed,
    Unchanged,
}

impl ChangeClassification {
    /// Whether the record has to be written back
    pub fn needs_write(&self) -> bool {
        !matches!(self, ChangeClassification::Unchanged)
    }
}

/// Per-cycle counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleResult {
    pub fetched: usize,
    pub validated: usize,
    pub new: usize,
    pub changed: usize,
    pub persisted: usize,
    pub had_effect: bool,
}

impl fmt::Display for CycleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} validated={} new={} changed={} persisted={}",
            self.fetched, self.validated, self.new, self.changed, self.persisted
        )
    }
}
