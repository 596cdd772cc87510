//! Proxy feed client for fetching the public proxy list
//!
//! The upstream answers with a JSON envelope, sometimes prefixed with
//! arbitrary bytes, so the payload is located before it is parsed. Wire
//! formats (epoch-second `lastChecked`, string ports) are decoded here and
//! never leave this module.

use crate::error::FetchError;
use crate::proxy::models::ProxyRecord;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for feed requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Default feed endpoint
pub const DEFAULT_FEED_URL: &str = "https://proxylist.geonode.com/api/proxy-list";

/// Default user agent for feed requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36";

/// Protocol filter sent with every request
const PROTOCOL_FILTER: &str = "http,https,socks4,socks5";

/// Source of proxy records for a reconciliation cycle
#[async_trait]
pub trait ProxyFeed: Send + Sync {
    /// Fetch at most `limit` records
    async fn fetch(&self, limit: usize) -> Result<Vec<ProxyRecord>, FetchError>;
}

/// Configuration for the feed client
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Base URL of the proxy list endpoint
    pub base_url: String,
    /// Timeout for the whole request
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FEED_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FeedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Response envelope of the proxy list endpoint
#[derive(Debug, Deserialize)]
pub struct FeedResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<FeedEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub page: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub limit: i64,
}

/// One proxy entry as delivered on the wire
///
/// Absent and `null` fields both decode to their default.
#[derive(Debug, Deserialize)]
pub struct FeedEntry {
    #[serde(rename = "_id", default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ip: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub port: String,
    #[serde(rename = "anonymityLevel", default, deserialize_with = "null_as_default")]
    pub anonymity: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub asn: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub city: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub country: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub isp: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub org: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub protocols: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub latency: f64,
    #[serde(rename = "responseTime", default, deserialize_with = "null_as_default")]
    pub response_time: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub speed: i64,
    #[serde(rename = "workingPercent", default)]
    pub working_percent: Option<f64>,
    #[serde(rename = "upTime", default, deserialize_with = "null_as_default")]
    pub up_time: f64,
    #[serde(rename = "upTimeSuccessCount", default, deserialize_with = "null_as_default")]
    pub up_time_success_count: i64,
    #[serde(rename = "upTimeTryCount", default, deserialize_with = "null_as_default")]
    pub up_time_try_count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub google: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastChecked", default, deserialize_with = "null_as_default")]
    pub last_checked: i64,
}

impl TryFrom<FeedEntry> for ProxyRecord {
    type Error = String;

    fn try_from(entry: FeedEntry) -> Result<Self, Self::Error> {
        let host = entry.ip.trim().to_string();
        if host.is_empty() {
            return Err("missing ip".to_string());
        }
        let port: u16 = entry
            .port
            .trim()
            .parse()
            .map_err(|_| format!("invalid port {:?}", entry.port))?;
        let last_checked = Utc
            .timestamp_opt(entry.last_checked, 0)
            .single()
            .ok_or_else(|| format!("invalid lastChecked {}", entry.last_checked))?;

        Ok(ProxyRecord {
            id: entry.id,
            host,
            port,
            anonymity: entry.anonymity,
            asn: entry.asn,
            city: entry.city,
            country: entry.country,
            isp: entry.isp,
            org: entry.org,
            region: entry.region,
            protocols: entry.protocols,
            latency: entry.latency,
            response_time: entry.response_time,
            speed: entry.speed,
            working_percent: entry.working_percent,
            up_time: entry.up_time,
            up_time_success_count: entry.up_time_success_count,
            up_time_try_count: entry.up_time_try_count,
            google: entry.google,
            created_at: entry.created_at.unwrap_or_default(),
            last_checked,
            updated_at: None,
        })
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(match Option::<Port>::deserialize(deserializer)? {
        Some(Port::Text(s)) => s,
        Some(Port::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

/// Locate the JSON envelope inside `body` and parse it
///
/// Everything before the first `{` is discarded.
pub fn extract_payload(body: &[u8]) -> Result<FeedResponse, FetchError> {
    let start = body
        .iter()
        .position(|b| *b == b'{')
        .ok_or(FetchError::MissingPayload)?;
    Ok(serde_json::from_slice(&body[start..])?)
}

/// Convert an envelope into records, dropping entries that cannot be keyed
pub fn into_records(response: FeedResponse) -> Vec<ProxyRecord> {
    response
        .data
        .into_iter()
        .filter_map(|entry| {
            let raw = format!("{}:{}", entry.ip, entry.port);
            match ProxyRecord::try_from(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(entry = %raw, error = %e, "dropping malformed feed entry");
                    None
                }
            }
        })
        .collect()
}

/// HTTP client for the public proxy list
pub struct FeedClient {
    config: FeedConfig,
    client: Client,
}

impl FeedClient {
    /// Create a new feed client with default configuration
    pub fn new() -> Result<Self, FetchError> {
        Self::with_config(FeedConfig::default())
    }

    /// Create a new feed client with custom configuration
    pub fn with_config(config: FeedConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .default_headers(browser_headers())
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Query parameters for a request of `limit` records
    fn query(limit: usize) -> Vec<(&'static str, String)> {
        vec![
            ("protocols", PROTOCOL_FILTER.to_string()),
            ("limit", limit.to_string()),
            ("page", "1".to_string()),
            ("sort_by", "lastChecked".to_string()),
            ("sort_type", "desc".to_string()),
        ]
    }
}

#[async_trait]
impl ProxyFeed for FeedClient {
    async fn fetch(&self, limit: usize) -> Result<Vec<ProxyRecord>, FetchError> {
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&Self::query(limit))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let envelope = extract_payload(&body)?;
        debug!(
            total = envelope.total,
            page = envelope.page,
            limit = envelope.limit,
            entries = envelope.data.len(),
            "feed envelope received"
        );
        Ok(into_records(envelope))
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-GB,en-US;q=0.9,en;q=0.8"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
    headers
}
