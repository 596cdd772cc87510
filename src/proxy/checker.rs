//! Proxy checker module for validating SOCKS proxies

use crate::proxy::models::{ProxyRecord, ProxyType, ValidationOutcome};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Proxy as ReqwestProxy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Default timeout for each probe attempt in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of concurrent validations
const DEFAULT_CONCURRENCY: usize = 500;

/// Default URL to probe through the proxy
const DEFAULT_TEST_URL: &str = "http://httpbin.org/ip";

/// Decides whether a record is usable
#[async_trait]
pub trait ProxyValidator: Send + Sync {
    /// Never fails: every error is turned into `false`
    async fn validate(&self, record: &ProxyRecord) -> bool;
}

/// Configuration for the SOCKS checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each protocol attempt
    pub timeout: Duration,
    /// Maximum number of validations in flight
    pub concurrency: usize,
    /// URL to probe through the proxy
    pub test_url: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            test_url: DEFAULT_TEST_URL.to_string(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }
}

/// Live SOCKS checker
///
/// Non-SOCKS records pass without any network I/O. SOCKS records are probed
/// once per announced SOCKS protocol until one attempt succeeds.
#[derive(Debug, Clone, Default)]
pub struct ProxyChecker {
    config: CheckerConfig,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Probe the record through one protocol
    async fn attempt(&self, record: &ProxyRecord, proxy_type: ProxyType) -> Result<u64, String> {
        let start = Instant::now();
        let client = self
            .create_client(record, proxy_type)
            .map_err(|e| format!("client setup failed: {}", e))?;

        match tokio::time::timeout(self.config.timeout, client.get(&self.config.test_url).send())
            .await
        {
            Ok(Ok(response)) if response.status().is_success() => {
                Ok(start.elapsed().as_millis() as u64)
            }
            Ok(Ok(response)) => Err(format!("HTTP status: {}", response.status())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("timed out".to_string()),
        }
    }

    /// Create a reqwest client routed through the proxy
    fn create_client(
        &self,
        record: &ProxyRecord,
        proxy_type: ProxyType,
    ) -> reqwest::Result<Client> {
        // reqwest has no SOCKS4 connector; socks4 entries are dialed with the
        // SOCKS5 handshake.
        let proxy_url = match proxy_type {
            ProxyType::Socks4 | ProxyType::Socks5 => record.url(ProxyType::Socks5),
            ProxyType::Http | ProxyType::Https => record.url(ProxyType::Http),
        };

        Client::builder()
            .proxy(ReqwestProxy::all(&proxy_url)?)
            .timeout(self.config.timeout)
            .build()
    }
}

#[async_trait]
impl ProxyValidator for ProxyChecker {
    async fn validate(&self, record: &ProxyRecord) -> bool {
        let socks = record.socks_protocols();
        if socks.is_empty() {
            return true;
        }

        let key = record.key();
        for proxy_type in socks {
            match self.attempt(record, proxy_type).await {
                Ok(elapsed_ms) => {
                    debug!(proxy = %key, protocol = %proxy_type, elapsed_ms, "proxy validated");
                    return true;
                }
                Err(reason) => {
                    debug!(proxy = %key, protocol = %proxy_type, %reason, "probe failed");
                }
            }
        }

        false
    }
}

/// Bounded fan-out of a validator over a candidate set
///
/// The semaphore is shared by every call made through the same pool, so the
/// admission limit holds across overlapping batches too.
#[derive(Clone)]
pub struct ValidationPool {
    validator: Arc<dyn ProxyValidator>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl ValidationPool {
    pub fn new(validator: Arc<dyn ProxyValidator>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            validator,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    /// Pool over a live checker, sized by its configured concurrency
    pub fn for_checker(checker: ProxyChecker) -> Self {
        let concurrency = checker.config().concurrency;
        Self::new(Arc::new(checker), concurrency)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Validate every record, returning exactly one outcome per input
    ///
    /// Outcomes arrive in completion order and own their record.
    pub async fn validate_all(&self, records: Vec<ProxyRecord>) -> Vec<ValidationOutcome> {
        stream::iter(records)
            .map(|record| {
                let sem = Arc::clone(&self.semaphore);
                let validator = Arc::clone(&self.validator);
                async move {
                    // The permit is dropped on every path out of this block.
                    let _permit = match sem.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!(proxy = %record.key(), "validation pool closed");
                            return ValidationOutcome::invalid(record);
                        }
                    };
                    if validator.validate(&record).await {
                        ValidationOutcome::valid(record)
                    } else {
                        ValidationOutcome::invalid(record)
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await
    }
}
