//! Reconciliation cycle and its scheduler
//!
//! A cycle fetches the feed (with retry), loads the stored versions of the
//! fetched keys, validates the candidates concurrently, classifies the valid
//! ones and writes back everything that is new or changed.
//!
//! The scheduler is a two-state machine:
//!
//! ```text
//!            start: run one cycle
//!                     │
//!        had effect   ▼   no effect
//!   ┌──────────── (outcome) ────────────┐
//!   ▼                                   ▼
//! Active { next_run } ── timer ──▶ cycle   Idle ── cancel ──▶ stop
//!   │
//!   └── cancel ──▶ stop
//! ```
//!
//! A failed cycle leaves the state as it was: an active scheduler re-arms for
//! the next interval, an idle one stays idle. Once idle, only cancellation
//! ends the loop; a stable feed is not polled again until restart.

use crate::error::{Error, FetchError, Result};
use crate::proxy::checker::ValidationPool;
use crate::proxy::diff::classify;
use crate::proxy::feed::ProxyFeed;
use crate::proxy::models::{ChangeClassification, CycleResult, ProxyRecord};
use crate::store::ProxyStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Default number of records requested per cycle
const DEFAULT_PROXY_LIMIT: usize = 500;

/// Default delay between effective cycles in seconds
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;

/// Default fetch attempts per cycle
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between fetch attempts in seconds
const DEFAULT_RETRY_DELAY_SECS: u64 = 3;

/// Configuration for the cycle scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub proxy_limit: usize,
    pub update_interval: Duration,
    /// Fetch attempts per cycle, the first one included
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            proxy_limit: DEFAULT_PROXY_LIMIT,
            update_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proxy_limit(mut self, limit: usize) -> Self {
        self.proxy_limit = limit;
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_retry(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = delay;
        self
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No timer armed; waiting for cancellation only
    Idle,
    /// Timer armed for the next cycle
    Active { next_run: Instant },
}

impl SchedulerState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SchedulerState::Idle)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SchedulerState::Active { .. })
    }
}

/// Fetch-validate-diff-persist engine with its scheduling loop
pub struct ProxySyncService {
    feed: Arc<dyn ProxyFeed>,
    store: Arc<dyn ProxyStore>,
    validation: ValidationPool,
    config: SchedulerConfig,
    state: SchedulerState,
}

impl ProxySyncService {
    pub fn new(
        feed: Arc<dyn ProxyFeed>,
        store: Arc<dyn ProxyStore>,
        validation: ValidationPool,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            feed,
            store,
            validation,
            config,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run cycles until `cancel` fires
    ///
    /// The first cycle runs immediately. Always returns
    /// [`Error::Cancelled`] once the token is cancelled, with the timer
    /// disarmed.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            limit = self.config.proxy_limit,
            interval = ?self.config.update_interval,
            "proxy sync service started"
        );

        let outcome = self.run_cycle().await;
        self.apply(outcome);

        loop {
            match self.state {
                SchedulerState::Idle => {
                    cancel.cancelled().await;
                    return self.stop();
                }
                SchedulerState::Active { next_run } => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return self.stop(),
                        _ = tokio::time::sleep_until(next_run) => {
                            let outcome = self.run_cycle().await;
                            self.apply(outcome);
                        }
                    }
                }
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.state = SchedulerState::Idle;
        info!("proxy sync service stopping");
        Err(Error::Cancelled)
    }

    /// Move the state machine according to a cycle outcome
    fn apply(&mut self, outcome: Result<CycleResult>) {
        let rearm = SchedulerState::Active {
            next_run: Instant::now() + self.config.update_interval,
        };

        match outcome {
            Ok(result) if result.had_effect => {
                info!(interval = ?self.config.update_interval, "update successful, next cycle scheduled");
                self.state = rearm;
            }
            Ok(_) => {
                info!("update had no changes, not scheduling next cycle");
                self.state = SchedulerState::Idle;
            }
            Err(e) => {
                error!(error = %e, "proxy update failed");
                if self.state.is_active() {
                    self.state = rearm;
                }
            }
        }
    }

    /// Run one reconciliation cycle
    pub async fn run_cycle(&self) -> Result<CycleResult> {
        let span = info_span!("cycle", id = %Uuid::new_v4());
        self.reconcile().instrument(span).await
    }

    async fn reconcile(&self) -> Result<CycleResult> {
        info!(limit = self.config.proxy_limit, "fetching proxies");
        let records = self.fetch_with_retry().await?;
        let mut result = CycleResult {
            fetched: records.len(),
            ..Default::default()
        };
        info!(fetched = result.fetched, "fetched proxies from feed");

        let keys: Vec<String> = records.iter().map(ProxyRecord::key).collect();
        let existing = self.store.batch_get(&keys).await?;

        let outcomes = self.validation.validate_all(records).await;

        let mut to_write = Vec::new();
        for outcome in outcomes {
            if !outcome.is_valid() {
                debug!(proxy = %outcome.record.key(), "skipping invalid proxy");
                continue;
            }
            result.validated += 1;

            let record = outcome.record;
            let change = classify(&record, existing.get(&record.key()));
            match change {
                ChangeClassification::New => result.new += 1,
                ChangeClassification::Changed => result.changed += 1,
                ChangeClassification::Unchanged => {}
            }
            if change.needs_write() {
                to_write.push(record);
            }
        }

        info!(
            validated = result.validated,
            invalid = result.fetched - result.validated,
            "validation finished"
        );

        if to_write.is_empty() {
            info!("no proxy updates needed");
            return Ok(result);
        }

        info!(
            total = to_write.len(),
            new = result.new,
            changed = result.changed,
            "updating proxies"
        );
        self.store.batch_upsert(&to_write).await?;

        result.persisted = to_write.len();
        result.had_effect = true;
        info!(persisted = result.persisted, "proxies updated");
        Ok(result)
    }

    /// Fetch the feed, retrying with a fixed delay
    pub async fn fetch_with_retry(&self) -> std::result::Result<Vec<ProxyRecord>, FetchError> {
        let max = self.config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            match self.feed.fetch(self.config.proxy_limit).await {
                Ok(records) => return Ok(records),
                Err(e) if attempt < max => {
                    warn!(
                        attempt,
                        max,
                        error = %e,
                        delay = ?self.config.retry_delay,
                        "failed to fetch proxies, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempts = max, error = %e, "failed to fetch proxies");
                    return Err(e);
                }
            }
        }
    }
}
