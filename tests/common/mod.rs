//! Test doubles shared by the reconciliation contract tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use proxy_sync::{
    ChunkedStore, FetchError, MemoryBackend, ProxyFeed, ProxyRecord, ProxyStore, ProxySyncService,
    ProxyValidator, SchedulerConfig, StoreError, ValidationPool,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A record with deterministic tracked fields
pub fn record(host: &str, port: u16, protocols: &[&str]) -> ProxyRecord {
    let mut record = ProxyRecord::new(host, port, protocols);
    record.anonymity = "elite".to_string();
    record.response_time = 200;
    record.speed = 1;
    record.up_time = 95.0;
    record.up_time_success_count = 19;
    record.up_time_try_count = 20;
    record.last_checked = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    record
}

/// `count` records on consecutive ports starting at `first_port`
pub fn records(host: &str, first_port: u16, count: u16) -> Vec<ProxyRecord> {
    (first_port..first_port + count)
        .map(|port| record(host, port, &["http"]))
        .collect()
}

/// One scripted feed response
pub enum Step {
    Records(Vec<ProxyRecord>),
    Fail,
}

/// Feed replaying a script, then repeating `fallback` forever
pub struct ScriptedFeed {
    script: Mutex<VecDeque<Step>>,
    fallback: Vec<ProxyRecord>,
    calls: AtomicUsize,
    limits: Mutex<Vec<usize>>,
}

impl ScriptedFeed {
    pub fn new(script: Vec<Step>, fallback: Vec<ProxyRecord>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            limits: Mutex::new(Vec::new()),
        }
    }

    /// Always returns the same records
    pub fn fixed(records: Vec<ProxyRecord>) -> Self {
        Self::new(Vec::new(), records)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn limits(&self) -> Vec<usize> {
        self.limits.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProxyFeed for ScriptedFeed {
    async fn fetch(&self, limit: usize) -> Result<Vec<ProxyRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.limits.lock().unwrap().push(limit);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Records(records)) => Ok(records),
            Some(Step::Fail) => Err(FetchError::Status {
                status: 503,
                body: "unavailable".to_string(),
            }),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Validator rejecting a fixed set of keys
#[derive(Default)]
pub struct FakeValidator {
    invalid: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeValidator {
    pub fn rejecting(keys: &[String]) -> Self {
        Self {
            invalid: keys.iter().cloned().collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyValidator for FakeValidator {
    async fn validate(&self, record: &ProxyRecord) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        !self.invalid.contains(&record.key())
    }
}

/// Store over a memory backend that records calls and can be told to fail
#[derive(Default)]
pub struct RecordingStore {
    inner: ChunkedStore<MemoryBackend>,
    upserts: Mutex<Vec<Vec<ProxyRecord>>>,
    gets: AtomicUsize,
    fail_reads: bool,
    fail_writes: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Default::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    pub fn backend(&self) -> &MemoryBackend {
        self.inner.backend()
    }

    pub async fn seed(&self, records: &[ProxyRecord]) {
        for record in records {
            self.backend().seed(record.clone()).await;
        }
    }

    pub fn upserts(&self) -> Vec<Vec<ProxyRecord>> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyStore for RecordingStore {
    async fn batch_get(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, ProxyRecord>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(StoreError::backend("read failed"));
        }
        self.inner.batch_get(keys).await
    }

    async fn batch_upsert(&self, records: &[ProxyRecord]) -> Result<(), StoreError> {
        self.upserts.lock().unwrap().push(records.to_vec());
        if self.fail_writes {
            return Err(StoreError::backend("write failed"));
        }
        self.inner.batch_upsert(records).await
    }
}

pub const INTERVAL: Duration = Duration::from_secs(60);
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig::new()
        .with_proxy_limit(100)
        .with_update_interval(INTERVAL)
        .with_retry(3, RETRY_DELAY)
}

pub fn service(
    feed: Arc<ScriptedFeed>,
    store: Arc<RecordingStore>,
    validator: Arc<FakeValidator>,
) -> ProxySyncService {
    ProxySyncService::new(
        feed,
        store,
        ValidationPool::new(validator, 16),
        scheduler_config(),
    )
}
