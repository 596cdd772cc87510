//! Reconciliation store
//!
//! [`ChunkedStore`] owns the client-side batching: it splits reads and
//! writes into backend-sized chunks, merges partial read responses and
//! stamps commit times. Backends only move single chunks in and out of
//! their storage engine, so swapping the engine means changing the chunk
//! ceilings and the row marshalling, nothing else.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::StoreError;
use crate::proxy::models::ProxyRecord;
use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Storage engine holding the durable key -> record mapping
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Largest number of keys one read request may carry
    const READ_BATCH_SIZE: usize = 100;

    /// Largest number of records one write request may carry
    const WRITE_BATCH_SIZE: usize = 25;

    /// Create the table if it does not exist and wait until it is usable
    async fn ensure_table(&self) -> Result<(), StoreError>;

    /// Read the records stored under `keys`; missing keys are skipped
    async fn get_chunk(&self, keys: &[String]) -> Result<Vec<ProxyRecord>, StoreError>;

    /// Write one chunk, replacing any record with the same key
    async fn put_chunk(&self, records: &[ProxyRecord]) -> Result<(), StoreError>;
}

/// Batched access used by the reconciliation cycle
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Fetch every stored record among `keys`, keyed by natural key
    async fn batch_get(&self, keys: &[String])
        -> Result<HashMap<String, ProxyRecord>, StoreError>;

    /// Persist `records`, stamping their commit time
    ///
    /// Fails as a whole if any chunk fails; chunks written before the
    /// failure stay written.
    async fn batch_upsert(&self, records: &[ProxyRecord]) -> Result<(), StoreError>;
}

/// Chunking front-end over a [`StoreBackend`]
#[derive(Debug, Clone, Default)]
pub struct ChunkedStore<B> {
    backend: B,
}

impl<B: StoreBackend> ChunkedStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// One-time table bootstrap
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        self.backend.ensure_table().await
    }
}

#[async_trait]
impl<B: StoreBackend> ProxyStore for ChunkedStore<B> {
    async fn batch_get(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, ProxyRecord>, StoreError> {
        let mut result = HashMap::with_capacity(keys.len());

        for chunk in keys.chunks(B::READ_BATCH_SIZE) {
            let records = self.backend.get_chunk(chunk).await?;
            debug!(requested = chunk.len(), found = records.len(), "read chunk");
            for record in records {
                result.insert(record.key(), record);
            }
        }

        Ok(result)
    }

    async fn batch_upsert(&self, records: &[ProxyRecord]) -> Result<(), StoreError> {
        for chunk in records.chunks(B::WRITE_BATCH_SIZE) {
            // stored timestamps have second precision
            let now = Utc::now().trunc_subsecs(0);
            let stamped: Vec<ProxyRecord> = chunk
                .iter()
                .cloned()
                .map(|mut record| {
                    record.updated_at = Some(now);
                    record
                })
                .collect();

            self.backend.put_chunk(&stamped).await?;
            debug!(written = stamped.len(), "wrote chunk");
        }

        Ok(())
    }
}
