//! In-memory store backend
//!
//! Nothing survives a restart, so every record looks new to the first cycle
//! of a fresh process. Used for tests and for runs that should not touch the
//! durable store.

use crate::error::StoreError;
use crate::proxy::models::ProxyRecord;
use crate::store::StoreBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Backend keeping records in a shared map
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<HashMap<String, ProxyRecord>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored records
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Look up a single record
    pub async fn get(&self, key: &str) -> Option<ProxyRecord> {
        self.inner.read().await.get(key).cloned()
    }

    /// Store a record as-is, without stamping a commit time
    pub async fn seed(&self, record: ProxyRecord) {
        self.inner.write().await.insert(record.key(), record);
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn ensure_table(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_chunk(&self, keys: &[String]) -> Result<Vec<ProxyRecord>, StoreError> {
        let map = self.inner.read().await;
        Ok(keys.iter().filter_map(|key| map.get(key).cloned()).collect())
    }

    async fn put_chunk(&self, records: &[ProxyRecord]) -> Result<(), StoreError> {
        let mut map = self.inner.write().await;
        for record in records {
            map.insert(record.key(), record.clone());
        }
        Ok(())
    }
}
