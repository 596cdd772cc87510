//! Proxy Sync - proxy list reconciliation engine
//!
//! Periodically harvests a public proxy list, validates SOCKS proxies
//! concurrently and persists only the records that are new or changed.

pub mod config;
pub mod error;
pub mod proxy;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{Error, FetchError, Result, StoreError};
pub use proxy::*;
pub use service::{ProxySyncService, SchedulerConfig, SchedulerState};
pub use store::{ChunkedStore, MemoryBackend, ProxyStore, SqliteBackend, StoreBackend};
