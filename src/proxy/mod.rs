//! Proxy module for fetching, validating and diffing proxies
//!
//! This module provides functionality for:
//! - Fetching the proxy list from the upstream feed
//! - Checking SOCKS proxies with bounded concurrency
//! - Deciding whether an incoming record differs from its stored version

pub mod checker;
pub mod diff;
pub mod feed;
pub mod models;

pub use checker::{CheckerConfig, ProxyChecker, ProxyValidator, ValidationPool};
pub use diff::classify;
pub use feed::{FeedClient, FeedConfig, ProxyFeed};
pub use models::{ChangeClassification, CycleResult, ProxyRecord, ProxyType, ValidationOutcome};
