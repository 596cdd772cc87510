//! Change detection between an incoming record and its stored version
//!
//! Only a fixed subset of fields is compared. Fields outside that subset
//! (geo metadata, latency, try counts, ...) never make a record dirty on
//! their own.

use crate::proxy::models::{ChangeClassification, ProxyRecord};

/// Classify `incoming` against the stored record for the same key
pub fn classify(incoming: &ProxyRecord, existing: Option<&ProxyRecord>) -> ChangeClassification {
    match existing {
        None => ChangeClassification::New,
        Some(existing) if has_changed(existing, incoming) => ChangeClassification::Changed,
        Some(_) => ChangeClassification::Unchanged,
    }
}

fn has_changed(existing: &ProxyRecord, incoming: &ProxyRecord) -> bool {
    existing.last_checked != incoming.last_checked
        || existing.response_time != incoming.response_time
        || existing.up_time != incoming.up_time
        || existing.up_time_success_count != incoming.up_time_success_count
        || existing.speed != incoming.speed
        || existing.anonymity != incoming.anonymity
        || existing.protocols.len() != incoming.protocols.len()
}
