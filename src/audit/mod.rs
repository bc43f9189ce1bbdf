//! Append-only, hash-chained audit store.
//!
//! Two interchangeable backends sit behind [`AuditStore`]: a JSONL file
//! (one event per line) and a SQLite database. Both serialize concurrent
//! `record` calls behind a single-writer lock (a hash chain invariant), and
//! both are durable by the time `record` returns.

#![allow(missing_docs)]

pub mod event;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod stats;

use chrono::{DateTime, Utc};

pub use event::{AuditAction, AuditEvent, AuditLevel};

use crate::core::errors::Result;

/// Optional filters for [`AuditStore::query`]. Records are returned in
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub level: Option<AuditLevel>,
    pub action: Option<AuditAction>,
    pub path_prefix: Option<String>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub(crate) fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(since) = self.since
            && event.time < since
        {
            return false;
        }
        if let Some(until) = self.until
            && event.time > until
        {
            return false;
        }
        if let Some(level) = self.level
            && event.level != level
        {
            return false;
        }
        if let Some(action) = self.action
            && event.action != action
        {
            return false;
        }
        if let Some(prefix) = &self.path_prefix
            && !event.path.starts_with(prefix.as_str())
        {
            return false;
        }
        true
    }
}

/// A record whose stored hash disagrees with its recomputed hash, or whose
/// `prev_hash` does not match the predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityViolation {
    /// 1-based record position (JSONL line number, SQLite rowid).
    pub record_id: i64,
    pub detail: String,
}

/// Contract shared by the JSONL and SQLite backends.
pub trait AuditStore: Send {
    /// Append an event: fills `prev_hash` from the chain tip, computes the
    /// event hash, and durably persists it. Returns the sealed event.
    fn record(&self, event: AuditEvent) -> Result<AuditEvent>;

    /// Fetch records matching the filter, in insertion order.
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>>;

    /// Walk the entire log and recompute the chain. Empty result = PASS.
    fn verify_integrity(&self) -> Result<Vec<IntegrityViolation>>;
}

/// Chain-walk shared by both backends: recompute every hash and check each
/// `prev_hash` against the predecessor.
pub(crate) fn verify_chain(events: &[AuditEvent]) -> Vec<IntegrityViolation> {
    let mut violations = Vec::new();
    let mut prev_hash = String::new();
    for (index, event) in events.iter().enumerate() {
        let record_id = i64::try_from(index).unwrap_or(i64::MAX) + 1;
        if event.prev_hash != prev_hash {
            violations.push(IntegrityViolation {
                record_id,
                detail: format!(
                    "prev_hash mismatch: stored {:?}, predecessor hash {:?}",
                    event.prev_hash, prev_hash
                ),
            });
        }
        match event.expected_hash() {
            Ok(expected) if expected == event.hash => {}
            Ok(expected) => {
                violations.push(IntegrityViolation {
                    record_id,
                    detail: format!("hash mismatch: stored {:?}, computed {expected:?}", event.hash),
                });
            }
            Err(err) => {
                violations.push(IntegrityViolation {
                    record_id,
                    detail: format!("unhashable record: {err}"),
                });
            }
        }
        prev_hash.clone_from(&event.hash);
    }
    violations
}
