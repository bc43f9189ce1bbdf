//! Aggregate statistics over the audit log, backing `sage stats`.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::audit::{AuditAction, AuditEvent};

/// Aggregates computed from a full (or filtered) event slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditStats {
    pub total: u64,
    pub by_action: BTreeMap<String, u64>,
    pub by_level: BTreeMap<String, u64>,
    /// Reason-tag histogram across plan and execute events.
    pub by_reason: BTreeMap<String, u64>,
    pub bytes_freed: u64,
    pub files_deleted: u64,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
}

impl AuditStats {
    /// The `limit` most frequent reasons, ties broken alphabetically.
    #[must_use]
    pub fn top_reasons(&self, limit: usize) -> Vec<(String, u64)> {
        let mut reasons: Vec<(String, u64)> = self
            .by_reason
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        reasons.truncate(limit);
        reasons
    }
}

/// Fold a slice of events (insertion order) into aggregates.
#[must_use]
pub fn compute(events: &[AuditEvent]) -> AuditStats {
    let mut stats = AuditStats::default();
    for event in events {
        stats.total += 1;
        *stats
            .by_action
            .entry(event.action.label().to_string())
            .or_insert(0) += 1;
        *stats
            .by_level
            .entry(event.level.label().to_string())
            .or_insert(0) += 1;

        for key in ["decision_reason", "safety_reason", "result_reason"] {
            if let Some(serde_json::Value::String(reason)) = event.fields.get(key) {
                *stats.by_reason.entry(reason.clone()).or_insert(0) += 1;
            }
        }

        if event.action == AuditAction::Delete {
            if let Some(freed) = event.fields.get("bytes_freed").and_then(serde_json::Value::as_u64)
            {
                stats.bytes_freed += freed;
            }
            if event
                .fields
                .get("deleted")
                .and_then(serde_json::Value::as_bool)
                == Some(true)
            {
                stats.files_deleted += 1;
            }
        }

        stats.first_time = Some(stats.first_time.map_or(event.time, |t| t.min(event.time)));
        stats.last_time = Some(stats.last_time.map_or(event.time, |t| t.max(event.time)));
    }
    stats
}
