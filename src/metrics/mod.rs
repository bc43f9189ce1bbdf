//! Concurrent metrics registry: named counters and gauges.
//!
//! Injected at pipeline construction alongside the logger and audit store.
//! A disabled registry accepts every call and records nothing, so call sites
//! never branch on `metrics.enabled`.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

pub const FILES_SCANNED_TOTAL: &str = "files_scanned_total";
pub const FILES_DELETED_TOTAL: &str = "files_deleted_total";
pub const BYTES_FREED_TOTAL: &str = "bytes_freed_total";
pub const ELIGIBLE_FILES: &str = "eligible_files";
pub const ELIGIBLE_BYTES: &str = "eligible_bytes";
pub const LAST_RUN_TIMESTAMP_SECONDS: &str = "last_run_timestamp_seconds";

#[derive(Debug, Default)]
struct Inner {
    counters: BTreeMap<String, u64>,
    gauges: BTreeMap<String, f64>,
}

/// Shared counter/gauge registry. Clones share state.
#[derive(Clone)]
pub struct Metrics {
    enabled: bool,
    inner: Arc<Mutex<Inner>>,
}

impl Metrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// A registry that records nothing.
    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, delta: u64) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        *inner.counters.entry(name.to_string()).or_insert(0) += delta;
    }

    /// Increment a labeled counter, e.g. `decision_reason{reason="too_new"}`.
    pub fn incr_labeled(&self, name: &str, label: &str, value: &str) {
        self.add(&format!("{name}{{{label}=\"{value}\"}}"), 1);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        if !self.enabled {
            return;
        }
        self.inner.lock().gauges.insert(name.to_string(), value);
    }

    /// Stamp `last_run_timestamp_seconds` with the current wall clock.
    pub fn mark_run_finished(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64());
        self.set_gauge(LAST_RUN_TIMESTAMP_SECONDS, now);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.inner.lock().gauges.get(name).copied()
    }

    /// Render the registry in Prometheus text exposition format, sorted by
    /// metric name. The daemon host scrapes this verbatim.
    pub fn render_text(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();
        for (name, value) in &inner.counters {
            let _ = writeln!(out, "{name} {value}");
        }
        for (name, value) in &inner.gauges {
            let _ = writeln!(out, "{name} {value}");
        }
        out
    }
}
