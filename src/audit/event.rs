//! Audit event model, canonical serialization, and the hash chain.
//!
//! `hash = SHA-256(canonical(event) || prev_hash)`, hex-encoded. The
//! canonical form is a deterministic JSON object: fields in alphabetical
//! order, `fields` as a sorted map, the timestamp as RFC 3339 UTC with
//! millisecond precision. The hash fields themselves are not part of the
//! canonical form.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::config::RunMode;
use crate::core::errors::Result;

/// What the event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Plan,
    Delete,
    Skip,
    Error,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Delete => "delete",
            Self::Skip => "skip",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plan" => Ok(Self::Plan),
            "delete" => Ok(Self::Delete),
            "skip" => Ok(Self::Skip),
            "error" => Ok(Self::Error),
            other => Err(format!("invalid action {other:?}")),
        }
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl AuditLevel {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for AuditLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("invalid level {other:?}")),
        }
    }
}

/// One appended audit record. `prev_hash`/`hash` are empty until the store
/// seals the event at `record` time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub time: DateTime<Utc>,
    pub level: AuditLevel,
    pub action: AuditAction,
    pub path: String,
    pub root: String,
    pub mode: RunMode,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub prev_hash: String,
    #[serde(default)]
    pub hash: String,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        level: AuditLevel,
        mode: RunMode,
        path: &str,
        root: &str,
    ) -> Self {
        // Millisecond precision, matching the canonical form. An event must
        // hash identically after a round trip through either store.
        let now = Utc::now();
        let time = now
            .with_nanosecond(now.nanosecond() / 1_000_000 * 1_000_000)
            .unwrap_or(now);
        Self {
            time,
            level,
            action,
            path: path.to_string(),
            root: root.to_string(),
            mode,
            fields: BTreeMap::new(),
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    /// Attach a detail field (reason tags, byte counts, verdict data).
    #[must_use]
    pub fn with_field(mut self, key: &str, value: serde_json::Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Deterministic serialization of the hashed portion of the event.
    pub fn canonical_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            action: &'a AuditAction,
            fields: &'a BTreeMap<String, serde_json::Value>,
            level: &'a AuditLevel,
            mode: &'a RunMode,
            path: &'a str,
            root: &'a str,
            time: String,
        }
        let canonical = Canonical {
            action: &self.action,
            fields: &self.fields,
            level: &self.level,
            mode: &self.mode,
            path: &self.path,
            root: &self.root,
            time: self.time.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        Ok(serde_json::to_string(&canonical)?)
    }

    /// Fill `prev_hash` and compute this event's own hash. Called by stores
    /// under their single-writer lock.
    pub fn seal(&mut self, prev_hash: &str) -> Result<()> {
        self.prev_hash = prev_hash.to_string();
        self.hash = self.expected_hash()?;
        Ok(())
    }

    /// Recompute the hash this event should carry given its current content
    /// and `prev_hash`.
    pub fn expected_hash(&self) -> Result<String> {
        let canonical = self.canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hasher.update(self.prev_hash.as_bytes());
        Ok(hex_encode(&hasher.finalize()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> AuditEvent {
        AuditEvent::new(
            AuditAction::Plan,
            AuditLevel::Info,
            RunMode::DryRun,
            "/tmp/r/old.tmp",
            "/tmp/r",
        )
        .with_field("decision_reason", serde_json::json!("age_ok"))
        .with_field("size_bytes", serde_json::json!(100))
    }

    #[test]
    fn canonical_json_has_sorted_keys() {
        let json = event().canonical_json().unwrap();
        let action_pos = json.find("\"action\"").unwrap();
        let fields_pos = json.find("\"fields\"").unwrap();
        let time_pos = json.find("\"time\"").unwrap();
        assert!(action_pos < fields_pos && fields_pos < time_pos);
        // Hash fields are not part of the canonical form.
        assert!(!json.contains("prev_hash"));
        assert!(!json.contains("\"hash\""));
    }

    #[test]
    fn canonical_json_is_deterministic() {
        let e = event();
        assert_eq!(e.canonical_json().unwrap(), e.canonical_json().unwrap());
    }

    #[test]
    fn seal_chains_on_prev_hash() {
        let mut first = event();
        first.seal("").unwrap();
        assert_eq!(first.prev_hash, "");
        assert_eq!(first.hash.len(), 64);
        assert!(first.hash.chars().all(|c| c.is_ascii_hexdigit()));

        let mut second = event();
        second.seal(&first.hash).unwrap();
        assert_eq!(second.prev_hash, first.hash);
        assert_ne!(second.hash, first.hash);
    }

    #[test]
    fn expected_hash_detects_tampering() {
        let mut e = event();
        e.seal("").unwrap();
        let sealed_hash = e.hash.clone();

        e.path = "/tmp/r/other.tmp".to_string();
        assert_ne!(e.expected_hash().unwrap(), sealed_hash);
    }

    #[test]
    fn same_content_same_prev_hash_same_hash() {
        let mut a = event();
        let mut b = a.clone();
        a.seal("abc").unwrap();
        b.seal("abc").unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn serde_round_trip_preserves_event() {
        let mut e = event();
        e.seal("").unwrap();
        let line = serde_json::to_string(&e).unwrap();
        let back: AuditEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, e);
        assert_eq!(back.expected_hash().unwrap(), back.hash);
    }

    #[test]
    fn action_and_level_parse() {
        assert_eq!("plan".parse::<AuditAction>().unwrap(), AuditAction::Plan);
        assert_eq!("DELETE".parse::<AuditAction>().unwrap(), AuditAction::Delete);
        assert!("purge".parse::<AuditAction>().is_err());
        assert_eq!("warn".parse::<AuditLevel>().unwrap(), AuditLevel::Warn);
    }
}
