//! JSONL audit backend: one event per line, append-only.
//!
//! Lines are assembled in memory and written with a single `write_all`, then
//! flushed and fsynced before `record` returns: a successful append is
//! durable, and a tailing process never sees a partial line. The chain tip is
//! recovered by scanning the existing file at open.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::audit::{AuditEvent, AuditFilter, AuditStore, IntegrityViolation, verify_chain};
use crate::core::errors::{Result, SsgError};

struct Inner {
    file: File,
    last_hash: String,
}

/// Append-only JSONL audit store. The mutex is the single-writer guarantee
/// the hash chain requires.
pub struct JsonlAuditStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonlAuditStore {
    /// Open (or create) the log at `path`, recovering the chain tip from the
    /// last existing line.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SsgError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let last_hash = read_last_hash(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SsgError::io(path, source))?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, last_hash }),
        })
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<AuditEvent>> {
        // Hold the writer lock so a concurrent append cannot tear the tail.
        let _guard = self.inner.lock();
        read_events(&self.path)
    }
}

impl AuditStore for JsonlAuditStore {
    fn record(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        let mut inner = self.inner.lock();
        event.seal(&inner.last_hash)?;

        let line = serde_json::to_string(&event).map_err(|err| SsgError::AuditWriteFailed {
            details: format!("serialize: {err}"),
        })?;
        let payload = format!("{line}\n");

        inner
            .file
            .write_all(payload.as_bytes())
            .and_then(|()| inner.file.flush())
            .and_then(|()| inner.file.sync_data())
            .map_err(|err| SsgError::AuditWriteFailed {
                details: format!("append to {}: {err}", self.path.display()),
            })?;

        inner.last_hash.clone_from(&event.hash);
        Ok(event)
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        let events = self.read_all()?;
        let mut out: Vec<AuditEvent> = events
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn verify_integrity(&self) -> Result<Vec<IntegrityViolation>> {
        let events = self.read_all()?;
        Ok(verify_chain(&events))
    }
}

fn read_last_hash(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    let events = read_events(path)?;
    Ok(events.last().map(|e| e.hash.clone()).unwrap_or_default())
}

fn read_events(path: &Path) -> Result<Vec<AuditEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|source| SsgError::io(path, source))?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|source| SsgError::io(path, source))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent =
            serde_json::from_str(&line).map_err(|err| SsgError::Serialization {
                context: "audit jsonl",
                details: format!("{}: {err}", path.display()),
            })?;
        events.push(event);
    }
    Ok(events)
}
