//! SQLite audit backend: WAL-mode database, prepared statements, and the
//! same hash-chain contract as the JSONL store.
//!
//! The connection lives behind a mutex whose scope is the whole `record`
//! call: the chain tip must be read and advanced atomically with the insert.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};

use crate::audit::event::{AuditAction, AuditLevel};
use crate::audit::{AuditEvent, AuditFilter, AuditStore, IntegrityViolation, verify_chain};
use crate::core::config::RunMode;
use crate::core::errors::{Result, SsgError};

struct Inner {
    conn: Connection,
    last_hash: String,
}

/// SQLite-backed audit store.
pub struct SqliteAuditStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl SqliteAuditStore {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs,
    /// and recover the chain tip from the newest row.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SsgError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        let last_hash = conn
            .query_row(
                "SELECT hash FROM audit_log ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { conn, last_hash }),
        })
    }

    /// Path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<AuditEvent>> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare_cached(
            "SELECT time, level, action, path, root, mode, fields, prev_hash, hash
             FROM audit_log ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl AuditStore for SqliteAuditStore {
    fn record(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        let mut inner = self.inner.lock();
        event.seal(&inner.last_hash)?;

        let fields_json = serde_json::to_string(&event.fields)?;
        inner
            .conn
            .prepare_cached(
                "INSERT INTO audit_log (
                    time, level, action, path, root, mode, fields, prev_hash, hash
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            )?
            .execute(params![
                event
                    .time
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                event.level.label(),
                event.action.label(),
                event.path,
                event.root,
                event.mode.to_string(),
                fields_json,
                event.prev_hash,
                event.hash,
            ])
            .map_err(|err| SsgError::AuditWriteFailed {
                details: format!("insert into {}: {err}", self.path.display()),
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

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let time_raw: String = row.get(0)?;
    let level_raw: String = row.get(1)?;
    let action_raw: String = row.get(2)?;
    let mode_raw: String = row.get(5)?;
    let fields_raw: String = row.get(6)?;

    let time = chrono::DateTime::parse_from_rfc3339(&time_raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| to_sql_error(0, &e.to_string()))?;
    let level = AuditLevel::from_str(&level_raw).map_err(|e| to_sql_error(1, &e))?;
    let action = AuditAction::from_str(&action_raw).map_err(|e| to_sql_error(2, &e))?;
    let mode = RunMode::from_str(&mode_raw).map_err(|e| to_sql_error(5, &e))?;
    let fields = serde_json::from_str(&fields_raw).map_err(|e| to_sql_error(6, &e.to_string()))?;

    Ok(AuditEvent {
        time,
        level,
        action,
        path: row.get(3)?,
        root: row.get(4)?,
        mode,
        fields,
        prev_hash: row.get(7)?,
        hash: row.get(8)?,
    })
}

fn to_sql_error(column: usize, detail: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        detail.to_string().into(),
    )
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS audit_log (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            time      TEXT NOT NULL,
            level     TEXT NOT NULL,
            action    TEXT NOT NULL,
            path      TEXT NOT NULL,
            root      TEXT NOT NULL,
            mode      TEXT NOT NULL,
            fields    TEXT NOT NULL DEFAULT '{}',
            prev_hash TEXT NOT NULL,
            hash      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_time ON audit_log(time);
        CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(action);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SqliteAuditStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteAuditStore::open(&dir.path().join("audit.sqlite3")).unwrap();
        (dir, store)
    }

    fn plan_event(path: &str) -> AuditEvent {
        AuditEvent::new(
            AuditAction::Plan,
            AuditLevel::Info,
            RunMode::DryRun,
            path,
            "/tmp/r",
        )
        .with_field("size_bytes", serde_json::json!(42))
    }

    #[test]
    fn records_chain_and_round_trip() {
        let (_dir, store) = store();
        let first = store.record(plan_event("/tmp/r/a.tmp")).unwrap();
        let second = store.record(plan_event("/tmp/r/b.tmp")).unwrap();
        assert_eq!(second.prev_hash, first.hash);

        let all = store.query(&AuditFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], first);
        assert_eq!(all[1], second);
    }

    #[test]
    fn chain_tip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.sqlite3");

        let tip = {
            let store = SqliteAuditStore::open(&path).unwrap();
            store.record(plan_event("/tmp/r/a.tmp")).unwrap().hash
        };

        let store = SqliteAuditStore::open(&path).unwrap();
        let next = store.record(plan_event("/tmp/r/b.tmp")).unwrap();
        assert_eq!(next.prev_hash, tip);
        assert!(store.verify_integrity().unwrap().is_empty());
    }

    #[test]
    fn query_filters_apply() {
        let (_dir, store) = store();
        for i in 0..4 {
            store.record(plan_event(&format!("/tmp/r/f{i}.tmp"))).unwrap();
        }
        store
            .record(AuditEvent::new(
                AuditAction::Delete,
                AuditLevel::Warn,
                RunMode::Execute,
                "/tmp/r/f0.tmp",
                "/tmp/r",
            ))
            .unwrap();

        let warns = store
            .query(&AuditFilter {
                level: Some(AuditLevel::Warn),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(warns.len(), 1);
        assert_eq!(warns[0].action, AuditAction::Delete);

        let limited = store
            .query(&AuditFilter {
                limit: Some(2),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn verify_detects_tampered_row() {
        let (_dir, store) = store();
        for i in 0..3 {
            store.record(plan_event(&format!("/tmp/r/f{i}.tmp"))).unwrap();
        }
        assert!(store.verify_integrity().unwrap().is_empty());

        {
            let inner = store.inner.lock();
            inner
                .conn
                .execute(
                    "UPDATE audit_log SET path = '/tmp/r/forged.tmp' WHERE id = 2",
                    [],
                )
                .unwrap();
        }

        let violations = store.verify_integrity().unwrap();
        assert!(violations.iter().any(|v| v.record_id == 2));
    }

    #[test]
    fn wal_mode_is_active() {
        let (_dir, store) = store();
        let inner = store.inner.lock();
        let mode: String = inner
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert!(mode.eq_ignore_ascii_case("wal"));
    }

    #[test]
    fn fields_survive_round_trip() {
        let (_dir, store) = store();
        let sealed = store.record(plan_event("/tmp/r/a.tmp")).unwrap();
        let back = store.query(&AuditFilter::default()).unwrap();
        assert_eq!(back[0].fields, sealed.fields);
        assert_eq!(
            back[0].fields.get("size_bytes"),
            Some(&serde_json::json!(42))
        );
    }
}
