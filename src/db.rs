use crate::error::ReviewResult;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How long a writer waits for a competing reviewer's write to finish
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Event for audit trail - every decision, override, reopen and link
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub record_type: String,
    pub record_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        record_type: &str,
        record_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            record_type: record_type.to_string(),
            record_id: record_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Open (or create) the review database at `path`
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery and concurrent readers
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            email TEXT UNIQUE NOT NULL,
            full_name TEXT,
            is_admin INTEGER NOT NULL DEFAULT 0,
            verified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // One table for all three kinds; (kind, id) is the storage key
    conn.execute(
        "CREATE TABLE IF NOT EXISTS entity_submissions (
            kind TEXT NOT NULL CHECK (kind IN ('institute', 'shop', 'product')),
            id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            domain TEXT CHECK (domain IS NULL OR domain IN ('education', 'healthcare')),
            category TEXT,
            location TEXT,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'approved', 'rejected')),
            agent_id TEXT,
            review_notes TEXT,
            reviewed_by TEXT,
            reviewed_at TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (kind, id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_status
         ON entity_submissions(kind, status, owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payment_requests (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            entity_type TEXT NOT NULL
                CHECK (entity_type IN ('shop', 'institute', 'hospital', 'marketplace')),
            entity_id TEXT,
            agent_id TEXT,
            amount TEXT NOT NULL,
            processing_fee TEXT,
            transaction_id TEXT NOT NULL,
            bank_name TEXT NOT NULL,
            account_number TEXT NOT NULL DEFAULT '',
            transaction_date TEXT NOT NULL,
            notes TEXT,
            screenshot_file TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'verified', 'rejected', 'completed')),
            verified_by TEXT,
            verified_at TEXT,
            verification_notes TEXT,
            needs_linkage INTEGER NOT NULL DEFAULT 0,
            fingerprint TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_filter
         ON payment_requests(status, entity_type, transaction_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_fingerprint
         ON payment_requests(fingerprint)",
        [],
    )?;

    // Append-only audit trail
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            event_id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            record_type TEXT NOT NULL,
            record_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_record ON events(record_type, record_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// WRITE HELPERS
// ============================================================================

/// Run `f` inside an IMMEDIATE transaction so the conditional status update
/// and its audit event commit together, and competing writers queue on the
/// busy timeout instead of failing on a stale snapshot.
pub fn with_write_tx<T, F>(conn: &Connection, f: F) -> ReviewResult<T>
where
    F: FnOnce(&Connection) -> ReviewResult<T>,
{
    let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Insert event into audit trail
pub fn record_event(conn: &Connection, event: &Event) -> ReviewResult<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, record_type, record_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            fmt_ts(&event.timestamp),
            event.event_type,
            event.record_type,
            event.record_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Audit history of one record, newest first
pub fn history(conn: &Connection, record_type: &str, record_id: &str) -> ReviewResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, record_type, record_id, data, actor
         FROM events
         WHERE record_type = ?1 AND record_id = ?2
         ORDER BY timestamp DESC, rowid DESC",
    )?;

    let events = stmt
        .query_map(params![record_type, record_id], |row| {
            let timestamp: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_ts(1, &timestamp)?,
                event_type: row.get(2)?,
                record_type: row.get(3)?,
                record_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| conversion_error(5, e.to_string()))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// COLUMN CODECS
// ============================================================================

/// Fixed-width UTC timestamps, so text order is time order
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, &v)).transpose()
}

/// Parse a text column through `FromStr`
pub(crate) fn parse_col<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| conversion_error(idx, format!("bad value '{}': {}", value, e)))
}

pub(crate) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('users', 'entity_submissions', 'payment_requests', 'events')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "payment_verified",
            "payment",
            "p-123",
            serde_json::json!({"notes": "ok"}),
            "admin-1",
        );
        record_event(&conn, &event).unwrap();

        let events = history(&conn, "payment", "p-123").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "payment_verified");
        assert_eq!(events[0].actor, "admin-1");
        assert_eq!(events[0].data["notes"], "ok");

        assert!(history(&conn, "payment", "other").unwrap().is_empty());
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 9, 23, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap();

        assert!(fmt_ts(&early) < fmt_ts(&late));
        assert_eq!(parse_ts(0, &fmt_ts(&late)).unwrap(), late);
        assert!(parse_ts(0, "yesterday").is_err());
    }

    #[test]
    fn test_write_tx_rolls_back_on_error() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let result: ReviewResult<()> = with_write_tx(&conn, |tx| {
            record_event(tx, &Event::new("x", "payment", "p-1", serde_json::json!({}), "a"))?;
            Err(crate::error::ReviewError::validation("abort"))
        });

        assert!(result.is_err());
        assert!(history(&conn, "payment", "p-1").unwrap().is_empty());
    }
}
