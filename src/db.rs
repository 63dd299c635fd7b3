use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Handle to the ledger database file.
///
/// Holds no open connection. Every worker calls [`Database::connect`] and owns
/// the resulting connection for the duration of its work, so transactions are
/// scoped to one connection and released on every exit path.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Database {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a configured connection. The file is created if absent.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open database {}", self.path.display()))?;
        configure_connection(&conn, self.busy_timeout)?;
        Ok(conn)
    }

    /// Open a connection and make sure the schema exists.
    pub fn open_and_migrate(&self) -> Result<Connection> {
        let conn = self.connect()?;
        if !schema_already_applied(&conn)? {
            tracing::info!(path = %self.path.display(), "applying schema");
        }
        setup_database(&conn)?;
        Ok(conn)
    }
}

/// Per-connection settings. SQLite keeps these per connection, not per file.
pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

pub fn schema_already_applied(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'collectors'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode so readers never block the writer
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Entity Store
    // total_value and money columns are TEXT decimals, never REAL
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS collectors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            handle TEXT UNIQUE NOT NULL,
            total_cards INTEGER NOT NULL DEFAULT 0 CHECK (total_cards >= 0),
            total_value TEXT NOT NULL DEFAULT '0.00',
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cards (
            id TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            card_type TEXT NOT NULL,
            rarity TEXT NOT NULL,
            average_price TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Holding Ledger
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS holdings (
            id TEXT PRIMARY KEY,
            collector_id TEXT NOT NULL REFERENCES collectors(id) ON DELETE CASCADE,
            card_id TEXT NOT NULL REFERENCES cards(id),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            price_paid TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Audit log (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collector_id TEXT NOT NULL,
            previous_collector_id TEXT,
            holding_id TEXT NOT NULL,
            action TEXT NOT NULL,
            message TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_holdings_collector ON holdings(collector_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_recorded ON audit_log(recorded_at, id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_collector ON audit_log(collector_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_previous_collector ON audit_log(previous_collector_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// COLUMN HELPERS
// ============================================================================

/// Read a TEXT column holding a decimal.
pub(crate) fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a TEXT column holding an RFC 3339 timestamp.
pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Fixed-width UTC form so lexical order in SQL matches time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!schema_already_applied(&conn).unwrap());

        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        assert!(schema_already_applied(&conn).unwrap());
    }

    #[test]
    fn test_timestamp_format_sorts_lexically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::microseconds(1);

        let a = format_timestamp(early);
        let b = format_timestamp(late);

        assert!(a < b);
        assert_eq!(a, "2024-01-02T03:04:05.000000Z");
        assert_eq!(parse_timestamp(&b).unwrap(), late);
    }

    #[test]
    fn test_file_database_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("ledger.db"));

        let conn = db.open_and_migrate().unwrap();
        assert!(schema_already_applied(&conn).unwrap());

        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }
}
