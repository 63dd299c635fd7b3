// 🧑 Collector Entity - Stable identity + denormalized totals
//
// Handle is the human key (unique), id is the stable foreign key.
// total_cards / total_value are owned by the aggregate module; nothing in
// this file writes them except the zero defaults at registration.

use crate::db::{decimal_column, format_timestamp, new_id, timestamp_column};
use crate::error::{LedgerResult, ValidationError};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// COLLECTOR ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collector {
    /// Stable identity (UUID)
    pub id: String,

    /// Display name
    pub name: String,

    /// Unique handle, shown as @handle
    pub handle: String,

    /// Σ quantity over this collector's holdings
    pub total_cards: i64,

    /// Σ quantity * price_paid over this collector's holdings
    #[serde(with = "rust_decimal::serde::str")]
    pub total_value: Decimal,

    /// Bumped on every totals write; used as an optimistic check
    pub version: i64,

    pub created_at: DateTime<Utc>,
}

const COLLECTOR_COLUMNS: &str =
    "id, name, handle, total_cards, total_value, version, created_at";

impl Collector {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Collector> {
        Ok(Collector {
            id: row.get(0)?,
            name: row.get(1)?,
            handle: row.get(2)?,
            total_cards: row.get(3)?,
            total_value: decimal_column(row, 4)?,
            version: row.get(5)?,
            created_at: timestamp_column(row, 6)?,
        })
    }
}

// ============================================================================
// REGISTRATION & LOOKUPS
// ============================================================================

/// Register a new collector with zero totals.
pub fn register_collector(conn: &Connection, name: &str, handle: &str) -> LedgerResult<Collector> {
    let name = name.trim();
    let handle = normalize_handle(handle);

    if name.is_empty() {
        return Err(ValidationError::EmptyField { field: "name" }.into());
    }
    if handle.is_empty() {
        return Err(ValidationError::EmptyField { field: "handle" }.into());
    }
    if find_collector_by_handle(conn, &handle)?.is_some() {
        return Err(ValidationError::DuplicateHandle { handle }.into());
    }

    let collector = Collector {
        id: new_id(),
        name: name.to_string(),
        handle,
        total_cards: 0,
        total_value: Decimal::ZERO,
        version: 1,
        created_at: Utc::now().trunc_subsecs(6),
    };

    conn.execute(
        "INSERT INTO collectors (id, name, handle, total_cards, total_value, version, created_at)
         VALUES (?1, ?2, ?3, 0, '0.00', 1, ?4)",
        params![
            collector.id,
            collector.name,
            collector.handle,
            format_timestamp(collector.created_at),
        ],
    )?;

    tracing::debug!(handle = %collector.handle, id = %collector.id, "collector registered");
    Ok(collector)
}

pub fn find_collector_by_handle(conn: &Connection, handle: &str) -> LedgerResult<Option<Collector>> {
    let sql = format!("SELECT {} FROM collectors WHERE handle = ?1", COLLECTOR_COLUMNS);
    let collector = conn
        .query_row(&sql, [normalize_handle(handle)], Collector::from_row)
        .optional()?;
    Ok(collector)
}

pub fn get_collector(conn: &Connection, collector_id: &str) -> LedgerResult<Option<Collector>> {
    let sql = format!("SELECT {} FROM collectors WHERE id = ?1", COLLECTOR_COLUMNS);
    let collector = conn
        .query_row(&sql, [collector_id], Collector::from_row)
        .optional()?;
    Ok(collector)
}

/// All collectors ordered by name (handle breaks ties).
pub fn list_collectors(conn: &Connection) -> LedgerResult<Vec<Collector>> {
    let sql = format!(
        "SELECT {} FROM collectors ORDER BY name, handle",
        COLLECTOR_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let collectors = stmt
        .query_map([], Collector::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(collectors)
}

pub fn collector_handles(conn: &Connection) -> LedgerResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT handle FROM collectors ORDER BY handle")?;
    let handles = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(handles)
}

/// Handles are case-insensitive and written without the leading '@'.
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::error::LedgerError;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_register_and_lookup() {
        let conn = setup();
        let ash = register_collector(&conn, "Ash Ketchum", "ash").unwrap();

        assert_eq!(ash.total_cards, 0);
        assert_eq!(ash.total_value, Decimal::ZERO);

        let found = find_collector_by_handle(&conn, "@ASH").unwrap().unwrap();
        assert_eq!(found.id, ash.id);
        assert_eq!(found.name, "Ash Ketchum");

        let by_id = get_collector(&conn, &ash.id).unwrap().unwrap();
        assert_eq!(by_id, ash);
    }

    #[test]
    fn test_duplicate_handle_rejected() {
        let conn = setup();
        register_collector(&conn, "Ash Ketchum", "ash").unwrap();

        let err = register_collector(&conn, "Another Ash", "@Ash").unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::DuplicateHandle { .. })
        ));
    }

    #[test]
    fn test_empty_fields_rejected() {
        let conn = setup();
        let err = register_collector(&conn, "  ", "misty").unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::EmptyField { field: "name" })
        ));
    }

    #[test]
    fn test_list_ordered_by_name() {
        let conn = setup();
        register_collector(&conn, "Misty", "misty").unwrap();
        register_collector(&conn, "Brock", "brock").unwrap();
        register_collector(&conn, "Ash", "ash").unwrap();

        let names: Vec<String> = list_collectors(&conn)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();

        assert_eq!(names, vec!["Ash", "Brock", "Misty"]);
    }
}
