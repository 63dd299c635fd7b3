// 📜 Audit Recorder - one entry per committed holding mutation
//
// Entries are appended inside the mutation's own transaction, so a rollback
// takes the entry with it. recorded_at never goes backwards in insertion
// order, even if the clock does.

use crate::aggregate::money;
use crate::db::{format_timestamp, parse_timestamp, timestamp_column};
use crate::error::{IntegrityViolation, LedgerResult};
use crate::holding::Holding;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

// ============================================================================
// CLOCK
// ============================================================================

/// Source of audit timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// ACTIONS & EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    Insert,
    Update,
    Transfer,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Insert => "INSERT",
            AuditAction::Update => "UPDATE",
            AuditAction::Transfer => "TRANSFER",
            AuditAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(AuditAction::Insert),
            "UPDATE" => Ok(AuditAction::Update),
            "TRANSFER" => Ok(AuditAction::Transfer),
            "DELETE" => Ok(AuditAction::Delete),
            other => Err(format!("unknown audit action '{}'", other)),
        }
    }
}

/// What happened, before it gets a timestamp and an id.
/// Messages depend only on the fields, never on time or ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub collector_id: String,
    /// Owner before a transfer; `None` for every other action
    pub previous_collector_id: Option<String>,
    pub holding_id: String,
    pub message: String,
}

impl AuditEvent {
    pub fn added(handle: &str, card_name: &str, holding: &Holding) -> Result<Self, IntegrityViolation> {
        Ok(AuditEvent {
            action: AuditAction::Insert,
            collector_id: holding.collector_id.clone(),
            previous_collector_id: None,
            holding_id: holding.id.clone(),
            message: format!(
                "@{} added {}x '{}' at {} each (value {})",
                handle,
                holding.quantity,
                card_name,
                money(holding.price_paid),
                money(holding.value()?),
            ),
        })
    }

    pub fn updated(handle: &str, card_name: &str, old: &Holding, new: &Holding) -> Self {
        AuditEvent {
            action: AuditAction::Update,
            collector_id: new.collector_id.clone(),
            previous_collector_id: None,
            holding_id: new.id.clone(),
            message: format!(
                "@{} updated '{}': quantity {} -> {}, price paid {} -> {}",
                handle,
                card_name,
                old.quantity,
                new.quantity,
                money(old.price_paid),
                money(new.price_paid),
            ),
        }
    }

    /// Filed under the new owner, with the old owner kept alongside.
    pub fn transferred(
        from_handle: &str,
        to_handle: &str,
        card_name: &str,
        old: &Holding,
        new: &Holding,
    ) -> Self {
        AuditEvent {
            action: AuditAction::Transfer,
            collector_id: new.collector_id.clone(),
            previous_collector_id: Some(old.collector_id.clone()),
            holding_id: new.id.clone(),
            message: format!(
                "{}x '{}' at {} each moved from @{} to @{}",
                new.quantity,
                card_name,
                money(new.price_paid),
                from_handle,
                to_handle,
            ),
        }
    }

    pub fn removed(handle: &str, card_name: &str, holding: &Holding) -> Result<Self, IntegrityViolation> {
        Ok(AuditEvent {
            action: AuditAction::Delete,
            collector_id: holding.collector_id.clone(),
            previous_collector_id: None,
            holding_id: holding.id.clone(),
            message: format!(
                "@{} removed {}x '{}' bought at {} each (value {})",
                handle,
                holding.quantity,
                card_name,
                money(holding.price_paid),
                money(holding.value()?),
            ),
        })
    }
}

// ============================================================================
// AUDIT ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub collector_id: String,
    pub previous_collector_id: Option<String>,
    pub holding_id: String,
    pub action: AuditAction,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

const AUDIT_COLUMNS: &str =
    "id, collector_id, holding_id, action, message, recorded_at, previous_collector_id";

impl AuditEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
        let action: String = row.get(3)?;
        Ok(AuditEntry {
            id: row.get(0)?,
            collector_id: row.get(1)?,
            holding_id: row.get(2)?,
            action: action.parse().map_err(|_| {
                rusqlite::Error::InvalidColumnType(3, "action".to_string(), rusqlite::types::Type::Text)
            })?,
            message: row.get(4)?,
            recorded_at: timestamp_column(row, 5)?,
            previous_collector_id: row.get(6)?,
        })
    }
}

/// Append one entry. Must run inside the mutation's transaction.
pub(crate) fn append(conn: &Connection, clock: &dyn Clock, event: AuditEvent) -> LedgerResult<AuditEntry> {
    let last: Option<String> = conn
        .query_row(
            "SELECT recorded_at FROM audit_log ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    // Stored precision is microseconds
    let mut recorded_at = clock.now().trunc_subsecs(6);
    if let Some(last) = last.as_deref().and_then(|raw| parse_timestamp(raw).ok()) {
        if last > recorded_at {
            recorded_at = last;
        }
    }

    let inserted = conn.execute(
        "INSERT INTO audit_log (collector_id, previous_collector_id, holding_id, action, message, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.collector_id,
            event.previous_collector_id,
            event.holding_id,
            event.action.as_str(),
            event.message,
            format_timestamp(recorded_at),
        ],
    )?;

    if inserted != 1 {
        return Err(IntegrityViolation::AuditNotRecorded {
            action: event.action.to_string(),
            holding_id: event.holding_id,
        }
        .into());
    }

    Ok(AuditEntry {
        id: conn.last_insert_rowid(),
        collector_id: event.collector_id,
        previous_collector_id: event.previous_collector_id,
        holding_id: event.holding_id,
        action: event.action,
        message: event.message,
        recorded_at,
    })
}

// ============================================================================
// READBACK
// ============================================================================

/// Whole log, oldest first (id breaks timestamp ties).
pub fn list_audit_entries(conn: &Connection) -> LedgerResult<Vec<AuditEntry>> {
    let sql = format!(
        "SELECT {} FROM audit_log ORDER BY recorded_at, id",
        AUDIT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map([], AuditEntry::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Entries filed under a collector, including transfers away from it.
pub fn audit_entries_for_collector(conn: &Connection, collector_id: &str) -> LedgerResult<Vec<AuditEntry>> {
    let sql = format!(
        "SELECT {} FROM audit_log
         WHERE collector_id = ?1 OR previous_collector_id = ?1
         ORDER BY recorded_at, id",
        AUDIT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map([collector_id], AuditEntry::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub fn count_audit_entries(conn: &Connection) -> LedgerResult<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
    Ok(count)
}
