// 📒 Holding Ledger - the collector ↔ card join
//
// Row-level reads are public. Writes are crate-private: the only caller is
// the Mutation Gateway, which wraps them with the aggregate and audit steps.

use crate::db::{decimal_column, format_timestamp, new_id, timestamp_column};
use crate::error::{IntegrityViolation, LedgerResult};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub id: String,
    pub collector_id: String,
    pub card_id: String,
    pub quantity: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_paid: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Holding {
    /// quantity * price_paid, or `TotalsOverflow` past `Decimal::MAX`.
    pub fn value(&self) -> Result<Decimal, IntegrityViolation> {
        Decimal::from(self.quantity)
            .checked_mul(self.price_paid)
            .ok_or_else(|| IntegrityViolation::TotalsOverflow {
                collector_id: self.collector_id.clone(),
            })
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Holding> {
        Ok(Holding {
            id: row.get(0)?,
            collector_id: row.get(1)?,
            card_id: row.get(2)?,
            quantity: row.get(3)?,
            price_paid: decimal_column(row, 4)?,
            created_at: timestamp_column(row, 5)?,
            updated_at: timestamp_column(row, 6)?,
        })
    }
}

/// Holding joined with the names the audit log and reports need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingView {
    pub holding: Holding,
    pub collector_handle: String,
    pub card_name: String,
}

const HOLDING_COLUMNS: &str =
    "h.id, h.collector_id, h.card_id, h.quantity, h.price_paid, h.created_at, h.updated_at";

pub fn get_holding(conn: &Connection, holding_id: &str) -> LedgerResult<Option<Holding>> {
    let sql = format!("SELECT {} FROM holdings h WHERE h.id = ?1", HOLDING_COLUMNS);
    let holding = conn
        .query_row(&sql, [holding_id], Holding::from_row)
        .optional()?;
    Ok(holding)
}

pub fn get_holding_view(conn: &Connection, holding_id: &str) -> LedgerResult<Option<HoldingView>> {
    let sql = format!(
        "SELECT {}, c.handle, k.name
         FROM holdings h
         JOIN collectors c ON c.id = h.collector_id
         JOIN cards k ON k.id = h.card_id
         WHERE h.id = ?1",
        HOLDING_COLUMNS
    );
    let view = conn
        .query_row(&sql, [holding_id], |row| {
            Ok(HoldingView {
                holding: Holding::from_row(row)?,
                collector_handle: row.get(7)?,
                card_name: row.get(8)?,
            })
        })
        .optional()?;
    Ok(view)
}

/// Holdings of one collector, oldest first.
pub fn holdings_for_collector(conn: &Connection, collector_id: &str) -> LedgerResult<Vec<HoldingView>> {
    let sql = format!(
        "SELECT {}, c.handle, k.name
         FROM holdings h
         JOIN collectors c ON c.id = h.collector_id
         JOIN cards k ON k.id = h.card_id
         WHERE h.collector_id = ?1
         ORDER BY h.created_at, h.id",
        HOLDING_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let views = stmt
        .query_map([collector_id], |row| {
            Ok(HoldingView {
                holding: Holding::from_row(row)?,
                collector_handle: row.get(7)?,
                card_name: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(views)
}

pub fn count_holdings(conn: &Connection) -> LedgerResult<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM holdings", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// WRITES (Mutation Gateway only)
// ============================================================================

pub(crate) fn insert_holding(
    conn: &Connection,
    collector_id: &str,
    card_id: &str,
    quantity: i64,
    price_paid: Decimal,
    now: DateTime<Utc>,
) -> LedgerResult<Holding> {
    // Stored precision is microseconds
    let now = now.trunc_subsecs(6);
    let holding = Holding {
        id: new_id(),
        collector_id: collector_id.to_string(),
        card_id: card_id.to_string(),
        quantity,
        price_paid,
        created_at: now,
        updated_at: now,
    };

    conn.execute(
        "INSERT INTO holdings (id, collector_id, card_id, quantity, price_paid, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            holding.id,
            holding.collector_id,
            holding.card_id,
            holding.quantity,
            holding.price_paid.to_string(),
            format_timestamp(now),
        ],
    )?;

    Ok(holding)
}

/// Overwrite quantity, price and owner. Returns the row as stored.
pub(crate) fn rewrite_holding(
    conn: &Connection,
    old: &Holding,
    collector_id: &str,
    quantity: i64,
    price_paid: Decimal,
    now: DateTime<Utc>,
) -> LedgerResult<Holding> {
    let now = now.trunc_subsecs(6);
    conn.execute(
        "UPDATE holdings
         SET collector_id = ?1, quantity = ?2, price_paid = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            collector_id,
            quantity,
            price_paid.to_string(),
            format_timestamp(now),
            old.id,
        ],
    )?;

    Ok(Holding {
        collector_id: collector_id.to_string(),
        quantity,
        price_paid,
        updated_at: now,
        ..old.clone()
    })
}

pub(crate) fn delete_holding(conn: &Connection, holding_id: &str) -> LedgerResult<usize> {
    let removed = conn.execute("DELETE FROM holdings WHERE id = ?1", [holding_id])?;
    Ok(removed)
}
