// ➕ Aggregate Maintainer - collector totals follow the holding ledger
//
// Every holding write computes a Delta and applies it to the owner's row
// inside the caller's transaction. The read-modify-write is guarded twice:
// the gateway holds SQLite's write lock (BEGIN IMMEDIATE) and the UPDATE is
// conditional on the row version it read.

use crate::db::decimal_column;
use crate::error::{IntegrityViolation, LedgerError, LedgerResult};
use crate::holding::Holding;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// TOTALS & DELTAS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub total_cards: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_value: Decimal,
}

impl Totals {
    pub const ZERO: Totals = Totals {
        total_cards: 0,
        total_value: Decimal::ZERO,
    };

    pub fn new(total_cards: i64, total_value: Decimal) -> Self {
        Totals {
            total_cards,
            total_value,
        }
    }

    /// Apply a delta. Refuses to produce negative totals.
    pub fn apply(&self, collector_id: &str, delta: Delta) -> Result<Totals, IntegrityViolation> {
        let overflow = || IntegrityViolation::TotalsOverflow {
            collector_id: collector_id.to_string(),
        };

        let total_cards = self.total_cards.checked_add(delta.cards).ok_or_else(overflow)?;
        let total_value = self.total_value.checked_add(delta.value).ok_or_else(overflow)?;

        if total_cards < 0 || (total_value.is_sign_negative() && !total_value.is_zero()) {
            return Err(IntegrityViolation::NegativeTotal {
                collector_id: collector_id.to_string(),
                total_cards,
                total_value,
            });
        }

        Ok(Totals {
            total_cards,
            total_value: money(total_value),
        })
    }
}

/// Signed change to a collector's totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delta {
    pub cards: i64,
    pub value: Decimal,
}

impl Delta {
    pub fn insert(holding: &Holding) -> Result<Self, IntegrityViolation> {
        Ok(Delta {
            cards: holding.quantity,
            value: holding.value()?,
        })
    }

    pub fn delete(holding: &Holding) -> Result<Self, IntegrityViolation> {
        Ok(Delta {
            cards: -holding.quantity,
            value: -holding.value()?,
        })
    }

    /// new - old, for an update that keeps the owner.
    pub fn update(old: &Holding, new: &Holding) -> Result<Self, IntegrityViolation> {
        let overflow = || IntegrityViolation::TotalsOverflow {
            collector_id: new.collector_id.clone(),
        };

        Ok(Delta {
            cards: new.quantity.checked_sub(old.quantity).ok_or_else(overflow)?,
            value: new.value()?.checked_sub(old.value()?).ok_or_else(overflow)?,
        })
    }
}

/// Totals after a mutation, tagged with the collector they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorTotals {
    pub collector_id: String,
    pub handle: String,
    #[serde(flatten)]
    pub totals: Totals,
}

/// Money keeps at least two fractional digits; extra precision is preserved.
pub fn money(value: Decimal) -> Decimal {
    if value.scale() < 2 {
        let mut scaled = value;
        scaled.rescale(2);
        scaled
    } else {
        value
    }
}

// ============================================================================
// MAINTENANCE (called by the Mutation Gateway inside its transaction)
// ============================================================================

pub(crate) fn on_insert(conn: &Connection, holding: &Holding) -> LedgerResult<CollectorTotals> {
    apply_delta(conn, &holding.collector_id, Delta::insert(holding)?)
}

pub(crate) fn on_delete(conn: &Connection, holding: &Holding) -> LedgerResult<CollectorTotals> {
    apply_delta(conn, &holding.collector_id, Delta::delete(holding)?)
}

/// Returns the new owner's totals and, when the owner changed, the previous owner's.
pub(crate) fn on_update(
    conn: &Connection,
    old: &Holding,
    new: &Holding,
) -> LedgerResult<(CollectorTotals, Option<CollectorTotals>)> {
    if old.collector_id == new.collector_id {
        let totals = apply_delta(conn, &new.collector_id, Delta::update(old, new)?)?;
        return Ok((totals, None));
    }

    let previous = apply_delta(conn, &old.collector_id, Delta::delete(old)?)?;
    let current = apply_delta(conn, &new.collector_id, Delta::insert(new)?)?;
    Ok((current, Some(previous)))
}

fn apply_delta(conn: &Connection, collector_id: &str, delta: Delta) -> LedgerResult<CollectorTotals> {
    let row = conn
        .query_row(
            "SELECT handle, total_cards, total_value, version FROM collectors WHERE id = ?1",
            [collector_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Totals::new(row.get(1)?, decimal_column(row, 2)?),
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    let (handle, current, version) = row.ok_or_else(|| IntegrityViolation::MissingCollector {
        collector_id: collector_id.to_string(),
    })?;

    let next = current.apply(collector_id, delta)?;
    write_totals(conn, collector_id, &handle, next, version)?;

    tracing::trace!(
        collector = %handle,
        cards = next.total_cards,
        value = %next.total_value,
        "totals updated"
    );

    Ok(CollectorTotals {
        collector_id: collector_id.to_string(),
        handle,
        totals: next,
    })
}

/// Version-guarded write. Zero rows changed means someone else wrote first.
fn write_totals(
    conn: &Connection,
    collector_id: &str,
    handle: &str,
    totals: Totals,
    expected_version: i64,
) -> LedgerResult<()> {
    let changed = conn.execute(
        "UPDATE collectors
         SET total_cards = ?1, total_value = ?2, version = version + 1
         WHERE id = ?3 AND version = ?4",
        params![
            totals.total_cards,
            totals.total_value.to_string(),
            collector_id,
            expected_version
        ],
    )?;

    if changed == 0 {
        return Err(LedgerError::ConcurrencyConflict {
            collector: handle.to_string(),
            attempts: 1,
        });
    }

    Ok(())
}

// ============================================================================
// VERIFICATION
// ============================================================================

/// Stored totals that disagree with the holdings they summarize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drift {
    pub collector_id: String,
    pub handle: String,
    pub stored: Totals,
    pub actual: Totals,
}

/// Sum a collector's holdings directly, ignoring the stored totals.
pub fn recompute_totals(conn: &Connection, collector_id: &str) -> LedgerResult<Totals> {
    let mut stmt =
        conn.prepare("SELECT quantity, price_paid FROM holdings WHERE collector_id = ?1")?;
    let rows = stmt
        .query_map([collector_id], |row| {
            Ok((row.get::<_, i64>(0)?, decimal_column(row, 1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let overflow = || IntegrityViolation::TotalsOverflow {
        collector_id: collector_id.to_string(),
    };

    let mut totals = Totals::ZERO;
    for (quantity, price_paid) in rows {
        let value = Decimal::from(quantity)
            .checked_mul(price_paid)
            .ok_or_else(overflow)?;
        totals.total_cards = totals.total_cards.checked_add(quantity).ok_or_else(overflow)?;
        totals.total_value = totals.total_value.checked_add(value).ok_or_else(overflow)?;
    }
    totals.total_value = money(totals.total_value);

    Ok(totals)
}

/// Every collector whose stored totals drift from its holdings. Empty means consistent.
pub fn verify_all(conn: &Connection) -> LedgerResult<Vec<Drift>> {
    let mut stmt = conn.prepare("SELECT id, handle, total_cards, total_value FROM collectors")?;
    let stored = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                Totals::new(row.get(2)?, decimal_column(row, 3)?),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut drifts = Vec::new();
    for (collector_id, handle, stored) in stored {
        let actual = recompute_totals(conn, &collector_id)?;
        if actual != stored {
            drifts.push(Drift {
                collector_id,
                handle,
                stored,
                actual,
            });
        }
    }

    Ok(drifts)
}
