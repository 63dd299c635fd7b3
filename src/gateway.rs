// 🚪 Mutation Gateway - the only way to write the holding ledger
//
// Each operation is one IMMEDIATE transaction:
//
//   Requested → Validated → Applied → Aggregated → Audited → Committed
//        ↘ Rejected                 (any later stage) ↘ RolledBack
//
// The transaction guard rolls back on drop, so every early return (`?`)
// leaves no ledger row, no totals change and no audit entry behind.
//
// BEGIN IMMEDIATE takes SQLite's write lock for the whole file. Writers to
// different collectors therefore queue behind each other (bounded by the busy
// timeout per attempt) even though their totals never interact.

use crate::aggregate::{self, CollectorTotals};
use crate::audit::{self, AuditEntry, AuditEvent, Clock, SystemClock};
use crate::entities::{find_card_by_name, find_collector_by_handle, Collector};
use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::holding::{self, get_holding_view, holdings_for_collector, HoldingView};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CONFIGURATION & RESULTS
// ============================================================================

/// How hard to try before surfacing a concurrency conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Lifecycle of one mutation attempt. Logged, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Requested,
    Validated,
    Applied,
    Aggregated,
    Audited,
    Committed,
    Rejected,
    RolledBack,
}

/// What a successful mutation hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub holding_id: String,
    /// Totals of the collector that owns the holding after the mutation
    pub totals: CollectorTotals,
    /// Set only when a transfer moved the holding away from another collector
    pub previous_owner: Option<CollectorTotals>,
    pub audit_entry: AuditEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorRemoval {
    pub collector_id: String,
    pub handle: String,
    pub holdings_removed: usize,
    pub audit_entries: Vec<AuditEntry>,
}

// ============================================================================
// GATEWAY
// ============================================================================

#[derive(Debug, Clone)]
pub struct MutationGateway {
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl Default for MutationGateway {
    fn default() -> Self {
        MutationGateway::new()
    }
}

impl MutationGateway {
    pub fn new() -> Self {
        MutationGateway::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        MutationGateway {
            clock,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Record that a collector now holds `quantity` copies of a card.
    pub fn record_holding(
        &self,
        conn: &mut Connection,
        handle: &str,
        card_name: &str,
        quantity: i64,
        price_paid: Decimal,
    ) -> LedgerResult<Receipt> {
        check_amounts(quantity, price_paid)?;

        self.run(conn, "record_holding", handle, |tx| {
            let collector = require_collector(tx, handle)?;
            let card = find_card_by_name(tx, card_name)?.ok_or_else(|| {
                ValidationError::UnknownCard {
                    name: card_name.to_string(),
                }
            })?;
            trace_stage(Stage::Validated, "record_holding");

            let holding = holding::insert_holding(
                tx,
                &collector.id,
                &card.id,
                quantity,
                price_paid,
                self.clock.now(),
            )?;
            trace_stage(Stage::Applied, "record_holding");

            let totals = aggregate::on_insert(tx, &holding)?;
            trace_stage(Stage::Aggregated, "record_holding");

            let event = AuditEvent::added(&collector.handle, &card.name, &holding)?;
            let audit_entry = audit::append(tx, self.clock.as_ref(), event)?;
            trace_stage(Stage::Audited, "record_holding");

            Ok(Receipt {
                holding_id: holding.id,
                totals,
                previous_owner: None,
                audit_entry,
            })
        })
    }

    /// Replace quantity and price of an existing holding.
    pub fn update_holding(
        &self,
        conn: &mut Connection,
        holding_id: &str,
        new_quantity: i64,
        new_price_paid: Decimal,
    ) -> LedgerResult<Receipt> {
        check_amounts(new_quantity, new_price_paid)?;

        self.run(conn, "update_holding", holding_id, |tx| {
            let view = require_holding(tx, holding_id)?;
            trace_stage(Stage::Validated, "update_holding");

            let old = &view.holding;
            let new = holding::rewrite_holding(
                tx,
                old,
                &old.collector_id,
                new_quantity,
                new_price_paid,
                self.clock.now(),
            )?;
            trace_stage(Stage::Applied, "update_holding");

            let (totals, _) = aggregate::on_update(tx, old, &new)?;
            trace_stage(Stage::Aggregated, "update_holding");

            let event = AuditEvent::updated(&view.collector_handle, &view.card_name, old, &new);
            let audit_entry = audit::append(tx, self.clock.as_ref(), event)?;
            trace_stage(Stage::Audited, "update_holding");

            Ok(Receipt {
                holding_id: new.id,
                totals,
                previous_owner: None,
                audit_entry,
            })
        })
    }

    pub fn remove_holding(&self, conn: &mut Connection, holding_id: &str) -> LedgerResult<Receipt> {
        self.run(conn, "remove_holding", holding_id, |tx| {
            let view = require_holding(tx, holding_id)?;
            trace_stage(Stage::Validated, "remove_holding");

            let (totals, audit_entry) = remove_one(tx, self.clock.as_ref(), &view)?;

            Ok(Receipt {
                holding_id: view.holding.id,
                totals,
                previous_owner: None,
                audit_entry,
            })
        })
    }

    /// Move a holding to another collector. Both owners' totals change in the
    /// same transaction; one audit entry names both handles.
    pub fn transfer_holding(
        &self,
        conn: &mut Connection,
        holding_id: &str,
        new_owner_handle: &str,
    ) -> LedgerResult<Receipt> {
        self.run(conn, "transfer_holding", holding_id, |tx| {
            let view = require_holding(tx, holding_id)?;
            let new_owner = require_collector(tx, new_owner_handle)?;
            if new_owner.id == view.holding.collector_id {
                return Err(ValidationError::AlreadyOwned {
                    holding_id: holding_id.to_string(),
                    handle: new_owner.handle,
                }
                .into());
            }
            trace_stage(Stage::Validated, "transfer_holding");

            let old = &view.holding;
            let new = holding::rewrite_holding(
                tx,
                old,
                &new_owner.id,
                old.quantity,
                old.price_paid,
                self.clock.now(),
            )?;
            trace_stage(Stage::Applied, "transfer_holding");

            let (totals, previous_owner) = aggregate::on_update(tx, old, &new)?;
            trace_stage(Stage::Aggregated, "transfer_holding");

            let event = AuditEvent::transferred(
                &view.collector_handle,
                &new_owner.handle,
                &view.card_name,
                old,
                &new,
            );
            let audit_entry = audit::append(tx, self.clock.as_ref(), event)?;
            trace_stage(Stage::Audited, "transfer_holding");

            Ok(Receipt {
                holding_id: new.id,
                totals,
                previous_owner,
                audit_entry,
            })
        })
    }

    /// Delete a collector. Each holding goes through the normal removal path
    /// (totals down to zero, one audit entry each) before the row is deleted.
    pub fn remove_collector(&self, conn: &mut Connection, handle: &str) -> LedgerResult<CollectorRemoval> {
        self.run(conn, "remove_collector", handle, |tx| {
            let collector = require_collector(tx, handle)?;
            let holdings = holdings_for_collector(tx, &collector.id)?;
            trace_stage(Stage::Validated, "remove_collector");

            let mut audit_entries = Vec::with_capacity(holdings.len());
            for view in &holdings {
                let (_, entry) = remove_one(tx, self.clock.as_ref(), view)?;
                audit_entries.push(entry);
            }

            tx.execute("DELETE FROM collectors WHERE id = ?1", [&collector.id])?;

            Ok(CollectorRemoval {
                collector_id: collector.id,
                handle: collector.handle,
                holdings_removed: holdings.len(),
                audit_entries,
            })
        })
    }

    // ========================================================================
    // TRANSACTION DRIVER
    // ========================================================================

    /// Run `body` in its own IMMEDIATE transaction, retrying conflicts.
    fn run<T>(
        &self,
        conn: &mut Connection,
        operation: &'static str,
        subject: &str,
        mut body: impl FnMut(&Transaction<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!(operation, subject, attempt, stage = ?Stage::Requested, "mutation");

            match self.attempt(conn, &mut body) {
                Ok(value) => {
                    tracing::info!(operation, subject, attempt, stage = ?Stage::Committed, "mutation committed");
                    return Ok(value);
                }
                Err(err) if is_retryable(&err) && attempt < max_attempts => {
                    tracing::warn!(operation, subject, attempt, error = %err, "conflict, retrying");
                    std::thread::sleep(self.retry.backoff * attempt);
                }
                Err(err) => {
                    let err = if is_retryable(&err) {
                        LedgerError::ConcurrencyConflict {
                            collector: conflict_subject(&err, subject),
                            attempts: attempt,
                        }
                    } else {
                        err
                    };

                    if err.is_validation() {
                        tracing::debug!(operation, subject, stage = ?Stage::Rejected, error = %err, "mutation rejected");
                    } else {
                        tracing::warn!(operation, subject, stage = ?Stage::RolledBack, error = %err, "mutation rolled back");
                    }
                    return Err(err);
                }
            }
        }
    }

    fn attempt<T>(
        &self,
        conn: &mut Connection,
        body: &mut impl FnMut(&Transaction<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = body(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn check_amounts(quantity: i64, price_paid: Decimal) -> LedgerResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::NonPositiveQuantity { quantity }.into());
    }
    if price_paid.is_sign_negative() && !price_paid.is_zero() {
        return Err(ValidationError::NegativePrice { price: price_paid }.into());
    }
    Ok(())
}

fn require_collector(conn: &Connection, handle: &str) -> LedgerResult<Collector> {
    find_collector_by_handle(conn, handle)?.ok_or_else(|| {
        ValidationError::UnknownCollector {
            handle: handle.to_string(),
        }
        .into()
    })
}

fn require_holding(conn: &Connection, holding_id: &str) -> LedgerResult<HoldingView> {
    get_holding_view(conn, holding_id)?.ok_or_else(|| {
        ValidationError::UnknownHolding {
            holding_id: holding_id.to_string(),
        }
        .into()
    })
}

/// Delete + aggregate + audit for one holding, inside the caller's transaction.
fn remove_one(
    tx: &Transaction<'_>,
    clock: &dyn Clock,
    view: &HoldingView,
) -> LedgerResult<(CollectorTotals, AuditEntry)> {
    let removed = holding::delete_holding(tx, &view.holding.id)?;
    if removed == 0 {
        return Err(ValidationError::UnknownHolding {
            holding_id: view.holding.id.clone(),
        }
        .into());
    }
    trace_stage(Stage::Applied, "remove_holding");

    let totals = aggregate::on_delete(tx, &view.holding)?;
    trace_stage(Stage::Aggregated, "remove_holding");

    let event = AuditEvent::removed(&view.collector_handle, &view.card_name, &view.holding)?;
    let entry = audit::append(tx, clock, event)?;
    trace_stage(Stage::Audited, "remove_holding");

    Ok((totals, entry))
}

fn is_retryable(err: &LedgerError) -> bool {
    matches!(err, LedgerError::ConcurrencyConflict { .. }) || err.is_busy()
}

fn conflict_subject(err: &LedgerError, subject: &str) -> String {
    match err {
        LedgerError::ConcurrencyConflict { collector, .. } => collector.clone(),
        _ => subject.to_string(),
    }
}

fn trace_stage(stage: Stage, operation: &'static str) {
    tracing::trace!(operation, stage = ?stage, "stage reached");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{recompute_totals, verify_all, Totals};
    use crate::audit::{count_audit_entries, list_audit_entries, AuditAction, ManualClock};
    use crate::db::{setup_database, Database};
    use crate::entities::{get_collector, register_card, register_collector, Rarity};
    use crate::error::IntegrityViolation;
    use crate::holding::{count_holdings, get_holding};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Barrier;

    /// In-memory ledger with ash, misty and ghost plus the starter cards
    fn setup() -> (Connection, MutationGateway) {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        setup_database(&conn).unwrap();

        register_collector(&conn, "Ash Ketchum", "ash").unwrap();
        register_collector(&conn, "Misty", "misty").unwrap();
        register_collector(&conn, "Ghost", "ghost").unwrap();
        register_card(&conn, "Pikachu V", "Electric", Rarity::UltraRare, dec!(120.00)).unwrap();
        register_card(&conn, "Charizard GX", "Fire", Rarity::Secret, dec!(350.00)).unwrap();

        let start = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let gateway = MutationGateway::with_clock(Arc::new(ManualClock::new(start)));
        (conn, gateway)
    }

    fn totals_of(conn: &Connection, handle: &str) -> Totals {
        let collector = find_collector_by_handle(conn, handle).unwrap().unwrap();
        Totals::new(collector.total_cards, collector.total_value)
    }

    // ------------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------------

    #[test]
    fn test_record_update_remove_scenario() {
        let (mut conn, gateway) = setup();

        // A: first holding
        let recorded = gateway
            .record_holding(&mut conn, "ash", "Pikachu V", 3, dec!(120.00))
            .unwrap();
        assert_eq!(recorded.totals.totals, Totals::new(3, dec!(360.00)));
        assert_eq!(recorded.totals.handle, "ash");
        assert_eq!(count_audit_entries(&conn).unwrap(), 1);
        let first = &list_audit_entries(&conn).unwrap()[0];
        assert!(first.message.contains("ash"));
        assert!(first.message.contains("Pikachu V"));

        // B: update quantity and price
        let updated = gateway
            .update_holding(&mut conn, &recorded.holding_id, 5, dec!(100.00))
            .unwrap();
        assert_eq!(updated.totals.totals, Totals::new(5, dec!(500.00)));
        assert_eq!(count_audit_entries(&conn).unwrap(), 2);
        assert_eq!(updated.audit_entry.action, AuditAction::Update);
        assert!(updated.audit_entry.message.contains("quantity 3 -> 5"));

        // C: remove
        let removed = gateway.remove_holding(&mut conn, &recorded.holding_id).unwrap();
        assert_eq!(removed.totals.totals, Totals::ZERO);
        assert_eq!(removed.totals.totals.total_value.to_string(), "0.00");
        assert_eq!(count_audit_entries(&conn).unwrap(), 3);

        let ash = find_collector_by_handle(&conn, "ash").unwrap().unwrap();
        assert!(holdings_for_collector(&conn, &ash.id).unwrap().is_empty());
        assert_eq!(totals_of(&conn, "ash"), Totals::ZERO);
    }

    #[test]
    fn test_unknown_card_is_rejected_without_side_effects() {
        let (mut conn, gateway) = setup();

        // D
        let err = gateway
            .record_holding(&mut conn, "ghost", "Unknown Card", 1, dec!(10.00))
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::UnknownCard { .. })
        ));
        assert_eq!(totals_of(&conn, "ghost"), Totals::ZERO);
        assert_eq!(count_audit_entries(&conn).unwrap(), 0);
        assert_eq!(count_holdings(&conn).unwrap(), 0);
    }

    #[test]
    fn test_validation_rejections() {
        let (mut conn, gateway) = setup();

        let zero = gateway
            .record_holding(&mut conn, "ash", "Pikachu V", 0, dec!(1))
            .unwrap_err();
        assert!(matches!(
            zero,
            LedgerError::Validation(ValidationError::NonPositiveQuantity { quantity: 0 })
        ));

        let negative_price = gateway
            .record_holding(&mut conn, "ash", "Pikachu V", 1, dec!(-0.01))
            .unwrap_err();
        assert!(matches!(
            negative_price,
            LedgerError::Validation(ValidationError::NegativePrice { .. })
        ));

        let unknown_collector = gateway
            .record_holding(&mut conn, "gary", "Pikachu V", 1, dec!(1))
            .unwrap_err();
        assert!(matches!(
            unknown_collector,
            LedgerError::Validation(ValidationError::UnknownCollector { .. })
        ));

        let unknown_holding = gateway.remove_holding(&mut conn, "nope").unwrap_err();
        assert!(matches!(
            unknown_holding,
            LedgerError::Validation(ValidationError::UnknownHolding { .. })
        ));

        let recorded = gateway
            .record_holding(&mut conn, "ash", "Pikachu V", 2, dec!(10))
            .unwrap();
        let bad_update = gateway
            .update_holding(&mut conn, &recorded.holding_id, -1, dec!(10))
            .unwrap_err();
        assert!(bad_update.is_validation());

        // Only the one successful mutation was audited
        assert_eq!(count_audit_entries(&conn).unwrap(), 1);
        assert_eq!(totals_of(&conn, "ash"), Totals::new(2, dec!(20)));
    }

    #[test]
    fn test_audit_count_matches_successful_mutations() {
        let (mut conn, gateway) = setup();
        let mut successes = 0;

        let a = gateway
            .record_holding(&mut conn, "ash", "Pikachu V", 1, dec!(10))
            .unwrap();
        successes += 1;
        let b = gateway
            .record_holding(&mut conn, "misty", "Charizard GX", 2, dec!(300))
            .unwrap();
        successes += 1;
        gateway.update_holding(&mut conn, &a.holding_id, 4, dec!(12.50)).unwrap();
        successes += 1;
        assert!(gateway
            .record_holding(&mut conn, "ash", "Mew", 1, dec!(1))
            .is_err());
        gateway.remove_holding(&mut conn, &b.holding_id).unwrap();
        successes += 1;
        assert!(gateway.remove_holding(&mut conn, &b.holding_id).is_err());

        assert_eq!(count_audit_entries(&conn).unwrap(), successes);
        assert!(verify_all(&conn).unwrap().is_empty());
    }

    // ------------------------------------------------------------------------
    // Integrity & rollback
    // ------------------------------------------------------------------------

    #[test]
    fn test_negative_total_guard_leaves_state_untouched() {
        let (mut conn, gateway) = setup();
        let recorded = gateway
            .record_holding(&mut conn, "ash", "Pikachu V", 3, dec!(10.00))
            .unwrap();

        // Corrupt the stored totals behind the gateway's back
        conn.execute(
            "UPDATE collectors SET total_cards = 1, total_value = '10.00' WHERE handle = 'ash'",
            [],
        )
        .unwrap();

        let err = gateway.remove_holding(&mut conn, &recorded.holding_id).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Integrity(IntegrityViolation::NegativeTotal { total_cards: -2, .. })
        ));

        // Nothing moved: holding still there, totals as corrupted, no new audit entry
        assert!(get_holding(&conn, &recorded.holding_id).unwrap().is_some());
        assert_eq!(totals_of(&conn, "ash"), Totals::new(1, dec!(10.00)));
        assert_eq!(count_audit_entries(&conn).unwrap(), 1);

        let shrink = gateway
            .update_holding(&mut conn, &recorded.holding_id, 1, dec!(10.00))
            .unwrap_err();
        assert!(shrink.is_integrity());
        assert_eq!(get_holding(&conn, &recorded.holding_id).unwrap().unwrap().quantity, 3);
    }

    #[test]
    fn test_value_overflow_is_integrity_error_and_rolls_back() {
        let (mut conn, gateway) = setup();

        let err = gateway
            .record_holding(&mut conn, "ash", "Pikachu V", i64::MAX, dec!(100000000000))
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Integrity(IntegrityViolation::TotalsOverflow { .. })
        ));
        assert_eq!(count_holdings(&conn).unwrap(), 0);
        assert_eq!(count_audit_entries(&conn).unwrap(), 0);
        assert_eq!(totals_of(&conn, "ash"), Totals::ZERO);
    }

    #[test]
    fn test_storage_failure_rolls_back_every_stage() {
        let (mut conn, gateway) = setup();
        conn.execute_batch("DROP TABLE audit_log").unwrap();

        let err = gateway
            .record_holding(&mut conn, "ash", "Pikachu V", 3, dec!(120.00))
            .unwrap_err();

        assert!(matches!(err, LedgerError::Storage(_)));
        assert_eq!(count_holdings(&conn).unwrap(), 0);
        assert_eq!(totals_of(&conn, "ash"), Totals::ZERO);
    }

    // ------------------------------------------------------------------------
    // Transfers & collector removal
    // ------------------------------------------------------------------------

    #[test]
    fn test_transfer_moves_totals_between_owners() {
        let (mut conn, gateway) = setup();
        let recorded = gateway
            .record_holding(&mut conn, "ash", "Charizard GX", 2, dec!(300.00))
            .unwrap();
        gateway
            .record_holding(&mut conn, "misty", "Pikachu V", 1, dec!(100.00))
            .unwrap();

        let receipt = gateway
            .transfer_holding(&mut conn, &recorded.holding_id, "@Misty")
            .unwrap();

        assert_eq!(receipt.totals.handle, "misty");
        assert_eq!(receipt.totals.totals, Totals::new(3, dec!(700.00)));
        let previous = receipt.previous_owner.unwrap();
        assert_eq!(previous.handle, "ash");
        assert_eq!(previous.totals, Totals::ZERO);

        assert_eq!(receipt.audit_entry.action, AuditAction::Transfer);
        assert!(receipt.audit_entry.message.contains("from @ash to @misty"));

        // The transfer shows up for both owners
        let ash = find_collector_by_handle(&conn, "ash").unwrap().unwrap();
        assert_eq!(receipt.audit_entry.previous_collector_id.as_deref(), Some(ash.id.as_str()));
        let ash_entries = audit::audit_entries_for_collector(&conn, &ash.id).unwrap();
        assert_eq!(ash_entries.len(), 2);
        assert_eq!(ash_entries[1].action, AuditAction::Transfer);
        assert_eq!(count_audit_entries(&conn).unwrap(), 3);
        assert!(verify_all(&conn).unwrap().is_empty());

        let same = gateway
            .transfer_holding(&mut conn, &recorded.holding_id, "misty")
            .unwrap_err();
        assert!(matches!(
            same,
            LedgerError::Validation(ValidationError::AlreadyOwned { .. })
        ));
    }

    #[test]
    fn test_remove_collector_audits_each_holding() {
        let (mut conn, gateway) = setup();
        gateway
            .record_holding(&mut conn, "ash", "Pikachu V", 3, dec!(120.00))
            .unwrap();
        gateway
            .record_holding(&mut conn, "ash", "Charizard GX", 1, dec!(350.00))
            .unwrap();
        gateway
            .record_holding(&mut conn, "misty", "Pikachu V", 1, dec!(99.00))
            .unwrap();
        let ash_id = find_collector_by_handle(&conn, "ash").unwrap().unwrap().id;

        let removal = gateway.remove_collector(&mut conn, "ash").unwrap();

        assert_eq!(removal.holdings_removed, 2);
        assert_eq!(removal.audit_entries.len(), 2);
        assert!(removal
            .audit_entries
            .iter()
            .all(|e| e.action == AuditAction::Delete && e.collector_id == ash_id));
        assert_eq!(count_audit_entries(&conn).unwrap(), 5);
        assert!(get_collector(&conn, &ash_id).unwrap().is_none());
        assert_eq!(count_holdings(&conn).unwrap(), 1);
        assert_eq!(totals_of(&conn, "misty"), Totals::new(1, dec!(99.00)));
    }

    // ------------------------------------------------------------------------
    // Concurrency (file-backed, one connection per thread)
    // ------------------------------------------------------------------------

    fn file_ledger(dir: &tempfile::TempDir) -> Database {
        let db = Database::new(dir.path().join("ledger.db"));
        let conn = db.open_and_migrate().unwrap();
        register_collector(&conn, "Ash Ketchum", "ash").unwrap();
        register_collector(&conn, "Misty", "misty").unwrap();
        register_card(&conn, "Pikachu V", "Electric", Rarity::UltraRare, dec!(120.00)).unwrap();
        db
    }

    #[test]
    fn test_concurrent_writers_lose_no_updates() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_ledger(&dir);
        let gateway = MutationGateway::new().with_retry_policy(RetryPolicy {
            max_attempts: 20,
            backoff: Duration::from_millis(5),
        });

        const WRITERS: i64 = 50;
        let barrier = Barrier::new(WRITERS as usize);

        std::thread::scope(|scope| {
            for i in 0..WRITERS {
                let (db, gateway, barrier) = (&db, &gateway, &barrier);
                scope.spawn(move || {
                    let mut conn = db.connect().unwrap();
                    barrier.wait();
                    gateway
                        .record_holding(&mut conn, "ash", "Pikachu V", i % 4 + 1, dec!(1.25))
                        .unwrap();
                });
            }
        });

        let expected_cards: i64 = (0..WRITERS).map(|i| i % 4 + 1).sum();
        let conn = db.connect().unwrap();
        let ash = find_collector_by_handle(&conn, "ash").unwrap().unwrap();

        assert_eq!(ash.total_cards, expected_cards);
        assert_eq!(ash.total_value, Decimal::from(expected_cards) * dec!(1.25));
        assert_eq!(recompute_totals(&conn, &ash.id).unwrap().total_cards, expected_cards);
        assert_eq!(count_audit_entries(&conn).unwrap(), WRITERS);
    }

    #[test]
    fn test_collectors_are_independent_under_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_ledger(&dir);
        let gateway = MutationGateway::new().with_retry_policy(RetryPolicy {
            max_attempts: 20,
            backoff: Duration::from_millis(5),
        });

        std::thread::scope(|scope| {
            for (handle, quantity) in [("ash", 1), ("misty", 2)] {
                for _ in 0..10 {
                    let (db, gateway) = (&db, &gateway);
                    scope.spawn(move || {
                        let mut conn = db.connect().unwrap();
                        let receipt = gateway
                            .record_holding(&mut conn, handle, "Pikachu V", quantity, dec!(2.00))
                            .unwrap();
                        assert_eq!(receipt.totals.handle, handle);
                    });
                }
            }
        });

        let conn = db.connect().unwrap();
        assert_eq!(totals_of(&conn, "ash"), Totals::new(10, dec!(20.00)));
        assert_eq!(totals_of(&conn, "misty"), Totals::new(20, dec!(40.00)));
        assert!(verify_all(&conn).unwrap().is_empty());

        let ash = find_collector_by_handle(&conn, "ash").unwrap().unwrap();
        let entries = audit::audit_entries_for_collector(&conn, &ash.id).unwrap();
        assert_eq!(entries.len(), 10);
        assert!(entries.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at && w[0].id < w[1].id));
    }

    #[test]
    fn test_timed_out_attempt_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_ledger(&dir).with_busy_timeout(Duration::from_millis(20));
        let gateway = MutationGateway::new().with_retry_policy(RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        });

        // Another writer holds the lock for the whole attempt
        let mut blocker = db.connect().unwrap();
        let lock = blocker
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();

        let mut conn = db.connect().unwrap();
        let err = gateway
            .record_holding(&mut conn, "ash", "Pikachu V", 1, dec!(1))
            .unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrencyConflict { attempts: 2, .. }));

        lock.rollback().unwrap();

        assert_eq!(totals_of(&conn, "ash"), Totals::ZERO);
        assert_eq!(count_audit_entries(&conn).unwrap(), 0);
        assert_eq!(count_holdings(&conn).unwrap(), 0);
    }
}
