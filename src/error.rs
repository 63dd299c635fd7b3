// Error taxonomy for the holding ledger
//
// Every failure that leaves the Mutation Gateway is one of four kinds:
// bad input, lost a race too many times, broken invariant, or storage trouble.
// All of them mean the enclosing transaction was rolled back.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the ledger core.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Rejected before any state changed.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Same-collector serialization kept failing after bounded retries.
    #[error("concurrent update conflict on collector {collector} after {attempts} attempt(s)")]
    ConcurrencyConflict { collector: String, attempts: u32 },

    /// A committed state would break a ledger invariant. Indicates a bug, not bad input.
    #[error("integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    /// Backend unavailable or aborted the transaction.
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Validation(_))
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, LedgerError::Integrity(_))
    }

    /// True when SQLite reported the database as locked or busy.
    pub(crate) fn is_busy(&self) -> bool {
        match self {
            LedgerError::Storage(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Which precondition a rejected request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("quantity must be positive, got {quantity}")]
    NonPositiveQuantity { quantity: i64 },

    #[error("price must not be negative, got {price}")]
    NegativePrice { price: Decimal },

    #[error("unknown collector @{handle}")]
    UnknownCollector { handle: String },

    #[error("unknown card '{name}'")]
    UnknownCard { name: String },

    #[error("unknown holding {holding_id}")]
    UnknownHolding { holding_id: String },

    #[error("holding {holding_id} already belongs to @{handle}")]
    AlreadyOwned { holding_id: String, handle: String },

    #[error("collector handle @{handle} is already taken")]
    DuplicateHandle { handle: String },

    #[error("card '{name}' already exists")]
    DuplicateCardName { name: String },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
}

/// Broken ledger invariants. Never clamped or ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    #[error(
        "collector {collector_id} totals would become negative ({total_cards} cards, value {total_value})"
    )]
    NegativeTotal {
        collector_id: String,
        total_cards: i64,
        total_value: Decimal,
    },

    #[error("audit entry for {action} on holding {holding_id} was not recorded")]
    AuditNotRecorded { action: String, holding_id: String },

    #[error("collector {collector_id} totals overflowed")]
    TotalsOverflow { collector_id: String },

    #[error("collector {collector_id} row disappeared during the transaction")]
    MissingCollector { collector_id: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
