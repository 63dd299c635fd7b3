// Card Ledger - Core Library
// Collector totals that always match the holding ledger, plus an audit trail.
// Exposes all modules for use in CLI, API server, and tests

pub mod db;
pub mod error;
pub mod entities;  // Entity Store: collectors + cards
pub mod holding;   // Holding Ledger: the collector ↔ card join
pub mod aggregate; // Aggregate Maintainer: total_cards / total_value
pub mod audit;     // Audit Recorder: one entry per committed mutation
pub mod gateway;   // Mutation Gateway: the only write path
pub mod seed;
pub mod report;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use db::{configure_connection, schema_already_applied, setup_database, Database};
pub use error::{IntegrityViolation, LedgerError, LedgerResult, ValidationError};
pub use entities::{
    find_card_by_name, find_collector_by_handle, get_collector, list_cards, list_collectors,
    register_card, register_collector, Card, Collector, Rarity,
};
pub use holding::{get_holding, get_holding_view, holdings_for_collector, Holding, HoldingView};
pub use aggregate::{recompute_totals, verify_all, CollectorTotals, Drift, Totals};
pub use audit::{
    audit_entries_for_collector, list_audit_entries, AuditAction, AuditEntry, Clock, ManualClock,
    SystemClock,
};
pub use gateway::{CollectorRemoval, MutationGateway, Receipt, RetryPolicy, Stage};
pub use seed::{SeedError, SeedPlan, SeedSummary, Seeder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
