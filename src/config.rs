// ⚙️ Configuration - command line with environment fallbacks

use crate::db::Database;
use crate::gateway::{MutationGateway, RetryPolicy};
use crate::logging::LogFormat;
use crate::seed::SeedPlan;
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "card-ledger", version, about = "Card collection ledger with consistent totals and an audit trail")]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, env = "CARD_LEDGER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Where the ledger lives and how writers behave under contention.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    #[arg(long, env = "CARD_LEDGER_DB", default_value = "card-ledger.db")]
    pub db_path: PathBuf,

    /// How long a writer waits for the database lock per attempt
    #[arg(long, env = "CARD_LEDGER_BUSY_TIMEOUT_MS", default_value_t = 5_000)]
    pub busy_timeout_ms: u64,

    /// Attempts per mutation before a concurrency conflict is reported
    #[arg(long, env = "CARD_LEDGER_MAX_ATTEMPTS", default_value_t = 5,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    #[arg(long, env = "CARD_LEDGER_RETRY_BACKOFF_MS", default_value_t = 10)]
    pub retry_backoff_ms: u64,
}

impl StoreArgs {
    pub fn database(&self) -> Database {
        Database::new(&self.db_path).with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }

    pub fn gateway(&self) -> MutationGateway {
        MutationGateway::new().with_retry_policy(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        })
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create collectors and cards, record holdings, print the report (default)
    Seed(SeedArgs),
    /// Print collectors with totals and the audit log
    Report,
    /// Recompute every collector's totals from its holdings
    Verify,
    /// Record a new holding
    Record {
        handle: String,
        card: String,
        quantity: i64,
        price: Decimal,
    },
    /// Change quantity and price of a holding
    Update {
        holding_id: String,
        quantity: i64,
        price: Decimal,
    },
    /// Remove a holding
    Remove { holding_id: String },
    /// Move a holding to another collector
    Transfer { holding_id: String, handle: String },
    /// Delete a collector and all of its holdings
    RemoveCollector { handle: String },
}

#[derive(Debug, Clone, Args)]
pub struct SeedArgs {
    #[arg(long, env = "NUM_COLLECTORS", default_value_t = 5)]
    pub collectors: usize,

    #[arg(long, env = "NUM_NEW_CARDS", default_value_t = 1)]
    pub new_cards: usize,

    #[arg(long, env = "COLLECTION_MIN", default_value_t = 1)]
    pub collection_min: usize,

    #[arg(long, env = "COLLECTION_MAX", default_value_t = 3)]
    pub collection_max: usize,

    /// Seed for reproducible data
    #[arg(long, env = "SEED")]
    pub seed: Option<u64>,

    /// Attempts per unique name before giving up (default: max(n*10, 10))
    #[arg(long, env = "SEED_MAX_ATTEMPTS")]
    pub max_name_attempts: Option<usize>,
}

/// Parser for the no-subcommand case, so seed settings still come from the environment.
#[derive(Debug, Parser)]
#[command(name = "card-ledger")]
struct DefaultSeed {
    #[command(flatten)]
    args: SeedArgs,
}

impl SeedArgs {
    /// Seed settings with no flags given: environment, then defaults.
    pub fn from_env() -> Result<SeedArgs> {
        Ok(DefaultSeed::try_parse_from(["card-ledger"])?.args)
    }

    pub fn plan(&self) -> Result<SeedPlan> {
        if self.collection_max < self.collection_min {
            bail!(
                "COLLECTION_MAX ({}) must be greater than or equal to COLLECTION_MIN ({})",
                self.collection_max,
                self.collection_min
            );
        }

        let plan = SeedPlan {
            new_collectors: self.collectors,
            new_cards: self.new_cards,
            holdings_min: self.collection_min,
            holdings_max: self.collection_max,
            attempt_ceiling: self.max_name_attempts,
        };
        plan.validate()?;
        Ok(plan)
    }
}
