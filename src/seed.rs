// 🌱 Seeder - synthetic collectors, cards and holdings
//
// Glue around the ledger core: everything here goes through the public
// registration functions and the Mutation Gateway, exactly like any other
// caller would.

use crate::entities::{
    card_names, collector_handles, find_card_by_name, register_card, register_collector, Rarity,
};
use crate::error::LedgerError;
use crate::gateway::MutationGateway;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    /// The bounded-retry generator ran out of attempts.
    #[error("could not generate a unique {what} after {attempts} attempts; request fewer")]
    Exhausted { what: &'static str, attempts: usize },

    #[error("no cards available to build collections from")]
    EmptyCatalog,

    #[error("invalid seed plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// ============================================================================
// STARTER CATALOG & WORD LISTS
// ============================================================================

pub struct StarterCard {
    pub name: &'static str,
    pub card_type: &'static str,
    pub rarity: Rarity,
    /// Average price in cents
    pub average_cents: i64,
}

pub const STARTER_CARDS: [StarterCard; 4] = [
    StarterCard { name: "Pikachu V", card_type: "Electric", rarity: Rarity::UltraRare, average_cents: 12_000 },
    StarterCard { name: "Charizard GX", card_type: "Fire", rarity: Rarity::Secret, average_cents: 35_000 },
    StarterCard { name: "Blastoise EX", card_type: "Water", rarity: Rarity::Rare, average_cents: 20_000 },
    StarterCard { name: "Gengar VMAX", card_type: "Ghost", rarity: Rarity::UltraRare, average_cents: 28_000 },
];

const CARD_TYPES: [&str; 7] = ["Fire", "Water", "Electric", "Grass", "Psychic", "Ghost", "Dragon"];
const CARD_SUFFIXES: [&str; 4] = ["GX", "V", "EX", "VMAX"];
const CARD_WORDS: [&str; 24] = [
    "Ember", "Tide", "Spark", "Thorn", "Mystic", "Shadow", "Wyrm", "Frost", "Gale", "Quartz",
    "Blaze", "Coral", "Volt", "Moss", "Rune", "Shade", "Scale", "Glacier", "Zephyr", "Onyx",
    "Cinder", "Ripple", "Static", "Bramble",
];

const FIRST_NAMES: [&str; 20] = [
    "Ana", "Bruno", "Carla", "Diego", "Elisa", "Fabio", "Giulia", "Hugo", "Isabela", "Joao",
    "Larissa", "Marcos", "Natalia", "Otavio", "Paula", "Rafael", "Sofia", "Thiago", "Vitoria",
    "Yuri",
];
const LAST_NAMES: [&str; 16] = [
    "Almeida", "Barbosa", "Costa", "Dias", "Ferreira", "Gomes", "Lima", "Martins", "Nunes",
    "Oliveira", "Pereira", "Ribeiro", "Santos", "Souza", "Teixeira", "Vieira",
];

// ============================================================================
// UNIQUE VALUE GENERATION
// ============================================================================

/// Keep calling `make` until it returns something not in `taken`.
/// Gives up with [`SeedError::Exhausted`] after `ceiling` tries.
pub fn generate_unique(
    taken: &HashSet<String>,
    ceiling: usize,
    what: &'static str,
    mut make: impl FnMut() -> String,
) -> Result<String, SeedError> {
    for _ in 0..ceiling {
        let candidate = make();
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(SeedError::Exhausted {
        what,
        attempts: ceiling,
    })
}

/// Default attempt ceiling for generating `wanted` unique values.
pub fn default_ceiling(wanted: usize) -> usize {
    (wanted * 10).max(10)
}

// ============================================================================
// SEED PLAN & SEEDER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPlan {
    pub new_collectors: usize,
    pub new_cards: usize,
    pub holdings_min: usize,
    pub holdings_max: usize,
    /// Overrides the per-value retry ceiling
    pub attempt_ceiling: Option<usize>,
}

impl Default for SeedPlan {
    fn default() -> Self {
        SeedPlan {
            new_collectors: 5,
            new_cards: 1,
            holdings_min: 1,
            holdings_max: 3,
            attempt_ceiling: None,
        }
    }
}

impl SeedPlan {
    pub fn validate(&self) -> Result<(), SeedError> {
        if self.holdings_max < 1 {
            return Err(SeedError::InvalidPlan(
                "holdings_max must be at least 1".to_string(),
            ));
        }
        if self.holdings_max < self.holdings_min {
            return Err(SeedError::InvalidPlan(format!(
                "holdings_max ({}) must be >= holdings_min ({})",
                self.holdings_max, self.holdings_min
            )));
        }
        Ok(())
    }

    fn ceiling(&self, wanted: usize) -> usize {
        self.attempt_ceiling.unwrap_or_else(|| default_ceiling(wanted))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub collectors_created: usize,
    pub cards_created: usize,
    pub holdings_recorded: usize,
}

pub struct Seeder {
    rng: StdRng,
    gateway: MutationGateway,
}

impl Seeder {
    /// Deterministic when `seed` is given.
    pub fn new(gateway: MutationGateway, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Seeder { rng, gateway }
    }

    pub fn run(&mut self, conn: &mut Connection, plan: &SeedPlan) -> Result<SeedSummary, SeedError> {
        plan.validate()?;

        let collectors_created = self.seed_collectors(conn, plan)?;
        let cards_created = self.seed_starter_cards(conn)? + self.seed_random_cards(conn, plan)?;
        let holdings_recorded = self.seed_holdings(conn, plan)?;

        let summary = SeedSummary {
            collectors_created,
            cards_created,
            holdings_recorded,
        };

        tracing::info!(
            collectors = summary.collectors_created,
            cards = summary.cards_created,
            holdings = summary.holdings_recorded,
            "seeding complete"
        );
        Ok(summary)
    }

    fn seed_collectors(&mut self, conn: &Connection, plan: &SeedPlan) -> Result<usize, SeedError> {
        let mut taken: HashSet<String> = collector_handles(conn)?.into_iter().collect();
        let ceiling = plan.ceiling(plan.new_collectors);

        for _ in 0..plan.new_collectors {
            let first = *FIRST_NAMES.choose(&mut self.rng).unwrap_or(&"Ana");
            let last = *LAST_NAMES.choose(&mut self.rng).unwrap_or(&"Silva");
            let rng = &mut self.rng;
            let handle = generate_unique(&taken, ceiling, "collector handle", || {
                format!("{}{}", first.to_lowercase(), rng.gen_range(1..10_000))
            })?;

            register_collector(conn, &format!("{} {}", first, last), &handle)?;
            taken.insert(handle);
        }

        Ok(plan.new_collectors)
    }

    fn seed_starter_cards(&mut self, conn: &Connection) -> Result<usize, SeedError> {
        let mut created = 0;
        for starter in &STARTER_CARDS {
            if find_card_by_name(conn, starter.name)?.is_some() {
                continue;
            }
            register_card(
                conn,
                starter.name,
                starter.card_type,
                starter.rarity,
                Decimal::new(starter.average_cents, 2),
            )?;
            created += 1;
        }
        Ok(created)
    }

    fn seed_random_cards(&mut self, conn: &Connection, plan: &SeedPlan) -> Result<usize, SeedError> {
        let mut taken: HashSet<String> = card_names(conn)?.into_iter().collect();
        let ceiling = plan.ceiling(plan.new_cards);

        for _ in 0..plan.new_cards {
            let rng = &mut self.rng;
            let name = generate_unique(&taken, ceiling, "card name", || {
                let word = CARD_WORDS.choose(rng).copied().unwrap_or("Ember");
                let suffix = CARD_SUFFIXES.choose(rng).copied().unwrap_or("V");
                format!("{} {}", word, suffix)
            })?;

            let card_type = CARD_TYPES.choose(&mut self.rng).copied().unwrap_or("Fire");
            let rarity = Rarity::ALL.choose(&mut self.rng).copied().unwrap_or(Rarity::Common);
            let average_price = Decimal::new(self.rng.gen_range(5_000..=50_000), 2);

            register_card(conn, &name, card_type, rarity, average_price)?;
            taken.insert(name);
        }

        Ok(plan.new_cards)
    }

    /// Every collector (old and new) gets `holdings_min..=holdings_max` holdings.
    fn seed_holdings(&mut self, conn: &mut Connection, plan: &SeedPlan) -> Result<usize, SeedError> {
        let cards = card_names(conn)?;
        if cards.is_empty() {
            return Err(SeedError::EmptyCatalog);
        }

        let mut recorded = 0;
        for handle in collector_handles(conn)? {
            let count = self.rng.gen_range(plan.holdings_min..=plan.holdings_max);
            for _ in 0..count {
                let card = cards.choose(&mut self.rng).ok_or(SeedError::EmptyCatalog)?;
                let quantity = self.rng.gen_range(1..=4);
                let price_paid = Decimal::new(self.rng.gen_range(3_000..=40_000), 2);

                self.gateway
                    .record_holding(conn, &handle, card, quantity, price_paid)?;
                recorded += 1;
            }
        }

        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::verify_all;
    use crate::audit::count_audit_entries;
    use crate::db::setup_database;
    use crate::entities::list_collectors;
    use crate::holding::count_holdings;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_generate_unique_skips_taken() {
        let taken: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        let mut candidates = vec!["a", "b", "c"].into_iter();

        let value = generate_unique(&taken, 10, "letter", || {
            candidates.next().unwrap_or("z").to_string()
        })
        .unwrap();

        assert_eq!(value, "c");
    }

    #[test]
    fn test_generate_unique_gives_up_at_ceiling() {
        let taken: HashSet<String> = ["same".to_string()].into_iter().collect();
        let mut calls = 0;

        let err = generate_unique(&taken, 7, "card name", || {
            calls += 1;
            "same".to_string()
        })
        .unwrap_err();

        assert!(matches!(err, SeedError::Exhausted { what: "card name", attempts: 7 }));
        assert_eq!(calls, 7);
        assert_eq!(default_ceiling(0), 10);
        assert_eq!(default_ceiling(3), 30);
    }

    #[test]
    fn test_plan_validation() {
        let plan = SeedPlan {
            holdings_min: 4,
            holdings_max: 2,
            ..SeedPlan::default()
        };
        assert!(matches!(plan.validate(), Err(SeedError::InvalidPlan(_))));
        assert!(SeedPlan::default().validate().is_ok());
    }

    #[test]
    fn test_seed_run_keeps_ledger_consistent() {
        let mut conn = setup();
        let mut seeder = Seeder::new(MutationGateway::new(), Some(42));

        let summary = seeder.run(&mut conn, &SeedPlan::default()).unwrap();

        assert_eq!(summary.collectors_created, 5);
        assert_eq!(summary.cards_created, STARTER_CARDS.len() + 1);
        assert!(summary.holdings_recorded >= 5 && summary.holdings_recorded <= 15);

        assert_eq!(list_collectors(&conn).unwrap().len(), 5);
        assert_eq!(count_holdings(&conn).unwrap(), summary.holdings_recorded as i64);
        assert_eq!(count_audit_entries(&conn).unwrap(), summary.holdings_recorded as i64);
        assert!(verify_all(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_seed_is_repeatable() {
        let mut conn = setup();
        let mut seeder = Seeder::new(MutationGateway::new(), Some(7));
        seeder.run(&mut conn, &SeedPlan::default()).unwrap();

        // Second run adds new collectors and reuses the starter catalog
        let summary = seeder.run(&mut conn, &SeedPlan::default()).unwrap();
        assert_eq!(summary.cards_created, 1);
        assert_eq!(list_collectors(&conn).unwrap().len(), 10);
        assert!(verify_all(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_too_many_cards_exhausts() {
        let mut conn = setup();
        let mut seeder = Seeder::new(MutationGateway::new(), Some(1));
        let plan = SeedPlan {
            new_collectors: 0,
            // 24 words x 4 suffixes = 96 possible names
            new_cards: 200,
            ..SeedPlan::default()
        };

        let err = seeder.run(&mut conn, &plan).unwrap_err();
        assert!(matches!(err, SeedError::Exhausted { what: "card name", .. }));
    }
}
