// 🃏 Card Entity - Reference catalog
//
// Cards are created once and then only read by the ledger core.

use crate::db::{decimal_column, format_timestamp, new_id, timestamp_column};
use crate::error::{LedgerResult, ValidationError};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// RARITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    UltraRare,
    Secret,
}

impl Rarity {
    pub const ALL: [Rarity; 5] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::UltraRare,
        Rarity::Secret,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "Common",
            Rarity::Uncommon => "Uncommon",
            Rarity::Rare => "Rare",
            Rarity::UltraRare => "Ultra Rare",
            Rarity::Secret => "Secret",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown rarity '{0}'")]
pub struct UnknownRarity(pub String);

impl FromStr for Rarity {
    type Err = UnknownRarity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        match key.as_str() {
            "common" => Ok(Rarity::Common),
            "uncommon" => Ok(Rarity::Uncommon),
            "rare" => Ok(Rarity::Rare),
            "ultrarare" => Ok(Rarity::UltraRare),
            "secret" => Ok(Rarity::Secret),
            _ => Err(UnknownRarity(s.to_string())),
        }
    }
}

// ============================================================================
// CARD ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub name: String,
    /// Element / category, e.g. "Electric"
    pub card_type: String,
    pub rarity: Rarity,
    #[serde(with = "rust_decimal::serde::str")]
    pub average_price: Decimal,
    pub created_at: DateTime<Utc>,
}

const CARD_COLUMNS: &str = "id, name, card_type, rarity, average_price, created_at";

impl Card {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
        let rarity: String = row.get(3)?;
        Ok(Card {
            id: row.get(0)?,
            name: row.get(1)?,
            card_type: row.get(2)?,
            rarity: rarity.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            average_price: decimal_column(row, 4)?,
            created_at: timestamp_column(row, 5)?,
        })
    }
}

pub fn register_card(
    conn: &Connection,
    name: &str,
    card_type: &str,
    rarity: Rarity,
    average_price: Decimal,
) -> LedgerResult<Card> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyField { field: "name" }.into());
    }
    if average_price.is_sign_negative() {
        return Err(ValidationError::NegativePrice {
            price: average_price,
        }
        .into());
    }
    if find_card_by_name(conn, name)?.is_some() {
        return Err(ValidationError::DuplicateCardName {
            name: name.to_string(),
        }
        .into());
    }

    let card = Card {
        id: new_id(),
        name: name.to_string(),
        card_type: card_type.trim().to_string(),
        rarity,
        average_price,
        // Stored precision is microseconds
        created_at: Utc::now().trunc_subsecs(6),
    };

    conn.execute(
        "INSERT INTO cards (id, name, card_type, rarity, average_price, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            card.id,
            card.name,
            card.card_type,
            card.rarity.as_str(),
            card.average_price.to_string(),
            format_timestamp(card.created_at),
        ],
    )?;

    tracing::debug!(name = %card.name, rarity = %card.rarity, "card registered");
    Ok(card)
}

pub fn find_card_by_name(conn: &Connection, name: &str) -> LedgerResult<Option<Card>> {
    let sql = format!("SELECT {} FROM cards WHERE name = ?1", CARD_COLUMNS);
    let card = conn
        .query_row(&sql, [name.trim()], Card::from_row)
        .optional()?;
    Ok(card)
}

pub fn get_card(conn: &Connection, card_id: &str) -> LedgerResult<Option<Card>> {
    let sql = format!("SELECT {} FROM cards WHERE id = ?1", CARD_COLUMNS);
    let card = conn.query_row(&sql, [card_id], Card::from_row).optional()?;
    Ok(card)
}

pub fn list_cards(conn: &Connection) -> LedgerResult<Vec<Card>> {
    let sql = format!("SELECT {} FROM cards ORDER BY name", CARD_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let cards = stmt
        .query_map([], Card::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cards)
}

pub fn card_names(conn: &Connection) -> LedgerResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM cards ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}
