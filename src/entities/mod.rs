// Entity Store
//
// Collectors and cards. Each entity has a stable UUID identity and a
// human key (collector handle, card name) used for lookups.

pub mod card;
pub mod collector;

pub use card::{
    card_names, find_card_by_name, get_card, list_cards, register_card, Card, Rarity,
};
pub use collector::{
    collector_handles, find_collector_by_handle, get_collector, list_collectors,
    normalize_handle, register_collector, Collector,
};
