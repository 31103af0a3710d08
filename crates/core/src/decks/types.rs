//! Types for stored decks, card membership and fetch obligations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sources::{DeckSummary, Source};

/// One upstream decklist as tracked locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub id: Uuid,
    pub source: Source,
    /// Source-native identifier; `(source, source_id)` is unique.
    pub source_id: String,
    pub name: String,
    pub creator: String,
    pub source_link: String,
    pub ingested_at: DateTime<Utc>,
    /// Last update according to the source's clock.
    pub updated_at: DateTime<Utc>,
    /// Derived from the card list, never taken from upstream.
    pub pdh_legal: bool,
    pub commander_id: Option<Uuid>,
}

impl Deck {
    /// First sighting of a deck. A deck is never assumed legal before its
    /// cards are known.
    pub fn new(source: Source, summary: &DeckSummary) -> Self {
        Deck {
            id: Uuid::new_v4(),
            source,
            source_id: summary.source_id.clone(),
            name: summary.name.clone(),
            creator: summary.creator.clone(),
            source_link: summary.source_link.clone(),
            ingested_at: Utc::now(),
            updated_at: summary.updated_at,
            pdh_legal: false,
            commander_id: None,
        }
    }

    /// Refresh the upstream-owned fields from a re-sighting.
    pub fn apply_summary(&mut self, summary: &DeckSummary) {
        self.name = summary.name.clone();
        self.creator = summary.creator.clone();
        self.source_link = summary.source_link.clone();
        self.updated_at = summary.updated_at;
    }
}

/// Membership of one canonical card in one deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInDeck {
    pub card_id: Uuid,
    pub is_commander: bool,
}

/// A pending (or just-completed) obligation to fetch one deck's cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckCrawlResult {
    pub id: Uuid,
    pub deck_id: Uuid,
    /// Per-deck fetch URL for the owning source.
    pub url: String,
    /// Upstream last-update time at the moment the fetch was scheduled.
    pub updated_at: DateTime<Utc>,
    /// False once the deck is confirmed gone or invalid upstream.
    pub fetchable: bool,
    /// True once card reconciliation succeeded.
    pub got_cards: bool,
}

/// A derived commander pairing, shared by every deck led by the same card
/// or pair of cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderPair {
    /// Deterministic id: UUIDv5 in the namespace of the first card's id,
    /// named by the second card's hyphenated id (empty for a solo
    /// commander). Recomputing for the same cards always yields the same
    /// id.
    pub id: Uuid,
    pub commander1_id: Uuid,
    pub commander2_id: Option<Uuid>,
}

impl CommanderPair {
    /// Build the normalized pairing: the lower card id always takes the
    /// first slot, so the same two cards produce one row regardless of
    /// the order the deck listed them in.
    pub fn new(first: Uuid, second: Option<Uuid>) -> Self {
        let (commander1_id, commander2_id) = match second {
            Some(other) if other < first => (other, Some(first)),
            other => (first, other),
        };
        let name = commander2_id.map(|id| id.to_string()).unwrap_or_default();
        CommanderPair {
            id: Uuid::new_v5(&commander1_id, name.as_bytes()),
            commander1_id,
            commander2_id,
        }
    }

    pub fn solo(card_id: Uuid) -> Self {
        CommanderPair::new(card_id, None)
    }
}
