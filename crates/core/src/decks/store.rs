//! Deck storage trait.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::decks::{CardInDeck, CommanderPair, Deck, DeckCrawlResult};
use crate::sources::Source;

/// Error type for deck storage operations.
#[derive(Debug, Error)]
pub enum DeckStoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// The create/update/delete sets for one deck's card list.
///
/// Computed by the card-list reconciler and applied by the store in one
/// transaction. A correct reconciliation of unchanged input produces an
/// empty diff.
#[derive(Debug, Clone, Default)]
pub struct CardListDiff {
    pub create: Vec<CardInDeck>,
    /// Rows whose commander flag changed.
    pub update: Vec<CardInDeck>,
    /// Card ids no longer present upstream.
    pub delete: Vec<Uuid>,
}

impl CardListDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Trait for deck storage backends.
///
/// Owns decks, their card membership, commander pairings and the queue of
/// pending per-deck card fetches. Multi-row operations are transactional
/// as documented on each method.
pub trait DeckStore: Send + Sync {
    /// Newest upstream update time across a source's decks; the crawl
    /// watermark for the source's next run. None when the source has no
    /// decks yet.
    fn latest_updated_time(&self, source: Source)
        -> Result<Option<DateTime<Utc>>, DeckStoreError>;

    /// Bulk-look-up decks of one source by source-native id.
    fn decks_by_source_ids(
        &self,
        source: Source,
        source_ids: &[String],
    ) -> Result<HashMap<String, Deck>, DeckStoreError>;

    /// Persist a deck and schedule its card fetch in one transaction.
    ///
    /// Upserts on `(source, source_id)`. On re-sighting the stored row
    /// keeps its id, legality flag and commander reference; name, creator,
    /// link and updated time are refreshed. Any outstanding fetch for the
    /// deck is replaced.
    fn save_deck_with_fetch(&self, deck: &Deck, fetch_url: &str) -> Result<(), DeckStoreError>;

    fn get_deck(&self, id: Uuid) -> Result<Option<Deck>, DeckStoreError>;

    /// All deck ids in insertion order.
    fn deck_ids(&self) -> Result<Vec<Uuid>, DeckStoreError>;

    /// All decks of one source in insertion order.
    fn decks_for_source(&self, source: Source) -> Result<Vec<Deck>, DeckStoreError>;

    /// Ids of legal decks, optionally only those missing a commander pair.
    fn legal_deck_ids(&self, missing_commander_only: bool) -> Result<Vec<Uuid>, DeckStoreError>;

    /// Current card membership of a deck.
    fn deck_cards(&self, deck_id: Uuid) -> Result<Vec<CardInDeck>, DeckStoreError>;

    /// Apply a card-list diff in one transaction.
    fn apply_card_diff(&self, deck_id: Uuid, diff: &CardListDiff) -> Result<(), DeckStoreError>;

    /// Persist a legality verdict onto a deck.
    fn set_deck_legality(&self, deck_id: Uuid, pdh_legal: bool) -> Result<(), DeckStoreError>;

    /// Point a deck at its commander pair.
    fn set_deck_commander(&self, deck_id: Uuid, commander_id: Uuid) -> Result<(), DeckStoreError>;

    /// Insert a commander pair unless it already exists; pair ids are
    /// deterministic, so re-inserting the same pairing is a no-op.
    fn ensure_commander(&self, pair: &CommanderPair) -> Result<(), DeckStoreError>;

    fn get_commander(&self, id: Uuid) -> Result<Option<CommanderPair>, DeckStoreError>;

    /// Oldest-scheduled outstanding fetch (still fetchable, cards not yet
    /// got), if any.
    fn next_pending_fetch(&self) -> Result<Option<DeckCrawlResult>, DeckStoreError>;

    fn pending_fetch_count(&self) -> Result<u64, DeckStoreError>;

    /// Mark a fetch result as not fetchable (deck gone or invalid
    /// upstream).
    fn mark_unfetchable(&self, result_id: Uuid) -> Result<(), DeckStoreError>;

    /// Queue a card fetch for an already-stored deck, replacing any
    /// outstanding one.
    fn schedule_fetch(
        &self,
        deck_id: Uuid,
        url: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DeckStoreError>;

    /// Finish a fetch in one transaction: persist the verdict (and, when
    /// given, the commander pair reference) onto the deck and flag the
    /// result completed. A `None` commander leaves the deck's existing
    /// pair untouched.
    fn complete_fetch(
        &self,
        result_id: Uuid,
        deck_id: Uuid,
        pdh_legal: bool,
        commander_id: Option<Uuid>,
    ) -> Result<(), DeckStoreError>;

    /// Drop every crawl result for a deck. Run after a completed fetch so
    /// stale obligations from interrupted runs cannot be reprocessed.
    fn delete_fetches_for_deck(&self, deck_id: Uuid) -> Result<(), DeckStoreError>;
}
