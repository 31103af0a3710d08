//! Deck storage - decks, card membership, commander pairings and the
//! queue of pending per-deck card fetches.
//!
//! The crawler writes deck rows and fetch obligations; the card-list
//! reconciler consumes the obligations and maintains membership, legality
//! and commander pairings. All multi-row mutations are transactional so a
//! crash never leaves a deck without its fetch obligation or a half
//! applied card diff.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteDeckStore;
pub use store::{CardListDiff, DeckStore, DeckStoreError};
pub use types::{CardInDeck, CommanderPair, Deck, DeckCrawlResult};
