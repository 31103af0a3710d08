//! Card reference catalog - oracle cards and their printings.
//!
//! The catalog is read-mostly from the pipeline's point of view: decklist
//! reconciliation resolves printing ids and names against it, and legality
//! checks consume the cards it returns. Loading card data into it is a
//! separate concern (bulk import from a data dump).

mod sqlite;
mod types;

pub use sqlite::SqliteCardCatalog;
pub use types::*;

use std::collections::HashMap;
use uuid::Uuid;

/// Trait for card catalog storage.
pub trait CardCatalog: Send + Sync {
    /// Resolve printing ids to their oracle cards.
    ///
    /// Returns a map keyed by printing id; ids with no known printing are
    /// simply absent from the map.
    fn resolve_printings(&self, printing_ids: &[String]) -> Result<HashMap<String, Card>, CatalogError>;

    /// Look up a card by exact name and the set code of one of its
    /// printings. Fallback for sources whose printing ids we cannot map.
    fn card_by_name_and_set(&self, name: &str, set_code: &str) -> Result<Option<Card>, CatalogError>;

    /// Fetch cards by oracle id, in no particular order. Unknown ids are
    /// skipped.
    fn cards_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Card>, CatalogError>;

    /// Number of cards in the catalog.
    fn card_count(&self) -> Result<u64, CatalogError>;
}
