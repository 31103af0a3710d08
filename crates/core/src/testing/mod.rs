//! Testing utilities and mock implementations for integration tests.
//!
//! This module provides a mock source adapter and fixture builders so
//! the crawl and reconciliation paths can be exercised without real
//! upstream services.
//!
//! # Example
//!
//! ```rust,ignore
//! use uncommander_core::testing::{fixtures, MockDeckSource};
//!
//! let source = MockDeckSource::new();
//! source.push_page(fixtures::page(
//!     vec![fixtures::summary("123", Utc::now())],
//!     None,
//! )).await;
//!
//! // Hand the adapter to a CrawlDriver...
//! ```

mod mock_source;

pub use mock_source::MockDeckSource;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use crate::cards::{Card, ColorIdentity, PartnerKind, Printing, Rarity};
    use crate::sources::{CardEntry, DeckSummary, SummaryPage};

    /// Create a deck summary with reasonable defaults.
    pub fn summary(source_id: &str, updated_at: DateTime<Utc>) -> DeckSummary {
        DeckSummary {
            source_id: source_id.to_string(),
            name: format!("Deck {}", source_id),
            creator: "someone".to_string(),
            updated_at,
            source_link: format!("https://mock.test/decks/{}", source_id),
            fetch_url: format!("https://mock.test/api/decks/{}/", source_id),
        }
    }

    /// Create a summary page from its items.
    pub fn page(items: Vec<DeckSummary>, next: Option<&str>) -> SummaryPage {
        SummaryPage {
            count_hint: items.len() as i64,
            items,
            next: next.map(String::from),
        }
    }

    /// Create a card for catalog seeding. Rarity flags are derived from
    /// printings on read, so they are left false here.
    pub fn catalog_card(name: &str, type_line: &str, identity: &str) -> Card {
        Card {
            id: Uuid::new_v4(),
            name: name.to_string(),
            type_line: type_line.to_string(),
            identity: ColorIdentity::from_letters(identity),
            partner: PartnerKind::None,
            ever_common: false,
            ever_uncommon: false,
        }
    }

    /// Create a printing of `card` in the given set at the given rarity.
    pub fn printing(card: &Card, set_code: &str, rarity: Rarity) -> Printing {
        Printing {
            id: Uuid::new_v4(),
            card_id: card.id,
            set_code: set_code.to_string(),
            rarity,
        }
    }

    /// Create a card-list entry referencing `printing`.
    pub fn entry(printing: &Printing, card: &Card, is_commander: bool) -> CardEntry {
        CardEntry {
            printing_id: printing.id.to_string(),
            name: card.name.clone(),
            set_code: printing.set_code.clone(),
            is_commander,
        }
    }
}
