//! Moxfield adapter.
//!
//! See <https://www.moxfield.com/help/faq#moxfield-api> for Moxfield's
//! stance on crawlers. The search endpoint pages by number, so the
//! continuation URL is synthesized here from the envelope's
//! `pageNumber`/`totalPages` counters.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::types::{
    CardEntry, DeckSource, DeckSummary, Source, SourceError, SummaryPage,
};
use super::{capture_response, parse_payload, user_agent};

const DEFAULT_API_BASE: &str = "https://api2.moxfield.com/v2/";

pub struct MoxfieldSource {
    client: Client,
    api_base: String,
}

impl MoxfieldSource {
    pub fn new(timeout: Duration) -> Self {
        Self::with_api_base(DEFAULT_API_BASE, timeout)
    }

    /// Point the adapter at a different base URL, for tests.
    pub fn with_api_base(api_base: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_base: format!("{}/", api_base.trim_end_matches('/')),
        }
    }

    fn search_url(&self, page_number: i64) -> String {
        format!(
            "{}decks/search?pageNumber={}&pageSize=64&sortType=updated&sortDirection=Descending&fmt=pauperEdh",
            self.api_base, page_number
        )
    }

    fn summarize(&self, deck: PageDeck) -> DeckSummary {
        let source_link = format!("https://www.moxfield.com/decks/{}", deck.public_id);
        let fetch_url = self.deck_fetch_url(&deck.public_id);
        DeckSummary {
            source_id: deck.public_id,
            name: deck.name,
            creator: deck.created_by_user.map(|u| u.user_name).unwrap_or_default(),
            updated_at: deck.last_updated_at_utc,
            source_link,
            fetch_url,
        }
    }

    fn page_from_envelope(&self, envelope: PageEnvelope) -> SummaryPage {
        let next = if envelope.page_number < envelope.total_pages {
            Some(self.search_url(envelope.page_number + 1))
        } else {
            None
        };

        let items = envelope
            .data
            .into_iter()
            .map(|deck| self.summarize(deck))
            .collect();

        SummaryPage {
            items,
            next,
            count_hint: envelope.total_results,
        }
    }
}

#[async_trait]
impl DeckSource for MoxfieldSource {
    fn source(&self) -> Source {
        Source::Moxfield
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<SummaryPage, SourceError> {
        let url = match cursor {
            Some(url) => url.to_string(),
            None => self.search_url(1),
        };
        debug!(url = %url, "fetching moxfield summary page");

        let captured = capture_response(&self.client, &url).await?;
        if !(200..300).contains(&captured.status) {
            return Err(SourceError::from_status(captured));
        }

        let envelope: PageEnvelope = parse_payload(&captured)?;
        Ok(self.page_from_envelope(envelope))
    }

    async fn fetch_deck(&self, url: &str) -> Result<Vec<CardEntry>, SourceError> {
        debug!(url = %url, "fetching moxfield deck");

        let captured = capture_response(&self.client, url).await?;
        if !(200..300).contains(&captured.status) {
            return Err(SourceError::from_status(captured));
        }

        let envelope: DeckEnvelope = parse_payload(&captured)?;
        Ok(entries_from_envelope(envelope))
    }

    fn deck_fetch_url(&self, source_id: &str) -> String {
        format!(
            "{}decks/all/{}",
            self.api_base,
            urlencoding::encode(source_id)
        )
    }
}

/// Flatten the board maps into entries, mainboard first. The sideboard
/// is not part of a PDH list and is ignored.
fn entries_from_envelope(envelope: DeckEnvelope) -> Vec<CardEntry> {
    let mut entries = Vec::new();
    for (board, is_commander) in [(envelope.mainboard, false), (envelope.commanders, true)] {
        for (_, entry) in board {
            entries.push(CardEntry {
                printing_id: entry.card.scryfall_id,
                name: entry.card.name,
                set_code: entry.card.set,
                is_commander,
            });
        }
    }
    entries
}

// Moxfield API response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageEnvelope {
    page_number: i64,
    total_pages: i64,
    #[serde(default)]
    total_results: i64,
    data: Vec<PageDeck>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageDeck {
    public_id: String,
    name: String,
    last_updated_at_utc: DateTime<Utc>,
    created_by_user: Option<PageUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageUser {
    user_name: String,
}

#[derive(Debug, Deserialize)]
struct DeckEnvelope {
    #[serde(default)]
    mainboard: HashMap<String, BoardEntry>,
    #[serde(default)]
    commanders: HashMap<String, BoardEntry>,
}

#[derive(Debug, Deserialize)]
struct BoardEntry {
    card: BoardCard,
}

#[derive(Debug, Deserialize)]
struct BoardCard {
    scryfall_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    set: String,
}
