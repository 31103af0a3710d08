//! Archidekt adapter.
//!
//! See <https://archidekt.com/forum/thread/3476605/1> for Archidekt's
//! guidance to crawlers. Format 17 is Pauper Commander.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::types::{
    CardEntry, DeckSource, DeckSummary, Source, SourceError, SummaryPage, UpstreamResponse,
};
use super::{capture_response, parse_payload, user_agent};

const DEFAULT_API_BASE: &str = "https://archidekt.com/api/";

pub struct ArchidektSource {
    client: Client,
    api_base: String,
}

impl ArchidektSource {
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

    fn initial_page_url(&self) -> String {
        format!(
            "{}decks/cards/?formats=17&orderBy=-createdAt&size=100&pageSize=48",
            self.api_base
        )
    }

    fn summarize(&self, deck: PageDeck) -> DeckSummary {
        DeckSummary {
            source_id: deck.id.to_string(),
            name: deck.name,
            creator: deck.owner.map(|o| o.username).unwrap_or_default(),
            updated_at: deck.updated_at,
            source_link: format!("https://archidekt.com/decks/{}", deck.id),
            fetch_url: self.deck_fetch_url(&deck.id.to_string()),
        }
    }

    fn page_from_envelope(
        &self,
        captured: UpstreamResponse,
        envelope: PageEnvelope,
    ) -> Result<SummaryPage, SourceError> {
        // Archidekt answers with count = -1 when it wants crawlers to
        // back off, even under a 2xx status
        if envelope.count <= 0 {
            return Err(SourceError::Upstream {
                message: format!("got count {} from upstream", envelope.count),
                response: captured,
            });
        }

        let items = envelope
            .results
            .into_iter()
            .map(|deck| self.summarize(deck))
            .collect();

        Ok(SummaryPage {
            items,
            next: envelope.next,
            count_hint: envelope.count,
        })
    }
}

#[async_trait]
impl DeckSource for ArchidektSource {
    fn source(&self) -> Source {
        Source::Archidekt
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<SummaryPage, SourceError> {
        let url = match cursor {
            Some(url) => url.to_string(),
            None => self.initial_page_url(),
        };
        debug!(url = %url, "fetching archidekt summary page");

        let captured = capture_response(&self.client, &url).await?;
        if !(200..300).contains(&captured.status) {
            return Err(SourceError::from_status(captured));
        }

        let envelope: PageEnvelope = parse_payload(&captured)?;
        self.page_from_envelope(captured, envelope)
    }

    async fn fetch_deck(&self, url: &str) -> Result<Vec<CardEntry>, SourceError> {
        debug!(url = %url, "fetching archidekt deck");

        let captured = capture_response(&self.client, url).await?;
        if !(200..300).contains(&captured.status) {
            return Err(SourceError::from_status(captured));
        }

        let envelope: DeckEnvelope = parse_payload(&captured)?;
        Ok(entries_from_envelope(envelope))
    }

    fn deck_fetch_url(&self, source_id: &str) -> String {
        format!(
            "{}decks/{}/",
            self.api_base,
            urlencoding::encode(source_id)
        )
    }
}

fn entries_from_envelope(envelope: DeckEnvelope) -> Vec<CardEntry> {
    envelope
        .cards
        .into_iter()
        .map(|entry| CardEntry {
            printing_id: entry.card.uid,
            name: entry.card.oracle_card.name,
            set_code: entry.card.edition.editioncode,
            is_commander: entry.categories.iter().any(|c| c == "Commander"),
        })
        .collect()
}

// Archidekt API response types

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    count: i64,
    next: Option<String>,
    results: Vec<PageDeck>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageDeck {
    id: i64,
    name: String,
    updated_at: DateTime<Utc>,
    owner: Option<PageOwner>,
}

#[derive(Debug, Deserialize)]
struct PageOwner {
    username: String,
}

#[derive(Debug, Deserialize)]
struct DeckEnvelope {
    #[serde(default)]
    cards: Vec<DeckCard>,
}

#[derive(Debug, Deserialize)]
struct DeckCard {
    card: DeckPrinting,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeckPrinting {
    uid: String,
    oracle_card: OracleCard,
    edition: Edition,
}

#[derive(Debug, Deserialize)]
struct OracleCard {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Edition {
    editioncode: String,
}
