//! Mock deck source for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::sources::{CardEntry, DeckSource, Source, SourceError, SummaryPage, UpstreamResponse};

/// Scripted reply for one deck URL.
enum DeckReply {
    Cards(Vec<CardEntry>),
    Status(u16, String),
    Timeout,
}

/// Mock implementation of the DeckSource trait.
///
/// Provides controllable behavior for testing:
/// - Serve scripted summary pages in order
/// - Serve scripted card lists per deck URL
/// - Simulate upstream and transport failures
/// - Track page and deck fetches for assertions
///
/// Unscripted page fetches return an empty final page; unscripted deck
/// fetches return an upstream 404.
pub struct MockDeckSource {
    source: Source,
    pages: Arc<RwLock<VecDeque<Result<SummaryPage, SourceError>>>>,
    decks: Arc<RwLock<HashMap<String, DeckReply>>>,
    page_fetches: Arc<RwLock<Vec<Option<String>>>>,
    deck_fetches: Arc<RwLock<Vec<String>>>,
}

impl Default for MockDeckSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeckSource {
    /// Create a mock adapter for Archidekt.
    pub fn new() -> Self {
        Self::for_source(Source::Archidekt)
    }

    /// Create a mock adapter claiming to serve `source`.
    pub fn for_source(source: Source) -> Self {
        Self {
            source,
            pages: Arc::new(RwLock::new(VecDeque::new())),
            decks: Arc::new(RwLock::new(HashMap::new())),
            page_fetches: Arc::new(RwLock::new(Vec::new())),
            deck_fetches: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Queue a summary page to serve.
    pub async fn push_page(&self, page: SummaryPage) {
        self.pages.write().await.push_back(Ok(page));
    }

    /// Queue a page fetch failure.
    pub async fn push_page_error(&self, error: SourceError) {
        self.pages.write().await.push_back(Err(error));
    }

    /// Serve `cards` for the given deck URL.
    pub async fn set_deck(&self, url: &str, cards: Vec<CardEntry>) {
        self.decks
            .write()
            .await
            .insert(url.to_string(), DeckReply::Cards(cards));
    }

    /// Serve an upstream failure with `status` for the given deck URL.
    pub async fn fail_deck_with_status(&self, url: &str, status: u16, body: &str) {
        self.decks
            .write()
            .await
            .insert(url.to_string(), DeckReply::Status(status, body.to_string()));
    }

    /// Serve a transport timeout for the given deck URL.
    pub async fn fail_deck_with_timeout(&self, url: &str) {
        self.decks
            .write()
            .await
            .insert(url.to_string(), DeckReply::Timeout);
    }

    /// Cursors passed to `fetch_page`, in order.
    pub async fn page_fetches(&self) -> Vec<Option<String>> {
        self.page_fetches.read().await.clone()
    }

    /// URLs passed to `fetch_deck`, in order.
    pub async fn deck_fetches(&self) -> Vec<String> {
        self.deck_fetches.read().await.clone()
    }
}

#[async_trait]
impl DeckSource for MockDeckSource {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<SummaryPage, SourceError> {
        self.page_fetches
            .write()
            .await
            .push(cursor.map(String::from));

        match self.pages.write().await.pop_front() {
            Some(reply) => reply,
            None => Ok(SummaryPage {
                items: vec![],
                next: None,
                count_hint: 0,
            }),
        }
    }

    async fn fetch_deck(&self, url: &str) -> Result<Vec<CardEntry>, SourceError> {
        self.deck_fetches.write().await.push(url.to_string());

        match self.decks.read().await.get(url) {
            Some(DeckReply::Cards(cards)) => Ok(cards.clone()),
            Some(DeckReply::Status(status, body)) => {
                Err(SourceError::from_status(UpstreamResponse {
                    status: *status,
                    url: url.to_string(),
                    headers: vec![],
                    body: body.clone(),
                }))
            }
            Some(DeckReply::Timeout) => Err(SourceError::Timeout),
            None => Err(SourceError::from_status(UpstreamResponse {
                status: 404,
                url: url.to_string(),
                headers: vec![],
                body: String::new(),
            })),
        }
    }

    fn deck_fetch_url(&self, source_id: &str) -> String {
        format!("https://mock.test/api/decks/{}/", source_id)
    }
}
