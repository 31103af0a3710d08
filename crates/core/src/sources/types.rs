//! Types for the upstream deck-site adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An upstream deck-building service we crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Archidekt,
    Moxfield,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Archidekt => "archidekt",
            Source::Moxfield => "moxfield",
        }
    }

    pub fn parse(s: &str) -> Option<Source> {
        match s {
            "archidekt" => Some(Source::Archidekt),
            "moxfield" => Some(Source::Moxfield),
            _ => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One deck as it appears on a paginated summary page, normalized
/// from the source-specific shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckSummary {
    /// Source-native deck id.
    pub source_id: String,
    /// Display name.
    pub name: String,
    /// Creator display name.
    pub creator: String,
    /// Last update according to the upstream clock.
    pub updated_at: DateTime<Utc>,
    /// Public link to the deck page.
    pub source_link: String,
    /// URL for the follow-up card-list fetch.
    pub fetch_url: String,
}

/// One page of deck summaries plus its continuation.
#[derive(Debug, Clone)]
pub struct SummaryPage {
    pub items: Vec<DeckSummary>,
    /// Continuation for the next page, None when exhausted.
    pub next: Option<String>,
    /// Upstream's total-results hint, where the source reports one.
    pub count_hint: i64,
}

/// One entry of a deck's card listing, normalized from the
/// source-specific shape (flat categorized list vs. board maps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardEntry {
    /// Upstream printing id (a Scryfall printing UUID in both sources).
    pub printing_id: String,
    /// Card name as reported upstream, for the resolution fallback.
    pub name: String,
    /// Set code as reported upstream, for the resolution fallback.
    pub set_code: String,
    /// Whether the entry occupies a commander slot.
    pub is_commander: bool,
}

/// Captured upstream response, kept for operator diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl UpstreamResponse {
    /// Render the response the way it is stored in a run's note:
    /// status line, headers, blank line, body.
    pub fn describe(&self) -> String {
        let mut out = format!("{} accessing {}\n\n", self.status, self.url);
        for (name, value) in &self.headers {
            out.push_str(&format!(".. {}: {}\n", name, value));
        }
        out.push('\n');
        out.push_str(&self.body);
        out
    }
}

/// Errors from upstream adapters.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Non-2xx status, a source-specific backoff sentinel, or an
    /// unparseable payload. Fatal to the owning crawl run.
    #[error("{message}")]
    Upstream {
        message: String,
        response: UpstreamResponse,
    },

    #[error("request timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl SourceError {
    pub fn from_status(response: UpstreamResponse) -> Self {
        SourceError::Upstream {
            message: format!("got {} from upstream", response.status),
            response,
        }
    }

    /// True when the error should halt the owning run rather than
    /// leave it resumable (transport blips stay resumable).
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, SourceError::Upstream { .. })
    }

    pub fn upstream_response(&self) -> Option<&UpstreamResponse> {
        match self {
            SourceError::Upstream { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// Map a transport-level reqwest error onto the adapter error type.
pub(crate) fn map_transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout
    } else if e.is_connect() {
        SourceError::ConnectionFailed(e.to_string())
    } else {
        SourceError::Request(e.to_string())
    }
}

/// Adapter for one upstream deck service. The crawler and the
/// reconcilers depend only on this trait; a new source is a new
/// implementation, not a change to the driver.
#[async_trait]
pub trait DeckSource: Send + Sync {
    /// Which upstream this adapter talks to.
    fn source(&self) -> Source;

    /// Fetch exactly one page of deck summaries. `cursor` is None for
    /// the initial page; afterwards it is the continuation returned by
    /// the previous page. No internal retries.
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<SummaryPage, SourceError>;

    /// Fetch one deck's card listing and normalize it.
    async fn fetch_deck(&self, url: &str) -> Result<Vec<CardEntry>, SourceError>;

    /// The card-list fetch URL for a deck's source-native id.
    fn deck_fetch_url(&self, source_id: &str) -> String;
}
