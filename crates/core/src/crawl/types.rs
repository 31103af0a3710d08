//! Types for crawl runs and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::decks::DeckStoreError;
use crate::sources::{Source, SourceError};

use super::CrawlStoreError;

/// Lifecycle state of a crawl run.
///
/// `Complete` and `Cancelled` are terminal. `Error` is a halt, not an
/// ending: a run parked there can be requeued back into the crawl or
/// reset to the beginning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    FetchingDecks,
    Complete,
    Cancelled,
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::NotStarted => "not_started",
            RunState::FetchingDecks => "fetching_decks",
            RunState::Complete => "complete",
            RunState::Cancelled => "cancelled",
            RunState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<RunState> {
        match s {
            "not_started" => Some(RunState::NotStarted),
            "fetching_decks" => Some(RunState::FetchingDecks),
            "complete" => Some(RunState::Complete),
            "cancelled" => Some(RunState::Cancelled),
            "error" => Some(RunState::Error),
            _ => None,
        }
    }

    /// True for states a new crawl invocation picks up instead of
    /// creating a fresh run.
    pub fn is_resumable(&self) -> bool {
        matches!(self, RunState::NotStarted | RunState::FetchingDecks)
    }

    /// True for states no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Complete | RunState::Cancelled)
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(&self, to: RunState) -> bool {
        use RunState::*;
        matches!(
            (*self, to),
            (NotStarted, FetchingDecks)
                | (NotStarted, Cancelled)
                | (FetchingDecks, Complete)
                | (FetchingDecks, Cancelled)
                | (FetchingDecks, Error)
                | (Error, FetchingDecks)
                | (Error, NotStarted)
                | (Error, Cancelled)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable crawl run over one source's paginated deck listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRun {
    pub id: Uuid,
    pub source: Source,
    pub state: RunState,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// Watermark: stop paging once summaries get older than this.
    /// None means crawl the whole listing.
    pub search_back_to: Option<DateTime<Utc>>,
    /// Continuation for the next page fetch. None before the first
    /// page and after the listing is exhausted.
    pub next_fetch: Option<String>,
    /// Operator-facing diagnostic, e.g. the upstream response that
    /// halted the run.
    pub note: String,
}

impl CrawlRun {
    pub fn new(source: Source, search_back_to: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            state: RunState::NotStarted,
            started_at: Utc::now(),
            search_back_to,
            next_fetch: None,
            note: String::new(),
        }
    }
}

/// Errors that can occur while crawling.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The run already walked past its last page.
    #[error("crawl already finished")]
    Finished,

    /// No run in a workable state for the requested operation.
    #[error("no crawl run to operate on for {0}")]
    NoRun(Source),

    /// No adapter registered for the source.
    #[error("no adapter registered for {0}")]
    NoAdapter(Source),

    /// Upstream adapter error.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Deck store error.
    #[error("deck store error: {0}")]
    Deck(#[from] DeckStoreError),

    /// Run store error.
    #[error("run store error: {0}")]
    Store(#[from] CrawlStoreError),
}
