use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit events for the crawl and ingestion lifecycle.
///
/// Each event is recorded durably with a timestamp. Events tied to a crawl
/// run carry its `run_id`; events tied to a deck carry its `deck_id`. Both
/// are surfaced as indexed columns so the trail can be filtered per run or
/// per deck after the fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A new crawl run was created.
    RunCreated {
        /// Crawl run ID
        run_id: String,
        /// Source being crawled
        source: String,
        /// Watermark the run will stop at, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_back_to: Option<DateTime<Utc>>,
    },

    /// A crawl run moved between states.
    RunStateChanged {
        /// Crawl run ID
        run_id: String,
        /// Source being crawled
        source: String,
        /// State before the transition
        from_state: String,
        /// State after the transition
        to_state: String,
        /// Why the transition happened
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// One page of deck summaries was fetched and persisted.
    PageProcessed {
        /// Crawl run ID
        run_id: String,
        /// Source being crawled
        source: String,
        /// Summaries on the page
        items: usize,
        /// Decks first seen on this page
        decks_created: u32,
        /// Known decks refreshed from this page
        decks_updated: u32,
        /// Whether the page crossed the run's watermark
        reached_watermark: bool,
    },

    /// A crawl run halted on an upstream error.
    RunFailed {
        /// Crawl run ID
        run_id: String,
        /// Source being crawled
        source: String,
        /// Upstream diagnostic
        error: String,
    },

    /// An operator cleared a run's watermark so the next crawl pages
    /// all the way back.
    WatermarkCleared {
        /// Crawl run ID
        run_id: String,
        /// Source being crawled
        source: String,
    },

    /// A deck's card list could not be fetched and the deck was marked
    /// unfetchable.
    DeckFetchFailed {
        /// Deck ID
        deck_id: String,
        /// URL that failed
        url: String,
        /// What went wrong
        error: String,
    },

    /// Printings in a fetched card list had no match in the card catalog.
    PrintingsUnresolved {
        /// Deck ID
        deck_id: String,
        /// Printing IDs that did not resolve
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        printings: Vec<String>,
    },

    /// A deck's card list was fetched, diffed, and applied.
    DeckReconciled {
        /// Deck ID
        deck_id: String,
        /// Source the deck came from
        source: String,
        /// Cards in the list after reconciliation
        cards: usize,
        /// Memberships inserted
        created: usize,
        /// Memberships whose commander flag changed
        updated: usize,
        /// Memberships removed
        deleted: usize,
        /// Legality verdict after reconciliation
        legal: bool,
        /// First reason the deck is illegal, if it is
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A deck's stored legality verdict changed on recheck.
    LegalityChanged {
        /// Deck ID
        deck_id: String,
        /// Verdict before the recheck
        was_legal: bool,
        /// Verdict after the recheck
        now_legal: bool,
        /// First reason the deck is illegal, if it is
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunCreated { .. } => "run_created",
            Self::RunStateChanged { .. } => "run_state_changed",
            Self::PageProcessed { .. } => "page_processed",
            Self::RunFailed { .. } => "run_failed",
            Self::WatermarkCleared { .. } => "watermark_cleared",
            Self::DeckFetchFailed { .. } => "deck_fetch_failed",
            Self::PrintingsUnresolved { .. } => "printings_unresolved",
            Self::DeckReconciled { .. } => "deck_reconciled",
            Self::LegalityChanged { .. } => "legality_changed",
        }
    }

    /// Extract run_id if this event is tied to a crawl run
    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::RunCreated { run_id, .. }
            | Self::RunStateChanged { run_id, .. }
            | Self::PageProcessed { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::WatermarkCleared { run_id, .. } => Some(run_id),
            _ => None,
        }
    }

    /// Extract deck_id if this event is tied to a deck
    pub fn deck_id(&self) -> Option<&str> {
        match self {
            Self::DeckFetchFailed { deck_id, .. }
            | Self::PrintingsUnresolved { deck_id, .. }
            | Self::DeckReconciled { deck_id, .. }
            | Self::LegalityChanged { deck_id, .. } => Some(deck_id),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub run_id: Option<String>,
    pub deck_id: Option<String>,
    pub data: AuditEvent,
}
