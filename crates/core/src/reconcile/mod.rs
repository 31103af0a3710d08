//! Reconciliation of upstream truth into local storage.
//!
//! Two reconcilers share this module. The page reconciler turns one
//! page of deck summaries into deck rows plus fetch obligations, and
//! is what the crawler invokes between cursor persists. The card-list
//! reconciler consumes those obligations one deck at a time: fetch the
//! list, resolve printings against the catalog, diff against stored
//! membership, apply in one transaction, re-evaluate legality.

mod cardlists;
mod pages;

pub use cardlists::{
    CardListReconciler, CommanderBackfill, FetchBatch, FetchOutcome, LegalitySweep,
};
pub use pages::DeckPageReconciler;

use thiserror::Error;

use crate::cards::CatalogError;
use crate::decks::DeckStoreError;
use crate::sources::{Source, SourceError};

/// Errors from the reconcilers.
///
/// Upstream rejections of a single deck (non-2xx) are not errors here:
/// they retire the obligation and show up as a [`FetchOutcome`]. What
/// does surface is anything that should stop the whole batch.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// No adapter registered for the source in question.
    #[error("no adapter registered for {0}")]
    NoAdapter(Source),

    /// Transport-level failure talking to the upstream source.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Deck storage failed.
    #[error("deck store error: {0}")]
    Deck(#[from] DeckStoreError),

    /// Card catalog lookup failed.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}
