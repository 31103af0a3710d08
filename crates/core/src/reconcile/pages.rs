//! Page reconciler: deck summaries in, deck rows and fetch obligations
//! out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::crawl::{PageProcessor, ProcessedPage};
use crate::decks::{Deck, DeckStore, DeckStoreError};
use crate::sources::{DeckSummary, Source};

/// Persists one page of summaries: existing decks are refreshed in
/// place, unseen ones created, and every persisted deck gets a fetch
/// obligation for its card list. Each deck and its obligation land in
/// one transaction, so an interrupt mid-page loses at most the page's
/// tail, which the resumed crawl re-fetches.
pub struct DeckPageReconciler {
    decks: Arc<dyn DeckStore>,
}

impl DeckPageReconciler {
    pub fn new(decks: Arc<dyn DeckStore>) -> Self {
        Self { decks }
    }
}

impl PageProcessor for DeckPageReconciler {
    fn process_page(
        &self,
        source: Source,
        items: &[DeckSummary],
        stop_after: Option<DateTime<Utc>>,
    ) -> Result<ProcessedPage, DeckStoreError> {
        let source_ids: Vec<String> = items.iter().map(|s| s.source_id.clone()).collect();
        let mut known = self.decks.decks_by_source_ids(source, &source_ids)?;

        let mut page = ProcessedPage::default();
        for summary in items {
            page.oldest_seen = Some(match page.oldest_seen {
                Some(oldest) => oldest.min(summary.updated_at),
                None => summary.updated_at,
            });

            // Pages arrive sorted newest-first, so the first item past
            // the watermark ends persistence for the rest of the page
            if let Some(watermark) = stop_after {
                if summary.updated_at < watermark {
                    break;
                }
            }

            match known.remove(&summary.source_id) {
                Some(mut deck) => {
                    deck.apply_summary(summary);
                    self.decks.save_deck_with_fetch(&deck, &summary.fetch_url)?;
                    page.updated += 1;
                }
                None => {
                    let deck = Deck::new(source, summary);
                    self.decks.save_deck_with_fetch(&deck, &summary.fetch_url)?;
                    page.created += 1;
                }
            }
        }

        debug!(
            source = %source,
            items = items.len(),
            created = page.created,
            updated = page.updated,
            "processed summary page"
        );
        Ok(page)
    }
}
