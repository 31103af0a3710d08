//! Resumable single-source page crawler.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::decks::DeckStoreError;
use crate::sources::{DeckSource, DeckSummary, Source};

use super::CrawlError;

/// What persisting one page of summaries produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessedPage {
    /// Oldest update time among the summaries examined. None for an
    /// empty page.
    pub oldest_seen: Option<DateTime<Utc>>,
    /// Decks first seen on this page.
    pub created: u32,
    /// Known decks refreshed from this page.
    pub updated: u32,
}

/// Persists one page of deck summaries.
///
/// Implementations never fetch; the crawler hands them already-fetched
/// summaries, so their only failure mode is storage.
pub trait PageProcessor: Send + Sync {
    fn process_page(
        &self,
        source: Source,
        items: &[DeckSummary],
        stop_after: Option<DateTime<Utc>>,
    ) -> Result<ProcessedPage, DeckStoreError>;
}

/// Outcome of one crawler step.
#[derive(Debug, Clone, Copy)]
pub struct AdvanceOutcome {
    pub page: ProcessedPage,
    /// Summaries on the fetched page, persisted or not.
    pub items: usize,
    /// Whether the page crossed the watermark.
    pub reached_watermark: bool,
    /// Whether another page remains to fetch.
    pub more: bool,
}

/// Walks one source's paginated deck listing a page at a time.
///
/// The crawler holds no storage of its own: the caller persists the
/// cursor between steps, so a crawler can be rebuilt mid-listing from
/// a stored run. Fetch errors leave the cursor untouched and the
/// crawler usable, the failed page is simply fetched again.
pub struct PageCrawler {
    source: Arc<dyn DeckSource>,
    cursor: Option<String>,
    stop_after: Option<DateTime<Utc>>,
    finished: bool,
}

impl PageCrawler {
    pub fn new(
        source: Arc<dyn DeckSource>,
        cursor: Option<String>,
        stop_after: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            source,
            cursor,
            stop_after,
            finished: false,
        }
    }

    /// Continuation for the next fetch, None before the first page and
    /// after the listing is done.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fetch one page, hand it to `processor`, and advance the cursor.
    ///
    /// The walk ends when the listing is exhausted or the page's oldest
    /// summary is older than the watermark. An empty page under a
    /// watermark also ends it: nothing newer remains to find.
    pub async fn advance(
        &mut self,
        processor: &dyn PageProcessor,
    ) -> Result<AdvanceOutcome, CrawlError> {
        if self.finished {
            return Err(CrawlError::Finished);
        }

        let page = self.source.fetch_page(self.cursor.as_deref()).await?;
        let items = page.items.len();
        let processed =
            processor.process_page(self.source.source(), &page.items, self.stop_after)?;

        let reached_watermark = match (processed.oldest_seen, self.stop_after) {
            (Some(oldest), Some(watermark)) => oldest < watermark,
            (None, Some(_)) => true,
            _ => false,
        };

        let next = page.next.map(secure_url);
        if reached_watermark || next.is_none() {
            self.finished = true;
            self.cursor = None;
        } else {
            self.cursor = next;
        }

        Ok(AdvanceOutcome {
            page: processed,
            items,
            reached_watermark,
            more: !self.finished,
        })
    }
}

/// Continuation URLs from upstream sometimes come back plain-http.
fn secure_url(url: String) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{}", rest),
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::sources::{CardEntry, SourceError, SummaryPage};

    struct ScriptedSource {
        pages: Mutex<VecDeque<Result<SummaryPage, SourceError>>>,
        fetched_cursors: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<SummaryPage, SourceError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                fetched_cursors: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DeckSource for ScriptedSource {
        fn source(&self) -> Source {
            Source::Archidekt
        }

        async fn fetch_page(&self, cursor: Option<&str>) -> Result<SummaryPage, SourceError> {
            self.fetched_cursors
                .lock()
                .unwrap()
                .push(cursor.map(String::from));
            self.pages.lock().unwrap().pop_front().unwrap_or(Ok(SummaryPage {
                items: vec![],
                next: None,
                count_hint: 0,
            }))
        }

        async fn fetch_deck(&self, _url: &str) -> Result<Vec<CardEntry>, SourceError> {
            Ok(vec![])
        }

        fn deck_fetch_url(&self, source_id: &str) -> String {
            format!("https://example.com/api/decks/{}/", source_id)
        }
    }

    struct RecordingProcessor {
        item_counts: Mutex<Vec<usize>>,
    }

    impl RecordingProcessor {
        fn new() -> Self {
            Self {
                item_counts: Mutex::new(Vec::new()),
            }
        }
    }

    impl PageProcessor for RecordingProcessor {
        fn process_page(
            &self,
            _source: Source,
            items: &[DeckSummary],
            _stop_after: Option<DateTime<Utc>>,
        ) -> Result<ProcessedPage, DeckStoreError> {
            self.item_counts.lock().unwrap().push(items.len());
            Ok(ProcessedPage {
                oldest_seen: items.iter().map(|i| i.updated_at).min(),
                created: items.len() as u32,
                updated: 0,
            })
        }
    }

    fn summary(source_id: &str, updated_at: DateTime<Utc>) -> DeckSummary {
        DeckSummary {
            source_id: source_id.to_string(),
            name: format!("Deck {}", source_id),
            creator: "someone".to_string(),
            updated_at,
            source_link: format!("https://example.com/decks/{}", source_id),
            fetch_url: format!("https://example.com/api/decks/{}/", source_id),
        }
    }

    fn page(items: Vec<DeckSummary>, next: Option<&str>) -> Result<SummaryPage, SourceError> {
        Ok(SummaryPage {
            count_hint: items.len() as i64,
            items,
            next: next.map(String::from),
        })
    }

    #[tokio::test]
    async fn test_walks_pages_until_exhausted() {
        let now = Utc::now();
        let source = Arc::new(ScriptedSource::new(vec![
            page(vec![summary("1", now), summary("2", now)], Some("https://example.com/page2")),
            page(vec![summary("3", now)], None),
        ]));
        let processor = RecordingProcessor::new();

        let mut crawler = PageCrawler::new(source.clone(), None, None);

        let step = crawler.advance(&processor).await.unwrap();
        assert!(step.more);
        assert_eq!(step.page.created, 2);
        assert_eq!(crawler.cursor(), Some("https://example.com/page2"));

        let step = crawler.advance(&processor).await.unwrap();
        assert!(!step.more);
        // Exhausted, not cut off by a watermark
        assert!(!step.reached_watermark);
        assert!(crawler.is_finished());
        assert!(crawler.cursor().is_none());

        // A done crawler refuses to advance again
        let err = crawler.advance(&processor).await.unwrap_err();
        assert!(matches!(err, CrawlError::Finished));

        assert_eq!(
            *source.fetched_cursors.lock().unwrap(),
            vec![None, Some("https://example.com/page2".to_string())]
        );
        assert_eq!(*processor.item_counts.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_watermark_stops_paging() {
        let now = Utc::now();
        let watermark = now - Duration::hours(1);
        let source = Arc::new(ScriptedSource::new(vec![page(
            vec![summary("1", now), summary("2", now - Duration::hours(2))],
            Some("https://example.com/page2"),
        )]));
        let processor = RecordingProcessor::new();

        let mut crawler = PageCrawler::new(source, None, Some(watermark));
        let step = crawler.advance(&processor).await.unwrap();

        // Oldest item predates the watermark, so the next page is skipped
        assert!(!step.more);
        assert!(step.reached_watermark);
        assert_eq!(step.items, 2);
        assert!(crawler.is_finished());
    }

    #[tokio::test]
    async fn test_watermark_boundary_keeps_paging() {
        let watermark = Utc::now();
        let source = Arc::new(ScriptedSource::new(vec![
            page(vec![summary("1", watermark)], Some("https://example.com/page2")),
            page(vec![], None),
        ]));
        let processor = RecordingProcessor::new();

        let mut crawler = PageCrawler::new(source, None, Some(watermark));

        // An item exactly at the watermark is not older than it
        let step = crawler.advance(&processor).await.unwrap();
        assert!(step.more);
    }

    #[tokio::test]
    async fn test_empty_page_with_watermark_finishes() {
        let source = Arc::new(ScriptedSource::new(vec![page(
            vec![],
            Some("https://example.com/page2"),
        )]));
        let processor = RecordingProcessor::new();

        let mut crawler = PageCrawler::new(source, None, Some(Utc::now()));
        let step = crawler.advance(&processor).await.unwrap();
        assert!(!step.more);
        assert!(step.reached_watermark);
        assert_eq!(step.items, 0);
        assert!(step.page.oldest_seen.is_none());
    }

    #[tokio::test]
    async fn test_empty_page_without_watermark_keeps_paging() {
        let now = Utc::now();
        let source = Arc::new(ScriptedSource::new(vec![
            page(vec![], Some("https://example.com/page2")),
            page(vec![summary("1", now)], None),
        ]));
        let processor = RecordingProcessor::new();

        let mut crawler = PageCrawler::new(source, None, None);

        let step = crawler.advance(&processor).await.unwrap();
        assert!(step.more);

        let step = crawler.advance(&processor).await.unwrap();
        assert!(!step.more);
        assert_eq!(step.page.created, 1);
    }

    #[tokio::test]
    async fn test_next_url_upgraded_to_https() {
        let now = Utc::now();
        let source = Arc::new(ScriptedSource::new(vec![page(
            vec![summary("1", now)],
            Some("http://example.com/page2"),
        )]));
        let processor = RecordingProcessor::new();

        let mut crawler = PageCrawler::new(source, None, None);
        crawler.advance(&processor).await.unwrap();
        assert_eq!(crawler.cursor(), Some("https://example.com/page2"));
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_crawler_usable() {
        let now = Utc::now();
        let source = Arc::new(ScriptedSource::new(vec![
            Err(SourceError::Timeout),
            page(vec![summary("1", now)], None),
        ]));
        let processor = RecordingProcessor::new();

        let mut crawler = PageCrawler::new(source, None, None);

        let err = crawler.advance(&processor).await.unwrap_err();
        assert!(matches!(err, CrawlError::Source(SourceError::Timeout)));
        assert!(!crawler.is_finished());

        // Retry refetches the same page
        let step = crawler.advance(&processor).await.unwrap();
        assert!(!step.more);
        assert_eq!(step.page.created, 1);
    }

    #[tokio::test]
    async fn test_resumes_from_stored_cursor() {
        let now = Utc::now();
        let source = Arc::new(ScriptedSource::new(vec![page(
            vec![summary("9", now)],
            None,
        )]));
        let processor = RecordingProcessor::new();

        let mut crawler = PageCrawler::new(
            source.clone(),
            Some("https://example.com/page5".to_string()),
            None,
        );
        crawler.advance(&processor).await.unwrap();

        assert_eq!(
            *source.fetched_cursors.lock().unwrap(),
            vec![Some("https://example.com/page5".to_string())]
        );
    }
}
