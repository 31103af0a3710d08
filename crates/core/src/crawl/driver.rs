//! Crawl driver: run lifecycle and page sequencing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditHandle};
use crate::decks::DeckStore;
use crate::sources::{DeckSource, Source, SourceError};

use super::{CrawlError, CrawlRun, PageCrawler, PageProcessor, RunState, RunStore};

/// What one `crawl` invocation accomplished.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// The run as persisted when the invocation returned.
    pub run: CrawlRun,
    pub pages: u32,
    pub decks_created: u32,
    pub decks_updated: u32,
}

/// Drives crawl runs for the registered sources.
///
/// One invocation resumes (or creates) the source's run, walks its
/// pages sequentially with a politeness delay, and settles the run's
/// final state. All progress lives in the stores, so an interrupted
/// invocation resumes from the persisted cursor. The run's status is
/// re-read before every fetch; cancelling a run from elsewhere takes
/// effect between pages, never mid-transaction.
pub struct CrawlDriver {
    adapters: HashMap<Source, Arc<dyn DeckSource>>,
    runs: Arc<dyn RunStore>,
    decks: Arc<dyn DeckStore>,
    processor: Arc<dyn PageProcessor>,
    audit: Option<AuditHandle>,
    page_delay: Duration,
}

impl CrawlDriver {
    pub fn new(
        runs: Arc<dyn RunStore>,
        decks: Arc<dyn DeckStore>,
        processor: Arc<dyn PageProcessor>,
    ) -> Self {
        Self {
            adapters: HashMap::new(),
            runs,
            decks,
            processor,
            audit: None,
            page_delay: Duration::from_secs(2),
        }
    }

    /// Register an adapter under the source it serves.
    pub fn with_adapter(mut self, adapter: Arc<dyn DeckSource>) -> Self {
        self.adapters.insert(adapter.source(), adapter);
        self
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Delay between page fetches.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Crawl `source` until its run settles, `stop` is raised, or
    /// (with `once`) a single page is done.
    ///
    /// Upstream failures halt the run in `Error` and surface as
    /// `CrawlError::Source`; transport failures surface the same way
    /// but leave the run resumable with its persisted cursor.
    pub async fn crawl(
        &self,
        source: Source,
        once: bool,
        stop: &AtomicBool,
    ) -> Result<CrawlOutcome, CrawlError> {
        let adapter = self
            .adapters
            .get(&source)
            .cloned()
            .ok_or(CrawlError::NoAdapter(source))?;

        let run = self.resumable_or_new_run(source).await?;
        let run_id = run.id;

        let run = if run.state == RunState::NotStarted {
            let updated = self.runs.update_state(run_id, RunState::FetchingDecks)?;
            self.emit_state_change(&updated, RunState::NotStarted, Some("starting crawl"))
                .await;
            updated
        } else {
            info!(run_id = %run_id, cursor = ?run.next_fetch, "resuming crawl run");
            run
        };

        let mut crawler = PageCrawler::new(adapter, run.next_fetch.clone(), run.search_back_to);

        let mut pages = 0u32;
        let mut decks_created = 0u32;
        let mut decks_updated = 0u32;

        loop {
            if stop.load(Ordering::Relaxed) {
                info!(run_id = %run_id, "stop requested, leaving run resumable");
                break;
            }

            // Honor an external cancellation between fetches
            let current = self.current_run(run_id, source)?;
            if current.state != RunState::FetchingDecks {
                info!(run_id = %run_id, state = %current.state, "run no longer fetching, stopping");
                break;
            }

            let outcome = match crawler.advance(self.processor.as_ref()).await {
                Ok(outcome) => outcome,
                Err(CrawlError::Source(e)) if e.is_fatal_to_run() => {
                    return Err(self.halt_run(run_id, source, e).await);
                }
                // Transport errors and store failures leave the run
                // resumable on its persisted cursor
                Err(e) => return Err(e),
            };

            pages += 1;
            decks_created += outcome.page.created;
            decks_updated += outcome.page.updated;

            if let Some(ref audit) = self.audit {
                audit
                    .emit(AuditEvent::PageProcessed {
                        run_id: run_id.to_string(),
                        source: source.to_string(),
                        items: outcome.items,
                        decks_created: outcome.page.created,
                        decks_updated: outcome.page.updated,
                        reached_watermark: outcome.reached_watermark,
                    })
                    .await;
            }

            if !outcome.more {
                let updated = self.runs.update_state(run_id, RunState::Complete)?;
                self.runs.set_cursor(run_id, None)?;
                let reason = if outcome.reached_watermark {
                    "watermark reached"
                } else {
                    "listing exhausted"
                };
                self.emit_state_change(&updated, RunState::FetchingDecks, Some(reason))
                    .await;
                info!(run_id = %run_id, pages, decks_created, decks_updated, reason, "crawl complete");
                break;
            }

            // The page is durable, so its continuation may be too
            self.runs.set_cursor(run_id, crawler.cursor())?;

            if once {
                break;
            }
            tokio::time::sleep(self.page_delay).await;
        }

        let run = self.current_run(run_id, source)?;
        Ok(CrawlOutcome {
            run,
            pages,
            decks_created,
            decks_updated,
        })
    }

    /// Requeue the source's latest halted run: back into the crawl
    /// when it has a cursor, back to the start with the watermark
    /// cleared when it does not.
    pub async fn requeue(&self, source: Source) -> Result<CrawlRun, CrawlError> {
        let run = self
            .runs
            .latest_run_in_states(source, &[RunState::Error])?
            .ok_or(CrawlError::NoRun(source))?;

        let target = if run.next_fetch.is_some() {
            RunState::FetchingDecks
        } else {
            self.runs.clear_watermark(run.id)?;
            RunState::NotStarted
        };

        let updated = self.runs.update_state(run.id, target)?;
        self.emit_state_change(&updated, RunState::Error, Some("requeued"))
            .await;
        info!(run_id = %updated.id, state = %updated.state, "requeued run");
        Ok(updated)
    }

    /// Clear the watermark on the source's latest not-yet-started run
    /// so the next crawl pages all the way back.
    pub async fn clear_watermark(&self, source: Source) -> Result<CrawlRun, CrawlError> {
        let run = self
            .runs
            .latest_run_in_states(source, &[RunState::NotStarted])?
            .ok_or(CrawlError::NoRun(source))?;

        self.runs.clear_watermark(run.id)?;
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::WatermarkCleared {
                    run_id: run.id.to_string(),
                    source: source.to_string(),
                })
                .await;
        }
        info!(run_id = %run.id, "cleared run watermark");
        self.current_run(run.id, source)
    }

    /// Cancel the source's active run, wherever it is short of
    /// complete.
    pub async fn cancel(&self, source: Source) -> Result<CrawlRun, CrawlError> {
        let run = self
            .runs
            .latest_run_in_states(
                source,
                &[RunState::NotStarted, RunState::FetchingDecks, RunState::Error],
            )?
            .ok_or(CrawlError::NoRun(source))?;

        let from = run.state;
        let updated = self.runs.update_state(run.id, RunState::Cancelled)?;
        self.emit_state_change(&updated, from, Some("cancelled by operator"))
            .await;
        info!(run_id = %updated.id, "cancelled run");
        Ok(updated)
    }

    async fn resumable_or_new_run(&self, source: Source) -> Result<CrawlRun, CrawlError> {
        if let Some(run) = self
            .runs
            .latest_run_in_states(source, &[RunState::NotStarted, RunState::FetchingDecks])?
        {
            return Ok(run);
        }

        let watermark = self.decks.latest_updated_time(source)?;
        let run = CrawlRun::new(source, watermark);
        self.runs.create_run(&run)?;
        info!(run_id = %run.id, source = %source, watermark = ?watermark, "created crawl run");
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::RunCreated {
                    run_id: run.id.to_string(),
                    source: source.to_string(),
                    search_back_to: run.search_back_to,
                })
                .await;
        }
        Ok(run)
    }

    /// Park the run in `Error` with the upstream diagnostic in its
    /// note, then hand the original error back.
    async fn halt_run(&self, run_id: Uuid, source: Source, e: SourceError) -> CrawlError {
        let note = match e.upstream_response() {
            Some(response) => response.describe(),
            None => e.to_string(),
        };
        if let Err(store_err) = self.runs.set_note(run_id, &note) {
            warn!(run_id = %run_id, error = %store_err, "failed to record run note");
        }

        match self.runs.update_state(run_id, RunState::Error) {
            Ok(updated) => {
                if let Some(ref audit) = self.audit {
                    audit
                        .emit(AuditEvent::RunFailed {
                            run_id: run_id.to_string(),
                            source: source.to_string(),
                            error: e.to_string(),
                        })
                        .await;
                }
                self.emit_state_change(&updated, RunState::FetchingDecks, Some(&e.to_string()))
                    .await;
            }
            Err(store_err) => {
                warn!(run_id = %run_id, error = %store_err, "failed to park run in error state");
            }
        }

        warn!(run_id = %run_id, error = %e, "crawl run halted on upstream error");
        CrawlError::Source(e)
    }

    fn current_run(&self, run_id: Uuid, source: Source) -> Result<CrawlRun, CrawlError> {
        Ok(self
            .runs
            .get_run(run_id)?
            .ok_or(CrawlError::NoRun(source))?)
    }

    async fn emit_state_change(&self, run: &CrawlRun, from: RunState, reason: Option<&str>) {
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::RunStateChanged {
                    run_id: run.id.to_string(),
                    source: run.source.to_string(),
                    from_state: from.as_str().to_string(),
                    to_state: run.state.as_str().to_string(),
                    reason: reason.map(String::from),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use tokio::sync::mpsc;

    use super::*;
    use crate::crawl::{ProcessedPage, SqliteRunStore};
    use crate::decks::{Deck, DeckStoreError, SqliteDeckStore};
    use crate::sources::{DeckSummary, UpstreamResponse};
    use crate::testing::{fixtures, MockDeckSource};

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

    struct TestDriver {
        driver: CrawlDriver,
        runs: Arc<SqliteRunStore>,
        decks: Arc<SqliteDeckStore>,
        adapter: Arc<MockDeckSource>,
        stop: AtomicBool,
    }

    fn build_driver() -> TestDriver {
        let runs = Arc::new(SqliteRunStore::in_memory().unwrap());
        let decks = Arc::new(SqliteDeckStore::in_memory().unwrap());
        let adapter = Arc::new(MockDeckSource::new());
        let driver = CrawlDriver::new(
            runs.clone(),
            decks.clone(),
            Arc::new(RecordingProcessor::new()),
        )
        .with_adapter(adapter.clone())
        .with_page_delay(Duration::ZERO);

        TestDriver {
            driver,
            runs,
            decks,
            adapter,
            stop: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn test_crawl_creates_run_and_completes() {
        let t = build_driver();
        let now = Utc::now();
        t.adapter
            .push_page(fixtures::page(
                vec![fixtures::summary("1", now), fixtures::summary("2", now)],
                Some("https://mock.test/page2"),
            ))
            .await;
        t.adapter
            .push_page(fixtures::page(vec![fixtures::summary("3", now)], None))
            .await;

        let outcome = t
            .driver
            .crawl(Source::Archidekt, false, &t.stop)
            .await
            .unwrap();

        assert_eq!(outcome.run.state, RunState::Complete);
        assert!(outcome.run.next_fetch.is_none());
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.decks_created, 3);

        // Fresh store means no watermark
        assert!(outcome.run.search_back_to.is_none());
    }

    #[tokio::test]
    async fn test_crawl_seeds_watermark_from_known_decks() {
        let t = build_driver();
        let seen_at = Utc::now() - ChronoDuration::days(3);
        let summary = fixtures::summary("77", seen_at);
        let deck = Deck::new(Source::Archidekt, &summary);
        t.decks.save_deck_with_fetch(&deck, &summary.fetch_url).unwrap();

        let outcome = t
            .driver
            .crawl(Source::Archidekt, false, &t.stop)
            .await
            .unwrap();

        assert_eq!(outcome.run.search_back_to, Some(seen_at));
    }

    #[tokio::test]
    async fn test_crawl_once_persists_cursor_and_resumes() {
        let t = build_driver();
        let now = Utc::now();
        t.adapter
            .push_page(fixtures::page(
                vec![fixtures::summary("1", now)],
                Some("https://mock.test/page2"),
            ))
            .await;
        t.adapter
            .push_page(fixtures::page(vec![fixtures::summary("2", now)], None))
            .await;

        let outcome = t
            .driver
            .crawl(Source::Archidekt, true, &t.stop)
            .await
            .unwrap();
        assert_eq!(outcome.run.state, RunState::FetchingDecks);
        assert_eq!(
            outcome.run.next_fetch.as_deref(),
            Some("https://mock.test/page2")
        );
        assert_eq!(outcome.pages, 1);

        // Second invocation picks the same run up at its cursor
        let outcome = t
            .driver
            .crawl(Source::Archidekt, true, &t.stop)
            .await
            .unwrap();
        assert_eq!(outcome.run.state, RunState::Complete);

        assert_eq!(
            t.adapter.page_fetches().await,
            vec![None, Some("https://mock.test/page2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_halts_run_with_note() {
        let t = build_driver();
        t.adapter
            .push_page_error(SourceError::from_status(UpstreamResponse {
                status: 503,
                url: "https://mock.test/api/decks".to_string(),
                headers: vec![("retry-after".to_string(), "60".to_string())],
                body: "maintenance".to_string(),
            }))
            .await;

        let err = t
            .driver
            .crawl(Source::Archidekt, false, &t.stop)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Source(SourceError::Upstream { .. })));

        let run = t
            .runs
            .latest_run_in_states(Source::Archidekt, &[RunState::Error])
            .unwrap()
            .unwrap();
        assert!(run.note.starts_with("503 accessing https://mock.test/api/decks"));
        assert!(run.note.contains(".. retry-after: 60"));
        assert!(run.note.ends_with("maintenance"));
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_run_resumable() {
        let t = build_driver();
        t.adapter.push_page_error(SourceError::Timeout).await;

        let err = t
            .driver
            .crawl(Source::Archidekt, false, &t.stop)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Source(SourceError::Timeout)));

        let run = t
            .runs
            .latest_run_in_states(Source::Archidekt, &[RunState::FetchingDecks])
            .unwrap()
            .unwrap();
        assert!(run.note.is_empty());

        // The next invocation resumes the same run
        let outcome = t
            .driver
            .crawl(Source::Archidekt, false, &t.stop)
            .await
            .unwrap();
        assert_eq!(outcome.run.id, run.id);
        assert_eq!(outcome.run.state, RunState::Complete);
    }

    #[tokio::test]
    async fn test_requeue_keeps_cursor() {
        let t = build_driver();
        let run = CrawlRun::new(Source::Archidekt, Some(Utc::now()));
        t.runs.create_run(&run).unwrap();
        t.runs.update_state(run.id, RunState::FetchingDecks).unwrap();
        t.runs.set_cursor(run.id, Some("https://mock.test/page4")).unwrap();
        t.runs.update_state(run.id, RunState::Error).unwrap();

        let updated = t.driver.requeue(Source::Archidekt).await.unwrap();
        assert_eq!(updated.state, RunState::FetchingDecks);
        assert_eq!(updated.next_fetch.as_deref(), Some("https://mock.test/page4"));
        assert!(updated.search_back_to.is_some());
    }

    #[tokio::test]
    async fn test_requeue_without_cursor_restarts_from_scratch() {
        let t = build_driver();
        let run = CrawlRun::new(Source::Archidekt, Some(Utc::now()));
        t.runs.create_run(&run).unwrap();
        t.runs.update_state(run.id, RunState::FetchingDecks).unwrap();
        t.runs.update_state(run.id, RunState::Error).unwrap();

        let updated = t.driver.requeue(Source::Archidekt).await.unwrap();
        assert_eq!(updated.state, RunState::NotStarted);
        assert!(updated.search_back_to.is_none());
    }

    #[tokio::test]
    async fn test_requeue_requires_halted_run() {
        let t = build_driver();
        let err = t.driver.requeue(Source::Archidekt).await.unwrap_err();
        assert!(matches!(err, CrawlError::NoRun(Source::Archidekt)));
    }

    #[tokio::test]
    async fn test_cancel_from_each_workable_state() {
        let t = build_driver();

        // NotStarted
        let run = CrawlRun::new(Source::Archidekt, None);
        t.runs.create_run(&run).unwrap();
        let updated = t.driver.cancel(Source::Archidekt).await.unwrap();
        assert_eq!(updated.id, run.id);
        assert_eq!(updated.state, RunState::Cancelled);

        // Error
        let run = CrawlRun::new(Source::Archidekt, None);
        t.runs.create_run(&run).unwrap();
        t.runs.update_state(run.id, RunState::FetchingDecks).unwrap();
        t.runs.update_state(run.id, RunState::Error).unwrap();
        let updated = t.driver.cancel(Source::Archidekt).await.unwrap();
        assert_eq!(updated.id, run.id);
        assert_eq!(updated.state, RunState::Cancelled);

        // Nothing left to cancel
        let err = t.driver.cancel(Source::Archidekt).await.unwrap_err();
        assert!(matches!(err, CrawlError::NoRun(_)));
    }

    #[tokio::test]
    async fn test_clear_watermark() {
        let t = build_driver();
        let run = CrawlRun::new(Source::Moxfield, Some(Utc::now()));
        t.runs.create_run(&run).unwrap();

        let updated = t.driver.clear_watermark(Source::Moxfield).await.unwrap();
        assert_eq!(updated.id, run.id);
        assert!(updated.search_back_to.is_none());

        // Only NotStarted runs qualify
        t.runs.update_state(run.id, RunState::FetchingDecks).unwrap();
        let err = t.driver.clear_watermark(Source::Moxfield).await.unwrap_err();
        assert!(matches!(err, CrawlError::NoRun(_)));
    }

    #[tokio::test]
    async fn test_unregistered_source_is_rejected() {
        let t = build_driver();
        let err = t
            .driver
            .crawl(Source::Moxfield, false, &t.stop)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::NoAdapter(Source::Moxfield)));
    }

    #[tokio::test]
    async fn test_stop_flag_checked_before_fetch() {
        let t = build_driver();
        t.adapter
            .push_page(fixtures::page(vec![fixtures::summary("1", Utc::now())], None))
            .await;
        t.stop.store(true, Ordering::Relaxed);

        let outcome = t
            .driver
            .crawl(Source::Archidekt, false, &t.stop)
            .await
            .unwrap();

        assert_eq!(outcome.pages, 0);
        assert_eq!(outcome.run.state, RunState::FetchingDecks);
        assert!(t.adapter.page_fetches().await.is_empty());
    }

    #[tokio::test]
    async fn test_audit_event_sequence() {
        let (tx, mut rx) = mpsc::channel(64);
        let t = build_driver();
        let driver = t.driver.with_audit(AuditHandle::new(tx));

        t.adapter
            .push_page(fixtures::page(vec![fixtures::summary("1", Utc::now())], None))
            .await;

        driver.crawl(Source::Archidekt, false, &t.stop).await.unwrap();

        let mut event_types = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            event_types.push(envelope.event.event_type());
        }
        assert_eq!(
            event_types,
            vec![
                "run_created",
                "run_state_changed",
                "page_processed",
                "run_state_changed",
            ]
        );
    }
}
