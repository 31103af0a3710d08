use thiserror::Error;
use uuid::Uuid;

use crate::sources::Source;

use super::{CrawlRun, RunState};

#[derive(Debug, Error)]
pub enum CrawlStoreError {
    #[error("run not found: {0}")]
    NotFound(Uuid),

    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition { from: RunState, to: RunState },

    #[error("Database error: {0}")]
    Database(String),
}

/// Filter for listing crawl runs
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub source: Option<Source>,
    pub state: Option<RunState>,
    pub limit: i64,
}

impl RunFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_state(mut self, state: RunState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Durable storage for crawl runs.
///
/// `update_state` is the only way a stored run changes state, and it
/// enforces the transition table, so an illegal move is a store error
/// rather than a corrupt row.
pub trait RunStore: Send + Sync {
    /// Persist a newly created run.
    fn create_run(&self, run: &CrawlRun) -> Result<(), CrawlStoreError>;

    /// Fetch a run by id.
    fn get_run(&self, id: Uuid) -> Result<Option<CrawlRun>, CrawlStoreError>;

    /// The most recently started run for `source` in any of `states`.
    fn latest_run_in_states(
        &self,
        source: Source,
        states: &[RunState],
    ) -> Result<Option<CrawlRun>, CrawlStoreError>;

    /// List runs newest-first.
    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<CrawlRun>, CrawlStoreError>;

    /// Transition a run to `state`, returning the updated run.
    /// Fails with `IllegalTransition` when the move is not permitted.
    fn update_state(&self, id: Uuid, state: RunState) -> Result<CrawlRun, CrawlStoreError>;

    /// Persist the continuation cursor for the next page fetch.
    fn set_cursor(&self, id: Uuid, cursor: Option<&str>) -> Result<(), CrawlStoreError>;

    /// Persist an operator-facing diagnostic note.
    fn set_note(&self, id: Uuid, note: &str) -> Result<(), CrawlStoreError>;

    /// Drop the run's watermark so a restart crawls the whole listing.
    fn clear_watermark(&self, id: Uuid) -> Result<(), CrawlStoreError>;
}
