//! Resumable paginated crawls against the registered deck sources.
//!
//! A crawl run is durable state: its cursor is persisted only after the
//! page behind it has been reconciled, so a crash or a stop signal
//! never loses more than the page in flight. The driver re-reads the
//! run's status between pages, which is what makes cancellation from
//! another process stick.

mod crawler;
mod driver;
mod sqlite_store;
mod store;
mod types;

pub use crawler::{AdvanceOutcome, PageCrawler, PageProcessor, ProcessedPage};
pub use driver::{CrawlDriver, CrawlOutcome};
pub use sqlite_store::SqliteRunStore;
pub use store::{CrawlStoreError, RunFilter, RunStore};
pub use types::{CrawlError, CrawlRun, RunState};
