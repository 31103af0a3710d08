//! Core library for uncommander: Pauper Commander decklist ingestion.
//!
//! Crawls public deck sites source by source, reconciles fetched card
//! lists against a local card catalog, evaluates format legality and
//! keeps a durable audit trail of everything the pipeline does.

pub mod audit;
pub mod cards;
pub mod config;
pub mod crawl;
pub mod decks;
pub mod legality;
pub mod reconcile;
pub mod sources;
pub mod testing;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditEventEnvelope, AuditFilter, AuditHandle,
    AuditRecord, AuditStore, AuditWriter, SqliteAuditStore,
};
pub use cards::{
    Card, CardCatalog, CatalogError, ColorIdentity, PartnerKind, Printing, Rarity,
    SqliteCardCatalog,
};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use crawl::{
    AdvanceOutcome, CrawlDriver, CrawlError, CrawlOutcome, CrawlRun, CrawlStoreError, PageCrawler,
    PageProcessor, ProcessedPage, RunFilter, RunState, RunStore, SqliteRunStore,
};
pub use decks::{
    CardInDeck, CardListDiff, CommanderPair, Deck, DeckCrawlResult, DeckStore, DeckStoreError,
    SqliteDeckStore,
};
pub use legality::{evaluate, DeckEntry, Verdict};
pub use reconcile::{
    CardListReconciler, CommanderBackfill, DeckPageReconciler, FetchBatch, FetchOutcome,
    LegalitySweep, ReconcileError,
};
pub use sources::{
    ArchidektSource, CardEntry, DeckSource, DeckSummary, MoxfieldSource, Source, SourceError,
    SummaryPage, UpstreamResponse,
};
