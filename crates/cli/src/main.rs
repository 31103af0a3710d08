//! Operator CLI for the decklist ingestion pipeline.
//!
//! Wires the crawl driver, the card-list reconciler and the audit
//! trail to the stores named in the configuration file, then runs one
//! command and flushes the audit writer before exiting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use uncommander_core::{
    create_audit_system, load_config, validate_config, ArchidektSource, AuditFilter, AuditStore,
    CardListReconciler, Config, CrawlDriver, DeckPageReconciler, MoxfieldSource, RunFilter,
    RunStore, Source, SqliteAuditStore, SqliteCardCatalog, SqliteDeckStore, SqliteRunStore,
};

#[derive(Parser)]
#[command(name = "uncommander")]
#[command(about = "Pauper Commander decklist ingestion and legality tracking")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "uncommander.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl a source's deck listing into the local stores
    Crawl {
        /// Source to crawl
        #[arg(value_parser = parse_source)]
        source: Source,

        /// Stop after a single page, leaving the run resumable
        #[arg(long)]
        once: bool,
    },

    /// Work through outstanding per-deck card fetches
    FetchDecks {
        /// Stop after this many decks
        #[arg(long)]
        limit: Option<u64>,
    },

    /// List crawl runs, newest first
    Runs {
        /// Only runs for this source
        #[arg(long, value_parser = parse_source)]
        source: Option<Source>,

        /// Maximum runs to list
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Query the audit trail, newest first, one JSON record per line
    Audit {
        /// Only events for this crawl run
        #[arg(long)]
        run_id: Option<String>,

        /// Only events for this deck
        #[arg(long)]
        deck_id: Option<String>,

        /// Only events of this type, e.g. deck_reconciled
        #[arg(long)]
        event_type: Option<String>,

        /// Only events from the last N hours
        #[arg(long)]
        since_hours: Option<i64>,

        /// Maximum events to print
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Put a halted run back into the crawl
    Requeue {
        #[arg(value_parser = parse_source)]
        source: Source,
    },

    /// Clear a pending run's watermark so the next crawl pages all the
    /// way back through the listing
    ClearWatermark {
        #[arg(value_parser = parse_source)]
        source: Source,
    },

    /// Cancel a source's active run
    Cancel {
        #[arg(value_parser = parse_source)]
        source: Source,
    },

    /// Queue a card refetch for every stored deck of a source
    Recrawl {
        #[arg(value_parser = parse_source)]
        source: Source,
    },

    /// Re-evaluate every stored deck against the current catalog
    RecheckLegality,

    /// Derive commander pairs for legal decks
    ComputeCommanders {
        /// Recompute pairs for every legal deck, not only those missing one
        #[arg(long)]
        all: bool,
    },
}

fn parse_source(s: &str) -> Result<Source, String> {
    Source::parse(s).ok_or_else(|| format!("unknown source '{}', expected archidekt or moxfield", s))
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    let app = App::build(&config)?;
    let stop = install_stop_flag();

    let result = app.execute(cli.command, &stop).await;
    app.shutdown().await;
    result
}

/// Raise a stop flag on Ctrl+C; the driver and reconciler check it
/// between fetches, so the current item still finishes cleanly.
fn install_stop_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing the current item");
            flag.store(true, Ordering::Relaxed);
        }
    });
    stop
}

/// The crawl driver and reconciler wired to the configured stores,
/// plus the background audit writer.
struct App {
    driver: CrawlDriver,
    reconciler: CardListReconciler,
    runs: Arc<SqliteRunStore>,
    audit_store: Arc<SqliteAuditStore>,
    writer_task: tokio::task::JoinHandle<()>,
}

impl App {
    fn build(config: &Config) -> Result<Self> {
        let decks = Arc::new(
            SqliteDeckStore::new(&config.database.decks).context("Failed to create deck store")?,
        );
        let runs = Arc::new(
            SqliteRunStore::new(&config.database.runs).context("Failed to create run store")?,
        );
        let catalog = Arc::new(
            SqliteCardCatalog::new(&config.database.cards)
                .context("Failed to create card catalog")?,
        );
        let audit_store = Arc::new(
            SqliteAuditStore::new(&config.database.audit).context("Failed to create audit store")?,
        );

        let (audit_handle, audit_writer) = create_audit_system(
            audit_store.clone() as Arc<dyn AuditStore>,
            config.audit.buffer,
        );
        let writer_task = tokio::spawn(audit_writer.run());

        let timeout = Duration::from_secs(config.crawler.timeout_secs);
        let archidekt = Arc::new(ArchidektSource::new(timeout));
        let moxfield = Arc::new(MoxfieldSource::new(timeout));

        let driver = CrawlDriver::new(
            runs.clone(),
            decks.clone(),
            Arc::new(DeckPageReconciler::new(decks.clone())),
        )
        .with_adapter(archidekt.clone())
        .with_adapter(moxfield.clone())
        .with_page_delay(Duration::from_secs(config.crawler.page_delay_secs))
        .with_audit(audit_handle.clone());

        let reconciler = CardListReconciler::new(decks, catalog)
            .with_adapter(archidekt)
            .with_adapter(moxfield)
            .with_deck_delay(Duration::from_secs(config.crawler.deck_delay_secs))
            .with_audit(audit_handle);

        Ok(Self {
            driver,
            reconciler,
            runs,
            audit_store,
            writer_task,
        })
    }

    async fn execute(&self, command: Command, stop: &AtomicBool) -> Result<()> {
        match command {
            Command::Crawl { source, once } => {
                let outcome = self.driver.crawl(source, once, stop).await?;
                println!(
                    "run {} is {}: {} pages, {} decks created, {} updated",
                    outcome.run.id,
                    outcome.run.state,
                    outcome.pages,
                    outcome.decks_created,
                    outcome.decks_updated
                );
            }

            Command::FetchDecks { limit } => {
                let batch = self.reconciler.reconcile_pending(limit, stop).await?;
                println!(
                    "processed {} fetches: {} reconciled, {} unfetchable, {} conflicts",
                    batch.processed, batch.reconciled, batch.unfetchable, batch.conflicts
                );
            }

            Command::Runs { source, limit } => {
                let mut filter = RunFilter::new().with_limit(limit);
                if let Some(source) = source {
                    filter = filter.with_source(source);
                }
                let runs = self.runs.list_runs(&filter)?;
                if runs.is_empty() {
                    println!("no crawl runs recorded");
                }
                for run in runs {
                    let watermark = run
                        .search_back_to
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}  {:<9}  {:<14}  started {}  watermark {}  cursor {}",
                        run.id,
                        run.source,
                        run.state,
                        run.started_at.to_rfc3339(),
                        watermark,
                        run.next_fetch.as_deref().unwrap_or("-"),
                    );
                    // Notes hold whole upstream responses; the first
                    // line is the status summary
                    if let Some(line) = run.note.lines().next() {
                        println!("    note: {}", line);
                    }
                }
            }

            Command::Audit {
                run_id,
                deck_id,
                event_type,
                since_hours,
                limit,
            } => {
                let mut filter = AuditFilter::new().with_limit(limit);
                if let Some(run_id) = run_id {
                    filter = filter.with_run_id(run_id);
                }
                if let Some(deck_id) = deck_id {
                    filter = filter.with_deck_id(deck_id);
                }
                if let Some(event_type) = event_type {
                    filter = filter.with_event_type(event_type);
                }
                if let Some(hours) = since_hours {
                    filter = filter.with_time_range(Some(Utc::now() - ChronoDuration::hours(hours)), None);
                }
                for record in self.audit_store.query(&filter)? {
                    println!("{}", serde_json::to_string(&record)?);
                }
            }

            Command::Requeue { source } => {
                let run = self.driver.requeue(source).await?;
                println!("run {} is {}", run.id, run.state);
            }

            Command::ClearWatermark { source } => {
                let run = self.driver.clear_watermark(source).await?;
                println!("run {} will crawl the whole listing", run.id);
            }

            Command::Cancel { source } => {
                let run = self.driver.cancel(source).await?;
                println!("run {} cancelled", run.id);
            }

            Command::Recrawl { source } => {
                let scheduled = self.reconciler.schedule_recrawl(source)?;
                println!("queued card refetch for {} decks", scheduled);
            }

            Command::RecheckLegality => {
                let sweep = self.reconciler.recheck_legality()?;
                println!(
                    "checked {} decks, {} verdicts changed",
                    sweep.checked, sweep.changed
                );
            }

            Command::ComputeCommanders { all } => {
                let backfill = self.reconciler.compute_commanders(all)?;
                println!(
                    "examined {} legal decks: {} paired, {} skipped",
                    backfill.examined, backfill.paired, backfill.skipped
                );
            }
        }
        Ok(())
    }

    /// Drop every holder of an audit handle, then wait for the writer
    /// to drain the channel so no event is lost on exit.
    async fn shutdown(self) {
        let App {
            driver,
            reconciler,
            writer_task,
            ..
        } = self;
        drop(driver);
        drop(reconciler);
        if let Err(e) = writer_task.await {
            warn!("audit writer task failed: {}", e);
        }
    }
}
