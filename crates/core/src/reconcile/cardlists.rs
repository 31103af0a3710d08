//! Card-list reconciler: outstanding fetch obligations in, reconciled
//! membership and legality verdicts out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditHandle};
use crate::cards::CardCatalog;
use crate::decks::{CardInDeck, CardListDiff, CommanderPair, Deck, DeckCrawlResult, DeckStore};
use crate::legality::{evaluate, DeckEntry, Verdict};
use crate::sources::{CardEntry, DeckSource, Source, SourceError};

use super::ReconcileError;

/// What happened to one outstanding fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Card list fetched, diffed and applied; verdict persisted.
    Reconciled { deck_id: Uuid, legal: bool },
    /// The deck is gone or rejected upstream; obligation retired.
    Unfetchable { deck_id: Uuid, status: Option<u16> },
    /// The obligation pointed at a deck that no longer exists locally.
    MissingDeck { deck_id: Uuid },
}

/// Tally of one `reconcile_pending` sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchBatch {
    pub processed: u64,
    pub reconciled: u64,
    pub unfetchable: u64,
    pub conflicts: u64,
}

/// Tally of one legality recheck sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegalitySweep {
    pub checked: u64,
    pub changed: u64,
}

/// Tally of one commander backfill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommanderBackfill {
    pub examined: u64,
    pub paired: u64,
    pub skipped: u64,
}

/// Works through the queue of per-deck fetch obligations.
///
/// One obligation at a time: fetch the deck's current card list
/// through its source's adapter, resolve printings against the
/// catalog, diff against stored membership, apply the diff in one
/// transaction, then re-evaluate legality and retire the obligation.
/// Upstream rejecting a single deck never stops the sweep; only
/// transport and storage failures do.
pub struct CardListReconciler {
    adapters: HashMap<Source, Arc<dyn DeckSource>>,
    decks: Arc<dyn DeckStore>,
    catalog: Arc<dyn CardCatalog>,
    audit: Option<AuditHandle>,
    deck_delay: Duration,
}

impl CardListReconciler {
    pub fn new(decks: Arc<dyn DeckStore>, catalog: Arc<dyn CardCatalog>) -> Self {
        Self {
            adapters: HashMap::new(),
            decks,
            catalog,
            audit: None,
            deck_delay: Duration::from_secs(2),
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

    /// Delay between deck fetches.
    pub fn with_deck_delay(mut self, delay: Duration) -> Self {
        self.deck_delay = delay;
        self
    }

    /// Take the oldest outstanding obligation and settle it. `None`
    /// when the queue is empty.
    pub async fn reconcile_next(&self) -> Result<Option<FetchOutcome>, ReconcileError> {
        let Some(result) = self.decks.next_pending_fetch()? else {
            return Ok(None);
        };
        self.process_result(&result).await.map(Some)
    }

    /// Settle outstanding obligations until the queue drains, `limit`
    /// is reached, or `stop` is raised, sleeping the politeness delay
    /// between decks.
    pub async fn reconcile_pending(
        &self,
        limit: Option<u64>,
        stop: &AtomicBool,
    ) -> Result<FetchBatch, ReconcileError> {
        let mut batch = FetchBatch::default();
        loop {
            if stop.load(Ordering::Relaxed) {
                info!("stop requested, leaving remaining fetches queued");
                break;
            }
            if let Some(limit) = limit {
                if batch.processed >= limit {
                    break;
                }
            }

            let outcome = match self.reconcile_next().await? {
                Some(outcome) => outcome,
                None => break,
            };

            batch.processed += 1;
            match outcome {
                FetchOutcome::Reconciled { .. } => batch.reconciled += 1,
                FetchOutcome::Unfetchable { .. } => batch.unfetchable += 1,
                FetchOutcome::MissingDeck { .. } => batch.conflicts += 1,
            }

            tokio::time::sleep(self.deck_delay).await;
        }
        Ok(batch)
    }

    /// Queue a fresh card fetch for every stored deck of `source`,
    /// forcing a refetch on the next sweep.
    pub fn schedule_recrawl(&self, source: Source) -> Result<u64, ReconcileError> {
        let adapter = self
            .adapters
            .get(&source)
            .ok_or(ReconcileError::NoAdapter(source))?;

        let now = Utc::now();
        let mut scheduled = 0u64;
        for deck in self.decks.decks_for_source(source)? {
            let url = adapter.deck_fetch_url(&deck.source_id);
            self.decks.schedule_fetch(deck.id, &url, now)?;
            scheduled += 1;
        }

        info!(source = %source, scheduled, "scheduled card refetch for stored decks");
        Ok(scheduled)
    }

    /// Re-evaluate every stored deck against the current catalog.
    /// Only changed verdicts are persisted and logged.
    pub fn recheck_legality(&self) -> Result<LegalitySweep, ReconcileError> {
        let mut sweep = LegalitySweep::default();
        for deck_id in self.decks.deck_ids()? {
            let Some(deck) = self.decks.get_deck(deck_id)? else {
                continue;
            };
            let members = self.decks.deck_cards(deck_id)?;
            let entries = self.entries_from_membership(&members)?;
            let verdict = evaluate(&entries);
            sweep.checked += 1;

            if verdict.legal == deck.pdh_legal {
                continue;
            }
            self.decks.set_deck_legality(deck_id, verdict.legal)?;
            info!(
                deck_id = %deck_id,
                name = %deck.name,
                was_legal = deck.pdh_legal,
                now_legal = verdict.legal,
                reason = ?verdict.reason,
                "legality verdict changed"
            );
            if let Some(ref audit) = self.audit {
                audit.try_emit(AuditEvent::LegalityChanged {
                    deck_id: deck_id.to_string(),
                    was_legal: deck.pdh_legal,
                    now_legal: verdict.legal,
                    reason: verdict.reason,
                });
            }
            sweep.changed += 1;
        }
        Ok(sweep)
    }

    /// Derive and store commander pairs for legal decks. With
    /// `recompute_all` every legal deck is repaired; otherwise only
    /// decks still missing a pair.
    pub fn compute_commanders(&self, recompute_all: bool) -> Result<CommanderBackfill, ReconcileError> {
        let mut backfill = CommanderBackfill::default();
        for deck_id in self.decks.legal_deck_ids(!recompute_all)? {
            backfill.examined += 1;
            let members = self.decks.deck_cards(deck_id)?;
            let entries = self.entries_from_membership(&members)?;

            match commander_pair(&entries) {
                Some(pair) => {
                    self.decks.ensure_commander(&pair)?;
                    self.decks.set_deck_commander(deck_id, pair.id)?;
                    backfill.paired += 1;
                }
                None => {
                    warn!(deck_id = %deck_id, "legal deck has an implausible commander slot count");
                    backfill.skipped += 1;
                }
            }
        }
        Ok(backfill)
    }

    async fn process_result(&self, result: &DeckCrawlResult) -> Result<FetchOutcome, ReconcileError> {
        // Conflict, not failure: the deck behind the obligation is gone
        let Some(deck) = self.decks.get_deck(result.deck_id)? else {
            warn!(deck_id = %result.deck_id, "fetch obligation points at a missing deck, retiring it");
            self.decks.mark_unfetchable(result.id)?;
            return Ok(FetchOutcome::MissingDeck {
                deck_id: result.deck_id,
            });
        };

        let Some(adapter) = self.adapters.get(&deck.source) else {
            warn!(deck_id = %deck.id, source = %deck.source, "no adapter for deck's source, retiring fetch");
            self.decks.mark_unfetchable(result.id)?;
            return Ok(FetchOutcome::Unfetchable {
                deck_id: deck.id,
                status: None,
            });
        };

        let entries = match adapter.fetch_deck(&result.url).await {
            Ok(entries) => entries,
            Err(SourceError::Upstream { message, response })
                if matches!(response.status, 400 | 404) =>
            {
                // Deck deleted or made private upstream
                info!(deck_id = %deck.id, status = response.status, url = %result.url, "deck gone upstream, retiring fetch");
                self.decks.mark_unfetchable(result.id)?;
                self.emit_fetch_failure(&deck, &result.url, &message).await;
                return Ok(FetchOutcome::Unfetchable {
                    deck_id: deck.id,
                    status: Some(response.status),
                });
            }
            Err(SourceError::Upstream { message, response }) => {
                warn!(deck_id = %deck.id, status = response.status, url = %result.url, "upstream refused deck fetch, retiring it");
                self.decks.mark_unfetchable(result.id)?;
                self.emit_fetch_failure(&deck, &result.url, &message).await;
                return Ok(FetchOutcome::Unfetchable {
                    deck_id: deck.id,
                    status: Some(response.status),
                });
            }
            // Transport failures leave the obligation queued for retry
            Err(e) => return Err(e.into()),
        };

        let verdict = self.reconcile_deck(&deck, result, &entries).await?;
        Ok(FetchOutcome::Reconciled {
            deck_id: deck.id,
            legal: verdict.legal,
        })
    }

    /// Diff-and-apply one fetched card list, then settle legality and
    /// the commander pair and retire the deck's obligations.
    async fn reconcile_deck(
        &self,
        deck: &Deck,
        result: &DeckCrawlResult,
        entries: &[CardEntry],
    ) -> Result<Verdict, ReconcileError> {
        let resolved = self.resolve_entries(deck.id, entries).await?;

        let mut remaining: HashMap<Uuid, CardInDeck> = self
            .decks
            .deck_cards(deck.id)?
            .into_iter()
            .map(|c| (c.card_id, c))
            .collect();

        let mut diff = CardListDiff::default();
        for entry in &resolved {
            let membership = CardInDeck {
                card_id: entry.card.id,
                is_commander: entry.is_commander,
            };
            match remaining.remove(&entry.card.id) {
                Some(existing) => {
                    if existing.is_commander != entry.is_commander {
                        diff.update.push(membership);
                    }
                }
                None => diff.create.push(membership),
            }
        }
        diff.delete = remaining.into_keys().collect();

        self.decks.apply_card_diff(deck.id, &diff)?;

        let verdict = evaluate(&resolved);
        let commander = if verdict.legal {
            commander_pair(&resolved)
        } else {
            None
        };
        if let Some(ref pair) = commander {
            self.decks.ensure_commander(pair)?;
        }
        self.decks
            .complete_fetch(result.id, deck.id, verdict.legal, commander.map(|p| p.id))?;
        self.decks.delete_fetches_for_deck(deck.id)?;

        info!(
            deck_id = %deck.id,
            name = %deck.name,
            cards = resolved.len(),
            created = diff.create.len(),
            updated = diff.update.len(),
            deleted = diff.delete.len(),
            legal = verdict.legal,
            "reconciled deck"
        );

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::DeckReconciled {
                    deck_id: deck.id.to_string(),
                    source: deck.source.to_string(),
                    cards: resolved.len(),
                    created: diff.create.len(),
                    updated: diff.update.len(),
                    deleted: diff.delete.len(),
                    legal: verdict.legal,
                    reason: verdict.reason.clone(),
                })
                .await;
        }

        Ok(verdict)
    }

    /// Resolve upstream entries to catalog cards. Printing ids are
    /// looked up in bulk; misses fall back to a name+set lookup; what
    /// still fails is skipped with a diagnostic, never aborting the
    /// deck. Entries resolving to the same card collapse into one
    /// membership, keeping the commander flag if any occurrence had
    /// it.
    async fn resolve_entries(
        &self,
        deck_id: Uuid,
        entries: &[CardEntry],
    ) -> Result<Vec<DeckEntry>, ReconcileError> {
        let printing_ids: Vec<String> = entries.iter().map(|e| e.printing_id.clone()).collect();
        let by_printing = self.catalog.resolve_printings(&printing_ids)?;

        let mut resolved: Vec<DeckEntry> = Vec::new();
        let mut position: HashMap<Uuid, usize> = HashMap::new();
        let mut unresolved: Vec<String> = Vec::new();

        for entry in entries {
            let card = match by_printing.get(&entry.printing_id) {
                Some(card) => Some(card.clone()),
                None => self
                    .catalog
                    .card_by_name_and_set(&entry.name, &entry.set_code)?,
            };

            let Some(card) = card else {
                warn!(
                    deck_id = %deck_id,
                    "could not resolve printing {}; should be \"{}\" ({})",
                    entry.printing_id, entry.name, entry.set_code
                );
                unresolved.push(entry.printing_id.clone());
                continue;
            };

            match position.get(&card.id) {
                Some(&i) => resolved[i].is_commander |= entry.is_commander,
                None => {
                    position.insert(card.id, resolved.len());
                    resolved.push(DeckEntry {
                        card,
                        is_commander: entry.is_commander,
                    });
                }
            }
        }

        if !unresolved.is_empty() {
            if let Some(ref audit) = self.audit {
                audit
                    .emit(AuditEvent::PrintingsUnresolved {
                        deck_id: deck_id.to_string(),
                        printings: unresolved,
                    })
                    .await;
            }
        }

        Ok(resolved)
    }

    /// Turn stored membership back into evaluator input. Cards the
    /// catalog no longer knows are dropped.
    fn entries_from_membership(
        &self,
        members: &[CardInDeck],
    ) -> Result<Vec<DeckEntry>, ReconcileError> {
        let ids: Vec<Uuid> = members.iter().map(|m| m.card_id).collect();
        let by_id: HashMap<Uuid, _> = self
            .catalog
            .cards_by_ids(&ids)?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        Ok(members
            .iter()
            .filter_map(|m| {
                by_id.get(&m.card_id).map(|card| DeckEntry {
                    card: card.clone(),
                    is_commander: m.is_commander,
                })
            })
            .collect())
    }

    async fn emit_fetch_failure(&self, deck: &Deck, url: &str, error: &str) {
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::DeckFetchFailed {
                    deck_id: deck.id.to_string(),
                    url: url.to_string(),
                    error: error.to_string(),
                })
                .await;
        }
    }
}

/// The commander pair for a list with one or two commander slots;
/// `None` for any other count.
fn commander_pair(entries: &[DeckEntry]) -> Option<CommanderPair> {
    let mut slots = entries.iter().filter(|e| e.is_commander).map(|e| e.card.id);
    let first = slots.next()?;
    let second = slots.next();
    match slots.next() {
        Some(_) => None,
        None => Some(CommanderPair::new(first, second)),
    }
}
