//! SQLite-backed deck store implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use super::{
    CardInDeck, CardListDiff, CommanderPair, Deck, DeckCrawlResult, DeckStore, DeckStoreError,
};
use crate::sources::Source;

/// SQLite-backed deck store.
pub struct SqliteDeckStore {
    conn: Mutex<Connection>,
}

impl SqliteDeckStore {
    /// Open a deck store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, DeckStoreError> {
        let conn = Connection::open(path).map_err(|e| DeckStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory deck store (useful for testing).
    pub fn in_memory() -> Result<Self, DeckStoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| DeckStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), DeckStoreError> {
        conn.execute_batch(
            r#"
            -- One row per upstream deck, unique by (source, source_id)
            CREATE TABLE IF NOT EXISTS decks (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                source_id TEXT NOT NULL,
                name TEXT NOT NULL,
                creator TEXT NOT NULL DEFAULT '',
                source_link TEXT NOT NULL DEFAULT '',
                ingested_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                pdh_legal INTEGER NOT NULL DEFAULT 0,
                commander_id TEXT,
                UNIQUE(source, source_id)
            );

            CREATE INDEX IF NOT EXISTS idx_decks_source_updated ON decks(source, updated_at);
            CREATE INDEX IF NOT EXISTS idx_decks_legal ON decks(pdh_legal);

            -- Pending per-deck card fetches produced by the crawler
            CREATE TABLE IF NOT EXISTS deck_crawl_results (
                id TEXT PRIMARY KEY,
                deck_id TEXT NOT NULL,
                url TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                fetchable INTEGER NOT NULL DEFAULT 1,
                got_cards INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_crawl_results_deck ON deck_crawl_results(deck_id);
            CREATE INDEX IF NOT EXISTS idx_crawl_results_pending ON deck_crawl_results(fetchable, got_cards);

            -- Card membership, one row per (deck, card)
            CREATE TABLE IF NOT EXISTS cards_in_decks (
                deck_id TEXT NOT NULL,
                card_id TEXT NOT NULL,
                is_commander INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (deck_id, card_id)
            );

            CREATE INDEX IF NOT EXISTS idx_cards_in_decks_card ON cards_in_decks(card_id);

            -- Derived commander pairings, id'd deterministically
            CREATE TABLE IF NOT EXISTS commanders (
                id TEXT PRIMARY KEY,
                commander1_id TEXT NOT NULL,
                commander2_id TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_commanders_pair
                ON commanders(commander1_id, commander2_id) WHERE commander2_id IS NOT NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_commanders_solo
                ON commanders(commander1_id) WHERE commander2_id IS NULL;
            "#,
        )
        .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn parse_id(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
    }

    fn parse_time(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_deck(row: &rusqlite::Row) -> rusqlite::Result<Deck> {
        let id_str: String = row.get(0)?;
        let source_str: String = row.get(1)?;
        let ingested_str: String = row.get(6)?;
        let updated_str: String = row.get(7)?;
        let commander_str: Option<String> = row.get(9)?;

        Ok(Deck {
            id: Self::parse_id(&id_str),
            source: Source::parse(&source_str).unwrap_or(Source::Archidekt),
            source_id: row.get(2)?,
            name: row.get(3)?,
            creator: row.get(4)?,
            source_link: row.get(5)?,
            ingested_at: Self::parse_time(&ingested_str),
            updated_at: Self::parse_time(&updated_str),
            pdh_legal: row.get(8)?,
            commander_id: commander_str.map(|s| Self::parse_id(&s)),
        })
    }

    fn row_to_result(row: &rusqlite::Row) -> rusqlite::Result<DeckCrawlResult> {
        let id_str: String = row.get(0)?;
        let deck_str: String = row.get(1)?;
        let updated_str: String = row.get(3)?;

        Ok(DeckCrawlResult {
            id: Self::parse_id(&id_str),
            deck_id: Self::parse_id(&deck_str),
            url: row.get(2)?,
            updated_at: Self::parse_time(&updated_str),
            fetchable: row.get(4)?,
            got_cards: row.get(5)?,
        })
    }
}

const DECK_COLUMNS: &str = "id, source, source_id, name, creator, source_link,
    ingested_at, updated_at, pdh_legal, commander_id";

const RESULT_COLUMNS: &str = "id, deck_id, url, updated_at, fetchable, got_cards";

impl DeckStore for SqliteDeckStore {
    fn latest_updated_time(
        &self,
        source: Source,
    ) -> Result<Option<DateTime<Utc>>, DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let latest: Option<String> = conn
            .query_row(
                "SELECT MAX(updated_at) FROM decks WHERE source = ?",
                params![source.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        Ok(latest.as_deref().map(Self::parse_time))
    }

    fn decks_by_source_ids(
        &self,
        source: Source,
        source_ids: &[String],
    ) -> Result<HashMap<String, Deck>, DeckStoreError> {
        if source_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; source_ids.len()].join(", ");
        let sql = format!(
            "SELECT {DECK_COLUMNS} FROM decks WHERE source = ? AND source_id IN ({placeholders})"
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        let values = std::iter::once(source.as_str().to_string())
            .chain(source_ids.iter().cloned())
            .collect::<Vec<_>>();
        let rows = stmt
            .query_map(params_from_iter(values.iter()), Self::row_to_deck)
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        let mut decks = HashMap::new();
        for row in rows {
            let deck = row.map_err(|e| DeckStoreError::Database(e.to_string()))?;
            decks.insert(deck.source_id.clone(), deck);
        }
        Ok(decks)
    }

    fn save_deck_with_fetch(&self, deck: &Deck, fetch_url: &str) -> Result<(), DeckStoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO decks (id, source, source_id, name, creator, source_link,
                                ingested_at, updated_at, pdh_legal, commander_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(source, source_id) DO UPDATE SET
                name = excluded.name,
                creator = excluded.creator,
                source_link = excluded.source_link,
                updated_at = excluded.updated_at",
            params![
                deck.id.to_string(),
                deck.source.as_str(),
                &deck.source_id,
                &deck.name,
                &deck.creator,
                &deck.source_link,
                deck.ingested_at.to_rfc3339(),
                deck.updated_at.to_rfc3339(),
                deck.pdh_legal,
                deck.commander_id.map(|id| id.to_string()),
            ],
        )
        .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        // On re-sighting the stored id wins over the incoming one.
        let deck_id: String = tx
            .query_row(
                "SELECT id FROM decks WHERE source = ? AND source_id = ?",
                params![deck.source.as_str(), &deck.source_id],
                |row| row.get(0),
            )
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        tx.execute(
            "DELETE FROM deck_crawl_results WHERE deck_id = ? AND got_cards = 0",
            params![&deck_id],
        )
        .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO deck_crawl_results (id, deck_id, url, updated_at, fetchable, got_cards)
             VALUES (?, ?, ?, ?, 1, 0)",
            params![
                Uuid::new_v4().to_string(),
                &deck_id,
                fetch_url,
                deck.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| DeckStoreError::Database(e.to_string()))
    }

    fn get_deck(&self, id: Uuid) -> Result<Option<Deck>, DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {DECK_COLUMNS} FROM decks WHERE id = ?");

        match conn.query_row(&sql, params![id.to_string()], Self::row_to_deck) {
            Ok(deck) => Ok(Some(deck)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DeckStoreError::Database(e.to_string())),
        }
    }

    fn deck_ids(&self) -> Result<Vec<Uuid>, DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id FROM decks ORDER BY rowid")
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                Ok(id)
            })
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        let mut ids = Vec::new();
        for row in rows {
            let id = row.map_err(|e| DeckStoreError::Database(e.to_string()))?;
            ids.push(Self::parse_id(&id));
        }
        Ok(ids)
    }

    fn decks_for_source(&self, source: Source) -> Result<Vec<Deck>, DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {DECK_COLUMNS} FROM decks WHERE source = ? ORDER BY rowid");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![source.as_str()], Self::row_to_deck)
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        let mut decks = Vec::new();
        for row in rows {
            decks.push(row.map_err(|e| DeckStoreError::Database(e.to_string()))?);
        }
        Ok(decks)
    }

    fn legal_deck_ids(&self, missing_commander_only: bool) -> Result<Vec<Uuid>, DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = if missing_commander_only {
            "SELECT id FROM decks WHERE pdh_legal = 1 AND commander_id IS NULL ORDER BY rowid"
        } else {
            "SELECT id FROM decks WHERE pdh_legal = 1 ORDER BY rowid"
        };

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                Ok(id)
            })
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        let mut ids = Vec::new();
        for row in rows {
            let id = row.map_err(|e| DeckStoreError::Database(e.to_string()))?;
            ids.push(Self::parse_id(&id));
        }
        Ok(ids)
    }

    fn deck_cards(&self, deck_id: Uuid) -> Result<Vec<CardInDeck>, DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT card_id, is_commander FROM cards_in_decks WHERE deck_id = ?")
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![deck_id.to_string()], |row| {
                let card_str: String = row.get(0)?;
                Ok(CardInDeck {
                    card_id: Self::parse_id(&card_str),
                    is_commander: row.get(1)?,
                })
            })
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        let mut cards = Vec::new();
        for row in rows {
            cards.push(row.map_err(|e| DeckStoreError::Database(e.to_string()))?);
        }
        Ok(cards)
    }

    fn apply_card_diff(&self, deck_id: Uuid, diff: &CardListDiff) -> Result<(), DeckStoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;
        let deck_id = deck_id.to_string();

        for card_id in &diff.delete {
            tx.execute(
                "DELETE FROM cards_in_decks WHERE deck_id = ? AND card_id = ?",
                params![&deck_id, card_id.to_string()],
            )
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;
        }

        for row in &diff.create {
            tx.execute(
                "INSERT OR REPLACE INTO cards_in_decks (deck_id, card_id, is_commander)
                 VALUES (?, ?, ?)",
                params![&deck_id, row.card_id.to_string(), row.is_commander],
            )
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;
        }

        for row in &diff.update {
            tx.execute(
                "UPDATE cards_in_decks SET is_commander = ? WHERE deck_id = ? AND card_id = ?",
                params![row.is_commander, &deck_id, row.card_id.to_string()],
            )
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| DeckStoreError::Database(e.to_string()))
    }

    fn set_deck_legality(&self, deck_id: Uuid, pdh_legal: bool) -> Result<(), DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE decks SET pdh_legal = ? WHERE id = ?",
                params![pdh_legal, deck_id.to_string()],
            )
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(DeckStoreError::NotFound(format!("deck {deck_id}")));
        }
        Ok(())
    }

    fn set_deck_commander(&self, deck_id: Uuid, commander_id: Uuid) -> Result<(), DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE decks SET commander_id = ? WHERE id = ?",
                params![commander_id.to_string(), deck_id.to_string()],
            )
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(DeckStoreError::NotFound(format!("deck {deck_id}")));
        }
        Ok(())
    }

    fn ensure_commander(&self, pair: &CommanderPair) -> Result<(), DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO commanders (id, commander1_id, commander2_id)
             VALUES (?, ?, ?)",
            params![
                pair.id.to_string(),
                pair.commander1_id.to_string(),
                pair.commander2_id.map(|id| id.to_string()),
            ],
        )
        .map_err(|e| DeckStoreError::Database(e.to_string()))?;
        Ok(())
    }

    fn get_commander(&self, id: Uuid) -> Result<Option<CommanderPair>, DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, commander1_id, commander2_id FROM commanders WHERE id = ?",
            params![id.to_string()],
            |row| {
                let id_str: String = row.get(0)?;
                let first_str: String = row.get(1)?;
                let second_str: Option<String> = row.get(2)?;
                Ok(CommanderPair {
                    id: Self::parse_id(&id_str),
                    commander1_id: Self::parse_id(&first_str),
                    commander2_id: second_str.map(|s| Self::parse_id(&s)),
                })
            },
        );

        match result {
            Ok(pair) => Ok(Some(pair)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DeckStoreError::Database(e.to_string())),
        }
    }

    fn next_pending_fetch(&self) -> Result<Option<DeckCrawlResult>, DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM deck_crawl_results
             WHERE fetchable = 1 AND got_cards = 0 ORDER BY rowid LIMIT 1"
        );

        match conn.query_row(&sql, [], Self::row_to_result) {
            Ok(result) => Ok(Some(result)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DeckStoreError::Database(e.to_string())),
        }
    }

    fn pending_fetch_count(&self) -> Result<u64, DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM deck_crawl_results WHERE fetchable = 1 AND got_cards = 0",
            [],
            |row| row.get(0),
        )
        .map_err(|e| DeckStoreError::Database(e.to_string()))
    }

    fn mark_unfetchable(&self, result_id: Uuid) -> Result<(), DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE deck_crawl_results SET fetchable = 0 WHERE id = ?",
                params![result_id.to_string()],
            )
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(DeckStoreError::NotFound(format!("crawl result {result_id}")));
        }
        Ok(())
    }

    fn schedule_fetch(
        &self,
        deck_id: Uuid,
        url: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DeckStoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;
        let deck_id = deck_id.to_string();

        tx.execute(
            "DELETE FROM deck_crawl_results WHERE deck_id = ? AND got_cards = 0",
            params![&deck_id],
        )
        .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO deck_crawl_results (id, deck_id, url, updated_at, fetchable, got_cards)
             VALUES (?, ?, ?, ?, 1, 0)",
            params![
                Uuid::new_v4().to_string(),
                &deck_id,
                url,
                updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| DeckStoreError::Database(e.to_string()))
    }

    fn complete_fetch(
        &self,
        result_id: Uuid,
        deck_id: Uuid,
        pdh_legal: bool,
        commander_id: Option<Uuid>,
    ) -> Result<(), DeckStoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        let changed = match commander_id {
            Some(commander_id) => tx
                .execute(
                    "UPDATE decks SET pdh_legal = ?, commander_id = ? WHERE id = ?",
                    params![pdh_legal, commander_id.to_string(), deck_id.to_string()],
                )
                .map_err(|e| DeckStoreError::Database(e.to_string()))?,
            None => tx
                .execute(
                    "UPDATE decks SET pdh_legal = ? WHERE id = ?",
                    params![pdh_legal, deck_id.to_string()],
                )
                .map_err(|e| DeckStoreError::Database(e.to_string()))?,
        };
        if changed == 0 {
            return Err(DeckStoreError::NotFound(format!("deck {deck_id}")));
        }

        tx.execute(
            "UPDATE deck_crawl_results SET got_cards = 1 WHERE id = ?",
            params![result_id.to_string()],
        )
        .map_err(|e| DeckStoreError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| DeckStoreError::Database(e.to_string()))
    }

    fn delete_fetches_for_deck(&self, deck_id: Uuid) -> Result<(), DeckStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM deck_crawl_results WHERE deck_id = ?",
            params![deck_id.to_string()],
        )
        .map_err(|e| DeckStoreError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::DeckSummary;
    use chrono::Duration;

    fn create_test_store() -> SqliteDeckStore {
        SqliteDeckStore::in_memory().unwrap()
    }

    fn summary(source_id: &str, name: &str, updated_at: DateTime<Utc>) -> DeckSummary {
        DeckSummary {
            source_id: source_id.to_string(),
            name: name.to_string(),
            creator: "wedge".to_string(),
            updated_at,
            source_link: format!("https://example.com/decks/{}", source_id),
            fetch_url: format!("https://example.com/api/decks/{}/", source_id),
        }
    }

    fn save_deck(store: &SqliteDeckStore, source: Source, source_id: &str, name: &str) -> Deck {
        let deck = Deck::new(source, &summary(source_id, name, Utc::now()));
        store
            .save_deck_with_fetch(&deck, &format!("https://example.com/api/decks/{}/", source_id))
            .unwrap();
        deck
    }

    #[test]
    fn test_save_and_get_deck() {
        let store = create_test_store();
        let deck = save_deck(&store, Source::Archidekt, "123", "Goblins");

        let loaded = store.get_deck(deck.id).unwrap().unwrap();
        assert_eq!(loaded.source, Source::Archidekt);
        assert_eq!(loaded.source_id, "123");
        assert_eq!(loaded.name, "Goblins");
        assert_eq!(loaded.creator, "wedge");
        assert!(!loaded.pdh_legal);
        assert!(loaded.commander_id.is_none());
    }

    #[test]
    fn test_get_deck_missing() {
        let store = create_test_store();
        assert!(store.get_deck(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_resighting_keeps_id_and_derived_fields() {
        let store = create_test_store();
        let deck = save_deck(&store, Source::Archidekt, "123", "Goblins");
        store.set_deck_legality(deck.id, true).unwrap();

        // Same (source, source_id) arrives again with a fresh row id.
        let resighted = Deck::new(
            Source::Archidekt,
            &summary("123", "Goblins v2", Utc::now()),
        );
        store
            .save_deck_with_fetch(&resighted, "https://example.com/api/decks/123/")
            .unwrap();

        let loaded = store.get_deck(deck.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Goblins v2");
        assert!(loaded.pdh_legal);
        assert!(store.get_deck(resighted.id).unwrap().is_none());
        assert_eq!(store.deck_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_save_replaces_outstanding_fetch() {
        let store = create_test_store();
        save_deck(&store, Source::Archidekt, "123", "Goblins");
        save_deck(&store, Source::Archidekt, "123", "Goblins");

        assert_eq!(store.pending_fetch_count().unwrap(), 1);
    }

    #[test]
    fn test_latest_updated_time() {
        let store = create_test_store();
        assert!(store
            .latest_updated_time(Source::Archidekt)
            .unwrap()
            .is_none());

        let older = Utc::now() - Duration::hours(2);
        let newer = Utc::now();
        let deck_a = Deck::new(Source::Archidekt, &summary("1", "A", older));
        let deck_b = Deck::new(Source::Archidekt, &summary("2", "B", newer));
        store.save_deck_with_fetch(&deck_a, "u1").unwrap();
        store.save_deck_with_fetch(&deck_b, "u2").unwrap();

        let latest = store.latest_updated_time(Source::Archidekt).unwrap().unwrap();
        assert_eq!(latest.timestamp(), newer.timestamp());

        // Other sources are unaffected.
        assert!(store
            .latest_updated_time(Source::Moxfield)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decks_by_source_ids() {
        let store = create_test_store();
        save_deck(&store, Source::Archidekt, "1", "A");
        save_deck(&store, Source::Archidekt, "2", "B");
        save_deck(&store, Source::Moxfield, "1", "M");

        let found = store
            .decks_by_source_ids(
                Source::Archidekt,
                &["1".to_string(), "2".to_string(), "3".to_string()],
            )
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["1"].name, "A");
        assert_eq!(found["2"].name, "B");
    }

    #[test]
    fn test_next_pending_fetch_in_schedule_order() {
        let store = create_test_store();
        let first = save_deck(&store, Source::Archidekt, "1", "A");
        let second = save_deck(&store, Source::Archidekt, "2", "B");

        let next = store.next_pending_fetch().unwrap().unwrap();
        assert_eq!(next.deck_id, first.id);

        store.mark_unfetchable(next.id).unwrap();
        let next = store.next_pending_fetch().unwrap().unwrap();
        assert_eq!(next.deck_id, second.id);
    }

    #[test]
    fn test_completed_fetch_leaves_pending_set() {
        let store = create_test_store();
        let deck = save_deck(&store, Source::Archidekt, "1", "A");
        let result = store.next_pending_fetch().unwrap().unwrap();

        store.complete_fetch(result.id, deck.id, true, None).unwrap();

        assert!(store.next_pending_fetch().unwrap().is_none());
        let loaded = store.get_deck(deck.id).unwrap().unwrap();
        assert!(loaded.pdh_legal);
    }

    #[test]
    fn test_complete_fetch_sets_commander() {
        let store = create_test_store();
        let deck = save_deck(&store, Source::Archidekt, "1", "A");
        let result = store.next_pending_fetch().unwrap().unwrap();
        let pair = CommanderPair::solo(Uuid::new_v4());

        store.ensure_commander(&pair).unwrap();
        store
            .complete_fetch(result.id, deck.id, true, Some(pair.id))
            .unwrap();

        let loaded = store.get_deck(deck.id).unwrap().unwrap();
        assert_eq!(loaded.commander_id, Some(pair.id));
    }

    #[test]
    fn test_complete_fetch_without_commander_keeps_pair() {
        let store = create_test_store();
        let deck = save_deck(&store, Source::Archidekt, "1", "A");
        let pair = CommanderPair::solo(Uuid::new_v4());
        store.ensure_commander(&pair).unwrap();
        store.set_deck_commander(deck.id, pair.id).unwrap();

        let result = store.next_pending_fetch().unwrap().unwrap();
        store.complete_fetch(result.id, deck.id, false, None).unwrap();

        let loaded = store.get_deck(deck.id).unwrap().unwrap();
        assert!(!loaded.pdh_legal);
        assert_eq!(loaded.commander_id, Some(pair.id));
    }

    #[test]
    fn test_complete_fetch_missing_deck() {
        let store = create_test_store();
        let result = store.complete_fetch(Uuid::new_v4(), Uuid::new_v4(), true, None);
        assert!(matches!(result, Err(DeckStoreError::NotFound(_))));
    }

    #[test]
    fn test_delete_fetches_for_deck() {
        let store = create_test_store();
        let deck = save_deck(&store, Source::Archidekt, "1", "A");
        let result = store.next_pending_fetch().unwrap().unwrap();
        store.complete_fetch(result.id, deck.id, true, None).unwrap();

        store.delete_fetches_for_deck(deck.id).unwrap();

        let count: i64 = {
            let conn = store.conn.lock().unwrap();
            conn.query_row("SELECT COUNT(*) FROM deck_crawl_results", [], |row| {
                row.get(0)
            })
            .unwrap()
        };
        assert_eq!(count, 0);
    }

    #[test]
    fn test_apply_card_diff() {
        let store = create_test_store();
        let deck = save_deck(&store, Source::Archidekt, "1", "A");
        let commander = Uuid::new_v4();
        let kept = Uuid::new_v4();
        let dropped = Uuid::new_v4();

        store
            .apply_card_diff(
                deck.id,
                &CardListDiff {
                    create: vec![
                        CardInDeck {
                            card_id: commander,
                            is_commander: false,
                        },
                        CardInDeck {
                            card_id: kept,
                            is_commander: false,
                        },
                        CardInDeck {
                            card_id: dropped,
                            is_commander: false,
                        },
                    ],
                    ..Default::default()
                },
            )
            .unwrap();

        store
            .apply_card_diff(
                deck.id,
                &CardListDiff {
                    create: vec![],
                    update: vec![CardInDeck {
                        card_id: commander,
                        is_commander: true,
                    }],
                    delete: vec![dropped],
                },
            )
            .unwrap();

        let mut cards = store.deck_cards(deck.id).unwrap();
        cards.sort_by_key(|c| c.card_id);
        assert_eq!(cards.len(), 2);
        assert!(cards.iter().any(|c| c.card_id == commander && c.is_commander));
        assert!(cards.iter().any(|c| c.card_id == kept && !c.is_commander));
    }

    #[test]
    fn test_ensure_commander_idempotent() {
        let store = create_test_store();
        let pair = CommanderPair::new(Uuid::new_v4(), Some(Uuid::new_v4()));

        store.ensure_commander(&pair).unwrap();
        store.ensure_commander(&pair).unwrap();

        let loaded = store.get_commander(pair.id).unwrap().unwrap();
        assert_eq!(loaded, pair);
    }

    #[test]
    fn test_legal_deck_ids_missing_commander_filter() {
        let store = create_test_store();
        let with_pair = save_deck(&store, Source::Archidekt, "1", "A");
        let without_pair = save_deck(&store, Source::Archidekt, "2", "B");
        let illegal = save_deck(&store, Source::Archidekt, "3", "C");

        let pair = CommanderPair::solo(Uuid::new_v4());
        store.ensure_commander(&pair).unwrap();
        store.set_deck_legality(with_pair.id, true).unwrap();
        store.set_deck_commander(with_pair.id, pair.id).unwrap();
        store.set_deck_legality(without_pair.id, true).unwrap();
        let _ = illegal;

        let all_legal = store.legal_deck_ids(false).unwrap();
        assert_eq!(all_legal.len(), 2);

        let missing = store.legal_deck_ids(true).unwrap();
        assert_eq!(missing, vec![without_pair.id]);
    }

    #[test]
    fn test_schedule_fetch_replaces_outstanding() {
        let store = create_test_store();
        let deck = save_deck(&store, Source::Archidekt, "1", "A");

        let later = Utc::now() + Duration::minutes(5);
        store
            .schedule_fetch(deck.id, "https://example.com/api/decks/1/", later)
            .unwrap();

        assert_eq!(store.pending_fetch_count().unwrap(), 1);
        let next = store.next_pending_fetch().unwrap().unwrap();
        assert_eq!(next.updated_at.timestamp(), later.timestamp());
    }

    #[test]
    fn test_decks_for_source() {
        let store = create_test_store();
        save_deck(&store, Source::Archidekt, "1", "A");
        save_deck(&store, Source::Moxfield, "abc", "M");

        let decks = store.decks_for_source(Source::Moxfield).unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0].source_id, "abc");
    }

    #[test]
    fn test_mark_unfetchable_missing_result() {
        let store = create_test_store();
        let result = store.mark_unfetchable(Uuid::new_v4());
        assert!(matches!(result, Err(DeckStoreError::NotFound(_))));
    }
}
