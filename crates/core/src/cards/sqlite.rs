//! SQLite-backed card catalog implementation.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use super::{Card, CardCatalog, CatalogError, ColorIdentity, PartnerKind, Printing};
use std::collections::HashMap;

/// Columns every card query selects, with the printed-rarity flags
/// derived on the fly.
const CARD_COLUMNS: &str = "c.id, c.name, c.type_line, c.identity, c.partner,
    EXISTS (SELECT 1 FROM printings pc WHERE pc.card_id = c.id AND pc.rarity = 'C'),
    EXISTS (SELECT 1 FROM printings pu WHERE pu.card_id = c.id AND pu.rarity = 'U')";

/// SQLite-backed card catalog.
pub struct SqliteCardCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCardCatalog {
    /// Open a catalog database, creating the file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, CatalogError> {
        let conn = Connection::open(path).map_err(|e| CatalogError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory catalog (useful for testing).
    pub fn in_memory() -> Result<Self, CatalogError> {
        let conn =
            Connection::open_in_memory().map_err(|e| CatalogError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CatalogError> {
        conn.execute_batch(
            r#"
            -- Oracle cards (one row per distinct card)
            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type_line TEXT NOT NULL,
                identity TEXT NOT NULL,
                partner TEXT NOT NULL DEFAULT 'none'
            );

            CREATE INDEX IF NOT EXISTS idx_cards_name ON cards(name);

            -- Per-set printings of each card
            CREATE TABLE IF NOT EXISTS printings (
                id TEXT PRIMARY KEY,
                card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                set_code TEXT NOT NULL,
                rarity TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_printings_card ON printings(card_id);
            CREATE INDEX IF NOT EXISTS idx_printings_set ON printings(set_code);
            "#,
        )
        .map_err(|e| CatalogError::Database(e.to_string()))?;

        Ok(())
    }

    /// Insert or update a card. Used when loading card data.
    pub fn upsert_card(&self, card: &Card) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cards (id, name, type_line, identity, partner)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                type_line = excluded.type_line,
                identity = excluded.identity,
                partner = excluded.partner",
            params![
                card.id.to_string(),
                &card.name,
                &card.type_line,
                card.identity.to_string(),
                card.partner.as_str(),
            ],
        )
        .map_err(|e| CatalogError::Database(e.to_string()))?;
        Ok(())
    }

    /// Insert or update a printing. Used when loading card data.
    pub fn upsert_printing(&self, printing: &Printing) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO printings (id, card_id, set_code, rarity)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                card_id = excluded.card_id,
                set_code = excluded.set_code,
                rarity = excluded.rarity",
            params![
                printing.id.to_string(),
                printing.card_id.to_string(),
                &printing.set_code,
                printing.rarity.as_char().to_string(),
            ],
        )
        .map_err(|e| CatalogError::Database(e.to_string()))?;
        Ok(())
    }

    /// Convert a row selected through [`CARD_COLUMNS`] to a Card.
    fn row_to_card(row: &rusqlite::Row) -> rusqlite::Result<Card> {
        let id_str: String = row.get(0)?;
        let identity_str: String = row.get(3)?;
        let partner_str: String = row.get(4)?;

        Ok(Card {
            id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
            name: row.get(1)?,
            type_line: row.get(2)?,
            identity: ColorIdentity::from_letters(&identity_str),
            partner: PartnerKind::parse(&partner_str).unwrap_or(PartnerKind::None),
            ever_common: row.get(5)?,
            ever_uncommon: row.get(6)?,
        })
    }

    /// Placeholder list "?, ?, ..." for an IN clause of `n` values.
    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(", ")
    }
}

impl CardCatalog for SqliteCardCatalog {
    fn resolve_printings(
        &self,
        printing_ids: &[String],
    ) -> Result<HashMap<String, Card>, CatalogError> {
        if printing_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT p.id, {} FROM printings p JOIN cards c ON c.id = p.card_id
             WHERE p.id IN ({})",
            CARD_COLUMNS,
            Self::placeholders(printing_ids.len()),
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params_from_iter(printing_ids.iter()), |row| {
                let printing_id: String = row.get(0)?;
                // Card columns start after the printing id
                let id_str: String = row.get(1)?;
                let identity_str: String = row.get(4)?;
                let partner_str: String = row.get(5)?;
                let card = Card {
                    id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
                    name: row.get(2)?,
                    type_line: row.get(3)?,
                    identity: ColorIdentity::from_letters(&identity_str),
                    partner: PartnerKind::parse(&partner_str).unwrap_or(PartnerKind::None),
                    ever_common: row.get(6)?,
                    ever_uncommon: row.get(7)?,
                };
                Ok((printing_id, card))
            })
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        let mut resolved = HashMap::new();
        for row in rows {
            let (printing_id, card) = row.map_err(|e| CatalogError::Database(e.to_string()))?;
            resolved.insert(printing_id, card);
        }
        Ok(resolved)
    }

    fn card_by_name_and_set(
        &self,
        name: &str,
        set_code: &str,
    ) -> Result<Option<Card>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM cards c JOIN printings p ON p.card_id = c.id
             WHERE c.name = ? AND p.set_code = ? LIMIT 1",
            CARD_COLUMNS,
        );

        match conn.query_row(&sql, params![name, set_code], Self::row_to_card) {
            Ok(card) => Ok(Some(card)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CatalogError::Database(e.to_string())),
        }
    }

    fn cards_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Card>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM cards c WHERE c.id IN ({})",
            CARD_COLUMNS,
            Self::placeholders(ids.len()),
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let rows = stmt
            .query_map(params_from_iter(id_strings.iter()), Self::row_to_card)
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        let mut cards = Vec::new();
        for row in rows {
            cards.push(row.map_err(|e| CatalogError::Database(e.to_string()))?);
        }
        Ok(cards)
    }

    fn card_count(&self) -> Result<u64, CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))
            .map_err(|e| CatalogError::Database(e.to_string()))
    }
}
