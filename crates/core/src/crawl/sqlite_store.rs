//! SQLite-backed crawl run store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use super::{CrawlRun, CrawlStoreError, RunFilter, RunState, RunStore};
use crate::sources::Source;

const RUN_COLUMNS: &str = "id, source, state, started_at, search_back_to, next_fetch, note";

/// SQLite-backed crawl run store.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    /// Open a run store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, CrawlStoreError> {
        let conn = Connection::open(path).map_err(|e| CrawlStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory run store (useful for testing).
    pub fn in_memory() -> Result<Self, CrawlStoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| CrawlStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CrawlStoreError> {
        conn.execute_batch(
            r#"
            -- One row per crawl run over a source's deck listing
            CREATE TABLE IF NOT EXISTS crawl_runs (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                state TEXT NOT NULL,
                started_at TEXT NOT NULL,
                search_back_to TEXT,
                next_fetch TEXT,
                note TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_crawl_runs_source_state ON crawl_runs(source, state);
            "#,
        )
        .map_err(|e| CrawlStoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn parse_time(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<CrawlRun> {
        let id_str: String = row.get(0)?;
        let source_str: String = row.get(1)?;
        let state_str: String = row.get(2)?;
        let started_str: String = row.get(3)?;
        let watermark_str: Option<String> = row.get(4)?;

        Ok(CrawlRun {
            id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
            source: Source::parse(&source_str).unwrap_or(Source::Archidekt),
            // An unknown state is treated as a halt needing attention
            state: RunState::parse(&state_str).unwrap_or(RunState::Error),
            started_at: Self::parse_time(&started_str),
            search_back_to: watermark_str.map(|s| Self::parse_time(&s)),
            next_fetch: row.get(5)?,
            note: row.get(6)?,
        })
    }

    fn run_by_id(conn: &Connection, id: Uuid) -> Result<Option<CrawlRun>, CrawlStoreError> {
        let sql = format!("SELECT {} FROM crawl_runs WHERE id = ?", RUN_COLUMNS);
        match conn.query_row(&sql, params![id.to_string()], Self::row_to_run) {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CrawlStoreError::Database(e.to_string())),
        }
    }
}

impl RunStore for SqliteRunStore {
    fn create_run(&self, run: &CrawlRun) -> Result<(), CrawlStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO crawl_runs (id, source, state, started_at, search_back_to, next_fetch, note)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                run.id.to_string(),
                run.source.as_str(),
                run.state.as_str(),
                run.started_at.to_rfc3339(),
                run.search_back_to.map(|t| t.to_rfc3339()),
                run.next_fetch,
                run.note,
            ],
        )
        .map_err(|e| CrawlStoreError::Database(e.to_string()))?;
        Ok(())
    }

    fn get_run(&self, id: Uuid) -> Result<Option<CrawlRun>, CrawlStoreError> {
        let conn = self.conn.lock().unwrap();
        Self::run_by_id(&conn, id)
    }

    fn latest_run_in_states(
        &self,
        source: Source,
        states: &[RunState],
    ) -> Result<Option<CrawlRun>, CrawlStoreError> {
        if states.is_empty() {
            return Ok(None);
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; states.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM crawl_runs WHERE source = ? AND state IN ({})
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
            RUN_COLUMNS, placeholders
        );

        let mut values = vec![source.as_str().to_string()];
        values.extend(states.iter().map(|s| s.as_str().to_string()));

        match conn.query_row(&sql, params_from_iter(values.iter()), Self::row_to_run) {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CrawlStoreError::Database(e.to_string())),
        }
    }

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<CrawlRun>, CrawlStoreError> {
        let conn = self.conn.lock().unwrap();

        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(source) = filter.source {
            conditions.push("source = ?");
            values.push(source.as_str().to_string());
        }
        if let Some(state) = filter.state {
            conditions.push("state = ?");
            values.push(state.as_str().to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM crawl_runs {} ORDER BY started_at DESC, rowid DESC LIMIT ?",
            RUN_COLUMNS, where_clause
        );
        values.push(filter.limit.to_string());

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CrawlStoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), Self::row_to_run)
            .map_err(|e| CrawlStoreError::Database(e.to_string()))?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.map_err(|e| CrawlStoreError::Database(e.to_string()))?);
        }
        Ok(runs)
    }

    fn update_state(&self, id: Uuid, state: RunState) -> Result<CrawlRun, CrawlStoreError> {
        let conn = self.conn.lock().unwrap();

        let mut run = Self::run_by_id(&conn, id)?.ok_or(CrawlStoreError::NotFound(id))?;
        if !run.state.can_transition_to(state) {
            return Err(CrawlStoreError::IllegalTransition {
                from: run.state,
                to: state,
            });
        }

        conn.execute(
            "UPDATE crawl_runs SET state = ? WHERE id = ?",
            params![state.as_str(), id.to_string()],
        )
        .map_err(|e| CrawlStoreError::Database(e.to_string()))?;

        run.state = state;
        Ok(run)
    }

    fn set_cursor(&self, id: Uuid, cursor: Option<&str>) -> Result<(), CrawlStoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE crawl_runs SET next_fetch = ? WHERE id = ?",
                params![cursor, id.to_string()],
            )
            .map_err(|e| CrawlStoreError::Database(e.to_string()))?;
        if changed == 0 {
            return Err(CrawlStoreError::NotFound(id));
        }
        Ok(())
    }

    fn set_note(&self, id: Uuid, note: &str) -> Result<(), CrawlStoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE crawl_runs SET note = ? WHERE id = ?",
                params![note, id.to_string()],
            )
            .map_err(|e| CrawlStoreError::Database(e.to_string()))?;
        if changed == 0 {
            return Err(CrawlStoreError::NotFound(id));
        }
        Ok(())
    }

    fn clear_watermark(&self, id: Uuid) -> Result<(), CrawlStoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE crawl_runs SET search_back_to = NULL WHERE id = ?",
                params![id.to_string()],
            )
            .map_err(|e| CrawlStoreError::Database(e.to_string()))?;
        if changed == 0 {
            return Err(CrawlStoreError::NotFound(id));
        }
        Ok(())
    }
}
