//! SQLite-backed progress ledger.
//!
//! The database can be inspected with the stock `sqlite3` shell:
//! `SELECT * FROM nights;` for current state and
//! `SELECT * FROM night_history;` for every recorded transition.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::check_transition;
use super::{LedgerEntry, LedgerError, ProgressLedger};
use crate::night::{NightId, NightState};

fn db_err(e: rusqlite::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}

/// SQLite-backed ledger.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
    run_id: Option<String>,
}

impl SqliteLedger {
    /// Open (or create) the ledger database at `path`.
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            run_id: None,
        })
    }

    /// Create an in-memory ledger (useful for testing).
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            run_id: None,
        })
    }

    /// Tag every transition written through this handle with a run id.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    fn initialize_schema(conn: &Connection) -> Result<(), LedgerError> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(db_err)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nights (
                night_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                reason TEXT,
                run_id TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS night_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                night_id TEXT NOT NULL,
                state TEXT NOT NULL,
                reason TEXT,
                run_id TEXT,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_nights_state ON nights(state);
            CREATE INDEX IF NOT EXISTS idx_history_night ON night_history(night_id);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Database("ledger lock poisoned".to_string()))
    }

    /// Raw columns: night_id, state, updated_at, reason, run_id.
    fn decode(
        night_id: String,
        state: String,
        updated_at: String,
        reason: Option<String>,
        run_id: Option<String>,
    ) -> Result<LedgerEntry, LedgerError> {
        let parsed_id: NightId = night_id.parse().map_err(LedgerError::Corrupt)?;
        let state: NightState = state.parse().map_err(LedgerError::Corrupt)?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| LedgerError::Corrupt(format!("{}: bad timestamp: {}", night_id, e)))?;

        Ok(LedgerEntry {
            night_id: parsed_id,
            state,
            updated_at,
            reason,
            run_id,
        })
    }

    fn query_entries(
        conn: &Connection,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, state, at, reason, run_id) = row.map_err(db_err)?;
            entries.push(Self::decode(id, state, at, reason, run_id)?);
        }
        Ok(entries)
    }

    fn current_state(conn: &Connection, key: &str) -> Result<Option<NightState>, LedgerError> {
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM nights WHERE night_id = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        state
            .map(|s| s.parse().map_err(LedgerError::Corrupt))
            .transpose()
    }
}

impl ProgressLedger for SqliteLedger {
    fn get(&self, night_id: &NightId) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        let key = night_id.to_string();
        let mut entries = Self::query_entries(
            &conn,
            "SELECT night_id, state, updated_at, reason, run_id FROM nights WHERE night_id = ?",
            params![key],
        )?;
        Ok(entries.pop())
    }

    fn set(
        &self,
        night_id: &NightId,
        state: NightState,
        reason: Option<&str>,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut conn = self.lock()?;
        let key = night_id.to_string();
        let now = Utc::now();

        let tx = conn.transaction().map_err(db_err)?;
        let current = Self::current_state(&tx, &key)?;
        check_transition(night_id, current, state)?;

        tx.execute(
            "INSERT INTO nights (night_id, state, reason, run_id, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(night_id) DO UPDATE SET state = ?2, reason = ?3, run_id = ?4, updated_at = ?5",
            params![key, state.as_str(), reason, self.run_id, now.to_rfc3339()],
        )
        .map_err(db_err)?;

        tx.execute(
            "INSERT INTO night_history (night_id, state, reason, run_id, recorded_at) VALUES (?, ?, ?, ?, ?)",
            params![key, state.as_str(), reason, self.run_id, now.to_rfc3339()],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        Ok(LedgerEntry {
            night_id: night_id.clone(),
            state,
            updated_at: now,
            reason: reason.map(str::to_string),
            run_id: self.run_id.clone(),
        })
    }

    fn all_completed(&self) -> Result<HashSet<NightId>, LedgerError> {
        let conn = self.lock()?;
        let entries = Self::query_entries(
            &conn,
            "SELECT night_id, state, updated_at, reason, run_id FROM nights WHERE state IN ('uploaded', 'skipped')",
            params![],
        )?;
        Ok(entries.into_iter().map(|e| e.night_id).collect())
    }

    fn list(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        let mut entries = Self::query_entries(
            &conn,
            "SELECT night_id, state, updated_at, reason, run_id FROM nights",
            params![],
        )?;
        entries.sort_by(|a, b| a.night_id.cmp(&b.night_id));
        Ok(entries)
    }

    fn history(&self, night_id: &NightId) -> Result<Vec<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        let key = night_id.to_string();
        Self::query_entries(
            &conn,
            "SELECT night_id, state, recorded_at, reason, run_id FROM night_history WHERE night_id = ? ORDER BY id ASC",
            params![key],
        )
    }

    fn clear(&self, night_id: &NightId, reason: &str) -> Result<(), LedgerError> {
        let mut conn = self.lock()?;
        let key = night_id.to_string();

        let tx = conn.transaction().map_err(db_err)?;
        match Self::current_state(&tx, &key)? {
            None => return Err(LedgerError::NotFound(key)),
            Some(NightState::Uploaded) => {
                return Err(LedgerError::Regression {
                    night_id: key,
                    to: NightState::Discovered,
                })
            }
            Some(_) => {}
        }

        tx.execute("DELETE FROM nights WHERE night_id = ?", params![key])
            .map_err(db_err)?;
        tx.execute(
            "INSERT INTO night_history (night_id, state, reason, run_id, recorded_at) VALUES (?, ?, ?, ?, ?)",
            params![
                key,
                NightState::Discovered.as_str(),
                reason,
                self.run_id,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }
}
