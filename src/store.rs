//! SQLite match history.
//!
//! One connection, owned behind `SharedStore`. Every write goes through that
//! mutex, including the automatic commit at the end of a match.

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::ocr::{MatchOutcome, MatchRecord};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS decks (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    name    TEXT NOT NULL,
    created TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS matches (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    deck_id      INTEGER REFERENCES decks(id),
    result       TEXT,
    opponent     TEXT,
    first_player TEXT,
    season       TEXT,
    captured_at  TEXT NOT NULL,
    raw_ocr_data TEXT,
    notes        TEXT,
    tags         TEXT
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_matches_deck   ON matches(deck_id);
CREATE INDEX IF NOT EXISTS idx_matches_season ON matches(season);
CREATE INDEX IF NOT EXISTS idx_matches_date   ON matches(captured_at);
";

/// Store shared by the polling thread and the console.
pub type SharedStore = Arc<Mutex<MatchStore>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Deck {
    pub id: i64,
    pub name: String,
    pub created: String,
}

/// A persisted match row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub id: i64,
    pub deck_id: Option<i64>,
    pub outcome: MatchOutcome,
    pub opponent: String,
    pub first_player: String,
    pub season: Option<String>,
    pub captured_at: String,
    pub raw_ocr_data: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<String>,
}

fn row_to_match(row: &Row) -> rusqlite::Result<StoredMatch> {
    let result: Option<String> = row.get("result")?;
    let opponent: Option<String> = row.get("opponent")?;
    let first_player: Option<String> = row.get("first_player")?;

    Ok(StoredMatch {
        id: row.get("id")?,
        deck_id: row.get("deck_id")?,
        outcome: MatchOutcome::from_code(result.as_deref().unwrap_or("?")),
        opponent: opponent.unwrap_or_else(|| "?".to_string()),
        first_player: first_player.unwrap_or_else(|| "?".to_string()),
        season: row.get("season")?,
        captured_at: row.get("captured_at")?,
        raw_ocr_data: row.get("raw_ocr_data")?,
        notes: row.get("notes")?,
        tags: row.get("tags")?,
    })
}

fn row_to_deck(row: &Row) -> rusqlite::Result<Deck> {
    Ok(Deck {
        id: row.get("id")?,
        name: row.get("name")?,
        created: row.get("created")?,
    })
}

const MATCH_COLUMNS: &str = "id, deck_id, result, opponent, first_player, season, captured_at, raw_ocr_data, notes, tags";

pub struct MatchStore {
    conn: Connection,
}

impl MatchStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database {}", path.display()))?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            log::warn!("failed to enable WAL mode: {}", err);
        }
        let mut store = Self { conn };
        let version = store.initialize()?;
        log::info!(
            "Database ready: {} (schema_version={})",
            path.display(),
            version
        );
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let mut store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&mut self) -> Result<i64> {
        let tx = self
            .conn
            .transaction()
            .context("failed to open schema transaction")?;
        tx.execute_batch(SCHEMA)
            .context("failed to create schema")?;

        let existing: Option<i64> = tx
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;
        let version = match existing {
            Some(v) if v > SCHEMA_VERSION => bail!(
                "database version ({}) is newer than supported schema ({})",
                v,
                SCHEMA_VERSION
            ),
            Some(v) => v,
            None => {
                tx.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
                SCHEMA_VERSION
            }
        };

        tx.commit().context("failed to commit schema")?;
        Ok(version)
    }

    pub fn create_deck(&mut self, name: &str) -> Result<Deck> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Deck name must not be empty");
        }
        let created = chrono::Local::now()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();

        self.conn.execute(
            "INSERT INTO decks (name, created) VALUES (?1, ?2)",
            params![name, created],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_deck(id)?
            .ok_or_else(|| anyhow!("Deck not found after insert"))
    }

    pub fn get_deck(&self, id: i64) -> Result<Option<Deck>> {
        let deck = self
            .conn
            .query_row(
                "SELECT id, name, created FROM decks WHERE id = ?1",
                params![id],
                row_to_deck,
            )
            .optional()?;
        Ok(deck)
    }

    /// All decks, oldest first.
    pub fn decks(&self) -> Result<Vec<Deck>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created FROM decks ORDER BY created ASC, id ASC")?;
        let decks = stmt
            .query_map([], row_to_deck)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(decks)
    }

    /// Commits one recorded match in its own transaction.
    pub fn save_match(&mut self, record: &MatchRecord, season: Option<&str>) -> Result<StoredMatch> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO matches
               (deck_id, result, opponent, first_player, season, captured_at, raw_ocr_data, notes, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL)",
            params![
                record.deck_id,
                record.outcome.code(),
                record.opponent,
                record.first_player,
                season,
                record.captured_at,
                record.raw_ocr_data,
            ],
        )?;
        let id = tx.last_insert_rowid();
        let stored = tx.query_row(
            &format!("SELECT {} FROM matches WHERE id = ?1", MATCH_COLUMNS),
            params![id],
            row_to_match,
        )?;
        tx.commit().context("failed to commit match")?;
        Ok(stored)
    }

    /// Most recent matches first.
    pub fn recent_matches(&self, limit: usize) -> Result<Vec<StoredMatch>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM matches ORDER BY captured_at DESC, id DESC LIMIT ?1",
            MATCH_COLUMNS
        ))?;
        let matches = stmt
            .query_map(params![limit as i64], row_to_match)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(matches)
    }

    pub fn match_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }
}
