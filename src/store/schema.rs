//! # SQLite Schema for the Stats Store
//!
//! ## Table Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Schema Overview                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  player_stats                      weapon_stats                     │
//! │  ┌──────────────────────┐          ┌──────────────────────────┐     │
//! │  │ steam_id (PK)        │◄─────────│ steam_id      ┐ (PK)     │     │
//! │  │ player_name          │          │ weapon        ┘          │     │
//! │  │ total_kills          │          │ kills, deaths, assists   │     │
//! │  │ total_deaths  ...    │          │ head, chest, stomach,    │     │
//! │  │ last_updated_ms      │          │ left_leg, right_leg      │     │
//! │  └──────────────────────┘          └──────────────────────────┘     │
//! │                                                                     │
//! │  roundstats_metadata (schema_version)                               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Why a Child Table Instead of One Column Per Weapon?
//!
//! A flat row with a column per (weapon × interaction × location) runs to
//! hundreds of columns and needs a migration for every new weapon. A keyed
//! child table grows by rows instead: adding a weapon to the category table
//! needs no schema change. Both tables are merge-upserted in one transaction,
//! so a record's merge is still atomic.

use rusqlite::Connection;

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when making breaking schema changes.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// One row per identity with the scalar totals.
///
/// All counters default to 0 so an insert may omit them.
const CREATE_PLAYER_STATS: &str = r#"
CREATE TABLE IF NOT EXISTS player_stats (
    steam_id            TEXT PRIMARY KEY,
    player_name         TEXT NOT NULL,
    total_kills         INTEGER NOT NULL DEFAULT 0,
    total_deaths        INTEGER NOT NULL DEFAULT 0,
    total_assists       INTEGER NOT NULL DEFAULT 0,
    total_headshots     INTEGER NOT NULL DEFAULT 0,
    total_rounds_played INTEGER NOT NULL DEFAULT 0,
    total_damage_dealt  INTEGER NOT NULL DEFAULT 0,
    total_damage_taken  INTEGER NOT NULL DEFAULT 0,
    last_updated_ms     INTEGER NOT NULL
)
"#;

/// One row per (identity, weapon category) that has ever been non-zero.
///
/// Location columns refine `kills`.
const CREATE_WEAPON_STATS: &str = r#"
CREATE TABLE IF NOT EXISTS weapon_stats (
    steam_id  TEXT NOT NULL,
    weapon    TEXT NOT NULL,
    kills     INTEGER NOT NULL DEFAULT 0,
    deaths    INTEGER NOT NULL DEFAULT 0,
    assists   INTEGER NOT NULL DEFAULT 0,
    head      INTEGER NOT NULL DEFAULT 0,
    chest     INTEGER NOT NULL DEFAULT 0,
    stomach   INTEGER NOT NULL DEFAULT 0,
    left_leg  INTEGER NOT NULL DEFAULT 0,
    right_leg INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (steam_id, weapon)
)
"#;

/// Leaderboard queries order by kills.
const CREATE_KILLS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS player_stats_kills
ON player_stats(total_kills)
"#;

const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS roundstats_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the stats schema applied.
///
/// # Ownership
///
/// `Database` owns its `Connection`; dropping it closes the file. Hand the
/// connection to the store with [`into_connection`](Self::into_connection).
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database. Lost when the connection closes.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&mut self) -> Result<()> {
        // WAL lets the query commands read while the tracker writes.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_PLAYER_STATS)?;
        self.conn.execute_batch(CREATE_WEAPON_STATS)?;
        self.conn.execute_batch(CREATE_KILLS_INDEX)?;

        self.verify_or_set_version()
    }

    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<i32> = match self.conn.query_row(
            "SELECT value FROM roundstats_metadata WHERE key = 'schema_version'",
            [],
            |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            },
        ) {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO roundstats_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, but this build requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Consumes the wrapper and returns the initialized connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn table_count(conn: &Connection) -> i32 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )
        .expect("should query tables")
    }

    #[test]
    fn test_open_in_memory_creates_tables() {
        let db = Database::open_in_memory().expect("should create in-memory db");
        // metadata, player_stats, weapon_stats
        assert_eq!(table_count(&db.conn), 3);
    }

    #[test]
    fn test_schema_version_stored() {
        let db = Database::open_in_memory().expect("should create db");

        let version: String = db
            .conn
            .query_row(
                "SELECT value FROM roundstats_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .expect("should query version");

        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[test]
    fn test_double_initialization() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("stats.db");

        {
            let _db = Database::open(&path).expect("first open should work");
        }
        let db = Database::open(&path).expect("second open should work");
        assert_eq!(table_count(&db.conn), 3);
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("stats.db");

        {
            let db = Database::open(&path).expect("open");
            db.conn
                .execute(
                    "UPDATE roundstats_metadata SET value = '99' WHERE key = 'schema_version'",
                    [],
                )
                .expect("bump version");
        }

        let err = Database::open(&path).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_unreadable_version_is_an_error_not_a_new_database() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("stats.db");

        {
            let db = Database::open(&path).expect("open");
            db.conn
                .execute(
                    "UPDATE roundstats_metadata SET value = X'01' WHERE key = 'schema_version'",
                    [],
                )
                .expect("corrupt version");
        }

        let err = Database::open(&path).unwrap_err();
        assert!(
            matches!(err, Error::Sqlite(rusqlite::Error::InvalidColumnType(..))),
            "unexpected error: {err:?}"
        );
    }
}
