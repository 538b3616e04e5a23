//! SQLite implementation of [`StatsStore`].
//!
//! Each merge runs in one transaction covering the `player_stats` row and
//! every touched `weapon_stats` row. `ON CONFLICT ... DO UPDATE SET
//! col = col + excluded.col` does the addition inside SQLite, so a concurrent
//! reader never sees half a merge.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::{debug, warn};

use crate::category::WeaponCategory;
use crate::error::Result;
use crate::record::{AggregateRecord, ScalarTotals, WeaponCounters};
use crate::store::schema::Database;
use crate::store::StatsStore;
use crate::types::{Identity, ScalarField};

// =============================================================================
// SQL
// =============================================================================

const UPSERT_PLAYER: &str = "
INSERT INTO player_stats (
    steam_id, player_name,
    total_kills, total_deaths, total_assists, total_headshots,
    total_rounds_played, total_damage_dealt, total_damage_taken,
    last_updated_ms
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(steam_id) DO UPDATE SET
    player_name         = excluded.player_name,
    total_kills         = total_kills + excluded.total_kills,
    total_deaths        = total_deaths + excluded.total_deaths,
    total_assists       = total_assists + excluded.total_assists,
    total_headshots     = total_headshots + excluded.total_headshots,
    total_rounds_played = total_rounds_played + excluded.total_rounds_played,
    total_damage_dealt  = total_damage_dealt + excluded.total_damage_dealt,
    total_damage_taken  = total_damage_taken + excluded.total_damage_taken,
    last_updated_ms     = excluded.last_updated_ms
";

const UPSERT_WEAPON: &str = "
INSERT INTO weapon_stats (
    steam_id, weapon, kills, deaths, assists,
    head, chest, stomach, left_leg, right_leg
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(steam_id, weapon) DO UPDATE SET
    kills     = kills + excluded.kills,
    deaths    = deaths + excluded.deaths,
    assists   = assists + excluded.assists,
    head      = head + excluded.head,
    chest     = chest + excluded.chest,
    stomach   = stomach + excluded.stomach,
    left_leg  = left_leg + excluded.left_leg,
    right_leg = right_leg + excluded.right_leg
";

const SELECT_PLAYER: &str = "
SELECT player_name,
       total_kills, total_deaths, total_assists, total_headshots,
       total_rounds_played, total_damage_dealt, total_damage_taken,
       last_updated_ms
FROM player_stats WHERE steam_id = ?1
";

const SELECT_WEAPONS: &str = "
SELECT weapon, kills, deaths, assists, head, chest, stomach, left_leg, right_leg
FROM weapon_stats WHERE steam_id = ?1
";

// =============================================================================
// Integer Conversion
// =============================================================================
// SQLite integers are signed 64-bit. Counters are u64 in memory.

fn to_db(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_db(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn column_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    row.get::<_, i64>(idx).map(from_db)
}

// =============================================================================
// Store
// =============================================================================

/// A [`StatsStore`] over a single SQLite connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (creating if needed) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    /// An in-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            conn: db.into_connection(),
        }
    }

    /// Number of identities with a stored row.
    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM player_stats", [], |row| row.get(0))?;
        Ok(from_db(n))
    }

    fn load_weapons(&self, identity: &Identity, record: &mut AggregateRecord) -> Result<()> {
        let mut stmt = self.conn.prepare(SELECT_WEAPONS)?;
        let rows = stmt.query_map([identity.as_str()], |row| {
            let key: String = row.get(0)?;
            let counters = WeaponCounters {
                kills: column_u64(row, 1)?,
                deaths: column_u64(row, 2)?,
                assists: column_u64(row, 3)?,
                locations: [
                    column_u64(row, 4)?,
                    column_u64(row, 5)?,
                    column_u64(row, 6)?,
                    column_u64(row, 7)?,
                    column_u64(row, 8)?,
                ],
            };
            Ok((key, counters))
        })?;

        for row in rows {
            let (key, counters) = row?;
            match WeaponCategory::from_key(&key) {
                Some(category) => {
                    record.weapons.insert(category, counters);
                }
                None => warn!(identity = %identity, weapon = %key, "skipping unknown weapon row"),
            }
        }
        Ok(())
    }
}

impl StatsStore for SqliteStore {
    fn load(&mut self, identity: &Identity) -> Result<Option<AggregateRecord>> {
        let row = match self.conn.query_row(SELECT_PLAYER, [identity.as_str()], |row| {
            let name: String = row.get(0)?;
            let totals = ScalarTotals {
                kills: column_u64(row, 1)?,
                deaths: column_u64(row, 2)?,
                assists: column_u64(row, 3)?,
                headshots: column_u64(row, 4)?,
                rounds_played: column_u64(row, 5)?,
                damage_dealt: column_u64(row, 6)?,
                damage_taken: column_u64(row, 7)?,
            };
            let updated_ms: i64 = row.get(8)?;
            Ok((name, totals, updated_ms))
        }) {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let Some((name, totals, updated_ms)) = row else {
            return Ok(None);
        };

        let mut record = AggregateRecord::new(identity.clone(), name);
        record.totals = totals;
        record.last_updated = DateTime::<Utc>::from_timestamp_millis(updated_ms).unwrap_or_default();
        self.load_weapons(identity, &mut record)?;
        Ok(Some(record))
    }

    fn merge_upsert(&mut self, delta: &AggregateRecord) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let t = &delta.totals;
            tx.execute(
                UPSERT_PLAYER,
                params![
                    delta.identity.as_str(),
                    delta.display_name,
                    to_db(t.kills),
                    to_db(t.deaths),
                    to_db(t.assists),
                    to_db(t.headshots),
                    to_db(t.rounds_played),
                    to_db(t.damage_dealt),
                    to_db(t.damage_taken),
                    delta.last_updated.timestamp_millis(),
                ],
            )?;

            let mut weapon_stmt = tx.prepare(UPSERT_WEAPON)?;
            for (category, c) in delta.weapons.iter().filter(|(_, c)| !c.is_zero()) {
                weapon_stmt.execute(params![
                    delta.identity.as_str(),
                    category.key(),
                    to_db(c.kills),
                    to_db(c.deaths),
                    to_db(c.assists),
                    to_db(c.locations[0]),
                    to_db(c.locations[1]),
                    to_db(c.locations[2]),
                    to_db(c.locations[3]),
                    to_db(c.locations[4]),
                ])?;
            }
        }
        tx.commit()?;

        debug!(identity = %delta.identity, weapons = delta.weapons.len(), "merge-upserted delta");
        Ok(())
    }

    fn top(&mut self, field: ScalarField, limit: usize) -> Result<Vec<AggregateRecord>> {
        // `field.column()` comes from a closed enum, never from user text.
        let sql = format!(
            "SELECT steam_id FROM player_stats ORDER BY {} DESC, steam_id ASC LIMIT ?1",
            field.column()
        );
        let ids: Vec<String> = {
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map([to_db(limit as u64)], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load(&Identity::new(id))? {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn reset(&mut self, identity: &Identity) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM player_stats WHERE steam_id = ?1",
            [identity.as_str()],
        )?;
        tx.execute(
            "DELETE FROM weapon_stats WHERE steam_id = ?1",
            [identity.as_str()],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }
}

// =============================================================================
// Tests
// =============================================================================
