#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use roundstats::{Database, GameEvent, PlayerRef, SqliteStore, Tracker, TrackerConfig};

pub const ALICE: &str = "76561198000000001";
pub const BOB: &str = "76561198000000002";
pub const CAROL: &str = "76561198000000003";

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let _ = Database::open(&path).expect("initialize database");
    (dir, path)
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

/// Reads one scalar column straight from the file, bypassing the store.
pub fn stored_scalar(path: &Path, identity: &str, column: &str) -> Option<i64> {
    let conn = open_read_only(path);
    let sql = format!("SELECT {column} FROM player_stats WHERE steam_id = ?1");
    conn.query_row(&sql, [identity], |row| row.get(0)).ok()
}

pub fn stored_weapon(path: &Path, identity: &str, weapon: &str, column: &str) -> Option<i64> {
    let conn = open_read_only(path);
    let sql = format!("SELECT {column} FROM weapon_stats WHERE steam_id = ?1 AND weapon = ?2");
    conn.query_row(&sql, [identity, weapon], |row| row.get(0)).ok()
}

/// Tracker over a file database with periodic flushing disabled.
pub fn tracker_at(path: &Path) -> Tracker<SqliteStore> {
    let config = TrackerConfig {
        database_path: path.to_path_buf(),
        flush_interval_secs: 0,
        ..TrackerConfig::default()
    };
    let store = SqliteStore::open(path).expect("open store");
    Tracker::new(store, config)
}

pub fn player(identity: &str, name: &str) -> PlayerRef {
    PlayerRef::human(identity, name)
}

pub fn connect(identity: &str, name: &str) -> GameEvent {
    GameEvent::Connect {
        player: player(identity, name),
    }
}

pub fn disconnect(identity: &str, name: &str) -> GameEvent {
    GameEvent::Disconnect {
        player: player(identity, name),
    }
}

pub fn round_end() -> GameEvent {
    GameEvent::RoundEnd { winner: None }
}

pub fn kill(attacker: &str, victim: &str, weapon: &str, headshot: bool) -> GameEvent {
    GameEvent::Kill {
        attacker: Some(player(attacker, attacker)),
        victim: Some(player(victim, victim)),
        assister: None,
        weapon: weapon.to_string(),
        headshot,
        hit_location: None,
    }
}

/// Ticks until the queue is empty.
pub fn drain_all(tracker: &mut Tracker<SqliteStore>) {
    while tracker.pending() > 0 {
        tracker.tick();
    }
}

pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}
