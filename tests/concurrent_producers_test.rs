mod common;

use std::thread;
use std::time::Duration;

use common::{ALICE, BOB};
use roundstats::{Identity, ScalarField};

#[tokio::test]
async fn producers_on_other_threads_lose_no_increments() {
    let (_dir, path) = common::create_temp_db_file("producers.db");
    let mut tracker = common::tracker_at(&path);

    const PRODUCERS: usize = 4;
    const KILLS_EACH: usize = 200;

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let handle = tracker.handle();
            thread::spawn(move || {
                for _ in 0..KILLS_EACH {
                    handle.submit(common::kill(ALICE, BOB, "ak47", false));
                }
            })
        })
        .collect();

    let alice = Identity::new(ALICE);
    let expected = (PRODUCERS * KILLS_EACH) as u64;
    let kills = common::eventually(Duration::from_secs(5), Duration::from_millis(2), || {
        tracker.tick();
        let kills = tracker
            .state()
            .cache()
            .snapshot(&alice)
            .map(|r| r.scalar(ScalarField::Kills))
            .unwrap_or(0);
        (kills == expected).then_some(kills)
    })
    .await;
    assert_eq!(kills, expected);

    for p in producers {
        p.join().unwrap();
    }

    tracker.shutdown().unwrap();
    assert_eq!(
        common::stored_scalar(&path, ALICE, "total_kills"),
        Some(expected as i64)
    );
    assert_eq!(
        common::stored_scalar(&path, BOB, "total_deaths"),
        Some(expected as i64)
    );
}

#[tokio::test]
async fn periodic_flush_persists_connected_players() {
    let (_dir, path) = common::create_temp_db_file("periodic.db");
    let config = roundstats::TrackerConfig {
        database_path: path.clone(),
        flush_interval_secs: 1,
        ..roundstats::TrackerConfig::default()
    };
    let store = roundstats::SqliteStore::open(&path).unwrap();
    let mut tracker = roundstats::Tracker::new(store, config);
    let handle = tracker.handle();

    handle.submit(common::connect(ALICE, "alice"));
    handle.submit(common::kill(ALICE, BOB, "ak47", false));
    tracker.tick();
    assert_eq!(common::stored_scalar(&path, ALICE, "total_kills"), None);

    let stored = common::eventually(Duration::from_secs(5), Duration::from_millis(50), || {
        tracker.tick();
        common::stored_scalar(&path, ALICE, "total_kills")
    })
    .await;
    assert_eq!(stored, 1);
    // bob is not connected, so the periodic flush leaves him pending
    assert_eq!(common::stored_scalar(&path, BOB, "total_deaths"), None);
}
