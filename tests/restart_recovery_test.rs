mod common;

use common::{ALICE, BOB};
use roundstats::{Identity, ScalarField};

#[test]
fn shutdown_then_restart_continues_totals() {
    let (_dir, path) = common::create_temp_db_file("restart.db");

    // First process lifetime.
    let mut tracker1 = common::tracker_at(&path);
    let handle1 = tracker1.handle();
    handle1.submit(common::connect(ALICE, "alice"));
    handle1.submit(common::kill(ALICE, BOB, "ak47", false));
    handle1.submit(common::kill(ALICE, BOB, "ak47", true));
    tracker1.tick();
    // Queued but not yet drained when shutdown starts.
    handle1.submit(common::kill(ALICE, BOB, "awp", false));
    let written = tracker1.shutdown().unwrap();
    assert_eq!(written, 2);

    assert_eq!(common::stored_scalar(&path, ALICE, "total_kills"), Some(3));
    assert_eq!(common::stored_scalar(&path, BOB, "total_deaths"), Some(3));

    // Second process lifetime (simulates restart).
    let mut tracker2 = common::tracker_at(&path);
    let handle2 = tracker2.handle();
    handle2.submit(common::connect(ALICE, "alice"));
    handle2.submit(common::kill(ALICE, BOB, "ak47", false));
    tracker2.tick();

    let alice = Identity::new(ALICE);
    let running = tracker2.state().cache().snapshot(&alice).unwrap();
    assert_eq!(running.scalar(ScalarField::Kills), 4);
    assert_eq!(running.scalar(ScalarField::Headshots), 1);

    tracker2.shutdown().unwrap();
    assert_eq!(common::stored_scalar(&path, ALICE, "total_kills"), Some(4));
    assert_eq!(common::stored_weapon(&path, ALICE, "ak47", "kills"), Some(3));
    assert_eq!(common::stored_weapon(&path, ALICE, "awp", "kills"), Some(1));
}

#[test]
fn crash_loses_only_unflushed_increments() {
    let (_dir, path) = common::create_temp_db_file("crash.db");

    let mut tracker = common::tracker_at(&path);
    let handle = tracker.handle();
    handle.submit(common::connect(ALICE, "alice"));
    handle.submit(common::kill(ALICE, BOB, "ak47", false));
    handle.submit(common::round_end());
    handle.submit(common::kill(ALICE, BOB, "ak47", false));
    common::drain_all(&mut tracker);

    // No shutdown: the second kill was never flushed.
    drop(tracker);

    assert_eq!(common::stored_scalar(&path, ALICE, "total_kills"), Some(1));

    let mut restarted = common::tracker_at(&path);
    restarted.handle().submit(common::connect(ALICE, "alice"));
    restarted.tick();
    let record = restarted
        .state()
        .cache()
        .snapshot(&Identity::new(ALICE))
        .unwrap();
    assert_eq!(record.scalar(ScalarField::Kills), 1);
}

#[test]
fn reconnect_after_disconnect_keeps_totals() {
    let (_dir, path) = common::create_temp_db_file("reconnect.db");

    let mut tracker = common::tracker_at(&path);
    let handle = tracker.handle();
    handle.submit(common::connect(ALICE, "alice"));
    handle.submit(common::kill(ALICE, BOB, "deagle", true));
    handle.submit(common::disconnect(ALICE, "alice"));
    handle.submit(common::connect(ALICE, "alice"));
    handle.submit(common::kill(ALICE, BOB, "deagle", false));
    handle.submit(common::disconnect(ALICE, "alice"));
    common::drain_all(&mut tracker);

    assert_eq!(common::stored_scalar(&path, ALICE, "total_kills"), Some(2));
    assert_eq!(common::stored_scalar(&path, ALICE, "total_headshots"), Some(1));
    assert_eq!(tracker.state().cache().idle_len(), 1);
    assert_eq!(tracker.state().connected(), 0);
}
