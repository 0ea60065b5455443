//! Snapshot files written by the stat persister

use std::time::{Duration, Instant};
use tally_core::persistence::{self, PersistenceConfig, StatPersister};
use tally_core::stats::{
    CategoricalTracker, CounterTracker, StackedTracker, Tracker, TrackerId, TrackerKind,
};
use tempfile::TempDir;

fn config(dir: &TempDir, save_interval: Duration) -> PersistenceConfig {
    PersistenceConfig { directory: dir.path().to_path_buf(), save_interval }
}

#[test]
fn test_job_done_writes_final_state() {
    let dir = TempDir::new().unwrap();
    let persister = StatPersister::start(&config(&dir, Duration::from_secs(3600)), "host:1", "job").unwrap();

    let base = Instant::now();
    let at = |s: u64| base + Duration::from_secs(s);

    let mut ops = CounterTracker::new(TrackerId::new("host:1", "0", "Ops"), 10);
    ops.start_at(base, Some(&persister));
    let mut codes = CategoricalTracker::new(TrackerId::new("host:1", "0", "Status"), 10);
    codes.start_at(base, Some(&persister));
    let mut bytes =
        StackedTracker::new(TrackerId::new("host:1", "0", "Bytes"), 10, ["read", "written"]);
    bytes.start_at(base, Some(&persister));
    assert_eq!(persister.registered(), 3);

    ops.increment_at(at(1));
    ops.increment_at(at(12));
    codes.increment_at(at(2), "200");
    codes.increment_at(at(3), "404");
    codes.increment_at(at(14), "200");
    bytes.add_values_at(at(5), &[10.0, 2.0]);

    ops.stop_at(at(20));
    codes.stop_at(at(20));
    bytes.stop_at(at(20));

    persister.job_done().unwrap();
    assert_eq!(persister.registered(), 0);

    let loaded = persistence::load(persister.path()).unwrap();
    assert_eq!(loaded.len(), 3);
    assert!(loaded.iter().all(|t| !t.is_running()));

    let ops = loaded[0].as_counter().expect("counter first");
    assert_eq!(ops.interval_counts(), vec![1, 1]);
    assert_eq!(ops.client_id(), "host:1");

    let codes = loaded[1].as_categorical().expect("categorical second");
    assert_eq!(codes.category_names(), ["200".to_string(), "404".to_string()]);
    assert_eq!(codes.interval_counts(), vec![vec![1, 1], vec![1, 0]]);

    assert_eq!(loaded[2].kind(), TrackerKind::Stacked);
    assert_eq!(loaded[2].as_stacked().unwrap().series_names(), ["read", "written"]);
}

#[test]
fn test_periodic_save_captures_running_trackers() {
    let dir = TempDir::new().unwrap();
    let persister =
        StatPersister::start(&config(&dir, Duration::from_millis(50)), "client", "job-7").unwrap();

    let base = Instant::now();
    let mut ops = CounterTracker::new(TrackerId::new("client", "0", "Ops"), 1);
    ops.start_at(base, Some(&persister));
    ops.increment_at(base);
    // closes interval 0 and refreshes the snapshot
    ops.increment_at(base + Duration::from_millis(1500));

    let deadline = Instant::now() + Duration::from_secs(10);
    while !persister.path().exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    let loaded = persistence::load(persister.path()).unwrap();
    assert_eq!(loaded.len(), 1);
    let snapshot = loaded[0].as_counter().unwrap();
    assert_eq!(snapshot.interval_counts(), vec![1]);
    assert_eq!(snapshot.display_name(), "Ops");

    persister.shutdown();
}

#[test]
fn test_nothing_written_without_trackers() {
    let dir = TempDir::new().unwrap();
    let persister =
        StatPersister::start(&config(&dir, Duration::from_secs(3600)), "client", "idle").unwrap();
    persister.save_now().unwrap();
    assert!(!persister.path().exists());
}

#[test]
fn test_load_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = persistence::load(&dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, tally_core::Error::Io(_)));
}
