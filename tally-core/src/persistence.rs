//! Periodic on-disk snapshots of running trackers
//!
//! A tracker started with a [`PersistenceSink`] hands the sink a
//! [`SnapshotHandle`] and refreshes it every time an interval closes and once
//! more at stop. The sink reads the handles whenever it likes; trackers never
//! write files themselves.
//!
//! [`StatPersister`] is the stock sink: a background thread that writes all
//! registered snapshots to `<directory>/<client_id>.<job_id>` at a fixed
//! cadence so a crashed client leaves its partial data behind.

use crate::stats::{decode_trackers, encode_trackers, StatTracker, Tracker};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receives snapshot handles from trackers as they start
pub trait PersistenceSink: Send + Sync {
    fn register(&self, handle: SnapshotHandle);
}

/// Latest published state of one running tracker
#[derive(Clone)]
pub struct SnapshotHandle {
    inner: Arc<Mutex<StatTracker>>,
}

impl SnapshotHandle {
    pub fn new(tracker: StatTracker) -> Self {
        Self { inner: Arc::new(Mutex::new(tracker)) }
    }

    pub(crate) fn update(&self, tracker: StatTracker) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = tracker;
    }

    /// Copy of the most recently published state
    pub fn current(&self) -> StatTracker {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl fmt::Debug for SnapshotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracker = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SnapshotHandle")
            .field("display_name", &tracker.display_name())
            .field("intervals", &tracker.num_intervals())
            .finish()
    }
}

/// Where and how often snapshots are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    pub directory: PathBuf,
    #[serde(with = "humantime_serde", default = "default_save_interval")]
    pub save_interval: Duration,
}

fn default_save_interval() -> Duration {
    Duration::from_secs(300)
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("persistent-stats"),
            save_interval: default_save_interval(),
        }
    }
}

struct Shared {
    path: PathBuf,
    handles: Mutex<Vec<SnapshotHandle>>,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn save(&self) -> Result<()> {
        let trackers: Vec<StatTracker> = {
            let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            handles.iter().map(SnapshotHandle::current).collect()
        };

        if trackers.is_empty() {
            return Ok(());
        }

        let bytes = encode_trackers(&trackers)?;
        let temp = temp_path(&self.path);
        fs::write(&temp, &bytes)?;
        fs::rename(&temp, &self.path)?;
        tracing::debug!("Persisted {} trackers to {}", trackers.len(), self.path.display());
        Ok(())
    }
}

/// Background snapshot writer for one client's job
pub struct StatPersister {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StatPersister {
    /// Prepare the directory and start the writer thread
    pub fn start(config: &PersistenceConfig, client_id: &str, job_id: &str) -> Result<Self> {
        if config.directory.exists() && !config.directory.is_dir() {
            return Err(Error::Config(format!(
                "persistence path {} is not a directory",
                config.directory.display()
            )));
        }
        fs::create_dir_all(&config.directory)?;

        let file_name = format!("{}.{}", client_id, job_id).replace(':', "_");
        let shared = Arc::new(Shared {
            path: config.directory.join(file_name),
            handles: Mutex::new(Vec::new()),
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });

        let interval = config.save_interval;
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("stat-persister".to_string())
            .spawn(move || persist_loop(worker_shared, interval))?;

        Ok(Self { shared, worker: Mutex::new(Some(worker)) })
    }

    /// File the snapshots are written to
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn registered(&self) -> usize {
        self.shared.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Write all registered snapshots immediately
    pub fn save_now(&self) -> Result<()> {
        self.shared.save()
    }

    /// Write a final snapshot and forget every registered tracker
    pub fn job_done(&self) -> Result<()> {
        let result = self.shared.save();
        self.shared.handles.lock().unwrap_or_else(PoisonError::into_inner).clear();
        result
    }

    /// Stop the writer thread and wait for it
    pub fn shutdown(&self) {
        *self.shared.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.shared.wake.notify_all();

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("Stat persister thread panicked");
            }
        }
    }
}

impl PersistenceSink for StatPersister {
    fn register(&self, handle: SnapshotHandle) {
        self.shared.handles.lock().unwrap_or_else(PoisonError::into_inner).push(handle);
    }
}

impl Drop for StatPersister {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn persist_loop(shared: Arc<Shared>, interval: Duration) {
    let mut stopped = shared.stopped.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        let (guard, _) = shared
            .wake
            .wait_timeout(stopped, interval)
            .unwrap_or_else(PoisonError::into_inner);
        stopped = guard;
        if *stopped {
            return;
        }

        drop(stopped);
        if let Err(e) = shared.save() {
            tracing::warn!("Failed to persist stats to {}: {}", shared.path.display(), e);
        }
        stopped = shared.stopped.lock().unwrap_or_else(PoisonError::into_inner);
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".temp");
    PathBuf::from(name)
}

/// Read a snapshot file written by [`StatPersister`]
pub fn load(path: &Path) -> Result<Vec<StatTracker>> {
    let bytes = fs::read(path)?;
    decode_trackers(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{CounterTracker, TrackerId};
    use std::time::Instant;

    #[test]
    fn test_snapshot_follows_interval_closes() {
        let sink = CollectingSink::default();
        let base = Instant::now();
        let mut tracker = CounterTracker::new(TrackerId::new("c", "t", "Ops"), 10);
        tracker.start_at(base, Some(&sink));

        let handle = sink.handles.lock().unwrap()[0].clone();
        assert_eq!(handle.current().num_intervals(), 0);

        tracker.increment_at(base + Duration::from_secs(1));
        // still inside the first interval, snapshot untouched
        assert_eq!(handle.current().num_intervals(), 0);

        tracker.increment_at(base + Duration::from_secs(25));
        assert_eq!(handle.current().num_intervals(), 2);

        tracker.stop_at(base + Duration::from_secs(30));
        let snapshot = handle.current();
        assert_eq!(snapshot.num_intervals(), 3);
        assert!(!snapshot.is_running());
        assert_eq!(snapshot.as_counter().unwrap().interval_counts(), vec![1, 0, 1]);
    }

    #[test]
    fn test_directory_must_be_a_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = PersistenceConfig {
            directory: file.path().to_path_buf(),
            save_interval: Duration::from_secs(60),
        };
        assert!(matches!(StatPersister::start(&config, "c", "j"), Err(Error::Config(_))));
    }

    #[test]
    fn test_file_name_replaces_colons() {
        let dir = tempfile::tempdir().unwrap();
        let config = PersistenceConfig {
            directory: dir.path().join("nested"),
            save_interval: Duration::from_secs(60),
        };
        let persister = StatPersister::start(&config, "host:8080", "job-1").unwrap();
        assert_eq!(persister.path(), dir.path().join("nested").join("host_8080.job-1"));
        assert!(dir.path().join("nested").is_dir());
    }

    #[derive(Default)]
    struct CollectingSink {
        handles: Mutex<Vec<SnapshotHandle>>,
    }

    impl PersistenceSink for CollectingSink {
        fn register(&self, handle: SnapshotHandle) {
            self.handles.lock().unwrap().push(handle);
        }
    }
}
