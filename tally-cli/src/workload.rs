//! Synthetic load job
//!
//! Every worker thread owns one tracker of each kind and drives them with a
//! stream of fake operations: exponentially distributed latencies, a mix of
//! success, error and timeout outcomes, and random response sizes.

use crate::config::{ProfileConfig, WorkloadConfig};
use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tally_core::persistence::{PersistenceSink, StatPersister};
use tally_core::realtime::RealtimeReporter;
use tally_core::stats::{
    CategoricalTracker, CounterTracker, DurationTracker, StackedTracker, StatTracker, TrackerId,
    ValueTracker,
};
use tally_core::threading::ThreadingRuntime;

pub const OPERATIONS_COMPLETED: &str = "Operations Completed";
pub const OPERATION_DURATION: &str = "Operation Duration";
pub const RESPONSE_SIZE: &str = "Response Size";
pub const RESULT_CODES: &str = "Result Codes";
pub const BYTES_TRANSFERRED: &str = "Bytes Transferred";

pub const SUCCESS: &str = "success";
pub const ERROR: &str = "error";
pub const TIMEOUT: &str = "timeout";

/// Identity of a running job
#[derive(Debug, Clone)]
pub struct JobIdentity {
    pub job_id: String,
    /// One id per simulated client
    pub client_ids: Vec<String>,
}

impl JobIdentity {
    pub fn from_profile(profile: &ProfileConfig) -> Self {
        let job_id = profile.job.job_id.clone().unwrap_or_else(|| {
            let millis = tally_core::timing::unix_millis(SystemTime::now());
            format!("{}-{}", profile.job.name, millis)
        });
        let prefix = profile.job.client_id.as_deref().unwrap_or("client");
        let client_ids = if profile.job.clients == 1 {
            vec![prefix.to_string()]
        } else {
            (0..profile.job.clients).map(|i| format!("{}-{}", prefix, i)).collect()
        };
        Self { job_id, client_ids }
    }
}

/// Everything a worker thread needs, shared by all workers
struct JobContext {
    job_id: String,
    client_ids: Vec<String>,
    threads_per_client: usize,
    interval_secs: u32,
    duration: Duration,
    simulated_time: bool,
    seed: Option<u64>,
    workload: WorkloadConfig,
    reporter: Option<Arc<RealtimeReporter>>,
    /// Indexed like `client_ids`
    persisters: Vec<Arc<StatPersister>>,
}

/// Outcome of [`run_job`]
pub struct JobRun {
    pub identity: JobIdentity,
    /// Per-thread trackers, in thread order
    pub trackers: Vec<StatTracker>,
    pub started_at: SystemTime,
    pub elapsed: Duration,
}

/// Run the whole job described by `profile` and return every thread's trackers
pub fn run_job(profile: &ProfileConfig) -> Result<JobRun> {
    let identity = JobIdentity::from_profile(profile);

    let reporter = match &profile.realtime {
        Some(section) => {
            let config = section.to_config(&identity.client_ids[0]);
            match RealtimeReporter::connect(&config) {
                Ok(reporter) => Some(Arc::new(reporter)),
                Err(e) => {
                    tracing::warn!(
                        "Realtime reporting to {} unavailable: {}; continuing without it",
                        section.address,
                        e
                    );
                    None
                }
            }
        }
        None => None,
    };

    let mut persisters = Vec::new();
    if let Some(section) = &profile.persistence {
        for client_id in &identity.client_ids {
            let persister = StatPersister::start(&section.to_config(), client_id, &identity.job_id)
                .with_context(|| format!("Failed to start persistence for {}", client_id))?;
            tracing::info!("Persisting {} stats to {}", client_id, persister.path().display());
            persisters.push(Arc::new(persister));
        }
    }

    let context = Arc::new(JobContext {
        job_id: identity.job_id.clone(),
        client_ids: identity.client_ids.clone(),
        threads_per_client: profile.job.threads_per_client,
        interval_secs: profile.collection_interval_secs(),
        duration: profile.job.duration,
        simulated_time: profile.job.simulated_time,
        seed: profile.job.seed,
        workload: profile.workload.clone(),
        reporter: reporter.clone(),
        persisters: persisters.clone(),
    });

    let started_at = SystemTime::now();
    let started = Instant::now();
    let runtime = ThreadingRuntime::new(profile.total_threads());
    let results = runtime.run_workers(move |thread_id| run_worker(&context, thread_id));

    if let Some(reporter) = &reporter {
        reporter.shutdown();
        if reporter.dropped() > 0 {
            tracing::warn!("{} realtime data points were dropped", reporter.dropped());
        }
    }
    for persister in &persisters {
        if let Err(e) = persister.job_done() {
            tracing::warn!("Final snapshot to {} failed: {}", persister.path().display(), e);
        }
        persister.shutdown();
    }

    let trackers = results.context("Worker thread failed")?.into_iter().flatten().collect();
    Ok(JobRun { identity, trackers, started_at, elapsed: started.elapsed() })
}

fn run_worker(context: &JobContext, thread_id: usize) -> tally_core::Result<Vec<StatTracker>> {
    let client_index = thread_id / context.threads_per_client;
    let client_id = &context.client_ids[client_index];
    let local_thread = (thread_id % context.threads_per_client).to_string();

    let mut trackers = ThreadTrackers::new(client_id, &local_thread, context.interval_secs);
    if let Some(reporter) = &context.reporter {
        trackers.enable_realtime(reporter, &context.job_id);
    }

    let sink = context
        .persisters
        .get(client_index)
        .map(|p| p.as_ref() as &dyn PersistenceSink);

    let mut rng = match context.seed {
        Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(thread_id as u64)),
        None => SmallRng::from_os_rng(),
    };
    let mut clock = if context.simulated_time {
        Clock::simulated(Instant::now())
    } else {
        Clock::Real
    };
    let operations = Operations::new(&context.workload)?;

    let start = clock.now();
    let end = start + context.duration;
    trackers.start_at(start, sink);

    while clock.now() < end {
        operations.run_one(&mut trackers, &mut clock, &mut rng);
        if !context.workload.think_time.is_zero() {
            clock.advance(context.workload.think_time);
        }
    }

    trackers.stop_at(clock.now());
    tracing::debug!(
        "Worker {} ({} thread {}) finished {} operations",
        thread_id,
        client_id,
        local_thread,
        trackers.ops.total_count()
    );

    Ok(trackers.into_vec())
}

/// Time source for the operation loop
#[derive(Debug)]
pub enum Clock {
    /// Wall time; advancing sleeps
    Real,
    /// Virtual time; advancing is instantaneous
    Simulated(Instant),
}

impl Clock {
    pub fn simulated(start: Instant) -> Self {
        Clock::Simulated(start)
    }

    pub fn now(&self) -> Instant {
        match self {
            Clock::Real => Instant::now(),
            Clock::Simulated(now) => *now,
        }
    }

    pub fn advance(&mut self, by: Duration) {
        match self {
            Clock::Real => thread::sleep(by),
            Clock::Simulated(now) => *now += by,
        }
    }
}

/// One tracker of each kind, owned by a single worker thread
pub struct ThreadTrackers {
    pub ops: CounterTracker,
    pub latency: DurationTracker,
    pub response_size: ValueTracker,
    pub result_codes: CategoricalTracker,
    pub bytes: StackedTracker,
}

impl ThreadTrackers {
    pub fn new(client_id: &str, thread_id: &str, interval_secs: u32) -> Self {
        let id = |name: &str| TrackerId::new(client_id, thread_id, name);
        Self {
            ops: CounterTracker::new(id(OPERATIONS_COMPLETED), interval_secs),
            latency: DurationTracker::new(id(OPERATION_DURATION), interval_secs),
            response_size: ValueTracker::new(id(RESPONSE_SIZE), interval_secs),
            result_codes: CategoricalTracker::new(id(RESULT_CODES), interval_secs),
            bytes: StackedTracker::new(id(BYTES_TRANSFERRED), interval_secs, ["read", "written"]),
        }
    }

    pub fn enable_realtime(&mut self, reporter: &Arc<RealtimeReporter>, job_id: &str) {
        self.ops.enable_realtime(reporter.clone(), job_id);
        self.latency.enable_realtime(reporter.clone(), job_id);
        self.response_size.enable_realtime(reporter.clone(), job_id);
        self.result_codes.enable_realtime(reporter.clone(), job_id);
        self.bytes.enable_realtime(reporter.clone(), job_id);
    }

    pub fn start_at(&mut self, now: Instant, sink: Option<&dyn PersistenceSink>) {
        self.ops.start_at(now, sink);
        self.latency.start_at(now, sink);
        self.response_size.start_at(now, sink);
        self.result_codes.start_at(now, sink);
        self.bytes.start_at(now, sink);
    }

    pub fn stop_at(&mut self, now: Instant) {
        self.ops.stop_at(now);
        self.latency.stop_at(now);
        self.response_size.stop_at(now);
        self.result_codes.stop_at(now);
        self.bytes.stop_at(now);
    }

    pub fn into_vec(self) -> Vec<StatTracker> {
        vec![
            self.ops.into(),
            self.latency.into(),
            self.response_size.into(),
            self.result_codes.into(),
            self.bytes.into(),
        ]
    }
}

/// Samples and records synthetic operations
pub struct Operations {
    latency: Exp<f64>,
    response_size: Option<Exp<f64>>,
    error_ratio: f64,
    timeout_ratio: f64,
    timeout: Duration,
    request_size: u64,
}

impl Operations {
    pub fn new(workload: &WorkloadConfig) -> tally_core::Result<Self> {
        let mean_ms = workload.mean_latency.as_secs_f64() * 1000.0;
        let latency = Exp::new(1.0 / mean_ms).map_err(|e| {
            tally_core::Error::Config(format!("invalid mean latency {:?}: {}", workload.mean_latency, e))
        })?;
        let response_size = if workload.mean_response_size > 0.0 {
            Some(Exp::new(1.0 / workload.mean_response_size).map_err(|e| {
                tally_core::Error::Config(format!("invalid mean response size: {}", e))
            })?)
        } else {
            None
        };
        Ok(Self {
            latency,
            response_size,
            error_ratio: workload.error_ratio,
            timeout_ratio: workload.timeout_ratio,
            timeout: workload.timeout,
            request_size: workload.request_size,
        })
    }

    /// Perform one operation, advancing `clock` by its latency
    pub fn run_one<R: Rng>(&self, trackers: &mut ThreadTrackers, clock: &mut Clock, rng: &mut R) {
        let roll: f64 = rng.random();
        let outcome = if roll < self.timeout_ratio {
            TIMEOUT
        } else if roll < self.timeout_ratio + self.error_ratio {
            ERROR
        } else {
            SUCCESS
        };

        let latency = if outcome == TIMEOUT {
            self.timeout
        } else {
            Duration::from_secs_f64(self.latency.sample(rng) / 1000.0)
        };

        let started = clock.now();
        trackers.latency.start_timer_at(started);
        clock.advance(latency);
        let finished = clock.now();
        trackers.latency.stop_timer_at(finished);

        trackers.ops.increment_at(finished);
        trackers.result_codes.increment_at(finished, outcome);

        let read = match (&self.response_size, outcome) {
            (Some(dist), SUCCESS) => dist.sample(rng).round() as i64,
            _ => 0,
        };
        if outcome == SUCCESS {
            trackers.response_size.add_value_at(finished, read);
        }
        trackers.bytes.add_values_at(finished, &[read as f64, self.request_size as f64]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::stats::Tracker;

    fn workload() -> WorkloadConfig {
        WorkloadConfig {
            mean_latency: Duration::from_millis(10),
            error_ratio: 0.2,
            timeout_ratio: 0.1,
            timeout: Duration::from_millis(500),
            ..WorkloadConfig::default()
        }
    }

    #[test]
    fn test_simulated_loop_fills_every_tracker() {
        let base = Instant::now();
        let mut clock = Clock::simulated(base);
        let mut rng = SmallRng::seed_from_u64(7);
        let operations = Operations::new(&workload()).unwrap();
        let mut trackers = ThreadTrackers::new("c", "0", 1);

        trackers.start_at(base, None);
        while clock.now() < base + Duration::from_secs(5) {
            operations.run_one(&mut trackers, &mut clock, &mut rng);
        }
        // the last operation may finish past the 5s mark
        let elapsed = clock.now() - base;
        trackers.stop_at(clock.now());

        let total = trackers.ops.total_count();
        assert!(total > 50);
        assert_eq!(trackers.ops.num_intervals(), elapsed.as_secs_f64().ceil() as usize);
        assert_eq!(trackers.latency.total_count(), total);
        assert_eq!(trackers.result_codes.total_count(), total);
        assert_eq!(trackers.bytes.interval_counts().iter().sum::<u64>(), total);

        let successes = trackers
            .result_codes
            .category_names()
            .iter()
            .position(|n| n == SUCCESS)
            .map(|i| trackers.result_codes.category_totals()[i])
            .unwrap();
        assert_eq!(trackers.response_size.total_count(), successes);
        assert_eq!(trackers.latency.max_duration(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_same_seed_same_stream() {
        let run = |seed| {
            let base = Instant::now();
            let mut clock = Clock::simulated(base);
            let mut rng = SmallRng::seed_from_u64(seed);
            let operations = Operations::new(&workload()).unwrap();
            let mut trackers = ThreadTrackers::new("c", "0", 1);
            trackers.start_at(base, None);
            for _ in 0..200 {
                operations.run_one(&mut trackers, &mut clock, &mut rng);
            }
            trackers.stop_at(clock.now());
            (trackers.ops.interval_counts(), trackers.result_codes.category_totals())
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_identity_per_client() {
        let profile = ProfileConfig::from_toml_with_overrides(
            "[job]\nname = \"j\"\nduration = \"1s\"\nclients = 3\nclient_id = \"host\"",
            &["job.job_id=fixed".to_string()],
        )
        .unwrap();
        let identity = JobIdentity::from_profile(&profile);
        assert_eq!(identity.job_id, "fixed");
        assert_eq!(identity.client_ids, vec!["host-0", "host-1", "host-2"]);
    }
}
