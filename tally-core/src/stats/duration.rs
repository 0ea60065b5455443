//! Operation duration tracker

use super::aggregate::merged_info;
use super::analysis;
use super::tracker::{self, Tracker, TrackerCore, TrackerId, TrackerInfo, TrackerKind, Variant};
use crate::persistence::PersistenceSink;
use crate::realtime::{RealtimeReporter, ReportKind};
use crate::timing::as_millis_f64;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Completed operations and their accumulated time within one interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurationBucket {
    pub count: u64,
    pub total_nanos: u64,
}

impl DurationBucket {
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_nanos)
    }

    /// Mean operation time in milliseconds, `None` for an empty interval
    pub fn mean_millis(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total_nanos as f64 / self.count as f64 / 1_000_000.0)
    }
}

/// Tracks how long operations take
///
/// Durations can be measured by the tracker (`start_timer`/`stop_timer`) or
/// supplied by the caller. Statistics use the mean duration of every
/// non-empty interval, in milliseconds.
#[derive(Debug, Clone)]
pub struct DurationTracker {
    core: TrackerCore<DurationBucket>,
    max: Option<Duration>,
    min: Option<Duration>,
    timer_started: Option<Instant>,
    last_operation: Option<Duration>,
}

impl DurationTracker {
    pub fn new(id: TrackerId, collection_interval_secs: u32) -> Self {
        Self {
            core: TrackerCore::new(id, collection_interval_secs),
            max: None,
            min: None,
            timer_started: None,
            last_operation: None,
        }
    }

    pub(crate) fn restore(
        info: TrackerInfo,
        buckets: Vec<DurationBucket>,
        max: Option<Duration>,
        min: Option<Duration>,
    ) -> Self {
        Self {
            core: TrackerCore::restore(info, buckets),
            max,
            min,
            timer_started: None,
            last_operation: None,
        }
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now(), None);
    }

    pub fn start_with(&mut self, sink: Option<&dyn PersistenceSink>) {
        self.start_at(Instant::now(), sink);
    }

    pub fn start_at(&mut self, now: Instant, sink: Option<&dyn PersistenceSink>) {
        tracker::start_tracker(self, now, sink);
    }

    pub fn stop(&mut self) {
        self.stop_at(Instant::now());
    }

    pub fn stop_at(&mut self, now: Instant) {
        tracker::stop_tracker(self, now);
    }

    pub fn enable_realtime(&mut self, reporter: Arc<RealtimeReporter>, job_id: &str) {
        tracker::enable_realtime(self, reporter, job_id);
    }

    /// Begin timing one operation
    pub fn start_timer(&mut self) {
        self.start_timer_at(Instant::now());
    }

    pub fn start_timer_at(&mut self, now: Instant) {
        self.timer_started = Some(now);
    }

    /// Finish the operation begun by [`start_timer`](Self::start_timer)
    pub fn stop_timer(&mut self) {
        self.stop_timer_at(Instant::now());
    }

    pub fn stop_timer_at(&mut self, now: Instant) {
        let Some(started) = self.timer_started.take() else {
            tracing::warn!(
                "stop_timer on tracker '{}' without a matching start_timer",
                self.display_name()
            );
            return;
        };
        self.record_duration_at(now, now.saturating_duration_since(started));
    }

    /// Record an externally measured operation
    pub fn record_duration(&mut self, elapsed: Duration) {
        self.record_duration_at(Instant::now(), elapsed);
    }

    pub fn record_millis(&mut self, millis: u64) {
        self.record_duration(Duration::from_millis(millis));
    }

    pub fn record_duration_at(&mut self, now: Instant, elapsed: Duration) {
        if !self.is_running() {
            // warns via observe
            tracker::observe(self, now, |_| {});
            return;
        }

        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        tracker::observe(self, now, |bucket| {
            bucket.count += 1;
            bucket.total_nanos = bucket.total_nanos.saturating_add(nanos);
        });

        self.max = Some(self.max.map_or(elapsed, |m| m.max(elapsed)));
        self.min = Some(self.min.map_or(elapsed, |m| m.min(elapsed)));
        self.last_operation = Some(elapsed);
    }

    /// Take back the most recent operation if its interval is still open
    pub fn remove_last_operation(&mut self) {
        let Some(last) = self.last_operation.take() else {
            return;
        };
        if let Some(bucket) = self.core.series.current_mut() {
            if bucket.count > 0 {
                bucket.count -= 1;
                bucket.total_nanos = bucket.total_nanos.saturating_sub(last.as_nanos() as u64);
            }
        }
    }

    pub fn buckets(&self) -> &[DurationBucket] {
        self.core.history()
    }

    pub fn interval_counts(&self) -> Vec<u64> {
        self.buckets().iter().map(|b| b.count).collect()
    }

    pub fn interval_durations(&self) -> Vec<Duration> {
        self.buckets().iter().map(|b| b.total()).collect()
    }

    pub fn total_count(&self) -> u64 {
        self.buckets().iter().map(|b| b.count).sum()
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_nanos(self.buckets().iter().map(|b| b.total_nanos).sum())
    }

    /// Longest single operation seen
    pub fn max_duration(&self) -> Option<Duration> {
        self.max
    }

    /// Shortest single operation seen
    pub fn min_duration(&self) -> Option<Duration> {
        self.min
    }

    /// Mean operation time in milliseconds over the whole run
    pub fn average_duration_millis(&self) -> f64 {
        let count = self.total_count();
        if count == 0 {
            return 0.0;
        }
        as_millis_f64(self.total_duration()) / count as f64
    }

    pub fn average_count_per_interval(&self) -> f64 {
        let n = self.num_intervals();
        if n == 0 {
            return 0.0;
        }
        self.total_count() as f64 / n as f64
    }

    pub fn average_duration_per_interval_millis(&self) -> f64 {
        let n = self.num_intervals();
        if n == 0 {
            return 0.0;
        }
        as_millis_f64(self.total_duration()) / n as f64
    }

    /// Mean duration of each non-empty interval, keyed by interval index
    pub fn interval_means_millis(&self) -> Vec<(usize, f64)> {
        self.buckets()
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.mean_millis().map(|m| (i, m)))
            .collect()
    }

    pub fn standard_deviation(&self) -> f64 {
        let means: Vec<f64> = self.interval_means_millis().into_iter().map(|(_, m)| m).collect();
        analysis::sample_std_dev(&means, self.average_duration_millis())
    }

    pub fn correlation_coefficient(&self) -> f64 {
        analysis::correlation_coefficient(&self.interval_means_millis(), self.interval_secs())
    }

    pub fn regression_coefficients(&self) -> (f64, f64) {
        analysis::regression_coefficients(&self.interval_means_millis(), self.interval_secs())
    }

    pub fn horizontality_t_score(&self) -> f64 {
        let means: Vec<f64> = self.interval_means_millis().into_iter().map(|(_, m)| m).collect();
        analysis::horizontality_t_score(&means)
    }

    pub fn flatness_p_value(&self) -> f64 {
        let means: Vec<f64> = self.interval_means_millis().into_iter().map(|(_, m)| m).collect();
        analysis::flatness_p_value(&means)
    }

    /// Merge peers by summing same-indexed intervals
    ///
    /// The merged maximum and minimum are the extremes of the peers' own
    /// maxima and minima, not a rescan of individual operations.
    pub fn aggregate(peers: &[&DurationTracker]) -> DurationTracker {
        if peers.is_empty() {
            return DurationTracker::new(TrackerId::new("", "", ""), 0);
        }

        let len = peers.iter().map(|p| p.num_intervals()).min().unwrap_or(0);
        let mut buckets = vec![DurationBucket::default(); len];
        for peer in peers {
            for (sum, bucket) in buckets.iter_mut().zip(peer.buckets()) {
                sum.count += bucket.count;
                sum.total_nanos = sum.total_nanos.saturating_add(bucket.total_nanos);
            }
        }

        // Extremes come from whole peers, not the truncated range
        let max = peers.iter().filter_map(|p| p.max).max();
        let min = peers.iter().filter_map(|p| p.min).min();
        let infos: Vec<&TrackerInfo> = peers.iter().map(|p| p.info()).collect();
        DurationTracker::restore(merged_info(&infos, len), buckets, max, min)
    }

    fn interval_secs(&self) -> f64 {
        self.core.info.collection_interval_secs as f64
    }
}

impl Variant for DurationTracker {
    type Payload = DurationBucket;

    fn core(&self) -> &TrackerCore<DurationBucket> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TrackerCore<DurationBucket> {
        &mut self.core
    }

    fn realtime_sample(&self, bucket: &DurationBucket) -> Option<(ReportKind, f64)> {
        Some((ReportKind::Average, bucket.mean_millis().unwrap_or(0.0)))
    }

    fn reset_extras(&mut self) {
        self.max = None;
        self.min = None;
        self.timer_started = None;
        self.last_operation = None;
    }
}

impl Tracker for DurationTracker {
    fn info(&self) -> &TrackerInfo {
        &self.core.info
    }

    fn kind(&self) -> TrackerKind {
        TrackerKind::Duration
    }

    fn num_intervals(&self) -> usize {
        self.core.series.len()
    }

    fn summary_value(&self) -> f64 {
        self.average_duration_millis()
    }

    fn summary_string(&self) -> String {
        format!(
            "{} -- Total Duration: {:.3}ms; Total Count: {}; Avg Duration: {:.3}ms; Avg Count/Interval: {:.3}; Std Dev: {:.3}; Corr Coeff: {:.3}",
            self.display_name(),
            as_millis_f64(self.total_duration()),
            self.total_count(),
            self.average_duration_millis(),
            self.average_count_per_interval(),
            self.standard_deviation(),
            self.correlation_coefficient()
        )
    }
}
