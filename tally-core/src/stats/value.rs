//! Integer value tracker

use super::aggregate::merged_info;
use super::analysis;
use super::tracker::{self, Tracker, TrackerCore, TrackerId, TrackerInfo, TrackerKind, Variant};
use crate::persistence::PersistenceSink;
use crate::realtime::{RealtimeReporter, ReportKind};
use std::sync::Arc;
use std::time::Instant;

/// Observations recorded within one interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueBucket {
    pub count: u64,
    pub sum: i64,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl ValueBucket {
    fn add(&mut self, value: i64) {
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn merge(&mut self, other: &ValueBucket) {
        self.count += other.count;
        self.sum = self.sum.saturating_add(other.sum);
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

/// Tracks integer observations such as response sizes
#[derive(Debug, Clone)]
pub struct ValueTracker {
    core: TrackerCore<ValueBucket>,
}

impl ValueTracker {
    pub fn new(id: TrackerId, collection_interval_secs: u32) -> Self {
        Self { core: TrackerCore::new(id, collection_interval_secs) }
    }

    pub(crate) fn restore(info: TrackerInfo, buckets: Vec<ValueBucket>) -> Self {
        Self { core: TrackerCore::restore(info, buckets) }
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

    pub fn add_value(&mut self, value: i64) {
        self.add_value_at(Instant::now(), value);
    }

    pub fn add_value_at(&mut self, now: Instant, value: i64) {
        tracker::observe(self, now, |bucket| bucket.add(value));
    }

    pub fn buckets(&self) -> &[ValueBucket] {
        self.core.history()
    }

    pub fn interval_counts(&self) -> Vec<u64> {
        self.buckets().iter().map(|b| b.count).collect()
    }

    pub fn interval_totals(&self) -> Vec<i64> {
        self.buckets().iter().map(|b| b.sum).collect()
    }

    pub fn total_count(&self) -> u64 {
        self.buckets().iter().map(|b| b.count).sum()
    }

    pub fn total_value(&self) -> i64 {
        self.buckets().iter().fold(0i64, |acc, b| acc.saturating_add(b.sum))
    }

    pub fn max_value(&self) -> Option<i64> {
        self.buckets().iter().filter_map(|b| b.max).max()
    }

    pub fn min_value(&self) -> Option<i64> {
        self.buckets().iter().filter_map(|b| b.min).min()
    }

    /// Mean of all observations
    pub fn average_value(&self) -> f64 {
        let count = self.total_count();
        if count == 0 {
            return 0.0;
        }
        self.total_value() as f64 / count as f64
    }

    pub fn average_value_per_interval(&self) -> f64 {
        let n = self.num_intervals();
        if n == 0 {
            return 0.0;
        }
        self.total_value() as f64 / n as f64
    }

    pub fn average_value_per_second(&self) -> f64 {
        let seconds = self.num_intervals() as f64 * self.interval_secs();
        if seconds == 0.0 {
            return 0.0;
        }
        self.total_value() as f64 / seconds
    }

    /// Mean value of each non-empty interval, keyed by interval index
    pub fn interval_means(&self) -> Vec<(usize, f64)> {
        self.buckets()
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.mean().map(|m| (i, m)))
            .collect()
    }

    pub fn standard_deviation(&self) -> f64 {
        analysis::sample_std_dev(&self.mean_values(), self.average_value())
    }

    pub fn correlation_coefficient(&self) -> f64 {
        analysis::correlation_coefficient(&self.interval_means(), self.interval_secs())
    }

    pub fn regression_coefficients(&self) -> (f64, f64) {
        analysis::regression_coefficients(&self.interval_means(), self.interval_secs())
    }

    pub fn horizontality_t_score(&self) -> f64 {
        analysis::horizontality_t_score(&self.mean_values())
    }

    pub fn flatness_p_value(&self) -> f64 {
        analysis::flatness_p_value(&self.mean_values())
    }

    pub fn aggregate(peers: &[&ValueTracker]) -> ValueTracker {
        if peers.is_empty() {
            return ValueTracker::new(TrackerId::new("", "", ""), 0);
        }

        let len = peers.iter().map(|p| p.num_intervals()).min().unwrap_or(0);
        let mut buckets = vec![ValueBucket::default(); len];
        for peer in peers {
            for (merged, bucket) in buckets.iter_mut().zip(peer.buckets()) {
                merged.merge(bucket);
            }
        }

        let infos: Vec<&TrackerInfo> = peers.iter().map(|p| p.info()).collect();
        ValueTracker::restore(merged_info(&infos, len), buckets)
    }

    fn mean_values(&self) -> Vec<f64> {
        self.interval_means().into_iter().map(|(_, m)| m).collect()
    }

    fn interval_secs(&self) -> f64 {
        self.core.info.collection_interval_secs as f64
    }
}

impl Variant for ValueTracker {
    type Payload = ValueBucket;

    fn core(&self) -> &TrackerCore<ValueBucket> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TrackerCore<ValueBucket> {
        &mut self.core
    }

    fn realtime_sample(&self, bucket: &ValueBucket) -> Option<(ReportKind, f64)> {
        Some((ReportKind::Average, bucket.mean().unwrap_or(0.0)))
    }
}

impl Tracker for ValueTracker {
    fn info(&self) -> &TrackerInfo {
        &self.core.info
    }

    fn kind(&self) -> TrackerKind {
        TrackerKind::Value
    }

    fn num_intervals(&self) -> usize {
        self.core.series.len()
    }

    fn summary_value(&self) -> f64 {
        self.average_value()
    }

    fn summary_string(&self) -> String {
        format!(
            "{} -- Total: {}; Avg Value: {:.3}; Avg/Second: {:.3}; Avg/Interval: {:.3}; Std Dev: {:.3}; Corr Coeff: {:.3}",
            self.display_name(),
            self.total_value(),
            self.average_value(),
            self.average_value_per_second(),
            self.average_value_per_interval(),
            self.standard_deviation(),
            self.correlation_coefficient()
        )
    }
}
