//! Event counter tracker

use super::analysis;
use super::aggregate::merged_info;
use super::tracker::{self, Tracker, TrackerCore, TrackerId, TrackerInfo, TrackerKind, Variant};
use crate::persistence::PersistenceSink;
use crate::realtime::{RealtimeReporter, ReportKind};
use std::sync::Arc;
use std::time::Instant;

/// Counts occurrences of an event per interval
///
/// The derived statistics operate on the per-second rate of each interval.
#[derive(Debug, Clone)]
pub struct CounterTracker {
    core: TrackerCore<u64>,
}

impl CounterTracker {
    pub fn new(id: TrackerId, collection_interval_secs: u32) -> Self {
        Self { core: TrackerCore::new(id, collection_interval_secs) }
    }

    pub(crate) fn restore(info: TrackerInfo, counts: Vec<u64>) -> Self {
        Self { core: TrackerCore::restore(info, counts) }
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

    pub fn increment(&mut self) {
        self.increment_at(Instant::now());
    }

    pub fn increment_at(&mut self, now: Instant) {
        self.increment_by_at(now, 1);
    }

    pub fn increment_by(&mut self, amount: u64) {
        self.increment_by_at(Instant::now(), amount);
    }

    pub fn increment_by_at(&mut self, now: Instant, amount: u64) {
        tracker::observe(self, now, |count| *count += amount);
    }

    /// Take back one count from the open interval
    ///
    /// Has no effect once the interval holding the increment has closed.
    pub fn undo_last_increment(&mut self) {
        if let Some(count) = self.core.series.current_mut() {
            *count = count.saturating_sub(1);
        }
    }

    pub fn interval_counts(&self) -> Vec<u64> {
        self.core.history().to_vec()
    }

    pub fn total_count(&self) -> u64 {
        self.core.history().iter().sum()
    }

    pub fn average_per_interval(&self) -> f64 {
        let n = self.num_intervals();
        if n == 0 {
            return 0.0;
        }
        self.total_count() as f64 / n as f64
    }

    pub fn average_per_second(&self) -> f64 {
        let seconds = self.num_intervals() as f64 * self.interval_secs();
        if seconds == 0.0 {
            return 0.0;
        }
        self.total_count() as f64 / seconds
    }

    pub fn max_per_interval(&self) -> u64 {
        self.core.history().iter().copied().max().unwrap_or(0)
    }

    pub fn min_per_interval(&self) -> u64 {
        self.core.history().iter().copied().min().unwrap_or(0)
    }

    /// Per-second rate of every interval
    pub fn interval_rates(&self) -> Vec<f64> {
        let secs = self.interval_secs();
        self.core.history().iter().map(|&c| c as f64 / secs).collect()
    }

    pub fn standard_deviation(&self) -> f64 {
        analysis::sample_std_dev(&self.interval_rates(), self.average_per_second())
    }

    pub fn correlation_coefficient(&self) -> f64 {
        analysis::correlation_coefficient(&self.rate_points(), self.interval_secs())
    }

    /// `(a, b)` of the least-squares line through the per-second rates
    pub fn regression_coefficients(&self) -> (f64, f64) {
        analysis::regression_coefficients(&self.rate_points(), self.interval_secs())
    }

    pub fn horizontality_t_score(&self) -> f64 {
        analysis::horizontality_t_score(&self.interval_rates())
    }

    pub fn flatness_p_value(&self) -> f64 {
        analysis::flatness_p_value(&self.interval_rates())
    }

    /// Merge peers by summing same-indexed intervals
    ///
    /// Callers check kinds and intervals; see [`crate::stats::StatTracker::aggregate`].
    pub fn aggregate(peers: &[&CounterTracker]) -> CounterTracker {
        if peers.is_empty() {
            return CounterTracker::new(TrackerId::new("", "", ""), 0);
        }

        let len = peers.iter().map(|p| p.num_intervals()).min().unwrap_or(0);
        let mut counts = vec![0u64; len];
        for peer in peers {
            for (sum, count) in counts.iter_mut().zip(peer.core.history()) {
                *sum += count;
            }
        }

        let infos: Vec<&TrackerInfo> = peers.iter().map(|p| p.info()).collect();
        CounterTracker::restore(merged_info(&infos, len), counts)
    }

    fn interval_secs(&self) -> f64 {
        self.core.info.collection_interval_secs as f64
    }

    fn rate_points(&self) -> Vec<(usize, f64)> {
        self.interval_rates().into_iter().enumerate().collect()
    }
}

impl Variant for CounterTracker {
    type Payload = u64;

    fn core(&self) -> &TrackerCore<u64> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TrackerCore<u64> {
        &mut self.core
    }

    fn realtime_sample(&self, bucket: &u64) -> Option<(ReportKind, f64)> {
        Some((ReportKind::Add, *bucket as f64 / self.interval_secs()))
    }
}

impl Tracker for CounterTracker {
    fn info(&self) -> &TrackerInfo {
        &self.core.info
    }

    fn kind(&self) -> TrackerKind {
        TrackerKind::Counter
    }

    fn num_intervals(&self) -> usize {
        self.core.series.len()
    }

    fn summary_value(&self) -> f64 {
        self.average_per_second()
    }

    fn summary_string(&self) -> String {
        format!(
            "{} -- Count: {}; Avg/Second: {:.3}; Avg/Interval: {:.3}; Std Dev: {:.3}; Corr Coeff: {:.3}",
            self.display_name(),
            self.total_count(),
            self.average_per_second(),
            self.average_per_interval(),
            self.standard_deviation(),
            self.correlation_coefficient()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn secs(base: Instant, s: u64) -> Instant {
        base + Duration::from_secs(s)
    }

    fn counter_with(counts_at: &[u64], stop: u64) -> CounterTracker {
        let base = Instant::now();
        let mut tracker = CounterTracker::new(TrackerId::new("c", "t", "Requests"), 10);
        tracker.start_at(base, None);
        for &s in counts_at {
            tracker.increment_at(secs(base, s));
        }
        tracker.stop_at(secs(base, stop));
        tracker
    }

    #[test]
    fn test_counts_and_rates() {
        let tracker = counter_with(&[0, 1, 2, 3, 12, 13, 35], 40);
        assert_eq!(tracker.interval_counts(), vec![4, 2, 0, 1]);
        assert_eq!(tracker.total_count(), 7);
        assert_eq!(tracker.duration_secs(), 40);
        assert_eq!(tracker.average_per_interval(), 1.75);
        assert_eq!(tracker.average_per_second(), 7.0 / 40.0);
        assert_eq!(tracker.max_per_interval(), 4);
        assert_eq!(tracker.min_per_interval(), 0);
        assert_eq!(tracker.interval_rates(), vec![0.4, 0.2, 0.0, 0.1]);
        assert_eq!(tracker.summary_value(), tracker.average_per_second());
    }

    #[test]
    fn test_undo_only_touches_open_interval() {
        let base = Instant::now();
        let mut tracker = CounterTracker::new(TrackerId::new("c", "t", "Requests"), 10);
        tracker.start_at(base, None);
        tracker.increment_at(secs(base, 1));
        tracker.increment_at(secs(base, 2));
        tracker.undo_last_increment();
        tracker.increment_at(secs(base, 11));
        tracker.undo_last_increment();
        tracker.undo_last_increment();
        tracker.stop_at(secs(base, 15));
        assert_eq!(tracker.interval_counts(), vec![1, 0]);
    }

    #[test]
    fn test_observations_outside_run_are_ignored() {
        let base = Instant::now();
        let mut tracker = CounterTracker::new(TrackerId::new("c", "t", "Requests"), 10);
        tracker.increment_at(base);
        tracker.start_at(base, None);
        tracker.increment_at(secs(base, 1));
        tracker.stop_at(secs(base, 5));
        tracker.increment_at(secs(base, 6));
        assert_eq!(tracker.interval_counts(), vec![1]);
    }

    #[test]
    fn test_flat_rate_statistics() {
        let stamps: Vec<u64> = (0..4).flat_map(|i| [i * 10 + 1, i * 10 + 2]).collect();
        let tracker = counter_with(&stamps, 40);
        assert_eq!(tracker.interval_counts(), vec![2, 2, 2, 2]);
        assert_eq!(tracker.standard_deviation(), 0.0);
        assert!(tracker.correlation_coefficient().abs() < 1e-9);
        let (a, b) = tracker.regression_coefficients();
        assert!((a - 0.2).abs() < 1e-12);
        assert!(b.abs() < 1e-12);
        assert_eq!(tracker.horizontality_t_score(), 0.0);
    }

    #[test]
    fn test_search_thresholds() {
        let tracker = counter_with(&[1, 2, 3, 4], 10);
        assert!(tracker.is_at_least(0.4));
        assert!(!tracker.is_at_least(0.41));
        assert!(tracker.is_at_most(0.4));
    }

    #[test]
    fn test_summary_string_mentions_name_and_count() {
        let tracker = counter_with(&[1, 2], 10);
        let summary = tracker.summary_string();
        assert!(summary.starts_with("Requests -- Count: 2"));
    }
}
