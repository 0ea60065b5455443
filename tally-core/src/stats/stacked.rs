//! Parallel named series summed per interval

use super::aggregate::merged_info;
use super::tracker::{
    self, DisplayOptions, Tracker, TrackerCore, TrackerId, TrackerInfo, TrackerKind, Variant,
};
use crate::persistence::PersistenceSink;
use crate::realtime::RealtimeReporter;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;

/// Sums of each series plus the number of samples within one interval
///
/// `values` may be shorter than the series list; missing entries are zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackedBucket {
    pub count: u64,
    pub values: Vec<f64>,
}

impl StackedBucket {
    pub fn value(&self, series: usize) -> f64 {
        self.values.get(series).copied().unwrap_or(0.0)
    }
}

/// Tracks a fixed set of named series that are sampled together
///
/// Every sample supplies one value per series, for example bytes read and
/// bytes written by one operation. The display options describe whether the
/// series are meant to be drawn stacked.
#[derive(Debug, Clone)]
pub struct StackedTracker {
    core: TrackerCore<StackedBucket>,
    names: Vec<String>,
    options: DisplayOptions,
}

impl StackedTracker {
    pub fn new<I, S>(id: TrackerId, collection_interval_secs: u32, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            core: TrackerCore::new(id, collection_interval_secs),
            names: names.into_iter().map(Into::into).collect(),
            options: DisplayOptions::default(),
        }
    }

    pub(crate) fn restore(
        info: TrackerInfo,
        names: Vec<String>,
        buckets: Vec<StackedBucket>,
        options: DisplayOptions,
    ) -> Self {
        Self {
            core: TrackerCore::restore(info, buckets),
            names,
            options,
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

    pub fn set_display_options(&mut self, options: DisplayOptions) {
        self.options = options;
    }

    /// Add one sample with a value per series
    ///
    /// Extra values are dropped and missing ones count as zero.
    pub fn add_values(&mut self, values: &[f64]) {
        self.add_values_at(Instant::now(), values);
    }

    pub fn add_values_at(&mut self, now: Instant, values: &[f64]) {
        let width = self.names.len();
        if values.len() != width && self.is_running() {
            tracing::warn!(
                "Tracker '{}' expects {} values per sample, got {}",
                self.display_name(),
                width,
                values.len()
            );
        }

        tracker::observe(self, now, |bucket| {
            if bucket.values.len() < width {
                bucket.values.resize(width, 0.0);
            }
            for (sum, value) in bucket.values.iter_mut().zip(values) {
                *sum += value;
            }
            bucket.count += 1;
        });
    }

    pub fn series_names(&self) -> &[String] {
        &self.names
    }

    pub fn buckets(&self) -> &[StackedBucket] {
        self.core.history()
    }

    pub fn interval_counts(&self) -> Vec<u64> {
        self.buckets().iter().map(|b| b.count).collect()
    }

    /// Per-interval sums, one row per interval and one column per series
    pub fn interval_totals(&self) -> Vec<Vec<f64>> {
        self.buckets()
            .iter()
            .map(|b| (0..self.names.len()).map(|i| b.value(i)).collect())
            .collect()
    }

    /// Per-interval averages; empty intervals average to zero
    pub fn interval_averages(&self) -> Vec<Vec<f64>> {
        self.buckets()
            .iter()
            .map(|b| {
                (0..self.names.len())
                    .map(|i| if b.count == 0 { 0.0 } else { b.value(i) / b.count as f64 })
                    .collect()
            })
            .collect()
    }

    pub fn total_values(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.names.len()];
        for bucket in self.buckets() {
            for (i, total) in totals.iter_mut().enumerate() {
                *total += bucket.value(i);
            }
        }
        totals
    }

    /// Average of each series over every sample of the run
    pub fn category_averages(&self) -> Vec<f64> {
        let count: u64 = self.buckets().iter().map(|b| b.count).sum();
        self.total_values()
            .into_iter()
            .map(|t| if count == 0 { 0.0 } else { t / count as f64 })
            .collect()
    }

    pub fn average_count_per_interval(&self) -> f64 {
        let n = self.num_intervals();
        if n == 0 {
            return 0.0;
        }
        self.interval_counts().iter().sum::<u64>() as f64 / n as f64
    }

    /// Merge peers; every peer must carry the same series names
    pub fn aggregate(peers: &[&StackedTracker]) -> Result<StackedTracker> {
        let Some(first) = peers.first() else {
            return Ok(StackedTracker::new(TrackerId::new("", "", ""), 0, Vec::<String>::new()));
        };

        if let Some(other) = peers.iter().find(|p| p.names != first.names) {
            return Err(Error::Aggregate(format!(
                "series of '{}' ({}) differ from '{}' ({})",
                other.display_name(),
                other.names.join(", "),
                first.display_name(),
                first.names.join(", ")
            )));
        }

        let width = first.names.len();
        let len = peers.iter().map(|p| p.num_intervals()).min().unwrap_or(0);
        let mut buckets = vec![
            StackedBucket {
                count: 0,
                values: vec![0.0; width],
            };
            len
        ];
        for peer in peers {
            for (merged, bucket) in buckets.iter_mut().zip(peer.buckets()) {
                merged.count += bucket.count;
                for (i, sum) in merged.values.iter_mut().enumerate() {
                    *sum += bucket.value(i);
                }
            }
        }

        let infos: Vec<&TrackerInfo> = peers.iter().map(|p| p.info()).collect();
        Ok(StackedTracker::restore(
            merged_info(&infos, len),
            first.names.clone(),
            buckets,
            first.options,
        ))
    }
}

impl Variant for StackedTracker {
    type Payload = StackedBucket;

    fn core(&self) -> &TrackerCore<StackedBucket> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TrackerCore<StackedBucket> {
        &mut self.core
    }
}

impl Tracker for StackedTracker {
    fn info(&self) -> &TrackerInfo {
        &self.core.info
    }

    fn kind(&self) -> TrackerKind {
        TrackerKind::Stacked
    }

    fn num_intervals(&self) -> usize {
        self.core.series.len()
    }

    fn display_options(&self) -> DisplayOptions {
        self.options
    }

    fn summary_string(&self) -> String {
        let parts: Vec<String> = self
            .names
            .iter()
            .zip(self.category_averages())
            .map(|(name, avg)| format!("Average[{}]: {:.3}", name, avg))
            .collect();
        format!("{} -- {}", self.display_name(), parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn secs(base: Instant, s: u64) -> Instant {
        base + Duration::from_secs(s)
    }

    fn tracker(names: &[&str]) -> StackedTracker {
        StackedTracker::new(TrackerId::new("c", "t", "Bytes"), 10, names.iter().copied())
    }

    #[test]
    fn test_sums_and_averages() {
        let base = Instant::now();
        let mut t = tracker(&["read", "written"]);
        t.start_at(base, None);
        t.add_values_at(secs(base, 1), &[100.0, 10.0]);
        t.add_values_at(secs(base, 2), &[300.0, 30.0]);
        t.add_values_at(secs(base, 21), &[50.0, 5.0]);
        t.stop_at(secs(base, 30));

        assert_eq!(t.interval_counts(), vec![2, 0, 1]);
        assert_eq!(
            t.interval_totals(),
            vec![vec![400.0, 40.0], vec![0.0, 0.0], vec![50.0, 5.0]]
        );
        assert_eq!(
            t.interval_averages(),
            vec![vec![200.0, 20.0], vec![0.0, 0.0], vec![50.0, 5.0]]
        );
        assert_eq!(t.total_values(), vec![450.0, 45.0]);
        assert_eq!(t.category_averages(), vec![150.0, 15.0]);
        assert_eq!(t.average_count_per_interval(), 1.0);
    }

    #[test]
    fn test_mismatched_sample_width() {
        let base = Instant::now();
        let mut t = tracker(&["a", "b", "c"]);
        t.start_at(base, None);
        t.add_values_at(secs(base, 1), &[1.0]);
        t.add_values_at(secs(base, 2), &[1.0, 2.0, 3.0, 4.0]);
        t.stop_at(secs(base, 5));

        assert_eq!(t.interval_totals(), vec![vec![2.0, 2.0, 3.0]]);
        assert_eq!(t.interval_counts(), vec![2]);
    }

    #[test]
    fn test_aggregate_requires_same_series() {
        let base = Instant::now();
        let mut a = tracker(&["read", "written"]);
        let mut b = tracker(&["read", "written"]);
        let c = tracker(&["in", "out"]);
        for t in [&mut a, &mut b] {
            t.start_at(base, None);
            t.add_values_at(secs(base, 1), &[1.0, 2.0]);
            t.stop_at(secs(base, 10));
        }

        let merged = StackedTracker::aggregate(&[&a, &b]).unwrap();
        assert_eq!(merged.interval_totals(), vec![vec![2.0, 4.0]]);
        assert_eq!(merged.interval_counts(), vec![2]);

        let err = StackedTracker::aggregate(&[&a, &c]).unwrap_err();
        assert!(matches!(err, Error::Aggregate(_)));
    }

    #[test]
    fn test_display_options_default() {
        let mut t = tracker(&["a"]);
        assert_eq!(t.display_options(), DisplayOptions::default());
        t.set_display_options(DisplayOptions { stacked: true, ..DisplayOptions::default() });
        assert!(t.display_options().stacked);
        assert!(!t.is_searchable());
    }
}
