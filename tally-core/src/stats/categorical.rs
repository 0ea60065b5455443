//! Categorical tally tracker

use super::aggregate::merged_info;
use super::tracker::{self, Tracker, TrackerCore, TrackerId, TrackerInfo, TrackerKind, Variant};
use crate::persistence::PersistenceSink;
use crate::realtime::RealtimeReporter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Counts occurrences per named category
///
/// Categories are discovered on first use and keep first-seen order. A
/// bucket holds one count per category known when it was last written;
/// categories added later implicitly have a zero count in older buckets.
#[derive(Debug, Clone)]
pub struct CategoricalTracker {
    core: TrackerCore<Vec<u64>>,
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl CategoricalTracker {
    pub fn new(id: TrackerId, collection_interval_secs: u32) -> Self {
        Self {
            core: TrackerCore::new(id, collection_interval_secs),
            names: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn restore(info: TrackerInfo, names: Vec<String>, buckets: Vec<Vec<u64>>) -> Self {
        let index = names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
        Self {
            core: TrackerCore::restore(info, buckets),
            names,
            index,
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

    pub fn increment(&mut self, category: &str) {
        self.increment_at(Instant::now(), category);
    }

    pub fn increment_at(&mut self, now: Instant, category: &str) {
        if !self.is_running() {
            tracker::observe(self, now, |_| {});
            return;
        }

        let slot = self.slot_for(category);
        tracker::observe(self, now, |counts| {
            if counts.len() <= slot {
                counts.resize(slot + 1, 0);
            }
            counts[slot] += 1;
        });
    }

    /// Category names in first-seen order
    pub fn category_names(&self) -> &[String] {
        &self.names
    }

    /// Count of `category` in interval `interval`
    pub fn count(&self, interval: usize, category: &str) -> u64 {
        let Some(&slot) = self.index.get(category) else {
            return 0;
        };
        self.core
            .history()
            .get(interval)
            .and_then(|counts| counts.get(slot))
            .copied()
            .unwrap_or(0)
    }

    /// Per-interval counts, zero-padded to the full category list
    pub fn interval_counts(&self) -> Vec<Vec<u64>> {
        self.core
            .history()
            .iter()
            .map(|counts| {
                let mut row = counts.clone();
                row.resize(self.names.len(), 0);
                row
            })
            .collect()
    }

    /// Total per category, aligned with [`category_names`](Self::category_names)
    pub fn category_totals(&self) -> Vec<u64> {
        let mut totals = vec![0u64; self.names.len()];
        for counts in self.core.history() {
            for (total, count) in totals.iter_mut().zip(counts) {
                *total += count;
            }
        }
        totals
    }

    pub fn total_count(&self) -> u64 {
        self.category_totals().iter().sum()
    }

    /// Share of each category in percent
    pub fn category_percentages(&self) -> Vec<f64> {
        let total = self.total_count();
        self.category_totals()
            .into_iter()
            .map(|c| if total == 0 { 0.0 } else { 100.0 * c as f64 / total as f64 })
            .collect()
    }

    /// Merge peers after building the union of their category names
    ///
    /// Names keep first-seen order across peers in the order given. The
    /// result is truncated to the shortest peer.
    pub fn aggregate(peers: &[&CategoricalTracker]) -> CategoricalTracker {
        if peers.is_empty() {
            return CategoricalTracker::new(TrackerId::new("", "", ""), 0);
        }

        let mut names: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for peer in peers {
            for name in &peer.names {
                if !index.contains_key(name) {
                    index.insert(name.clone(), names.len());
                    names.push(name.clone());
                }
            }
        }

        let len = peers.iter().map(|p| p.num_intervals()).min().unwrap_or(0);
        let mut buckets = vec![vec![0u64; names.len()]; len];
        for peer in peers {
            for (merged, counts) in buckets.iter_mut().zip(peer.core.history()) {
                for (slot, &count) in counts.iter().enumerate() {
                    if let Some(&target) = peer.names.get(slot).and_then(|n| index.get(n)) {
                        merged[target] += count;
                    }
                }
            }
        }

        let infos: Vec<&TrackerInfo> = peers.iter().map(|p| p.info()).collect();
        let mut merged = CategoricalTracker::restore(merged_info(&infos, len), names, buckets);
        merged.index = index;
        merged
    }

    fn slot_for(&mut self, category: &str) -> usize {
        if let Some(&slot) = self.index.get(category) {
            return slot;
        }
        let slot = self.names.len();
        self.names.push(category.to_string());
        self.index.insert(category.to_string(), slot);
        slot
    }
}

impl Variant for CategoricalTracker {
    type Payload = Vec<u64>;

    fn core(&self) -> &TrackerCore<Vec<u64>> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TrackerCore<Vec<u64>> {
        &mut self.core
    }

    fn reset_extras(&mut self) {
        self.names.clear();
        self.index.clear();
    }
}

impl Tracker for CategoricalTracker {
    fn info(&self) -> &TrackerInfo {
        &self.core.info
    }

    fn kind(&self) -> TrackerKind {
        TrackerKind::Categorical
    }

    fn num_intervals(&self) -> usize {
        self.core.series.len()
    }

    fn summary_string(&self) -> String {
        let parts: Vec<String> = self
            .names
            .iter()
            .zip(self.category_totals())
            .zip(self.category_percentages())
            .map(|((name, total), pct)| format!("{}: {} ({:.3}%)", name, total, pct))
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

    fn run(events: &[(u64, &str)], stop: u64) -> CategoricalTracker {
        let base = Instant::now();
        let mut t = CategoricalTracker::new(TrackerId::new("c", "t", "Result Codes"), 10);
        t.start_at(base, None);
        for &(s, name) in events {
            t.increment_at(secs(base, s), name);
        }
        t.stop_at(secs(base, stop));
        t
    }

    #[test]
    fn test_categories_in_first_seen_order() {
        let t = run(&[(1, "ok"), (2, "error"), (3, "ok"), (14, "timeout")], 20);
        assert_eq!(t.category_names(), &["ok", "error", "timeout"]);
        assert_eq!(t.interval_counts(), vec![vec![2, 1, 0], vec![0, 0, 1]]);
        assert_eq!(t.count(0, "ok"), 2);
        assert_eq!(t.count(0, "timeout"), 0);
        assert_eq!(t.count(5, "ok"), 0);
        assert_eq!(t.category_totals(), vec![2, 1, 1]);
        assert_eq!(t.category_percentages(), vec![50.0, 25.0, 25.0]);
    }

    #[test]
    fn test_union_of_categories() {
        let a = run(&[(1, "x"), (2, "y"), (11, "y")], 20);
        let b = run(&[(1, "y"), (2, "z"), (3, "z"), (12, "z")], 20);

        let merged = CategoricalTracker::aggregate(&[&a, &b]);
        assert_eq!(merged.category_names(), &["x", "y", "z"]);
        assert_eq!(merged.interval_counts(), vec![vec![1, 2, 2], vec![0, 1, 1]]);
        assert_eq!(
            merged.total_count(),
            merged.category_totals().iter().sum::<u64>()
        );
        assert_eq!(merged.total_count(), a.total_count() + b.total_count());
    }

    #[test]
    fn test_aggregate_truncates_to_shortest() {
        let a = run(&[(1, "x"), (25, "x")], 30);
        let b = run(&[(1, "x")], 10);
        let merged = CategoricalTracker::aggregate(&[&a, &b]);
        assert_eq!(merged.num_intervals(), 1);
        assert_eq!(merged.interval_counts(), vec![vec![2]]);
    }

    #[test]
    fn test_not_searchable() {
        let t = run(&[(1, "ok")], 10);
        assert!(!t.is_searchable());
        assert_eq!(t.summary_value(), 0.0);
        assert!(t.summary_string().starts_with("Result Codes -- ok: 1 (100.000%)"));
    }
}
