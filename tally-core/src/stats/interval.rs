//! Fixed-width interval bucketing
//!
//! [`IntervalSeries`] maps a stream of timestamped updates onto a contiguous
//! sequence of buckets. Exactly one bucket is open at a time; every interval
//! that elapsed before it is represented by a closed bucket, zero-valued when
//! nothing was observed during it.
//!
//! The open bucket covers `[interval_stop - width, interval_stop)`, so an
//! update stamped exactly at `interval_stop` belongs to the next interval.

use std::ops::Range;
use std::time::{Duration, Instant};

/// Generic rollover engine parameterized over the bucket payload
///
/// `P::default()` is the zero element used for the open bucket and for
/// backfilled intervals.
#[derive(Debug, Clone)]
pub struct IntervalSeries<P> {
    width: Duration,
    history: Vec<P>,
    current: P,
    started_at: Option<Instant>,
    interval_stop: Option<Instant>,
    open: bool,
}

impl<P: Clone + Default> IntervalSeries<P> {
    /// Create an idle series with the given bucket width
    pub fn new(width: Duration) -> Self {
        Self {
            width,
            history: Vec::new(),
            current: P::default(),
            started_at: None,
            interval_stop: None,
            open: false,
        }
    }

    /// Rebuild a closed series from decoded or aggregated buckets
    pub fn from_history(width: Duration, history: Vec<P>) -> Self {
        Self {
            width,
            history,
            current: P::default(),
            started_at: None,
            interval_stop: None,
            open: false,
        }
    }

    /// Discard any history and open the first bucket at `now`
    pub fn start(&mut self, now: Instant) {
        self.history.clear();
        self.current = P::default();
        self.started_at = Some(now);
        self.interval_stop = Some(now + self.width);
        self.open = true;
    }

    /// Apply `update` to the bucket that contains `now`
    ///
    /// Closes the open bucket and backfills zero buckets first when `now` is
    /// at or past its end. Returns the indices of the buckets that were closed
    /// by this call (empty when the update merged into the open bucket).
    pub fn record<F>(&mut self, now: Instant, update: F) -> Range<usize>
    where
        F: FnOnce(&mut P),
    {
        let Some(mut stop) = self.interval_stop.filter(|_| self.open) else {
            tracing::warn!("Update on a series that is not open; ignoring");
            return self.history.len()..self.history.len();
        };

        let first_closed = self.history.len();

        if now >= stop {
            self.history.push(std::mem::take(&mut self.current));
            stop += self.width;
            while stop <= now {
                self.history.push(P::default());
                stop += self.width;
            }
            self.interval_stop = Some(stop);
        }

        update(&mut self.current);
        first_closed..self.history.len()
    }

    /// Close the open bucket and backfill every interval that began before `now`
    ///
    /// No bucket is open afterwards. Calling this on a series that is not open
    /// returns an empty range.
    pub fn finalize(&mut self, now: Instant) -> Range<usize> {
        let Some(mut stop) = self.interval_stop.filter(|_| self.open) else {
            return self.history.len()..self.history.len();
        };

        let first_closed = self.history.len();
        self.history.push(std::mem::take(&mut self.current));
        while stop < now {
            self.history.push(P::default());
            stop += self.width;
        }

        self.interval_stop = Some(stop);
        self.open = false;
        first_closed..self.history.len()
    }

    /// Bucket width
    pub fn width(&self) -> Duration {
        self.width
    }

    /// Closed buckets in interval order
    pub fn history(&self) -> &[P] {
        &self.history
    }

    /// Number of closed buckets
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// True between `start` and `finalize`
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// The open bucket, if any
    pub fn current(&self) -> Option<&P> {
        self.open.then_some(&self.current)
    }

    /// Mutable access to the open bucket, used to undo the latest update
    pub fn current_mut(&mut self) -> Option<&mut P> {
        if self.open {
            Some(&mut self.current)
        } else {
            None
        }
    }

    /// Monotonic instant the series was started at
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Drop closed buckets beyond `len`
    pub fn truncate(&mut self, len: usize) {
        self.history.truncate(len);
    }

    pub fn into_history(self) -> Vec<P> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: Duration = Duration::from_secs(10);

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    fn started() -> (IntervalSeries<u64>, Instant) {
        let base = Instant::now();
        let mut series = IntervalSeries::new(W);
        series.start(base);
        (series, base)
    }

    #[test]
    fn test_updates_merge_into_open_bucket() {
        let (mut series, base) = started();
        assert!(series.record(at(base, 1), |c| *c += 1).is_empty());
        assert!(series.record(at(base, 9), |c| *c += 1).is_empty());
        assert_eq!(series.current(), Some(&2));
        assert!(series.is_empty());
    }

    #[test]
    fn test_boundary_update_opens_next_interval() {
        let (mut series, base) = started();
        series.record(at(base, 2), |c| *c += 1);
        let closed = series.record(at(base, 10), |c| *c += 5);
        assert_eq!(closed, 0..1);
        assert_eq!(series.history(), &[1]);
        assert_eq!(series.current(), Some(&5));
    }

    #[test]
    fn test_idle_intervals_are_backfilled() {
        for k in 0..5u64 {
            let (mut series, base) = started();
            series.record(at(base, 1), |c| *c += 3);
            // K fully idle intervals, then one observation
            let closed = series.record(at(base, 10 * (k + 1) + 4), |c| *c += 1);
            assert_eq!(closed.len() as u64, k + 1);
            assert_eq!(series.history()[0], 3);
            assert!(series.history()[1..].iter().all(|&c| c == 0));
            assert_eq!(series.len() as u64, k + 1);

            series.finalize(at(base, 10 * (k + 1) + 5));
            assert_eq!(*series.history().last().unwrap(), 1);
        }
    }

    #[test]
    fn test_finalize_bucket_count_is_ceiling() {
        for elapsed in [1u64, 9, 10, 11, 20, 25, 39, 40, 41] {
            let (mut series, base) = started();
            series.record(at(base, 0), |c| *c += 1);
            series.finalize(at(base, elapsed));
            let expected = elapsed.div_ceil(10).max(1) as usize;
            assert_eq!(series.len(), expected, "elapsed {elapsed}");
            assert_eq!(series.history().iter().sum::<u64>(), 1);
        }
    }

    #[test]
    fn test_finalize_without_observations() {
        let (mut series, base) = started();
        let closed = series.finalize(at(base, 0));
        assert_eq!(closed, 0..1);
        assert_eq!(series.history(), &[0]);
        assert!(!series.is_open());
    }

    #[test]
    fn test_record_after_finalize_is_ignored() {
        let (mut series, base) = started();
        series.record(at(base, 1), |c| *c += 1);
        series.finalize(at(base, 5));
        let closed = series.record(at(base, 30), |c| *c += 100);
        assert!(closed.is_empty());
        assert_eq!(series.history(), &[1]);
        assert!(series.finalize(at(base, 40)).is_empty());
    }

    #[test]
    fn test_restart_resets_history() {
        let (mut series, base) = started();
        series.record(at(base, 15), |c| *c += 1);
        series.start(at(base, 100));
        assert!(series.is_empty());
        assert_eq!(series.current(), Some(&0));
    }

    #[test]
    fn test_gap_free_with_sporadic_updates() {
        let (mut series, base) = started();
        let stamps = [0u64, 3, 27, 28, 61, 99, 100, 143];
        for s in stamps {
            series.record(at(base, s), |c| *c += 1);
        }
        series.finalize(at(base, 150));
        assert_eq!(series.len(), 15);
        assert_eq!(series.history().iter().sum::<u64>(), stamps.len() as u64);
        assert_eq!(series.history()[2], 2);
        assert_eq!(series.history()[9], 1);
        assert_eq!(series.history()[10], 1);
    }
}
