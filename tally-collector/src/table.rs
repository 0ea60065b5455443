//! Per-statistic interval tables
//!
//! Reports from every reporter of a job land in one table per display name.
//! ADD points are summed; AVERAGE points are summed together with a reporter
//! count and read back as the mean. Intervals may arrive in any order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tally_core::realtime::{ReportKind, StatReport};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Cell {
    sum: f64,
    reporters: u32,
    averaged: bool,
}

impl Cell {
    fn value(&self) -> f64 {
        if self.averaged && self.reporters > 0 {
            self.sum / self.reporters as f64
        } else {
            self.sum
        }
    }
}

#[derive(Debug, Default)]
struct StatEntry {
    registered: usize,
    done: usize,
    /// Largest interval count announced by a done marker
    final_intervals: Option<u32>,
    intervals: BTreeMap<u32, Cell>,
}

/// Snapshot of one statistic for logging
#[derive(Debug, Clone, PartialEq)]
pub struct StatSummary {
    pub job_id: String,
    pub display_name: String,
    pub registered: usize,
    pub done: usize,
    pub retained_intervals: usize,
    pub latest: Option<(u32, f64)>,
    pub complete: bool,
}

impl fmt::Display for StatSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} -- threads: {}/{} done", self.job_id, self.display_name, self.done, self.registered)?;
        match self.latest {
            Some((interval, value)) => write!(f, "; interval {}: {:.3}", interval, value)?,
            None => write!(f, "; no data")?,
        }
        if self.complete {
            write!(f, " (complete)")?;
        }
        Ok(())
    }
}

/// Every statistic seen by the collector
#[derive(Debug)]
pub struct StatTable {
    max_intervals: usize,
    entries: HashMap<(String, String), StatEntry>,
    /// First-seen order of the keys
    order: Vec<(String, String)>,
}

impl StatTable {
    pub fn new(max_intervals: usize) -> Self {
        Self {
            max_intervals: max_intervals.max(1),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn entry(&mut self, job_id: &str, display_name: &str) -> &mut StatEntry {
        let key = (job_id.to_string(), display_name.to_string());
        let order = &mut self.order;
        self.entries.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            StatEntry::default()
        })
    }

    /// One reporter thread announced the statistic
    pub fn register(&mut self, job_id: &str, display_name: &str) {
        self.entry(job_id, display_name).registered += 1;
    }

    pub fn apply(&mut self, job_id: &str, report: &StatReport) {
        let max_intervals = self.max_intervals;
        let entry = self.entry(job_id, &report.tracker.display_name);

        let (averaged, value) = match (report.kind, report.value) {
            (ReportKind::Done, _) => {
                entry.done += 1;
                entry.final_intervals = entry.final_intervals.max(Some(report.interval));
                return;
            }
            (_, None) => {
                tracing::debug!(
                    "Ignoring {} report without a value for interval {}",
                    report.tracker.display_name,
                    report.interval
                );
                return;
            }
            (ReportKind::Add, Some(value)) => (false, value),
            (ReportKind::Average, Some(value)) => (true, value),
        };

        let cell = entry.intervals.entry(report.interval).or_insert(Cell {
            sum: 0.0,
            reporters: 0,
            averaged,
        });
        cell.sum += value;
        cell.reporters += 1;

        while entry.intervals.len() > max_intervals {
            entry.intervals.pop_first();
        }
    }

    /// Reduced value of one interval
    pub fn value(&self, job_id: &str, display_name: &str, interval: u32) -> Option<f64> {
        self.entries
            .get(&(job_id.to_string(), display_name.to_string()))
            .and_then(|e| e.intervals.get(&interval))
            .map(Cell::value)
    }

    /// True once every registered reporter thread sent its done marker
    pub fn is_complete(&self, job_id: &str, display_name: &str) -> bool {
        self.entries
            .get(&(job_id.to_string(), display_name.to_string()))
            .is_some_and(|e| e.registered > 0 && e.done >= e.registered)
    }

    pub fn final_intervals(&self, job_id: &str, display_name: &str) -> Option<u32> {
        self.entries
            .get(&(job_id.to_string(), display_name.to_string()))
            .and_then(|e| e.final_intervals)
    }

    pub fn summaries(&self) -> Vec<StatSummary> {
        self.order
            .iter()
            .filter_map(|key| {
                let entry = self.entries.get(key)?;
                Some(StatSummary {
                    job_id: key.0.clone(),
                    display_name: key.1.clone(),
                    registered: entry.registered,
                    done: entry.done,
                    retained_intervals: entry.intervals.len(),
                    latest: entry.intervals.last_key_value().map(|(i, c)| (*i, c.value())),
                    complete: entry.registered > 0 && entry.done >= entry.registered,
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::stats::TrackerId;

    fn report(thread: &str, name: &str, interval: u32, kind: ReportKind, value: Option<f64>) -> StatReport {
        StatReport {
            tracker: TrackerId::new("c", thread, name),
            interval,
            kind,
            value,
        }
    }

    #[test]
    fn test_add_sums_across_reporters() {
        let mut table = StatTable::new(100);
        table.apply("j", &report("0", "Ops", 0, ReportKind::Add, Some(2.5)));
        table.apply("j", &report("1", "Ops", 0, ReportKind::Add, Some(1.5)));
        table.apply("j", &report("1", "Ops", 1, ReportKind::Add, Some(7.0)));
        assert_eq!(table.value("j", "Ops", 0), Some(4.0));
        assert_eq!(table.value("j", "Ops", 1), Some(7.0));
        assert_eq!(table.value("j", "Ops", 2), None);
    }

    #[test]
    fn test_average_reads_back_mean() {
        let mut table = StatTable::new(100);
        for (thread, v) in [("0", 10.0), ("1", 20.0), ("2", 60.0)] {
            table.apply("j", &report(thread, "Latency", 3, ReportKind::Average, Some(v)));
        }
        assert_eq!(table.value("j", "Latency", 3), Some(30.0));
    }

    #[test]
    fn test_out_of_order_and_retention() {
        let mut table = StatTable::new(3);
        for i in [5u32, 1, 4, 2, 3] {
            table.apply("j", &report("0", "Ops", i, ReportKind::Add, Some(i as f64)));
        }
        assert_eq!(table.value("j", "Ops", 1), None);
        assert_eq!(table.value("j", "Ops", 2), None);
        assert_eq!(table.value("j", "Ops", 3), Some(3.0));
        assert_eq!(table.value("j", "Ops", 5), Some(5.0));
        assert_eq!(table.summaries()[0].latest, Some((5, 5.0)));
    }

    #[test]
    fn test_complete_when_every_thread_done() {
        let mut table = StatTable::new(10);
        table.register("j", "Ops");
        table.register("j", "Ops");
        table.apply("j", &report("0", "Ops", 4, ReportKind::Done, None));
        assert!(!table.is_complete("j", "Ops"));
        table.apply("j", &report("1", "Ops", 5, ReportKind::Done, None));
        assert!(table.is_complete("j", "Ops"));
        assert_eq!(table.final_intervals("j", "Ops"), Some(5));
        assert!(!table.is_complete("j", "Other"));
    }

    #[test]
    fn test_jobs_are_separate() {
        let mut table = StatTable::new(10);
        table.apply("a", &report("0", "Ops", 0, ReportKind::Add, Some(1.0)));
        table.apply("b", &report("0", "Ops", 0, ReportKind::Add, Some(2.0)));
        assert_eq!(table.value("a", "Ops", 0), Some(1.0));
        assert_eq!(table.value("b", "Ops", 0), Some(2.0));

        let names: Vec<String> = table.summaries().iter().map(|s| s.job_id.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_summary_line() {
        let mut table = StatTable::new(10);
        table.register("j", "Ops");
        table.apply("j", &report("0", "Ops", 0, ReportKind::Add, Some(1.25)));
        let line = table.summaries()[0].to_string();
        assert_eq!(line, "[j] Ops -- threads: 0/1 done; interval 0: 1.250");
    }
}
