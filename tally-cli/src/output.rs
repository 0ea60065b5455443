//! Job report output

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tally_core::stats::{StatTracker, Tracker};
use tally_core::timing::unix_millis;

/// Report of one finished job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub job_name: String,
    pub clients: Vec<String>,
    pub threads: usize,
    pub collection_interval_secs: u32,
    pub started_at_ms: u64,
    pub elapsed_secs: f64,
    /// One entry per display name, merged across every client and thread
    pub job: Vec<TrackerReport>,
    /// One entry per client and display name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_client: Vec<TrackerReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerReport {
    pub display_name: String,
    pub client_id: String,
    pub num_intervals: usize,
    pub duration_secs: u64,
    pub summary: String,
    #[serde(flatten)]
    pub detail: TrackerDetail,
}

/// Trend statistics over a tracker's per-interval series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trend {
    pub standard_deviation: f64,
    pub correlation: f64,
    pub regression_intercept: f64,
    pub regression_slope: f64,
    /// Non-finite when the halves differ with zero spread
    pub t_score: Option<f64>,
    pub p_value: f64,
}

impl Trend {
    fn new(std_dev: f64, correlation: f64, (a, b): (f64, f64), t: f64, p: f64) -> Self {
        Self {
            standard_deviation: std_dev,
            correlation,
            regression_intercept: a,
            regression_slope: b,
            t_score: t.is_finite().then_some(t),
            p_value: p,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerDetail {
    Counter {
        total: u64,
        per_second: f64,
        interval_counts: Vec<u64>,
        trend: Trend,
    },
    Duration {
        count: u64,
        mean_ms: f64,
        min_ms: Option<f64>,
        max_ms: Option<f64>,
        interval_counts: Vec<u64>,
        trend: Trend,
    },
    Value {
        count: u64,
        mean: f64,
        min: Option<i64>,
        max: Option<i64>,
        interval_totals: Vec<i64>,
        trend: Trend,
    },
    Categorical {
        total: u64,
        categories: Vec<CategoryShare>,
    },
    Stacked {
        series: Vec<String>,
        totals: Vec<f64>,
        averages_per_interval: Vec<f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryShare {
    pub name: String,
    pub count: u64,
    pub percent: f64,
}

impl TrackerReport {
    pub fn from_tracker(tracker: &StatTracker) -> Self {
        let detail = match tracker {
            StatTracker::Counter(t) => TrackerDetail::Counter {
                total: t.total_count(),
                per_second: t.average_per_second(),
                interval_counts: t.interval_counts(),
                trend: Trend::new(
                    t.standard_deviation(),
                    t.correlation_coefficient(),
                    t.regression_coefficients(),
                    t.horizontality_t_score(),
                    t.flatness_p_value(),
                ),
            },
            StatTracker::Duration(t) => TrackerDetail::Duration {
                count: t.total_count(),
                mean_ms: t.average_duration_millis(),
                min_ms: t.min_duration().map(tally_core::timing::as_millis_f64),
                max_ms: t.max_duration().map(tally_core::timing::as_millis_f64),
                interval_counts: t.interval_counts(),
                trend: Trend::new(
                    t.standard_deviation(),
                    t.correlation_coefficient(),
                    t.regression_coefficients(),
                    t.horizontality_t_score(),
                    t.flatness_p_value(),
                ),
            },
            StatTracker::Value(t) => TrackerDetail::Value {
                count: t.total_count(),
                mean: t.average_value(),
                min: t.min_value(),
                max: t.max_value(),
                interval_totals: t.interval_totals(),
                trend: Trend::new(
                    t.standard_deviation(),
                    t.correlation_coefficient(),
                    t.regression_coefficients(),
                    t.horizontality_t_score(),
                    t.flatness_p_value(),
                ),
            },
            StatTracker::Categorical(t) => TrackerDetail::Categorical {
                total: t.total_count(),
                categories: t
                    .category_names()
                    .iter()
                    .zip(t.category_totals())
                    .zip(t.category_percentages())
                    .map(|((name, count), percent)| CategoryShare {
                        name: name.clone(),
                        count,
                        percent,
                    })
                    .collect(),
            },
            StatTracker::Stacked(t) => TrackerDetail::Stacked {
                series: t.series_names().to_vec(),
                totals: t.total_values(),
                averages_per_interval: t.category_averages(),
            },
        };

        Self {
            display_name: tracker.display_name().to_string(),
            client_id: tracker.client_id().to_string(),
            num_intervals: tracker.num_intervals(),
            duration_secs: tracker.duration_secs(),
            summary: tracker.summary_string(),
            detail,
        }
    }
}

impl JobReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: &str,
        job_name: &str,
        clients: &[String],
        threads: usize,
        collection_interval_secs: u32,
        started_at: std::time::SystemTime,
        elapsed: std::time::Duration,
        per_job: &[StatTracker],
        per_client: &[StatTracker],
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            clients: clients.to_vec(),
            threads,
            collection_interval_secs,
            started_at_ms: unix_millis(started_at),
            elapsed_secs: elapsed.as_secs_f64(),
            job: per_job.iter().map(TrackerReport::from_tracker).collect(),
            per_client: per_client.iter().map(TrackerReport::from_tracker).collect(),
        }
    }

    /// Print per-job summaries to stdout
    pub fn print_human(&self) {
        println!("\n{}", "=".repeat(60));
        println!("Job {} ({})", self.job_name, self.job_id);
        println!("{}", "=".repeat(60));
        println!("  Clients:         {}", self.clients.join(", "));
        println!("  Threads:         {}", self.threads);
        println!("  Interval:        {}s", self.collection_interval_secs);
        println!("  Elapsed:         {:.2}s", self.elapsed_secs);
        println!();
        for tracker in &self.job {
            println!("  {}", tracker.summary);
        }
        if !self.per_client.is_empty() {
            println!();
            println!("Per client:");
            for tracker in &self.per_client {
                println!("  [{}] {}", tracker.client_id, tracker.summary);
            }
        }
        println!("{}", "=".repeat(60));
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create report {}", path.display()))?;
        file.write_all(json.as_bytes())?;
        tracing::info!("Report written to {}", path.display());
        Ok(())
    }
}
