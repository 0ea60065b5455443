//! Job profiles
//!
//! A profile is a TOML file describing one synthetic load job: how many
//! simulated clients and threads run, for how long, how operations behave,
//! and where results go. Any field can be overridden from the command line
//! with `--set dotted.path=value`.

use anyhow::{bail, Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tally_core::persistence::PersistenceConfig;
use tally_core::realtime::RealtimeConfig;

/// Top-level profile
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub job: JobConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Stream closed intervals to a collector
    #[serde(default)]
    pub realtime: Option<RealtimeSection>,
    /// Periodically snapshot running trackers to disk
    #[serde(default)]
    pub persistence: Option<PersistenceSection>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Job identifier used on the wire and in file names (default: name + start time)
    #[serde(default)]
    pub job_id: Option<String>,
    /// Prefix of the simulated client ids (default: "client")
    #[serde(default)]
    pub client_id: Option<String>,
    /// Number of simulated clients
    #[serde(default = "default_one")]
    pub clients: usize,
    /// Worker threads per simulated client
    #[serde(default = "default_one")]
    pub threads_per_client: usize,
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub duration: Duration,
    /// Tracker bucket width, whole seconds
    #[serde(with = "humantime_serde", default = "default_collection_interval")]
    #[schemars(with = "String")]
    pub collection_interval: Duration,
    /// Random seed for reproducible operation streams (None = use entropy)
    #[serde(default)]
    pub seed: Option<u64>,
    /// Advance a virtual clock instead of sleeping through operations
    #[serde(default)]
    pub simulated_time: bool,
}

fn default_one() -> usize {
    1
}

fn default_collection_interval() -> Duration {
    Duration::from_secs(tally_core::stats::DEFAULT_COLLECTION_INTERVAL_SECS as u64)
}

/// Shape of the synthetic operations
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WorkloadConfig {
    /// Mean of the exponential latency distribution
    #[serde(with = "humantime_serde", default = "default_mean_latency")]
    #[schemars(with = "String")]
    pub mean_latency: Duration,
    /// Fraction of operations failing with an error
    #[serde(default = "default_error_ratio")]
    pub error_ratio: f64,
    /// Fraction of operations timing out
    #[serde(default)]
    pub timeout_ratio: f64,
    /// Latency recorded for timed-out operations
    #[serde(with = "humantime_serde", default = "default_timeout")]
    #[schemars(with = "String")]
    pub timeout: Duration,
    /// Mean response size in bytes for successful operations
    #[serde(default = "default_mean_response_size")]
    pub mean_response_size: f64,
    /// Bytes written per operation
    #[serde(default = "default_request_size")]
    pub request_size: u64,
    /// Pause between operations
    #[serde(with = "humantime_serde", default)]
    #[schemars(with = "String")]
    pub think_time: Duration,
}

fn default_mean_latency() -> Duration {
    Duration::from_millis(2)
}

fn default_error_ratio() -> f64 {
    0.01
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_mean_response_size() -> f64 {
    512.0
}

fn default_request_size() -> u64 {
    64
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            mean_latency: default_mean_latency(),
            error_ratio: default_error_ratio(),
            timeout_ratio: 0.0,
            timeout: default_timeout(),
            mean_response_size: default_mean_response_size(),
            request_size: default_request_size(),
            think_time: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RealtimeSection {
    /// Collector address, host:port
    pub address: String,
    #[serde(default)]
    pub auth_id: Option<String>,
    #[serde(default)]
    pub auth_password: Option<String>,
    #[serde(with = "humantime_serde", default = "default_report_interval")]
    #[schemars(with = "String")]
    pub report_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    #[schemars(with = "String")]
    pub handshake_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    #[schemars(with = "String")]
    pub connect_timeout: Duration,
    /// Bound on queued data points (default: unbounded)
    #[serde(default)]
    pub max_pending: Option<usize>,
}

fn default_report_interval() -> Duration {
    RealtimeConfig::default().report_interval
}

fn default_handshake_timeout() -> Duration {
    RealtimeConfig::default().handshake_timeout
}

fn default_connect_timeout() -> Duration {
    RealtimeConfig::default().connect_timeout
}

impl RealtimeSection {
    pub fn to_config(&self, client_id: &str) -> RealtimeConfig {
        RealtimeConfig {
            address: self.address.clone(),
            client_id: client_id.to_string(),
            auth_id: self.auth_id.clone(),
            auth_password: self.auth_password.clone(),
            report_interval: self.report_interval,
            handshake_timeout: self.handshake_timeout,
            connect_timeout: self.connect_timeout,
            max_pending: self.max_pending,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PersistenceSection {
    pub directory: PathBuf,
    #[serde(with = "humantime_serde", default = "default_save_interval")]
    #[schemars(with = "String")]
    pub save_interval: Duration,
}

fn default_save_interval() -> Duration {
    PersistenceConfig::default().save_interval
}

impl PersistenceSection {
    pub fn to_config(&self) -> PersistenceConfig {
        PersistenceConfig {
            directory: self.directory.clone(),
            save_interval: self.save_interval,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// JSON report path
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Encoded per-thread trackers, readable with `tally inspect`
    #[serde(default)]
    pub stats_file: Option<PathBuf>,
    /// Also print per-client summaries
    #[serde(default)]
    pub per_client: bool,
}

impl ProfileConfig {
    /// Parse a profile, apply `--set` overrides in order, then validate
    pub fn load<P: AsRef<Path>>(path: P, overrides: &[String]) -> Result<Self> {
        let config = Self::from_file_with_overrides(path, overrides)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file_with_overrides<P: AsRef<Path>>(path: P, overrides: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;
        Self::from_toml_with_overrides(&content, overrides)
            .with_context(|| format!("Invalid profile: {}", path.display()))
    }

    /// Parse profile text and apply overrides
    pub fn from_toml_with_overrides(content: &str, overrides: &[String]) -> Result<Self> {
        let mut root: toml::Value = toml::from_str(content).context("Failed to parse TOML")?;

        for item in overrides {
            let (path, raw) = item
                .split_once('=')
                .with_context(|| format!("Override '{}' is not of the form key=value", item))?;
            let segments = parse_path(path)?;
            apply_override(&mut root, &segments, parse_value(raw)?)
                .with_context(|| format!("Failed to apply override: {}", item))?;
        }

        root.try_into().context("Failed to deserialize profile")
    }

    pub fn validate(&self) -> Result<()> {
        let job = &self.job;
        if job.name.trim().is_empty() {
            bail!("Job name cannot be empty");
        }
        if job.duration.is_zero() {
            bail!("Job duration must be > 0");
        }
        if job.clients == 0 {
            bail!("job.clients must be > 0");
        }
        if job.threads_per_client == 0 {
            bail!("job.threads_per_client must be > 0");
        }
        let interval = job.collection_interval;
        if interval.subsec_nanos() != 0 || interval.is_zero() {
            bail!("Collection interval must be a whole number of seconds, got {:?}", interval);
        }
        if interval.as_secs() > u32::MAX as u64 {
            bail!("Collection interval {:?} is too long", interval);
        }

        let workload = &self.workload;
        for (name, ratio) in
            [("error_ratio", workload.error_ratio), ("timeout_ratio", workload.timeout_ratio)]
        {
            if !(0.0..=1.0).contains(&ratio) {
                bail!("workload.{} must be within [0, 1], got {}", name, ratio);
            }
        }
        if workload.error_ratio + workload.timeout_ratio > 1.0 {
            bail!("workload.error_ratio + workload.timeout_ratio must not exceed 1");
        }
        if workload.mean_latency.is_zero() {
            bail!("workload.mean_latency must be > 0");
        }
        if !(workload.mean_response_size >= 0.0 && workload.mean_response_size.is_finite()) {
            bail!("workload.mean_response_size must be a non-negative number");
        }

        if let Some(realtime) = &self.realtime {
            if realtime.address.trim().is_empty() {
                bail!("realtime.address cannot be empty");
            }
            if realtime.report_interval.is_zero() {
                bail!("realtime.report_interval must be > 0");
            }
            if realtime.max_pending == Some(0) {
                bail!("realtime.max_pending must be > 0 when set");
            }
        }

        if let Some(persistence) = &self.persistence {
            if persistence.save_interval.is_zero() {
                bail!("persistence.save_interval must be > 0");
            }
        }

        Ok(())
    }

    pub fn collection_interval_secs(&self) -> u32 {
        self.job.collection_interval.as_secs().min(u32::MAX as u64) as u32
    }

    pub fn total_threads(&self) -> usize {
        self.job.clients * self.job.threads_per_client
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
    /// `+`: push onto an array
    Append,
}

fn parse_path(path: &str) -> Result<Vec<Segment>> {
    let segments: Vec<Segment> = path
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| match part {
            "+" => Segment::Append,
            _ => match part.parse::<usize>() {
                Ok(index) => Segment::Index(index),
                Err(_) => Segment::Key(part.to_string()),
            },
        })
        .collect();

    if segments.is_empty() {
        bail!("Empty override path '{}'", path);
    }
    if let Some(pos) = segments.iter().position(|s| *s == Segment::Append) {
        if pos != segments.len() - 1 {
            bail!("'+' may only appear at the end of '{}'", path);
        }
    }
    Ok(segments)
}

fn apply_override(node: &mut toml::Value, path: &[Segment], value: toml::Value) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return Ok(());
    };

    match (head, node) {
        (Segment::Key(key), toml::Value::Table(table)) => {
            let child = table
                .entry(key.clone())
                .or_insert_with(|| toml::Value::Table(Default::default()));
            apply_override(child, rest, value)
        }
        (Segment::Index(index), toml::Value::Array(items)) => {
            let len = items.len();
            let Some(child) = items.get_mut(*index) else {
                bail!("Array index {} out of bounds (length: {})", index, len);
            };
            apply_override(child, rest, value)
        }
        (Segment::Append, toml::Value::Array(items)) => {
            items.push(value);
            Ok(())
        }
        (Segment::Key(key), _) => bail!("Cannot set '{}' on a non-table value", key),
        (Segment::Index(index), _) => bail!("Cannot index [{}] into a non-array value", index),
        (Segment::Append, _) => bail!("Cannot append to a non-array value"),
    }
}

/// Interpret an override value as TOML, falling back to a bare string
fn parse_value(raw: &str) -> Result<toml::Value> {
    let trimmed = raw.trim();

    if let Ok(toml::Value::Table(mut table)) =
        toml::from_str::<toml::Value>(&format!("value = {}", trimmed))
    {
        if let Some(value) = table.remove("value") {
            return Ok(value);
        }
    }

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        bail!("Failed to parse '{}' as a TOML array or table", trimmed);
    }

    let unquoted = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(trimmed);
    Ok(toml::Value::String(unquoted.to_string()))
}
