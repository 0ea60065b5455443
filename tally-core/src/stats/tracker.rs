//! Tracker identity, lifecycle and the closed set of tracker kinds

use super::categorical::CategoricalTracker;
use super::counter::CounterTracker;
use super::duration::DurationTracker;
use super::interval::IntervalSeries;
use super::stacked::StackedTracker;
use super::value::ValueTracker;
use crate::persistence::{PersistenceSink, SnapshotHandle};
use crate::realtime::{RealtimeReporter, ReportKind};
use crate::{Error, Result};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Collection interval used when none (or zero) is configured
pub const DEFAULT_COLLECTION_INTERVAL_SECS: u32 = 60;

/// Who produced a tracker's data
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerId {
    pub client_id: String,
    pub thread_id: String,
    pub display_name: String,
}

impl TrackerId {
    pub fn new(
        client_id: impl Into<String>,
        thread_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            thread_id: thread_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// The five tracker kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerKind {
    Counter,
    Duration,
    Value,
    Categorical,
    Stacked,
}

impl TrackerKind {
    pub const ALL: [TrackerKind; 5] = [
        TrackerKind::Counter,
        TrackerKind::Duration,
        TrackerKind::Value,
        TrackerKind::Categorical,
        TrackerKind::Stacked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerKind::Counter => "counter",
            TrackerKind::Duration => "duration",
            TrackerKind::Value => "value",
            TrackerKind::Categorical => "categorical",
            TrackerKind::Stacked => "stacked",
        }
    }

    /// Whether trackers of this kind expose a comparable summary value
    pub fn is_searchable(&self) -> bool {
        matches!(self, TrackerKind::Counter | TrackerKind::Duration | TrackerKind::Value)
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TrackerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::Other(format!("Unknown tracker kind: {}", s)))
    }
}

/// Lifecycle of a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Created, not yet started
    Idle,
    /// Accepting observations
    Running,
    /// Stopped, decoded or aggregated; read-only
    Stopped,
}

/// Boolean display hints carried alongside tracker data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayOptions {
    pub stacked: bool,
    pub legend: bool,
    pub horizontal_grid: bool,
    pub vertical_grid: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            stacked: false,
            legend: false,
            horizontal_grid: true,
            vertical_grid: true,
        }
    }
}

/// Identity, configuration and lifecycle state shared by every tracker kind
#[derive(Debug, Clone)]
pub struct TrackerInfo {
    pub(crate) id: TrackerId,
    pub(crate) collection_interval_secs: u32,
    pub(crate) state: TrackerState,
    pub(crate) start_time: Option<SystemTime>,
    pub(crate) stop_time: Option<SystemTime>,
    pub(crate) duration_secs: u64,
}

impl TrackerInfo {
    pub(crate) fn new(id: TrackerId, collection_interval_secs: u32) -> Self {
        let collection_interval_secs = if collection_interval_secs == 0 {
            DEFAULT_COLLECTION_INTERVAL_SECS
        } else {
            collection_interval_secs
        };

        Self {
            id,
            collection_interval_secs,
            state: TrackerState::Idle,
            start_time: None,
            stop_time: None,
            duration_secs: 0,
        }
    }

    pub fn id(&self) -> &TrackerId {
        &self.id
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub(crate) fn interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs as u64)
    }
}

/// Read-only view common to every tracker kind
pub trait Tracker {
    fn info(&self) -> &TrackerInfo;

    fn kind(&self) -> TrackerKind;

    /// Number of closed intervals
    fn num_intervals(&self) -> usize;

    /// One-line human readable summary
    fn summary_string(&self) -> String;

    /// Scalar used for threshold searches; 0 for kinds that are not searchable
    fn summary_value(&self) -> f64 {
        0.0
    }

    fn display_options(&self) -> DisplayOptions {
        DisplayOptions::default()
    }

    fn is_searchable(&self) -> bool {
        self.kind().is_searchable()
    }

    fn is_at_least(&self, threshold: f64) -> bool {
        self.is_searchable() && self.summary_value() >= threshold
    }

    fn is_at_most(&self, threshold: f64) -> bool {
        self.is_searchable() && self.summary_value() <= threshold
    }

    fn id(&self) -> &TrackerId {
        &self.info().id
    }

    fn client_id(&self) -> &str {
        &self.info().id.client_id
    }

    fn thread_id(&self) -> &str {
        &self.info().id.thread_id
    }

    fn display_name(&self) -> &str {
        &self.info().id.display_name
    }

    fn collection_interval_secs(&self) -> u32 {
        self.info().collection_interval_secs
    }

    /// `num_intervals * collection_interval`, fixed at stop time
    fn duration_secs(&self) -> u64 {
        self.info().duration_secs
    }

    fn start_time(&self) -> Option<SystemTime> {
        self.info().start_time
    }

    fn stop_time(&self) -> Option<SystemTime> {
        self.info().stop_time
    }

    fn has_been_started(&self) -> bool {
        self.info().state != TrackerState::Idle || self.info().start_time.is_some()
    }

    fn is_running(&self) -> bool {
        self.info().state == TrackerState::Running
    }
}

/// Realtime reporting target of a running tracker
#[derive(Clone)]
pub(crate) struct RealtimeLink {
    pub(crate) reporter: Arc<RealtimeReporter>,
    pub(crate) job_id: String,
}

/// Outbound connections of a live tracker
///
/// Cloning yields an unlinked value: snapshots, decoded copies and
/// aggregated views never report or persist on their own.
#[derive(Default)]
pub(crate) struct Links {
    pub(crate) realtime: Option<RealtimeLink>,
    pub(crate) snapshot: Option<SnapshotHandle>,
}

impl Clone for Links {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for Links {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("realtime", &self.realtime.as_ref().map(|l| l.job_id.as_str()))
            .field("snapshot", &self.snapshot.is_some())
            .finish()
    }
}

/// State every variant wraps: info, the bucket series and outbound links
#[derive(Debug, Clone)]
pub(crate) struct TrackerCore<P> {
    pub(crate) info: TrackerInfo,
    pub(crate) series: IntervalSeries<P>,
    pub(crate) links: Links,
}

impl<P: Clone + Default> TrackerCore<P> {
    pub(crate) fn new(id: TrackerId, collection_interval_secs: u32) -> Self {
        let info = TrackerInfo::new(id, collection_interval_secs);
        let series = IntervalSeries::new(info.interval());
        Self { info, series, links: Links::default() }
    }

    /// Rebuild a stopped tracker from decoded or merged buckets
    pub(crate) fn restore(mut info: TrackerInfo, history: Vec<P>) -> Self {
        info.state = TrackerState::Stopped;
        let series = IntervalSeries::from_history(info.interval(), history);
        Self { info, series, links: Links::default() }
    }

    pub(crate) fn history(&self) -> &[P] {
        self.series.history()
    }

    fn begin(&mut self, now: Instant) {
        if self.info.state != TrackerState::Idle {
            tracing::warn!(
                "Tracker '{}' started more than once; discarding collected data",
                self.info.id.display_name
            );
        }

        self.series.start(now);
        self.info.state = TrackerState::Running;
        self.info.start_time = Some(SystemTime::now());
        self.info.stop_time = None;
        self.info.duration_secs = 0;
    }

    fn observe<F>(&mut self, now: Instant, update: F) -> Option<Range<usize>>
    where
        F: FnOnce(&mut P),
    {
        match self.info.state {
            TrackerState::Running => Some(self.series.record(now, update)),
            TrackerState::Idle => {
                tracing::warn!(
                    "Observation on tracker '{}' before start; ignoring",
                    self.info.id.display_name
                );
                None
            }
            TrackerState::Stopped => {
                tracing::warn!(
                    "Observation on tracker '{}' after stop; ignoring",
                    self.info.id.display_name
                );
                None
            }
        }
    }

    fn end(&mut self, now: Instant) -> Option<Range<usize>> {
        if self.info.state != TrackerState::Running {
            tracing::warn!(
                "Stop requested for tracker '{}' which is not running; ignoring",
                self.info.id.display_name
            );
            return None;
        }

        let closed = self.series.finalize(now);
        let intervals = self.series.len() as u64;
        self.info.state = TrackerState::Stopped;
        self.info.duration_secs = intervals * self.info.collection_interval_secs as u64;
        self.info.stop_time = self
            .info
            .start_time
            .map(|start| start + Duration::from_secs(self.info.duration_secs));
        Some(closed)
    }
}

/// Hooks the shared lifecycle functions need from each variant
pub(crate) trait Variant: Clone + Into<StatTracker> {
    type Payload: Clone + Default;

    fn core(&self) -> &TrackerCore<Self::Payload>;

    fn core_mut(&mut self) -> &mut TrackerCore<Self::Payload>;

    /// Value streamed to the collector when a bucket closes
    fn realtime_sample(&self, _bucket: &Self::Payload) -> Option<(ReportKind, f64)> {
        None
    }

    /// Reset variant-specific state on (re)start
    fn reset_extras(&mut self) {}
}

pub(crate) fn start_tracker<V: Variant>(
    tracker: &mut V,
    now: Instant,
    sink: Option<&dyn PersistenceSink>,
) {
    tracker.reset_extras();
    tracker.core_mut().begin(now);

    let core = tracker.core();
    if let Some(link) = &core.links.realtime {
        link.reporter.register_stat(&link.job_id, &core.info.id);
    }

    if let Some(sink) = sink {
        let handle = SnapshotHandle::new(tracker.clone().into());
        tracker.core_mut().links.snapshot = Some(handle.clone());
        sink.register(handle);
    }
}

/// Apply one observation; returns false when the tracker is not running
pub(crate) fn observe<V, F>(tracker: &mut V, now: Instant, update: F) -> bool
where
    V: Variant,
    F: FnOnce(&mut V::Payload),
{
    match tracker.core_mut().observe(now, update) {
        Some(closed) => {
            publish_closed(tracker, closed);
            true
        }
        None => false,
    }
}

pub(crate) fn stop_tracker<V: Variant>(tracker: &mut V, now: Instant) {
    let Some(closed) = tracker.core_mut().end(now) else {
        return;
    };

    publish_closed(tracker, closed);

    let core = tracker.core();
    if let Some(link) = &core.links.realtime {
        link.reporter
            .done_reporting(&link.job_id, &core.info.id, core.series.len());
    }
}

pub(crate) fn enable_realtime<V: Variant>(
    tracker: &mut V,
    reporter: Arc<RealtimeReporter>,
    job_id: &str,
) {
    tracker.core_mut().links.realtime = Some(RealtimeLink {
        reporter,
        job_id: job_id.to_string(),
    });
}

fn publish_closed<V: Variant>(tracker: &V, closed: Range<usize>) {
    if closed.is_empty() {
        return;
    }

    let core = tracker.core();
    if let Some(link) = &core.links.realtime {
        for index in closed {
            let sample = core.history().get(index).and_then(|b| tracker.realtime_sample(b));
            match sample {
                Some((ReportKind::Add, value)) => {
                    link.reporter.report_add(&link.job_id, &core.info.id, index, value)
                }
                Some((ReportKind::Average, value)) => {
                    link.reporter.report_average(&link.job_id, &core.info.id, index, value)
                }
                Some((ReportKind::Done, _)) | None => {}
            }
        }
    }

    if let Some(handle) = &core.links.snapshot {
        handle.update(tracker.clone().into());
    }
}

/// Any tracker, as a closed sum over the five kinds
#[derive(Debug, Clone)]
pub enum StatTracker {
    Counter(CounterTracker),
    Duration(DurationTracker),
    Value(ValueTracker),
    Categorical(CategoricalTracker),
    Stacked(StackedTracker),
}

impl StatTracker {
    /// Create an idle tracker of the given kind
    ///
    /// Stacked trackers created this way have no series; use
    /// [`StackedTracker::new`] to name them.
    pub fn new(kind: TrackerKind, id: TrackerId, collection_interval_secs: u32) -> Self {
        match kind {
            TrackerKind::Counter => CounterTracker::new(id, collection_interval_secs).into(),
            TrackerKind::Duration => DurationTracker::new(id, collection_interval_secs).into(),
            TrackerKind::Value => ValueTracker::new(id, collection_interval_secs).into(),
            TrackerKind::Categorical => {
                CategoricalTracker::new(id, collection_interval_secs).into()
            }
            TrackerKind::Stacked => {
                StackedTracker::new(id, collection_interval_secs, Vec::<String>::new()).into()
            }
        }
    }

    pub fn as_tracker(&self) -> &dyn Tracker {
        match self {
            StatTracker::Counter(t) => t,
            StatTracker::Duration(t) => t,
            StatTracker::Value(t) => t,
            StatTracker::Categorical(t) => t,
            StatTracker::Stacked(t) => t,
        }
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now(), None);
    }

    pub fn start_with(&mut self, sink: Option<&dyn PersistenceSink>) {
        self.start_at(Instant::now(), sink);
    }

    pub fn start_at(&mut self, now: Instant, sink: Option<&dyn PersistenceSink>) {
        match self {
            StatTracker::Counter(t) => t.start_at(now, sink),
            StatTracker::Duration(t) => t.start_at(now, sink),
            StatTracker::Value(t) => t.start_at(now, sink),
            StatTracker::Categorical(t) => t.start_at(now, sink),
            StatTracker::Stacked(t) => t.start_at(now, sink),
        }
    }

    pub fn stop(&mut self) {
        self.stop_at(Instant::now());
    }

    pub fn stop_at(&mut self, now: Instant) {
        match self {
            StatTracker::Counter(t) => t.stop_at(now),
            StatTracker::Duration(t) => t.stop_at(now),
            StatTracker::Value(t) => t.stop_at(now),
            StatTracker::Categorical(t) => t.stop_at(now),
            StatTracker::Stacked(t) => t.stop_at(now),
        }
    }

    /// Stream closed intervals of this tracker to `reporter` under `job_id`
    pub fn enable_realtime(&mut self, reporter: Arc<RealtimeReporter>, job_id: &str) {
        match self {
            StatTracker::Counter(t) => t.enable_realtime(reporter, job_id),
            StatTracker::Duration(t) => t.enable_realtime(reporter, job_id),
            StatTracker::Value(t) => t.enable_realtime(reporter, job_id),
            StatTracker::Categorical(t) => t.enable_realtime(reporter, job_id),
            StatTracker::Stacked(t) => t.enable_realtime(reporter, job_id),
        }
    }

    pub fn as_counter(&self) -> Option<&CounterTracker> {
        match self {
            StatTracker::Counter(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<&DurationTracker> {
        match self {
            StatTracker::Duration(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&ValueTracker> {
        match self {
            StatTracker::Value(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&CategoricalTracker> {
        match self {
            StatTracker::Categorical(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_stacked(&self) -> Option<&StackedTracker> {
        match self {
            StatTracker::Stacked(t) => Some(t),
            _ => None,
        }
    }

    /// Mutable counterparts of the accessors above, for workers that
    /// keep a heterogeneous tracker list
    pub fn as_counter_mut(&mut self) -> Option<&mut CounterTracker> {
        match self {
            StatTracker::Counter(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_duration_mut(&mut self) -> Option<&mut DurationTracker> {
        match self {
            StatTracker::Duration(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_value_mut(&mut self) -> Option<&mut ValueTracker> {
        match self {
            StatTracker::Value(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_categorical_mut(&mut self) -> Option<&mut CategoricalTracker> {
        match self {
            StatTracker::Categorical(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_stacked_mut(&mut self) -> Option<&mut StackedTracker> {
        match self {
            StatTracker::Stacked(t) => Some(t),
            _ => None,
        }
    }
}

impl Tracker for StatTracker {
    fn info(&self) -> &TrackerInfo {
        self.as_tracker().info()
    }

    fn kind(&self) -> TrackerKind {
        self.as_tracker().kind()
    }

    fn num_intervals(&self) -> usize {
        self.as_tracker().num_intervals()
    }

    fn summary_string(&self) -> String {
        self.as_tracker().summary_string()
    }

    fn summary_value(&self) -> f64 {
        self.as_tracker().summary_value()
    }

    fn display_options(&self) -> DisplayOptions {
        self.as_tracker().display_options()
    }
}

impl From<CounterTracker> for StatTracker {
    fn from(t: CounterTracker) -> Self {
        StatTracker::Counter(t)
    }
}

impl From<DurationTracker> for StatTracker {
    fn from(t: DurationTracker) -> Self {
        StatTracker::Duration(t)
    }
}

impl From<ValueTracker> for StatTracker {
    fn from(t: ValueTracker) -> Self {
        StatTracker::Value(t)
    }
}

impl From<CategoricalTracker> for StatTracker {
    fn from(t: CategoricalTracker) -> Self {
        StatTracker::Categorical(t)
    }
}

impl From<StackedTracker> for StatTracker {
    fn from(t: StackedTracker) -> Self {
        StatTracker::Stacked(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> TrackerId {
        TrackerId::new("client-1", "thread-0", "Ops")
    }

    #[test]
    fn test_kind_names_parse_back() {
        for kind in TrackerKind::ALL {
            assert_eq!(kind.as_str().parse::<TrackerKind>().unwrap(), kind);
        }
        assert!("histogram".parse::<TrackerKind>().is_err());
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let tracker = StatTracker::new(TrackerKind::Counter, id(), 0);
        assert_eq!(tracker.collection_interval_secs(), DEFAULT_COLLECTION_INTERVAL_SECS);
    }

    #[test]
    fn test_searchability_by_kind() {
        for kind in TrackerKind::ALL {
            let tracker = StatTracker::new(kind, id(), 10);
            assert_eq!(tracker.kind(), kind);
            assert_eq!(tracker.is_searchable(), kind.is_searchable());
        }

        let categorical = StatTracker::new(TrackerKind::Categorical, id(), 10);
        assert!(!categorical.is_at_least(0.0));
        assert!(!categorical.is_at_most(0.0));
        assert_eq!(categorical.summary_value(), 0.0);
    }

    #[test]
    fn test_lifecycle_states() {
        let base = Instant::now();
        let mut tracker = StatTracker::new(TrackerKind::Counter, id(), 10);
        assert!(!tracker.has_been_started());
        assert_eq!(tracker.info().state(), TrackerState::Idle);

        // stop without start is a warning, not a transition
        tracker.stop_at(base);
        assert_eq!(tracker.info().state(), TrackerState::Idle);

        tracker.start_at(base, None);
        assert!(tracker.is_running());

        tracker.stop_at(base + Duration::from_secs(25));
        assert!(!tracker.is_running());
        assert!(tracker.has_been_started());
        assert_eq!(tracker.num_intervals(), 3);
        assert_eq!(tracker.duration_secs(), 30);

        let start = tracker.start_time().unwrap();
        assert_eq!(tracker.stop_time().unwrap(), start + Duration::from_secs(30));

        tracker.stop_at(base + Duration::from_secs(90));
        assert_eq!(tracker.num_intervals(), 3);
    }

    #[test]
    fn test_restart_discards_history() {
        let base = Instant::now();
        let mut tracker = CounterTracker::new(id(), 10);
        tracker.start_at(base, None);
        tracker.increment_at(base + Duration::from_secs(12));
        tracker.start_at(base + Duration::from_secs(20), None);
        tracker.stop_at(base + Duration::from_secs(21));
        assert_eq!(tracker.interval_counts(), vec![0]);
    }

    #[test]
    fn test_clone_drops_links() {
        let links = Links {
            realtime: None,
            snapshot: Some(SnapshotHandle::new(StatTracker::new(TrackerKind::Counter, id(), 10))),
        };
        assert!(links.clone().snapshot.is_none());
    }
}
