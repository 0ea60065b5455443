//! Interval-bucketed statistics trackers
//!
//! Every tracker kind wraps the same [`IntervalSeries`] rollover engine and
//! differs only in its bucket payload and merge rule. [`StatTracker`] is the
//! closed sum over the five kinds used for aggregation, encoding and
//! persistence.

pub mod aggregate;
pub mod analysis;
pub mod categorical;
pub mod codec;
pub mod counter;
pub mod duration;
pub mod interval;
pub mod stacked;
pub mod tracker;
pub mod value;

pub use aggregate::{aggregate_by_name, aggregate_per_client};
pub use categorical::CategoricalTracker;
pub use codec::{decode_tracker, decode_trackers, encode_tracker, encode_trackers};
pub use counter::CounterTracker;
pub use duration::{DurationBucket, DurationTracker};
pub use interval::IntervalSeries;
pub use stacked::{StackedBucket, StackedTracker};
pub use tracker::{
    DisplayOptions, StatTracker, Tracker, TrackerId, TrackerInfo, TrackerKind, TrackerState,
    DEFAULT_COLLECTION_INTERVAL_SECS,
};
pub use value::{ValueBucket, ValueTracker};
