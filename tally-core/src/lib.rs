//! Tally Core Library
//!
//! Interval-bucketed statistics for load-generation clients: the tracker
//! kinds and their rollover engine, cross-tracker aggregation, the binary
//! tracker encoding, on-disk snapshots of running trackers, and the realtime
//! reporter that streams closed intervals to a collector.

pub mod error;
pub mod persistence;
pub mod realtime;
pub mod stats;
pub mod threading;
pub mod timing;

mod encoding;

pub use error::{DecodeError, Error, Result};
pub use tally_transport::{FrameTransport, TcpTransport};
