//! Tally CLI library
//!
//! Profile configuration, the synthetic load job and report output, exposed
//! for integration tests.

pub mod config;
pub mod output;
pub mod workload;
