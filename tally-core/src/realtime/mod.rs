//! Realtime statistics channel between load-generating clients and a collector

pub mod message;
pub mod reporter;

pub use message::{response, Message, ReportKind, StatReport};
pub use reporter::{
    RealtimeConfig, RealtimeReporter, ReporterState, CLIENT_VERSION,
    DEFAULT_COLLECTOR_PORT,
};
