use std::fmt;

/// Result type alias for tally core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tally core operations
#[derive(Debug)]
pub enum Error {
    /// I/O errors (persistence, encoding buffers)
    Io(std::io::Error),

    /// Transport errors from the realtime channel
    Transport(tally_transport::Error),

    /// Malformed or truncated serialized data
    Decode(DecodeError),

    /// Trackers that cannot be merged (kind, interval or series mismatch)
    Aggregate(String),

    /// Realtime protocol violations (bad handshake, unexpected messages)
    Protocol(String),

    /// Configuration errors
    Config(String),

    /// Other errors
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Transport(e) => write!(f, "Transport error: {e}"),
            Error::Decode(e) => write!(f, "Decode error: {e}"),
            Error::Aggregate(msg) => write!(f, "Aggregation error: {msg}"),
            Error::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
            Error::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Transport(e) => Some(e),
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<tally_transport::Error> for Error {
    fn from(err: tally_transport::Error) -> Self {
        Error::Transport(err)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}

impl From<rmp::encode::ValueWriteError<std::io::Error>> for Error {
    fn from(err: rmp::encode::ValueWriteError<std::io::Error>) -> Self {
        match err {
            rmp::encode::ValueWriteError::InvalidMarkerWrite(e)
            | rmp::encode::ValueWriteError::InvalidDataWrite(e) => Error::Io(e),
        }
    }
}

/// Failure to decode serialized tracker or message bytes
///
/// Carries a short description of what was being decoded and, when
/// available, the underlying cause.
#[derive(Debug)]
pub struct DecodeError {
    context: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl DecodeError {
    pub fn new(context: impl Into<String>) -> Self {
        Self { context: context.into(), source: None }
    }

    pub fn with_source<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self { context: context.into(), source: Some(Box::new(source)) }
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.context, source),
            None => write!(f, "{}", self.context),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}
