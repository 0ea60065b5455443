//! Tally Transport Layer
//!
//! Framed, blocking transport used by the realtime statistics reporter to push
//! interval results to a collector.
//!
//! ## Framing
//!
//! Every message travels as a single frame: a 4-byte big-endian payload length
//! followed by the payload bytes. Payloads larger than [`MAX_FRAME_SIZE`] are
//! rejected on both ends.
//!
//! ## Transport API
//!
//! The reporter only depends on the [`FrameTransport`] trait, so tests and
//! alternative sockets can be plugged in without touching the reporter.
//!
//! ```rust,no_run
//! use tally_transport::{FrameTransport, TcpTransport};
//! use std::time::Duration;
//!
//! let addr = "127.0.0.1:3003".parse().unwrap();
//! let mut transport = TcpTransport::connect(&addr, Duration::from_secs(5)).unwrap();
//! transport.send_frame(b"hello").unwrap();
//!
//! if let Some(frame) = transport.try_recv_frame(Duration::from_millis(100)).unwrap() {
//!     println!("received {} bytes", frame.len());
//! }
//! ```

use std::fmt;
use std::time::Duration;

pub mod frame;
pub mod tcp;

pub use frame::{decode_frame, encode_frame, FrameBuffer, MAX_FRAME_SIZE};
pub use tcp::TcpTransport;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport layer error types
#[derive(Debug)]
pub enum Error {
    /// I/O errors from the underlying socket
    Io(std::io::Error),

    /// Connection errors
    Connection(String),

    /// Framing errors (oversized or corrupt frames)
    Frame(String),

    /// Other errors
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Connection(msg) => write!(f, "Connection error: {msg}"),
            Error::Frame(msg) => write!(f, "Framing error: {msg}"),
            Error::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// Frame-oriented transport trait
///
/// All methods are blocking. Implementations must keep partial reads buffered
/// so that a timed-out [`try_recv_frame`](FrameTransport::try_recv_frame)
/// never loses framing alignment.
pub trait FrameTransport: Send {
    /// Send one complete frame
    fn send_frame(&mut self, payload: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for one complete frame
    ///
    /// Returns `Ok(None)` if no complete frame arrived in time. A peer that
    /// closed the connection is reported as [`Error::Connection`].
    fn try_recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Close the transport
    fn close(&mut self) -> Result<()>;
}

impl<T: FrameTransport + ?Sized> FrameTransport for Box<T> {
    fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        (**self).send_frame(payload)
    }

    fn try_recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        (**self).try_recv_frame(timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
