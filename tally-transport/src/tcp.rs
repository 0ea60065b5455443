//! Blocking TCP transport with buffered, timeout-bounded frame reads

use crate::frame::{encode_frame, FrameBuffer};
use crate::{Error, FrameTransport, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// Default bound on a single blocking write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    frames: FrameBuffer,
    recv_buffer: Vec<u8>,
}

impl TcpTransport {
    /// Connect to `target`, giving up after `connect_timeout`
    pub fn connect(target: &SocketAddr, connect_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(target, connect_timeout)
            .map_err(|e| Error::Connection(format!("Unable to connect to {target}: {e}")))?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(DEFAULT_WRITE_TIMEOUT))?;

        tracing::debug!("Connected to collector at {}", target);
        Ok(Self::from_stream(stream, *target))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            peer,
            frames: FrameBuffer::new(),
            recv_buffer: vec![0u8; 8192], // 8KB buffer
        }
    }

    /// Address of the remote peer
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| Error::Connection("Not connected".to_string()))
    }
}

impl FrameTransport for TcpTransport {
    fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload)?;
        let stream = self.stream_mut()?;
        stream.write_all(&frame)?;
        stream.flush()?;
        Ok(())
    }

    fn try_recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(frame) = self.frames.next_frame()? {
                return Ok(Some(frame));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let stream = self.stream.as_mut().ok_or_else(|| {
                Error::Connection("Not connected".to_string())
            })?;
            // A zero read timeout is rejected by the OS
            stream.set_read_timeout(Some(remaining.max(Duration::from_millis(1))))?;

            match stream.read(&mut self.recv_buffer) {
                Ok(0) => {
                    return Err(Error::Connection(format!(
                        "Connection closed by peer {}",
                        self.peer
                    )));
                }
                Ok(n) => self.frames.extend(&self.recv_buffer[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotConnected => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn test_send_and_receive_frames() {
        let (listener, addr) = listener();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut header = [0u8; 4];
            socket.read_exact(&mut header).unwrap();
            let len = u32::from_be_bytes(header) as usize;
            let mut payload = vec![0u8; len];
            socket.read_exact(&mut payload).unwrap();

            // Echo back in two pieces to exercise partial reads
            let frame = encode_frame(&payload).unwrap();
            socket.write_all(&frame[..2]).unwrap();
            socket.flush().unwrap();
            thread::sleep(Duration::from_millis(20));
            socket.write_all(&frame[2..]).unwrap();
        });

        let mut transport = TcpTransport::connect(&addr, Duration::from_secs(2)).unwrap();
        transport.send_frame(b"ping").unwrap();

        let reply = transport.try_recv_frame(Duration::from_secs(2)).unwrap();
        assert_eq!(reply.as_deref(), Some(&b"ping"[..]));

        server.join().unwrap();
    }

    #[test]
    fn test_recv_times_out_without_data() {
        let (listener, addr) = listener();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(200));
            drop(socket);
        });

        let mut transport = TcpTransport::connect(&addr, Duration::from_secs(2)).unwrap();
        let start = Instant::now();
        let frame = transport.try_recv_frame(Duration::from_millis(50)).unwrap();
        assert!(frame.is_none());
        assert!(start.elapsed() < Duration::from_millis(180));

        server.join().unwrap();
    }

    #[test]
    fn test_peer_close_is_connection_error() {
        let (listener, addr) = listener();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            drop(socket);
        });

        let mut transport = TcpTransport::connect(&addr, Duration::from_secs(2)).unwrap();
        server.join().unwrap();

        let result = transport.try_recv_frame(Duration::from_secs(2));
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[test]
    fn test_send_after_close_fails() {
        let (listener, addr) = listener();
        let server = thread::spawn(move || {
            let _ = listener.accept().unwrap();
        });

        let mut transport = TcpTransport::connect(&addr, Duration::from_secs(2)).unwrap();
        transport.close().unwrap();
        assert!(matches!(transport.send_frame(b"x"), Err(Error::Connection(_))));
        server.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let (listener, addr) = listener();
        drop(listener);
        let result = TcpTransport::connect(&addr, Duration::from_millis(500));
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
