//! Background reporter streaming closed intervals to a collector
//!
//! Producer threads only append to a pending buffer. A single sender thread
//! wakes every `report_interval`, swaps the buffer out in one critical
//! section and transmits it. Any transmission failure disables the reporter;
//! from then on every public method returns immediately without effect, so
//! a collector outage never blocks or fails the job itself.

use super::message::{response, Message, ReportKind, StatReport};
use crate::stats::TrackerId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tally_transport::{FrameTransport, TcpTransport};

/// Version string sent in the hello message
pub const CLIENT_VERSION: &str = concat!("tally/", env!("CARGO_PKG_VERSION"));

/// Collector port used when none is configured
pub const DEFAULT_COLLECTOR_PORT: u16 = 3003;

/// How long the sender waits for unsolicited collector frames between flushes
const DRAIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Connection and pacing settings for realtime reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeConfig {
    /// Collector address as `host:port`
    pub address: String,

    /// Identifies this client to the collector; filled in by the job when empty
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub auth_id: Option<String>,

    #[serde(default)]
    pub auth_password: Option<String>,

    #[serde(with = "humantime_serde", default = "default_report_interval")]
    pub report_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Upper bound on buffered data points; newest points are dropped beyond it
    #[serde(default)]
    pub max_pending: Option<usize>,
}

fn default_report_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::new(format!("127.0.0.1:{}", DEFAULT_COLLECTOR_PORT), String::new())
    }
}

impl RealtimeConfig {
    pub fn new(address: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            client_id: client_id.into(),
            auth_id: None,
            auth_password: None,
            report_interval: default_report_interval(),
            handshake_timeout: default_handshake_timeout(),
            connect_timeout: default_connect_timeout(),
            max_pending: None,
        }
    }
}

/// Observable reporter lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterState {
    /// Handshake done, sender thread not yet running
    Connected,
    /// Sender thread running
    Reporting,
    /// Stopped on request, on failure or on collector shutdown
    Stopped,
}

#[derive(Debug)]
enum Outbound {
    Register { job_id: String, tracker: TrackerId },
    Report { job_id: String, report: StatReport },
}

#[derive(Default)]
struct Pending {
    items: Vec<Outbound>,
    stop_requested: bool,
}

struct Shared {
    pending: Mutex<Pending>,
    wake: Condvar,
    stopped: AtomicBool,
    sending: AtomicBool,
    next_message_id: AtomicU32,
    report_interval: Duration,
    max_pending: Option<usize>,
    dropped: AtomicU64,
    drop_warned: AtomicBool,
}

impl Shared {
    fn next_id(&self) -> u32 {
        self.next_message_id.fetch_add(2, Ordering::Relaxed)
    }
}

/// Client side of the realtime statistics channel
///
/// Shared between trackers through an `Arc`. All enqueue methods take `&self`
/// and never touch the network.
pub struct RealtimeReporter {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeReporter {
    /// Connect over TCP and complete the hello handshake
    pub fn connect(config: &RealtimeConfig) -> Result<Self> {
        let addr = config
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("cannot resolve {}", config.address)))?;
        let transport = TcpTransport::connect(&addr, config.connect_timeout)?;
        tracing::info!("Connected to realtime collector at {}", addr);
        Self::with_transport(Box::new(transport), config)
    }

    /// Complete the hello handshake on an existing transport and start sending
    ///
    /// Fails when the collector rejects the hello, announces shutdown, or does
    /// not answer within `handshake_timeout`.
    pub fn with_transport(
        mut transport: Box<dyn FrameTransport>,
        config: &RealtimeConfig,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            wake: Condvar::new(),
            stopped: AtomicBool::new(false),
            sending: AtomicBool::new(false),
            next_message_id: AtomicU32::new(1),
            report_interval: config.report_interval,
            max_pending: config.max_pending,
            dropped: AtomicU64::new(0),
            drop_warned: AtomicBool::new(false),
        });

        if let Err(e) = handshake(&shared, transport.as_mut(), config) {
            let _ = transport.close();
            return Err(e);
        }

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("realtime-reporter".to_string())
            .spawn(move || sender_loop(worker_shared, transport))?;

        Ok(Self { shared, worker: Mutex::new(Some(worker)) })
    }

    pub fn state(&self) -> ReporterState {
        if self.shared.stopped.load(Ordering::Acquire) {
            ReporterState::Stopped
        } else if self.shared.sending.load(Ordering::Acquire) {
            ReporterState::Reporting
        } else {
            ReporterState::Connected
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Announce a tracker of `job_id` to the collector
    pub fn register_stat(&self, job_id: &str, tracker: &TrackerId) {
        self.enqueue(Outbound::Register {
            job_id: job_id.to_string(),
            tracker: tracker.clone(),
        });
    }

    /// Queue a value the collector sums across reporters
    pub fn report_add(&self, job_id: &str, tracker: &TrackerId, interval: usize, value: f64) {
        self.enqueue_report(job_id, tracker, interval, ReportKind::Add, Some(value));
    }

    /// Queue a value the collector averages across reporters
    pub fn report_average(&self, job_id: &str, tracker: &TrackerId, interval: usize, value: f64) {
        self.enqueue_report(job_id, tracker, interval, ReportKind::Average, Some(value));
    }

    /// Mark the end of `tracker`'s stream after `intervals` intervals
    pub fn done_reporting(&self, job_id: &str, tracker: &TrackerId, intervals: usize) {
        self.enqueue_report(job_id, tracker, intervals, ReportKind::Done, None);
    }

    /// Number of queued items not yet handed to the sender
    pub fn pending(&self) -> usize {
        self.shared.pending.lock().unwrap_or_else(PoisonError::into_inner).items.len()
    }

    /// Data points discarded because the pending buffer was full
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Ask the sender to flush what is queued and exit
    ///
    /// Returns immediately; later calls to any method are no-ops.
    pub fn stop_running(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop_requested = true;
        self.shared.wake.notify_all();
    }

    /// Stop and wait for the final flush to finish
    pub fn shutdown(&self) {
        self.stop_running();
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("Realtime reporter thread panicked");
            }
        }
    }

    fn enqueue_report(
        &self,
        job_id: &str,
        tracker: &TrackerId,
        interval: usize,
        kind: ReportKind,
        value: Option<f64>,
    ) {
        if self.is_stopped() {
            return;
        }
        self.enqueue(Outbound::Report {
            job_id: job_id.to_string(),
            report: StatReport {
                tracker: tracker.clone(),
                interval: interval.min(u32::MAX as usize) as u32,
                kind,
                value,
            },
        });
    }

    fn enqueue(&self, item: Outbound) {
        if self.is_stopped() {
            return;
        }

        let mut pending = self.shared.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(max) = self.shared.max_pending {
            if pending.items.len() >= max {
                drop(pending);
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.shared.drop_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "Realtime pending buffer full ({} items); dropping new data points",
                        max
                    );
                }
                return;
            }
        }
        pending.items.push(item);
    }
}

impl Drop for RealtimeReporter {
    fn drop(&mut self) {
        self.stop_running();
    }
}

fn handshake(
    shared: &Shared,
    transport: &mut dyn FrameTransport,
    config: &RealtimeConfig,
) -> Result<()> {
    let hello_id = shared.next_id();
    let hello = Message::ClientHello {
        message_id: hello_id,
        client_version: CLIENT_VERSION.to_string(),
        client_id: config.client_id.clone(),
        auth_id: config.auth_id.clone(),
        auth_password: config.auth_password.clone(),
        realtime_only: true,
    };
    transport.send_frame(&hello.encode()?)?;

    let deadline = Instant::now() + config.handshake_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Protocol(format!(
                "no hello response within {:?}",
                config.handshake_timeout
            )));
        }

        let Some(frame) = transport.try_recv_frame(remaining)? else {
            continue;
        };

        match Message::decode(&frame)? {
            Message::HelloResponse { message_id, code, message } if message_id == hello_id => {
                if code == response::SUCCESS {
                    return Ok(());
                }
                return Err(Error::Protocol(format!(
                    "collector rejected hello with code {}: {}",
                    code,
                    message.unwrap_or_default()
                )));
            }
            Message::ServerShutdown { .. } => {
                return Err(Error::Protocol("collector is shutting down".to_string()));
            }
            other => {
                tracing::debug!("Ignoring {} while waiting for hello response", other.name());
            }
        }
    }
}

fn sender_loop(shared: Arc<Shared>, mut transport: Box<dyn FrameTransport>) {
    shared.sending.store(true, Ordering::Release);

    loop {
        let (batch, stopping) = {
            let mut pending = shared.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if !pending.stop_requested {
                pending = shared
                    .wake
                    .wait_timeout(pending, shared.report_interval)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            (std::mem::take(&mut pending.items), pending.stop_requested)
        };

        if !batch.is_empty() {
            if let Err(e) = send_batch(&shared, transport.as_mut(), batch) {
                tracing::warn!("Realtime reporting disabled after send failure: {}", e);
                break;
            }
        }

        if stopping {
            break;
        }

        match drain_incoming(transport.as_mut()) {
            Ok(false) => {}
            Ok(true) => {
                tracing::info!("Collector announced shutdown; realtime reporting stopped");
                break;
            }
            Err(e) => {
                tracing::warn!("Realtime reporting disabled: {}", e);
                break;
            }
        }
    }

    shared.stopped.store(true, Ordering::Release);
    shared.sending.store(false, Ordering::Release);
    if let Err(e) = transport.close() {
        tracing::debug!("Error closing realtime transport: {}", e);
    }
}

/// Send registrations one by one and runs of same-job reports as one batch
fn send_batch(shared: &Shared, transport: &mut dyn FrameTransport, batch: Vec<Outbound>) -> Result<()> {
    let mut run: Option<(String, Vec<StatReport>)> = None;

    for item in batch {
        match item {
            Outbound::Register { job_id, tracker } => {
                flush_run(shared, transport, run.take())?;
                let message = Message::RegisterStatistic {
                    message_id: shared.next_id(),
                    job_id,
                    tracker,
                };
                transport.send_frame(&message.encode()?)?;
            }
            Outbound::Report { job_id, report } => match &mut run {
                Some((run_job, reports)) if *run_job == job_id => reports.push(report),
                _ => {
                    flush_run(shared, transport, run.take())?;
                    run = Some((job_id, vec![report]));
                }
            },
        }
    }

    flush_run(shared, transport, run)
}

fn flush_run(
    shared: &Shared,
    transport: &mut dyn FrameTransport,
    run: Option<(String, Vec<StatReport>)>,
) -> Result<()> {
    let Some((job_id, reports)) = run else {
        return Ok(());
    };
    tracing::trace!("Sending {} realtime data points for job {}", reports.len(), job_id);
    let message = Message::ReportStatistic {
        message_id: shared.next_id(),
        job_id,
        reports,
    };
    transport.send_frame(&message.encode()?)?;
    Ok(())
}

/// Read frames the collector sent unprompted; true on shutdown notice
fn drain_incoming(transport: &mut dyn FrameTransport) -> Result<bool> {
    while let Some(frame) = transport.try_recv_frame(DRAIN_TIMEOUT)? {
        match Message::decode(&frame) {
            Ok(Message::ServerShutdown { .. }) => return Ok(true),
            Ok(other) => tracing::debug!("Ignoring unexpected {} from collector", other.name()),
            Err(e) => tracing::warn!("Undecodable frame from collector: {}", e),
        }
    }
    Ok(false)
}
