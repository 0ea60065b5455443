//! Tally Collector
//!
//! Server side of the realtime statistics channel. Reporters connect, say
//! hello, register their trackers and then stream closed intervals, which are
//! reduced across reporters into one table per job statistic.
//!
//! Framing: every message is a 4-byte big-endian length followed by a
//! MessagePack payload.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tally_core::realtime::{response, Message, DEFAULT_COLLECTOR_PORT};
use tally_transport::{encode_frame, MAX_FRAME_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod table;

use table::StatTable;

#[derive(Parser, Debug)]
#[command(name = "tally-collector")]
#[command(version, about = "Realtime statistics collector for tally reporters")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_COLLECTOR_PORT)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Require this auth id in client hellos
    #[arg(long, requires = "auth_password")]
    auth_id: Option<String>,

    /// Password matching --auth-id
    #[arg(long, requires = "auth_id")]
    auth_password: Option<String>,

    /// Intervals retained per statistic
    #[arg(long, default_value_t = 1000)]
    max_intervals: usize,

    /// How often to log per-job summaries (e.g. 30s, 1m)
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    summary_interval: Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Debug, Clone)]
struct Credentials {
    auth_id: String,
    password: String,
}

/// State shared by every connection
struct Collector {
    table: Mutex<StatTable>,
    credentials: Option<Credentials>,
    /// Collector-originated ids are even so they never collide with reporter ids
    next_message_id: AtomicU32,
}

impl Collector {
    fn new(max_intervals: usize, credentials: Option<Credentials>) -> Self {
        Self {
            table: Mutex::new(StatTable::new(max_intervals)),
            credentials,
            next_message_id: AtomicU32::new(2),
        }
    }

    fn next_id(&self) -> u32 {
        self.next_message_id.fetch_add(2, Ordering::Relaxed)
    }

    fn table(&self) -> std::sync::MutexGuard<'_, StatTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Response code and message for a hello
    fn authenticate(&self, auth_id: Option<&str>, password: Option<&str>) -> (u32, Option<String>) {
        let Some(expected) = &self.credentials else {
            return (response::SUCCESS, None);
        };
        if auth_id != Some(expected.auth_id.as_str()) {
            return (response::UNKNOWN_AUTH_ID, Some("unknown auth id".to_string()));
        }
        if password != Some(expected.password.as_str()) {
            return (response::INVALID_CREDENTIALS, Some("invalid credentials".to_string()));
        }
        (response::SUCCESS, None)
    }

    fn log_summaries(&self) {
        let table = self.table();
        if table.is_empty() {
            tracing::debug!("No statistics received yet");
            return;
        }
        for summary in table.summaries() {
            tracing::info!("{}", summary);
        }
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_SIZE {
        bail!("frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_SIZE);
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

async fn write_message(writer: &mut OwnedWriteHalf, message: &Message) -> Result<()> {
    let frame = encode_frame(&message.encode()?)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// What a connection does after handling one message
enum Next {
    Continue,
    Close,
}

async fn handle_message(
    collector: &Collector,
    writer: &mut OwnedWriteHalf,
    peer: SocketAddr,
    greeted: &mut bool,
    message: Message,
) -> Result<Next> {
    match message {
        Message::ClientHello { message_id, client_id, client_version, auth_id, auth_password, .. } => {
            if *greeted {
                tracing::warn!("Duplicate hello from {}", peer);
                return Ok(Next::Continue);
            }
            let (code, text) =
                collector.authenticate(auth_id.as_deref(), auth_password.as_deref());
            write_message(writer, &Message::HelloResponse { message_id, code, message: text })
                .await?;
            if code != response::SUCCESS {
                tracing::warn!("Rejected hello from {} ({}): code {}", peer, client_id, code);
                return Ok(Next::Close);
            }
            tracing::info!("Client {} ({}) connected from {}", client_id, client_version, peer);
            *greeted = true;
        }
        other if !*greeted => {
            tracing::warn!("{} from {} before hello; closing", other.name(), peer);
            return Ok(Next::Close);
        }
        Message::RegisterStatistic { job_id, tracker, .. } => {
            tracing::debug!(
                "Registered {} for job {} ({} thread {})",
                tracker.display_name,
                job_id,
                tracker.client_id,
                tracker.thread_id
            );
            collector.table().register(&job_id, &tracker.display_name);
        }
        Message::ReportStatistic { job_id, reports, .. } => {
            tracing::trace!("{} data points for job {} from {}", reports.len(), job_id, peer);
            let mut table = collector.table();
            for report in &reports {
                table.apply(&job_id, report);
            }
            for report in &reports {
                if table.is_complete(&job_id, &report.tracker.display_name)
                    && report.kind == tally_core::realtime::ReportKind::Done
                {
                    tracing::info!(
                        "{} for job {} complete after {} intervals",
                        report.tracker.display_name,
                        job_id,
                        report.interval
                    );
                }
            }
        }
        other => {
            tracing::debug!("Ignoring {} from {}", other.name(), peer);
        }
    }
    Ok(Next::Continue)
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    collector: Arc<Collector>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let mut greeted = false;

    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => {
                let Some(frame) = frame? else {
                    tracing::debug!("{} disconnected", peer);
                    break;
                };
                let message = Message::decode(&frame)
                    .with_context(|| format!("undecodable frame from {}", peer))?;
                match handle_message(&collector, &mut writer, peer, &mut greeted, message).await? {
                    Next::Continue => {}
                    Next::Close => break,
                }
            }
            _ = shutdown.changed() => {
                let notice = Message::ServerShutdown { message_id: collector.next_id() };
                if let Err(e) = write_message(&mut writer, &notice).await {
                    tracing::debug!("Could not notify {} of shutdown: {}", peer, e);
                }
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

async fn serve(
    listener: TcpListener,
    collector: Arc<Collector>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut connections = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let collector = collector.clone();
                let shutdown = shutdown.clone();
                connections.spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, collector, shutdown).await {
                        tracing::warn!("Connection {} failed: {:#}", peer, e);
                    }
                });
            }
            _ = shutdown.changed() => break,
        }
    }

    // let every connection deliver its shutdown notice
    while connections.join_next().await.is_some() {}
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let credentials = match (args.auth_id, args.auth_password) {
        (Some(auth_id), Some(password)) => Some(Credentials { auth_id, password }),
        _ => None,
    };
    let collector = Arc::new(Collector::new(args.max_intervals, credentials));

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Tally collector listening on {}", addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let summaries = {
        let collector = collector.clone();
        let period = args.summary_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                collector.log_summaries();
            }
        })
    };

    let server = tokio::spawn(serve(listener, collector.clone(), shutdown_rx));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down; notifying connected reporters");
    let _ = shutdown_tx.send(true);

    server.await.context("Server task panicked")??;
    summaries.abort();
    collector.log_summaries();
    Ok(())
}
