//! Realtime reporter against a mock collector over real TCP sockets

use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tally_core::realtime::{
    response, Message, RealtimeConfig, RealtimeReporter, ReportKind, ReporterState,
};
use tally_core::stats::{CounterTracker, DurationTracker, TrackerId};
use tally_core::{FrameTransport, TcpTransport};

/// What the mock collector does after reading the hello
#[derive(Clone, Copy)]
enum Script {
    /// Accept and record everything until the client disconnects
    Accept,
    /// Reject the hello with the given code
    Reject(u32),
    /// Accept, then announce shutdown once the first report arrives
    ShutdownAfterFirstReport,
}

fn spawn_collector(script: Script) -> (String, mpsc::Receiver<Message>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock collector");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (stream, peer) = listener.accept().expect("accept reporter");
        let mut transport = TcpTransport::from_stream(stream, peer);
        let deadline = Instant::now() + Duration::from_secs(20);

        while Instant::now() < deadline {
            let frame = match transport.try_recv_frame(Duration::from_millis(50)) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(_) => break,
            };
            let message = Message::decode(&frame).expect("well-formed message");

            match (&message, script) {
                (Message::ClientHello { message_id, .. }, Script::Reject(code)) => {
                    let reply = Message::HelloResponse {
                        message_id: *message_id,
                        code,
                        message: Some("denied".to_string()),
                    };
                    let _ = transport.send_frame(&reply.encode().unwrap());
                }
                (Message::ClientHello { message_id, .. }, _) => {
                    let reply = Message::HelloResponse {
                        message_id: *message_id,
                        code: response::SUCCESS,
                        message: None,
                    };
                    transport.send_frame(&reply.encode().unwrap()).unwrap();
                }
                (Message::ReportStatistic { .. }, Script::ShutdownAfterFirstReport) => {
                    let notice = Message::ServerShutdown { message_id: 2 };
                    let _ = transport.send_frame(&notice.encode().unwrap());
                }
                _ => {}
            }

            if tx.send(message).is_err() {
                break;
            }
        }
    });

    (addr.to_string(), rx)
}

fn config(address: String) -> RealtimeConfig {
    let mut config = RealtimeConfig::new(address, "client-a");
    config.report_interval = Duration::from_millis(50);
    config.handshake_timeout = Duration::from_secs(5);
    config
}

fn collect_until_closed(rx: &mpsc::Receiver<Message>) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.recv_timeout(Duration::from_secs(5)) {
        messages.push(message);
    }
    messages
}

#[test]
fn test_closed_intervals_stream_to_collector() {
    let (address, rx) = spawn_collector(Script::Accept);
    let reporter = Arc::new(RealtimeReporter::connect(&config(address)).unwrap());

    let base = Instant::now();
    let at = |ms: u64| base + Duration::from_millis(ms);

    let mut ops = CounterTracker::new(TrackerId::new("client-a", "0", "Ops"), 1);
    ops.enable_realtime(reporter.clone(), "job-1");
    ops.start_at(base, None);
    ops.increment_at(at(100));
    ops.increment_at(at(200));
    ops.increment_at(at(1500));
    ops.increment_at(at(2200));

    let mut latency = DurationTracker::new(TrackerId::new("client-a", "0", "Latency"), 1);
    latency.enable_realtime(reporter.clone(), "job-1");
    latency.start_at(base, None);
    latency.record_duration_at(at(300), Duration::from_millis(4));
    latency.record_duration_at(at(400), Duration::from_millis(8));

    ops.stop_at(at(3000));
    latency.stop_at(at(2500));
    reporter.shutdown();
    assert_eq!(reporter.state(), ReporterState::Stopped);

    let messages = collect_until_closed(&rx);
    assert!(matches!(
        &messages[0],
        Message::ClientHello { client_id, realtime_only: true, .. } if client_id == "client-a"
    ));

    let registered: Vec<&str> = messages
        .iter()
        .filter_map(|m| match m {
            Message::RegisterStatistic { tracker, job_id, .. } => {
                assert_eq!(job_id, "job-1");
                Some(tracker.display_name.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(registered, vec!["Ops", "Latency"]);

    let reports: Vec<_> = messages
        .iter()
        .flat_map(|m| match m {
            Message::ReportStatistic { reports, .. } => reports.clone(),
            _ => Vec::new(),
        })
        .collect();

    let ops_points: Vec<(u32, ReportKind, Option<f64>)> = reports
        .iter()
        .filter(|r| r.tracker.display_name == "Ops")
        .map(|r| (r.interval, r.kind, r.value))
        .collect();
    assert_eq!(
        ops_points,
        vec![
            (0, ReportKind::Add, Some(2.0)),
            (1, ReportKind::Add, Some(1.0)),
            (2, ReportKind::Add, Some(1.0)),
            (3, ReportKind::Done, None),
        ]
    );

    let latency_points: Vec<(u32, ReportKind, Option<f64>)> = reports
        .iter()
        .filter(|r| r.tracker.display_name == "Latency")
        .map(|r| (r.interval, r.kind, r.value))
        .collect();
    assert_eq!(
        latency_points,
        vec![
            (0, ReportKind::Average, Some(6.0)),
            (1, ReportKind::Average, Some(0.0)),
            (2, ReportKind::Average, Some(0.0)),
            (3, ReportKind::Done, None),
        ]
    );

    let ids: Vec<u32> = messages.iter().map(Message::message_id).collect();
    assert!(ids.iter().all(|id| id % 2 == 1));
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_rejected_credentials() {
    let (address, _rx) = spawn_collector(Script::Reject(response::INVALID_CREDENTIALS));
    let mut config = config(address);
    config.auth_id = Some("admin".to_string());
    config.auth_password = Some("wrong".to_string());

    let err = RealtimeReporter::connect(&config).err().expect("hello must be rejected");
    assert!(err.to_string().contains("code 2"));
}

#[test]
fn test_unreachable_collector_fails_fast() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut config = config(address);
    config.connect_timeout = Duration::from_secs(2);
    assert!(RealtimeReporter::connect(&config).is_err());
}

#[test]
fn test_collector_shutdown_disables_reporter() {
    let (address, _rx) = spawn_collector(Script::ShutdownAfterFirstReport);
    let reporter = Arc::new(RealtimeReporter::connect(&config(address)).unwrap());
    let id = TrackerId::new("client-a", "0", "Ops");

    reporter.register_stat("job-1", &id);
    reporter.report_add("job-1", &id, 0, 1.0);

    let deadline = Instant::now() + Duration::from_secs(10);
    while reporter.state() != ReporterState::Stopped && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(reporter.state(), ReporterState::Stopped);

    // later points are dropped without blocking
    for i in 1..1000 {
        reporter.report_add("job-1", &id, i, 1.0);
    }
    assert_eq!(reporter.pending(), 0);
    reporter.shutdown();
}
