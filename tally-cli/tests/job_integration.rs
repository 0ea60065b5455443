//! End-to-end synthetic jobs in simulated time

use std::net::TcpListener;
use std::thread;
use std::time::Duration;
use tally_cli::config::ProfileConfig;
use tally_cli::workload::{self, OPERATIONS_COMPLETED, RESULT_CODES};
use tally_core::persistence;
use tally_core::realtime::{response, Message};
use tally_core::stats::{aggregate_by_name, aggregate_per_client, decode_trackers, encode_trackers};
use tally_core::stats::{Tracker, TrackerKind};
use tally_core::{FrameTransport, TcpTransport};

fn profile(extra: &[String]) -> ProfileConfig {
    let base = r#"
[job]
name = "it"
job_id = "job-it"
client_id = "gen"
clients = 2
threads_per_client = 2
duration = "20s"
collection_interval = "5s"
seed = 11
simulated_time = true

[workload]
mean_latency = "20ms"
error_ratio = 0.1
"#;
    let config = ProfileConfig::from_toml_with_overrides(base, extra).unwrap();
    config.validate().unwrap();
    config
}

#[test]
fn test_job_produces_five_trackers_per_thread() {
    let run = workload::run_job(&profile(&[])).unwrap();
    assert_eq!(run.trackers.len(), 4 * 5);
    assert_eq!(run.identity.client_ids, vec!["gen-0", "gen-1"]);
    assert!(run.trackers.iter().all(|t| !t.is_running()));

    let per_client = aggregate_per_client(&run.trackers).unwrap();
    assert_eq!(per_client.len(), 2 * 5);
    let per_job = aggregate_by_name(&per_client).unwrap();
    assert_eq!(per_job.len(), 5);

    let ops = per_job
        .iter()
        .find(|t| t.display_name() == OPERATIONS_COMPLETED)
        .and_then(|t| t.as_counter())
        .unwrap();
    let thread_total: u64 = run
        .trackers
        .iter()
        .filter_map(|t| t.as_counter())
        .map(|c| c.interval_counts().iter().take(ops.num_intervals()).sum::<u64>())
        .sum();
    assert_eq!(ops.total_count(), thread_total);
    assert!(ops.num_intervals() >= 4);

    let codes = per_job.iter().find(|t| t.display_name() == RESULT_CODES).unwrap();
    assert_eq!(codes.kind(), TrackerKind::Categorical);
}

#[test]
fn test_stats_file_and_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let persist_dir = dir.path().join("snapshots");
    let run = workload::run_job(&profile(&[format!(
        "persistence.directory={}",
        persist_dir.display()
    )]))
    .unwrap();

    let bytes = encode_trackers(&run.trackers).unwrap();
    let decoded = decode_trackers(&bytes).unwrap();
    assert_eq!(decoded.len(), run.trackers.len());

    for client in ["gen-0", "gen-1"] {
        let snapshot = persistence::load(&persist_dir.join(format!("{}.job-it", client))).unwrap();
        assert_eq!(snapshot.len(), 2 * 5);
        assert!(snapshot.iter().all(|t| t.client_id() == client));
    }
}

#[test]
fn test_job_streams_to_collector() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let collector = thread::spawn(move || {
        let (stream, peer) = listener.accept().unwrap();
        let mut transport = TcpTransport::from_stream(stream, peer);
        let mut registrations = 0;
        let mut done = 0;
        loop {
            let frame = match transport.try_recv_frame(Duration::from_secs(10)) {
                Ok(Some(frame)) => frame,
                Ok(None) | Err(_) => break,
            };
            match Message::decode(&frame).unwrap() {
                Message::ClientHello { message_id, .. } => {
                    let reply =
                        Message::HelloResponse { message_id, code: response::SUCCESS, message: None };
                    transport.send_frame(&reply.encode().unwrap()).unwrap();
                }
                Message::RegisterStatistic { .. } => registrations += 1,
                Message::ReportStatistic { reports, .. } => {
                    done += reports
                        .iter()
                        .filter(|r| r.kind == tally_core::realtime::ReportKind::Done)
                        .count();
                }
                _ => {}
            }
        }
        (registrations, done)
    });

    let run = workload::run_job(&profile(&[
        format!("realtime.address={}", address),
        "realtime.report_interval=50ms".to_string(),
    ]))
    .unwrap();
    assert_eq!(run.trackers.len(), 20);

    let (registrations, done) = collector.join().unwrap();
    assert_eq!(registrations, 20);
    assert_eq!(done, 20);
}
