//! Realtime wire messages
//!
//! Every message is a MessagePack array `[type, message_id, fields...]`
//! carried in one length-prefixed frame. Message ids assigned by a reporter
//! are odd; a response echoes the id of the request it answers.

use crate::encoding::{self, Reader};
use crate::error::{DecodeError, Result};
use crate::stats::TrackerId;

const TYPE_CLIENT_HELLO: u8 = 1;
const TYPE_HELLO_RESPONSE: u8 = 3;
const TYPE_SERVER_SHUTDOWN: u8 = 12;
const TYPE_REGISTER_STATISTIC: u8 = 19;
const TYPE_REPORT_STATISTIC: u8 = 20;

/// Hello response codes
pub mod response {
    pub const SUCCESS: u32 = 0;
    pub const UNKNOWN_AUTH_ID: u32 = 1;
    pub const INVALID_CREDENTIALS: u32 = 2;
}

/// How the collector reduces one interval across reporters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// End of stream for a tracker; the interval is the final interval count
    Done,
    /// Sum the values of all reporters
    Add,
    /// Average the values of all reporters
    Average,
}

impl ReportKind {
    fn code(self) -> u8 {
        match self {
            ReportKind::Done => 0,
            ReportKind::Add => 1,
            ReportKind::Average => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ReportKind::Done),
            1 => Some(ReportKind::Add),
            2 => Some(ReportKind::Average),
            _ => None,
        }
    }
}

/// One data point of a report batch
#[derive(Debug, Clone, PartialEq)]
pub struct StatReport {
    pub tracker: TrackerId,
    pub interval: u32,
    pub kind: ReportKind,
    /// Absent for [`ReportKind::Done`]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClientHello {
        message_id: u32,
        client_version: String,
        client_id: String,
        auth_id: Option<String>,
        auth_password: Option<String>,
        realtime_only: bool,
    },
    HelloResponse {
        message_id: u32,
        code: u32,
        message: Option<String>,
    },
    RegisterStatistic {
        message_id: u32,
        job_id: String,
        tracker: TrackerId,
    },
    ReportStatistic {
        message_id: u32,
        job_id: String,
        reports: Vec<StatReport>,
    },
    ServerShutdown {
        message_id: u32,
    },
}

impl Message {
    pub fn message_id(&self) -> u32 {
        match self {
            Message::ClientHello { message_id, .. }
            | Message::HelloResponse { message_id, .. }
            | Message::RegisterStatistic { message_id, .. }
            | Message::ReportStatistic { message_id, .. }
            | Message::ServerShutdown { message_id } => *message_id,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Message::ClientHello { .. } => "client hello",
            Message::HelloResponse { .. } => "hello response",
            Message::RegisterStatistic { .. } => "register statistic",
            Message::ReportStatistic { .. } => "report statistic",
            Message::ServerShutdown { .. } => "server shutdown",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Message::ClientHello {
                message_id,
                client_version,
                client_id,
                auth_id,
                auth_password,
                realtime_only,
            } => {
                write_header(&mut buf, 7, TYPE_CLIENT_HELLO, *message_id)?;
                encoding::write_str(&mut buf, client_version)?;
                encoding::write_str(&mut buf, client_id)?;
                encoding::write_opt_str(&mut buf, auth_id.as_deref())?;
                encoding::write_opt_str(&mut buf, auth_password.as_deref())?;
                encoding::write_bool(&mut buf, *realtime_only)?;
            }
            Message::HelloResponse { message_id, code, message } => {
                write_header(&mut buf, 4, TYPE_HELLO_RESPONSE, *message_id)?;
                encoding::write_u64(&mut buf, *code as u64)?;
                encoding::write_opt_str(&mut buf, message.as_deref())?;
            }
            Message::RegisterStatistic { message_id, job_id, tracker } => {
                write_header(&mut buf, 6, TYPE_REGISTER_STATISTIC, *message_id)?;
                encoding::write_str(&mut buf, job_id)?;
                write_tracker_id(&mut buf, tracker)?;
            }
            Message::ReportStatistic { message_id, job_id, reports } => {
                write_header(&mut buf, 4, TYPE_REPORT_STATISTIC, *message_id)?;
                encoding::write_str(&mut buf, job_id)?;
                encoding::write_array_len(&mut buf, reports.len())?;
                for report in reports {
                    encoding::write_array_len(&mut buf, 6)?;
                    write_tracker_id(&mut buf, &report.tracker)?;
                    encoding::write_u64(&mut buf, report.interval as u64)?;
                    encoding::write_u64(&mut buf, report.kind.code() as u64)?;
                    encoding::write_opt_f64(&mut buf, report.value)?;
                }
            }
            Message::ServerShutdown { message_id } => {
                write_header(&mut buf, 2, TYPE_SERVER_SHUTDOWN, *message_id)?;
            }
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Message> {
        let mut r = Reader::new(bytes);
        let len = r.read_array_len("message")?;
        if len < 2 {
            return Err(DecodeError::new(format!("message has only {} elements", len)).into());
        }
        let message_type = r.read_u8("message type")?;
        let message_id = r.read_u32("message id")?;

        let expect = |expected: usize, what: &str| -> std::result::Result<(), DecodeError> {
            if len == expected {
                Ok(())
            } else {
                Err(DecodeError::new(format!(
                    "{}: expected {} elements, found {}",
                    what, expected, len
                )))
            }
        };

        let message = match message_type {
            TYPE_CLIENT_HELLO => {
                expect(7, "client hello")?;
                Message::ClientHello {
                    message_id,
                    client_version: r.read_string("client version")?,
                    client_id: r.read_string("client id")?,
                    auth_id: r.read_opt_string("auth id")?,
                    auth_password: r.read_opt_string("auth password")?,
                    realtime_only: r.read_bool("realtime only")?,
                }
            }
            TYPE_HELLO_RESPONSE => {
                expect(4, "hello response")?;
                Message::HelloResponse {
                    message_id,
                    code: r.read_u32("response code")?,
                    message: r.read_opt_string("response message")?,
                }
            }
            TYPE_REGISTER_STATISTIC => {
                expect(6, "register statistic")?;
                Message::RegisterStatistic {
                    message_id,
                    job_id: r.read_string("job id")?,
                    tracker: read_tracker_id(&mut r)?,
                }
            }
            TYPE_REPORT_STATISTIC => {
                expect(4, "report statistic")?;
                let job_id = r.read_string("job id")?;
                let n = r.read_array_len("reports")?;
                let mut reports = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    r.expect_array_len("report", 6)?;
                    let tracker = read_tracker_id(&mut r)?;
                    let interval = r.read_u32("report interval")?;
                    let code = r.read_u8("report kind")?;
                    let kind = ReportKind::from_code(code)
                        .ok_or_else(|| DecodeError::new(format!("unknown report kind {}", code)))?;
                    let value = r.read_opt_f64("report value")?;
                    reports.push(StatReport { tracker, interval, kind, value });
                }
                Message::ReportStatistic { message_id, job_id, reports }
            }
            TYPE_SERVER_SHUTDOWN => {
                expect(2, "server shutdown")?;
                Message::ServerShutdown { message_id }
            }
            other => {
                return Err(DecodeError::new(format!("unknown message type {}", other)).into());
            }
        };

        Ok(message)
    }
}

fn write_header(buf: &mut Vec<u8>, len: usize, message_type: u8, message_id: u32) -> Result<()> {
    encoding::write_array_len(buf, len)?;
    encoding::write_u64(buf, message_type as u64)?;
    encoding::write_u64(buf, message_id as u64)
}

fn write_tracker_id(buf: &mut Vec<u8>, id: &TrackerId) -> Result<()> {
    encoding::write_str(buf, &id.client_id)?;
    encoding::write_str(buf, &id.thread_id)?;
    encoding::write_str(buf, &id.display_name)
}

fn read_tracker_id(r: &mut Reader<'_>) -> std::result::Result<TrackerId, DecodeError> {
    Ok(TrackerId::new(
        r.read_string("client id")?,
        r.read_string("thread id")?,
        r.read_string("display name")?,
    ))
}
