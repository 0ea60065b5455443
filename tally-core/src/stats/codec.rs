//! Binary tracker encoding
//!
//! A tracker is written as an envelope carrying its identity and timing,
//! with the kind-specific data record embedded as a binary blob:
//!
//! ```text
//! envelope: [kind, client_id, thread_id, display_name, interval, duration,
//!            start_ms?, stop_ms?, data]
//! data:     [header, records, options?]
//! ```
//!
//! Optional scalars are 0- or 1-element arrays. Envelopes written before
//! timestamps were added have 7 elements and decode without them. The
//! trailing options section holds `name=value` strings; a missing section
//! means defaults and unknown names are skipped.

use super::categorical::CategoricalTracker;
use super::counter::CounterTracker;
use super::duration::{DurationBucket, DurationTracker};
use super::stacked::{StackedBucket, StackedTracker};
use super::tracker::{
    DisplayOptions, StatTracker, Tracker, TrackerId, TrackerInfo, TrackerKind, TrackerState,
};
use super::value::{ValueBucket, ValueTracker};
use crate::encoding::{self, Reader};
use crate::error::{DecodeError, Result};
use crate::timing::{from_unix_millis, unix_millis};
use std::time::Duration;

const ENVELOPE_LEN: usize = 9;
const LEGACY_ENVELOPE_LEN: usize = 7;

impl StatTracker {
    /// Encode the kind-specific data record
    pub fn encode_data(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            StatTracker::Counter(t) => {
                encoding::write_array_len(&mut buf, 2)?;
                encoding::write_array_len(&mut buf, 0)?;
                let counts = t.interval_counts();
                encoding::write_array_len(&mut buf, counts.len())?;
                for count in counts {
                    encoding::write_array_len(&mut buf, 1)?;
                    encoding::write_u64(&mut buf, count)?;
                }
            }
            StatTracker::Duration(t) => {
                encoding::write_array_len(&mut buf, 2)?;
                encoding::write_array_len(&mut buf, 2)?;
                encoding::write_opt_u64(&mut buf, t.max_duration().map(duration_nanos))?;
                encoding::write_opt_u64(&mut buf, t.min_duration().map(duration_nanos))?;
                encoding::write_array_len(&mut buf, t.buckets().len())?;
                for bucket in t.buckets() {
                    encoding::write_array_len(&mut buf, 2)?;
                    encoding::write_u64(&mut buf, bucket.total_nanos)?;
                    encoding::write_u64(&mut buf, bucket.count)?;
                }
            }
            StatTracker::Value(t) => {
                encoding::write_array_len(&mut buf, 2)?;
                encoding::write_array_len(&mut buf, 0)?;
                encoding::write_array_len(&mut buf, t.buckets().len())?;
                for bucket in t.buckets() {
                    encoding::write_array_len(&mut buf, 4)?;
                    encoding::write_u64(&mut buf, bucket.count)?;
                    encoding::write_i64(&mut buf, bucket.sum)?;
                    encoding::write_opt_i64(&mut buf, bucket.min)?;
                    encoding::write_opt_i64(&mut buf, bucket.max)?;
                }
            }
            StatTracker::Categorical(t) => {
                encoding::write_array_len(&mut buf, 2)?;
                write_names(&mut buf, t.category_names())?;
                let rows = t.interval_counts();
                encoding::write_array_len(&mut buf, rows.len())?;
                for row in rows {
                    encoding::write_array_len(&mut buf, row.len())?;
                    for count in row {
                        encoding::write_u64(&mut buf, count)?;
                    }
                }
            }
            StatTracker::Stacked(t) => {
                encoding::write_array_len(&mut buf, 3)?;
                write_names(&mut buf, t.series_names())?;
                let width = t.series_names().len();
                encoding::write_array_len(&mut buf, t.buckets().len())?;
                for bucket in t.buckets() {
                    encoding::write_array_len(&mut buf, 2)?;
                    encoding::write_u64(&mut buf, bucket.count)?;
                    encoding::write_array_len(&mut buf, width)?;
                    for i in 0..width {
                        encoding::write_f64(&mut buf, bucket.value(i))?;
                    }
                }
                write_options(&mut buf, &t.display_options())?;
            }
        }
        Ok(buf)
    }

    /// Decode a data record produced by [`encode_data`](Self::encode_data)
    ///
    /// The result has an empty identity and the default interval; use
    /// [`decode_tracker`] to restore both from an envelope.
    pub fn decode_data(kind: TrackerKind, data: &[u8]) -> Result<StatTracker> {
        let info = TrackerInfo::new(TrackerId::new("", "", ""), 0);
        decode_record(kind, info, data)
    }
}

fn decode_record(kind: TrackerKind, mut info: TrackerInfo, data: &[u8]) -> Result<StatTracker> {
    let mut r = Reader::new(data);
    let sections = r.read_array_len(&format!("{} record", kind))?;
    if !(2..=3).contains(&sections) {
        return Err(DecodeError::new(format!(
            "{} record: expected 2 or 3 sections, found {}",
            kind, sections
        ))
        .into());
    }

    let tracker: StatTracker = match kind {
        TrackerKind::Counter => {
            r.expect_array_len("counter header", 0)?;
            let n = r.read_array_len("counter intervals")?;
            let mut counts = Vec::with_capacity(n.min(4096));
            for _ in 0..n {
                r.expect_array_len("counter interval", 1)?;
                counts.push(r.read_u64("interval count")?);
            }
            finish_info(&mut info, counts.len());
            CounterTracker::restore(info, counts).into()
        }
        TrackerKind::Duration => {
            r.expect_array_len("duration header", 2)?;
            let max = r.read_opt_u64("max duration")?.map(Duration::from_nanos);
            let min = r.read_opt_u64("min duration")?.map(Duration::from_nanos);
            let n = r.read_array_len("duration intervals")?;
            let mut buckets = Vec::with_capacity(n.min(4096));
            for _ in 0..n {
                r.expect_array_len("duration interval", 2)?;
                let total_nanos = r.read_u64("interval total")?;
                let count = r.read_u64("interval count")?;
                buckets.push(DurationBucket { count, total_nanos });
            }
            finish_info(&mut info, buckets.len());
            DurationTracker::restore(info, buckets, max, min).into()
        }
        TrackerKind::Value => {
            r.expect_array_len("value header", 0)?;
            let n = r.read_array_len("value intervals")?;
            let mut buckets = Vec::with_capacity(n.min(4096));
            for _ in 0..n {
                r.expect_array_len("value interval", 4)?;
                buckets.push(ValueBucket {
                    count: r.read_u64("interval count")?,
                    sum: r.read_i64("interval sum")?,
                    min: r.read_opt_i64("interval min")?,
                    max: r.read_opt_i64("interval max")?,
                });
            }
            finish_info(&mut info, buckets.len());
            ValueTracker::restore(info, buckets).into()
        }
        TrackerKind::Categorical => {
            let names = read_names(&mut r, "category names")?;
            let n = r.read_array_len("categorical intervals")?;
            let mut rows = Vec::with_capacity(n.min(4096));
            for _ in 0..n {
                let width = r.read_array_len("categorical interval")?;
                if width > names.len() {
                    return Err(DecodeError::new(format!(
                        "categorical interval has {} counts for {} categories",
                        width,
                        names.len()
                    ))
                    .into());
                }
                let mut row = Vec::with_capacity(width);
                for _ in 0..width {
                    row.push(r.read_u64("category count")?);
                }
                rows.push(row);
            }
            finish_info(&mut info, rows.len());
            CategoricalTracker::restore(info, names, rows).into()
        }
        TrackerKind::Stacked => {
            let names = read_names(&mut r, "series names")?;
            let n = r.read_array_len("stacked intervals")?;
            let mut buckets = Vec::with_capacity(n.min(4096));
            for _ in 0..n {
                r.expect_array_len("stacked interval", 2)?;
                let count = r.read_u64("interval count")?;
                r.expect_array_len("interval values", names.len())?;
                let mut values = Vec::with_capacity(names.len());
                for _ in 0..names.len() {
                    values.push(r.read_f64("series value")?);
                }
                buckets.push(StackedBucket { count, values });
            }
            let options = if sections == 3 {
                read_options(&mut r)?
            } else {
                DisplayOptions::default()
            };
            finish_info(&mut info, buckets.len());
            StackedTracker::restore(info, names, buckets, options).into()
        }
    };

    if sections == 3 && kind != TrackerKind::Stacked {
        // other kinds carry no options, but tolerate an empty section
        read_options(&mut r)?;
    }

    Ok(tracker)
}

/// Encode a tracker with its identity and timing
pub fn encode_tracker(tracker: &StatTracker) -> Result<Vec<u8>> {
    let data = tracker.encode_data()?;
    let mut buf = Vec::with_capacity(data.len() + 64);
    encoding::write_array_len(&mut buf, ENVELOPE_LEN)?;
    encoding::write_str(&mut buf, tracker.kind().as_str())?;
    encoding::write_str(&mut buf, tracker.client_id())?;
    encoding::write_str(&mut buf, tracker.thread_id())?;
    encoding::write_str(&mut buf, tracker.display_name())?;
    encoding::write_u64(&mut buf, tracker.collection_interval_secs() as u64)?;
    encoding::write_u64(&mut buf, tracker.duration_secs())?;
    encoding::write_opt_u64(&mut buf, tracker.start_time().map(unix_millis))?;
    encoding::write_opt_u64(&mut buf, tracker.stop_time().map(unix_millis))?;
    encoding::write_bin(&mut buf, &data)?;
    Ok(buf)
}

/// Decode a tracker written by [`encode_tracker`]
pub fn decode_tracker(bytes: &[u8]) -> Result<StatTracker> {
    let mut r = Reader::new(bytes);
    decode_envelope(&mut r)
}

/// Encode a list of trackers as one blob
pub fn encode_trackers(trackers: &[StatTracker]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encoding::write_array_len(&mut buf, trackers.len())?;
    for tracker in trackers {
        encoding::write_bin(&mut buf, &encode_tracker(tracker)?)?;
    }
    Ok(buf)
}

pub fn decode_trackers(bytes: &[u8]) -> Result<Vec<StatTracker>> {
    let mut r = Reader::new(bytes);
    let n = r.read_array_len("tracker list")?;
    let mut trackers = Vec::with_capacity(n.min(4096));
    for i in 0..n {
        let blob = r.read_bin(&format!("tracker {}", i))?;
        trackers.push(decode_tracker(&blob)?);
    }
    Ok(trackers)
}

fn decode_envelope(r: &mut Reader<'_>) -> Result<StatTracker> {
    let len = r.read_array_len("tracker envelope")?;
    if len != ENVELOPE_LEN && len != LEGACY_ENVELOPE_LEN {
        return Err(DecodeError::new(format!(
            "tracker envelope: expected {} or {} elements, found {}",
            ENVELOPE_LEN, LEGACY_ENVELOPE_LEN, len
        ))
        .into());
    }

    let kind_name = r.read_string("tracker kind")?;
    let kind: TrackerKind = kind_name
        .parse()
        .map_err(|_| DecodeError::new(format!("unknown tracker kind '{}'", kind_name)))?;
    let id = TrackerId::new(
        r.read_string("client id")?,
        r.read_string("thread id")?,
        r.read_string("display name")?,
    );
    let interval = r.read_u32("collection interval")?;
    let duration_secs = r.read_u64("duration")?;
    let (start_ms, stop_ms) = if len == ENVELOPE_LEN {
        (r.read_opt_u64("start time")?, r.read_opt_u64("stop time")?)
    } else {
        (None, None)
    };
    let data = r.read_bin("tracker data")?;

    let mut info = TrackerInfo::new(id, interval);
    info.start_time = start_ms.map(from_unix_millis);
    info.stop_time = stop_ms.map(from_unix_millis);
    info.duration_secs = duration_secs;

    decode_record(kind, info, &data)
}

/// Mark a decoded tracker stopped and estimate a missing duration
fn finish_info(info: &mut TrackerInfo, intervals: usize) {
    info.state = TrackerState::Stopped;
    if info.duration_secs == 0 && intervals > 0 {
        info.duration_secs = intervals as u64 * info.collection_interval_secs as u64;
    }
}

fn duration_nanos(d: Duration) -> u64 {
    d.as_nanos().min(u64::MAX as u128) as u64
}

fn write_names(buf: &mut Vec<u8>, names: &[String]) -> Result<()> {
    encoding::write_array_len(buf, names.len())?;
    for name in names {
        encoding::write_str(buf, name)?;
    }
    Ok(())
}

fn read_names(r: &mut Reader<'_>, what: &str) -> std::result::Result<Vec<String>, DecodeError> {
    let n = r.read_array_len(what)?;
    let mut names = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        names.push(r.read_string(what)?);
    }
    Ok(names)
}

fn write_options(buf: &mut Vec<u8>, options: &DisplayOptions) -> Result<()> {
    let entries = [
        ("stacked", options.stacked),
        ("legend", options.legend),
        ("horizontal_grid", options.horizontal_grid),
        ("vertical_grid", options.vertical_grid),
    ];
    encoding::write_array_len(buf, entries.len())?;
    for (name, value) in entries {
        encoding::write_str(buf, &format!("{}={}", name, value))?;
    }
    Ok(())
}

fn read_options(r: &mut Reader<'_>) -> std::result::Result<DisplayOptions, DecodeError> {
    let mut options = DisplayOptions::default();
    let n = r.read_array_len("display options")?;
    for _ in 0..n {
        let entry = r.read_string("display option")?;
        let Some((name, value)) = entry.split_once('=') else {
            return Err(DecodeError::new(format!("display option '{}' lacks '='", entry)));
        };
        let value: bool = value
            .trim()
            .parse()
            .map_err(|e| DecodeError::with_source(format!("display option '{}'", entry), e))?;
        match name.trim() {
            "stacked" => options.stacked = value,
            "legend" => options.legend = value,
            "horizontal_grid" => options.horizontal_grid = value,
            "vertical_grid" => options.vertical_grid = value,
            other => tracing::debug!("Ignoring unknown display option '{}'", other),
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::time::Instant;

    fn secs(base: Instant, s: u64) -> Instant {
        base + Duration::from_secs(s)
    }

    fn id(name: &str) -> TrackerId {
        TrackerId::new("client-7", "thread-3", name)
    }

    fn sample_trackers() -> Vec<StatTracker> {
        let base = Instant::now();

        let mut counter = CounterTracker::new(id("Ops"), 10);
        let mut duration = DurationTracker::new(id("Latency"), 10);
        let mut value = ValueTracker::new(id("Size"), 10);
        let mut categorical = CategoricalTracker::new(id("Codes"), 10);
        let mut stacked = StackedTracker::new(id("Bytes"), 10, ["read", "written"]);
        stacked.set_display_options(DisplayOptions {
            stacked: true,
            legend: true,
            horizontal_grid: false,
            vertical_grid: true,
        });

        counter.start_at(base, None);
        duration.start_at(base, None);
        value.start_at(base, None);
        categorical.start_at(base, None);
        stacked.start_at(base, None);

        for (i, s) in [1u64, 2, 14, 37].into_iter().enumerate() {
            counter.increment_at(secs(base, s));
            duration.record_duration_at(secs(base, s), Duration::from_micros(1500 * (i as u64 + 1)));
            value.add_value_at(secs(base, s), 100 - 60 * i as i64);
            categorical.increment_at(secs(base, s), ["ok", "error", "ok", "timeout"][i]);
            stacked.add_values_at(secs(base, s), &[i as f64 * 0.1, 1.0 / 3.0]);
        }

        let stop = secs(base, 40);
        counter.stop_at(stop);
        duration.stop_at(stop);
        value.stop_at(stop);
        categorical.stop_at(stop);
        stacked.stop_at(stop);

        vec![
            counter.into(),
            duration.into(),
            value.into(),
            categorical.into(),
            stacked.into(),
        ]
    }

    fn assert_same(a: &StatTracker, b: &StatTracker) {
        assert_eq!(a.kind(), b.kind());
        assert_eq!(a.id(), b.id());
        assert_eq!(a.collection_interval_secs(), b.collection_interval_secs());
        assert_eq!(a.num_intervals(), b.num_intervals());
        assert_eq!(a.duration_secs(), b.duration_secs());
        assert_eq!(a.display_options(), b.display_options());
        match (a, b) {
            (StatTracker::Counter(x), StatTracker::Counter(y)) => {
                assert_eq!(x.interval_counts(), y.interval_counts());
            }
            (StatTracker::Duration(x), StatTracker::Duration(y)) => {
                assert_eq!(x.buckets(), y.buckets());
                assert_eq!(x.max_duration(), y.max_duration());
                assert_eq!(x.min_duration(), y.min_duration());
            }
            (StatTracker::Value(x), StatTracker::Value(y)) => {
                assert_eq!(x.buckets(), y.buckets());
            }
            (StatTracker::Categorical(x), StatTracker::Categorical(y)) => {
                assert_eq!(x.category_names(), y.category_names());
                assert_eq!(x.interval_counts(), y.interval_counts());
            }
            (StatTracker::Stacked(x), StatTracker::Stacked(y)) => {
                assert_eq!(x.series_names(), y.series_names());
                assert_eq!(x.interval_totals(), y.interval_totals());
                assert_eq!(x.interval_counts(), y.interval_counts());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_every_kind_survives_encoding() {
        for tracker in sample_trackers() {
            let bytes = encode_tracker(&tracker).unwrap();
            let decoded = decode_tracker(&bytes).unwrap();
            assert_same(&tracker, &decoded);
            assert!(!decoded.is_running());
            assert!(decoded.has_been_started());
            assert_eq!(
                decoded.start_time().map(unix_millis),
                tracker.start_time().map(unix_millis)
            );
        }
    }

    #[test]
    fn test_category_order_preserved() {
        let trackers = sample_trackers();
        let decoded = decode_tracker(&encode_tracker(&trackers[3]).unwrap()).unwrap();
        assert_eq!(
            decoded.as_categorical().unwrap().category_names(),
            &["ok", "error", "timeout"]
        );
    }

    #[test]
    fn test_tracker_list() {
        let trackers = sample_trackers();
        let decoded = decode_trackers(&encode_trackers(&trackers).unwrap()).unwrap();
        assert_eq!(decoded.len(), trackers.len());
        for (a, b) in trackers.iter().zip(&decoded) {
            assert_same(a, b);
        }
    }

    #[test]
    fn test_legacy_envelope_without_timestamps() {
        let tracker = &sample_trackers()[0];
        let data = tracker.encode_data().unwrap();

        let mut buf = Vec::new();
        encoding::write_array_len(&mut buf, LEGACY_ENVELOPE_LEN).unwrap();
        encoding::write_str(&mut buf, "counter").unwrap();
        encoding::write_str(&mut buf, "client-7").unwrap();
        encoding::write_str(&mut buf, "thread-3").unwrap();
        encoding::write_str(&mut buf, "Ops").unwrap();
        encoding::write_u64(&mut buf, 10).unwrap();
        // zero duration is estimated from the interval count
        encoding::write_u64(&mut buf, 0).unwrap();
        encoding::write_bin(&mut buf, &data).unwrap();

        let decoded = decode_tracker(&buf).unwrap();
        assert_eq!(decoded.start_time(), None);
        assert_eq!(decoded.duration_secs(), 40);
        assert_same(tracker, &decoded);
    }

    #[test]
    fn test_stacked_without_options_uses_defaults() {
        let mut buf = Vec::new();
        encoding::write_array_len(&mut buf, 2).unwrap();
        write_names(&mut buf, &["a".to_string()]).unwrap();
        encoding::write_array_len(&mut buf, 1).unwrap();
        encoding::write_array_len(&mut buf, 2).unwrap();
        encoding::write_u64(&mut buf, 2).unwrap();
        encoding::write_array_len(&mut buf, 1).unwrap();
        encoding::write_f64(&mut buf, 4.5).unwrap();

        let decoded = StatTracker::decode_data(TrackerKind::Stacked, &buf).unwrap();
        assert_eq!(decoded.display_options(), DisplayOptions::default());
        assert_eq!(decoded.as_stacked().unwrap().interval_totals(), vec![vec![4.5]]);
    }

    #[test]
    fn test_unknown_option_ignored_and_malformed_rejected() {
        let encode_with = |entries: &[&str]| {
            let mut buf = Vec::new();
            encoding::write_array_len(&mut buf, 3).unwrap();
            write_names(&mut buf, &[]).unwrap();
            encoding::write_array_len(&mut buf, 0).unwrap();
            encoding::write_array_len(&mut buf, entries.len()).unwrap();
            for e in entries {
                encoding::write_str(&mut buf, e).unwrap();
            }
            buf
        };

        let ok = encode_with(&["legend=true", "shading=maybe"]);
        let decoded = StatTracker::decode_data(TrackerKind::Stacked, &ok).unwrap();
        assert!(decoded.display_options().legend);

        let bad = encode_with(&["legend"]);
        assert!(matches!(
            StatTracker::decode_data(TrackerKind::Stacked, &bad),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_truncated_bytes_are_decode_errors() {
        for tracker in sample_trackers() {
            let bytes = encode_tracker(&tracker).unwrap();
            for cut in [1, bytes.len() / 2, bytes.len() - 1] {
                let err = decode_tracker(&bytes[..cut]).unwrap_err();
                assert!(matches!(err, Error::Decode(_)), "cut {cut}: {err}");
            }
        }
    }

    #[test]
    fn test_wrong_kind_is_decode_error() {
        let trackers = sample_trackers();
        let data = trackers[1].encode_data().unwrap();
        assert!(StatTracker::decode_data(TrackerKind::Value, &data).is_err());
    }
}
