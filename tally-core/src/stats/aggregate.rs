//! Cross-tracker aggregation
//!
//! Peers are merged interval by interval. The merged series is truncated to
//! the shortest peer since trackers may have run for different lengths.

use super::tracker::{StatTracker, Tracker, TrackerId, TrackerInfo, TrackerKind};
use crate::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Identity and timing of a merged tracker
///
/// Identity and configuration come from the first peer; the start time is
/// the earliest peer start.
pub(crate) fn merged_info(peers: &[&TrackerInfo], len: usize) -> TrackerInfo {
    let Some(first) = peers.first() else {
        return TrackerInfo::new(TrackerId::new("", "", ""), 0);
    };

    let mut info = TrackerInfo::new(first.id.clone(), first.collection_interval_secs);
    info.start_time = peers.iter().filter_map(|p| p.start_time).min();
    info.duration_secs = len as u64 * info.collection_interval_secs as u64;
    info.stop_time = info
        .start_time
        .map(|start| start + Duration::from_secs(info.duration_secs));
    info
}

impl StatTracker {
    /// Merge `peers` into one tracker of `kind`
    ///
    /// Fails when a peer is of another kind, when peers disagree on the
    /// collection interval, or when stacked peers carry different series.
    /// No peers yields an empty tracker; a single peer yields an unlinked copy.
    pub fn aggregate(kind: TrackerKind, peers: &[&StatTracker]) -> Result<StatTracker> {
        if let Some(peer) = peers.iter().find(|p| p.kind() != kind) {
            return Err(Error::Aggregate(format!(
                "cannot merge {} tracker '{}' into a {} tracker",
                peer.kind(),
                peer.display_name(),
                kind
            )));
        }

        let Some(first) = peers.first() else {
            return Ok(StatTracker::new(kind, TrackerId::new("", "", ""), 0));
        };

        let interval = first.collection_interval_secs();
        if let Some(peer) = peers.iter().find(|p| p.collection_interval_secs() != interval) {
            return Err(Error::Aggregate(format!(
                "tracker '{}' uses a {}s interval, expected {}s",
                peer.display_name(),
                peer.collection_interval_secs(),
                interval
            )));
        }

        if peers.len() == 1 {
            return Ok((*first).clone());
        }

        let merged: StatTracker = match kind {
            TrackerKind::Counter => {
                let typed: Vec<_> = peers.iter().filter_map(|p| p.as_counter()).collect();
                super::CounterTracker::aggregate(&typed).into()
            }
            TrackerKind::Duration => {
                let typed: Vec<_> = peers.iter().filter_map(|p| p.as_duration()).collect();
                super::DurationTracker::aggregate(&typed).into()
            }
            TrackerKind::Value => {
                let typed: Vec<_> = peers.iter().filter_map(|p| p.as_value()).collect();
                super::ValueTracker::aggregate(&typed).into()
            }
            TrackerKind::Categorical => {
                let typed: Vec<_> = peers.iter().filter_map(|p| p.as_categorical()).collect();
                super::CategoricalTracker::aggregate(&typed).into()
            }
            TrackerKind::Stacked => {
                let typed: Vec<_> = peers.iter().filter_map(|p| p.as_stacked()).collect();
                super::StackedTracker::aggregate(&typed)?.into()
            }
        };

        Ok(merged)
    }
}

/// Merge trackers that share a kind and display name
///
/// Groups keep the order in which their first member appears.
pub fn aggregate_by_name(trackers: &[StatTracker]) -> Result<Vec<StatTracker>> {
    aggregate_grouped(trackers, |t| (String::new(), t.kind(), t.display_name().to_string()))
}

/// Merge each client's per-thread trackers into one view per display name
///
/// Merged views keep their client id. The per-job view is
/// [`aggregate_by_name`] over the result.
pub fn aggregate_per_client(trackers: &[StatTracker]) -> Result<Vec<StatTracker>> {
    aggregate_grouped(trackers, |t| {
        (t.client_id().to_string(), t.kind(), t.display_name().to_string())
    })
}

type GroupKey = (String, TrackerKind, String);

fn aggregate_grouped<F>(trackers: &[StatTracker], key_of: F) -> Result<Vec<StatTracker>>
where
    F: Fn(&StatTracker) -> GroupKey,
{
    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, Vec<&StatTracker>> = HashMap::new();

    for tracker in trackers {
        let key = key_of(tracker);
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(tracker);
    }

    order
        .into_iter()
        .map(|key| {
            let kind = key.1;
            let peers = groups.remove(&key).unwrap_or_default();
            StatTracker::aggregate(kind, &peers)
        })
        .collect()
}
