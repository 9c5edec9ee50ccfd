//! Watcher state: watermark, alerted set, and pending-miss ledger.
//!
//! On disk this is one JSON object:
//!
//! ```json
//! {"last_checked": 1200, "alerted_misses": [1001, 1107], "pending_miss": {"1190": 1714564800}, "last_report_ts": 0}
//! ```
//!
//! Every field defaults when missing, so files written by older versions load cleanly.

use crate::config::RetentionConfig;
use crate::oracle::Height;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// Unix seconds.
pub type UnixTime = i64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherState {
    /// Highest height fully processed; the next scan starts above it.
    #[serde(default)]
    pub last_checked: Height,
    /// Heights a miss alert was already sent for.
    #[serde(default, rename = "alerted_misses")]
    pub alerted: BTreeSet<Height>,
    /// Suspected misses awaiting re-verification, with first-seen time.
    #[serde(
        default,
        rename = "pending_miss",
        serialize_with = "pending_to_strings",
        deserialize_with = "pending_from_strings"
    )]
    pub pending: BTreeMap<Height, UnixTime>,
    /// Unused; carried so older files round-trip unchanged.
    #[serde(default)]
    pub last_report_ts: i64,
}

fn pending_to_strings<S: Serializer>(
    pending: &BTreeMap<Height, UnixTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(pending.iter().map(|(h, t)| (h.to_string(), t)))
}

/// Keys that are not heights, and values that are not integers, are dropped.
fn pending_from_strings<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<Height, UnixTime>, D::Error> {
    let raw: BTreeMap<String, serde_json::Value> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| {
            let h = k.trim().parse::<Height>().ok()?;
            let t = v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))?;
            Some((h, t))
        })
        .collect())
}

impl WatcherState {
    pub fn is_alerted(&self, height: Height) -> bool {
        self.alerted.contains(&height)
    }

    pub fn is_pending(&self, height: Height) -> bool {
        self.pending.contains_key(&height)
    }

    /// Advance the watermark; never moves it backwards.
    pub fn advance_watermark(&mut self, height: Height) {
        self.last_checked = self.last_checked.max(height);
    }

    /// Record an alerted height and drop any pending entry for it.
    pub fn mark_alerted(&mut self, height: Height) {
        self.pending.remove(&height);
        self.alerted.insert(height);
    }

    /// Apply the size bounds. Returns how many entries were evicted.
    pub fn enforce_retention(&mut self, retention: &RetentionConfig) -> usize {
        let mut evicted = 0;
        if self.alerted.len() > retention.alerted_max {
            evicted += retain_newest(&mut self.alerted, retention.alerted_keep);
        }
        while self.pending.len() > retention.pending_max {
            if self.pending.pop_first().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    /// Copy suitable for writing to disk: the alerted list is capped to the newest
    /// `alerted_keep` heights.
    pub fn to_persisted(&self, retention: &RetentionConfig) -> WatcherState {
        let mut out = self.clone();
        retain_newest(&mut out.alerted, retention.alerted_keep);
        out
    }
}

fn retain_newest(set: &mut BTreeSet<Height>, keep: usize) -> usize {
    let excess = set.len().saturating_sub(keep);
    if excess == 0 {
        return 0;
    }
    if let Some(&cut) = set.iter().nth(excess) {
        *set = set.split_off(&cut);
    } else {
        set.clear();
    }
    excess
}
