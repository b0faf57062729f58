//! Rolling aggregation window.
//!
//! Per-frame person counts accumulate in a fixed-capacity window. When the
//! window holds `collection_limit` counts it is flushed into one timestamped
//! `Sample` and reset to empty. The reported statistic is the element at index
//! `collection_limit / 2` of the sorted window, a fixed-rank order statistic
//! (not a true median for even limits).
//!
//! Two trigger modes share one implementation:
//! - `OnPushFull`: every per-frame count is appended; the append that fills the
//!   window flushes it.
//! - `OnTimer`: the capture loop only records its latest count; an independent
//!   timer calls `tick`, which appends that observation (at most once) and
//!   flushes when the window fills.
//!
//! The window is touched from the capture thread and the report thread, so
//! append-and-flush always runs as one critical section under the mutex.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard};

use crate::config::StatisticKey;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// When the window is fed and flushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerMode {
    OnPushFull,
    OnTimer,
}

impl std::str::FromStr for TriggerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "on-push-full" => Ok(TriggerMode::OnPushFull),
            "on-timer" => Ok(TriggerMode::OnTimer),
            other => Err(anyhow!(
                "trigger must be 'on-push-full' or 'on-timer', got '{}'",
                other
            )),
        }
    }
}

/// One aggregation output, ready for upload.
#[derive(Clone, Debug)]
pub struct Sample {
    /// Window contents in arrival order.
    pub counts: Vec<u32>,
    pub statistic: u32,
    pub timestamp: DateTime<Local>,
}

impl Sample {
    /// ISO-8601 local time, second precision.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Flat upload record: `img1..imgN`, the statistic under `key`, and `timestamp`.
    pub fn to_record(&self, key: StatisticKey) -> Value {
        let mut record = Map::new();
        for (i, count) in self.counts.iter().enumerate() {
            record.insert(format!("img{}", i + 1), Value::from(*count));
        }
        record.insert(key.as_str().to_string(), Value::from(self.statistic));
        record.insert("timestamp".to_string(), Value::from(self.timestamp_string()));
        Value::Object(record)
    }
}

/// Value at index `len / 2` of the sorted counts; `None` for an empty slice.
pub fn order_statistic(counts: &[u32]) -> Option<u32> {
    if counts.is_empty() {
        return None;
    }
    let mut sorted = counts.to_vec();
    sorted.sort_unstable();
    Some(sorted[sorted.len() / 2])
}

#[derive(Default)]
struct Window {
    counts: Vec<u32>,
    /// Latest unread per-frame count (timer mode).
    latest: Option<u32>,
}

/// Thread-safe aggregation window.
pub struct Aggregator {
    limit: usize,
    mode: TriggerMode,
    window: Mutex<Window>,
}

impl Aggregator {
    pub fn new(collection_limit: usize, mode: TriggerMode) -> Result<Self> {
        if collection_limit == 0 {
            return Err(anyhow!("collection_limit must be at least 1"));
        }
        Ok(Self {
            limit: collection_limit,
            mode,
            window: Mutex::new(Window {
                counts: Vec::with_capacity(collection_limit),
                latest: None,
            }),
        })
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    pub fn collection_limit(&self) -> usize {
        self.limit
    }

    /// Feed a per-frame count according to the trigger mode.
    ///
    /// Returns a sample only in `OnPushFull` mode when this count filled the window.
    pub fn record(&self, count: u32) -> Result<Option<Sample>> {
        match self.mode {
            TriggerMode::OnPushFull => self.process(count),
            TriggerMode::OnTimer => {
                self.observe(count)?;
                Ok(None)
            }
        }
    }

    /// Append `count` and flush if the window is now full.
    pub fn process(&self, count: u32) -> Result<Option<Sample>> {
        let mut window = self.lock()?;
        Ok(self.push_locked(&mut window, count))
    }

    /// Record the latest per-frame count for the next `tick`.
    pub fn observe(&self, count: u32) -> Result<()> {
        self.lock()?.latest = Some(count);
        Ok(())
    }

    /// Timer trigger: append the latest unread observation, flushing when full.
    ///
    /// Without a new observation since the previous tick nothing is appended.
    pub fn tick(&self) -> Result<Option<Sample>> {
        let mut window = self.lock()?;
        match window.latest.take() {
            Some(count) => Ok(self.push_locked(&mut window, count)),
            None => Ok(None),
        }
    }

    /// Counts currently buffered.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.lock()?.counts.len())
    }

    fn push_locked(&self, window: &mut Window, count: u32) -> Option<Sample> {
        window.counts.push(count);
        if window.counts.len() < self.limit {
            return None;
        }
        let counts = std::mem::replace(&mut window.counts, Vec::with_capacity(self.limit));
        let statistic = order_statistic(&counts)?;
        Some(Sample {
            counts,
            statistic,
            timestamp: Local::now(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Window>> {
        self.window
            .lock()
            .map_err(|_| anyhow!("aggregation window lock poisoned"))
    }
}
