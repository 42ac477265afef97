use serde::Serialize;

use crate::fingerprint::fingerprint;

/// Upper bound on remembered successors per entry.
pub const MAX_NEXT_ENTRIES: usize = 4;

/// One remembered conversion: reading `key` accepted as surface form `value`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub key: String,
    pub value: String,
    /// Usage counter.
    pub suggestion_freq: u32,
    /// Fingerprints of entries that followed this one. Lookup keys only; a
    /// fingerprint with no live entry is simply not found.
    pub next_entry_fps: Vec<u64>,
    /// Unix timestamp (seconds) of the last time this entry was used.
    pub last_access_time: u64,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Entry {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn fingerprint(&self) -> u64 {
        fingerprint(&self.key, &self.value)
    }

    /// Record `fp` as a successor. Re-adding moves it to the newest position;
    /// only the newest MAX_NEXT_ENTRIES are kept.
    pub fn add_next_entry_fp(&mut self, fp: u64) {
        self.next_entry_fps.retain(|&f| f != fp);
        self.next_entry_fps.push(fp);
        if self.next_entry_fps.len() > MAX_NEXT_ENTRIES {
            let excess = self.next_entry_fps.len() - MAX_NEXT_ENTRIES;
            self.next_entry_fps.drain(..excess);
        }
    }

    pub fn touch(&mut self, now: u64) {
        self.last_access_time = now;
    }

    /// Bump usage and access time together.
    pub fn record_use(&mut self) {
        self.suggestion_freq = self.suggestion_freq.saturating_add(1);
        self.touch(now_secs());
    }
}

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
