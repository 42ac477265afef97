// On-disk history message. Encoded with bincode; key/value stay raw bytes
// so one record with bad text can be dropped without failing the parse.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::entry::{Entry, MAX_NEXT_ENTRIES};

/// Deprecated successor reference, keyed by the legacy 32-bit fingerprint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyNextEntry {
    pub entry_fp: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub key: ByteBuf,
    pub value: ByteBuf,
    pub suggestion_freq: u32,
    /// Deprecated, merged into suggestion_freq on load. Always written as 0.
    pub conversion_freq: u32,
    pub next_entry_fps: Vec<u64>,
    /// Deprecated, rewritten into next_entry_fps by the migrator.
    pub next_entries_deprecated: Vec<LegacyNextEntry>,
    pub last_access_time: u64,
}

impl HistoryRecord {
    pub fn from_entry(entry: &Entry) -> Self {
        HistoryRecord {
            key: ByteBuf::from(entry.key.as_bytes().to_vec()),
            value: ByteBuf::from(entry.value.as_bytes().to_vec()),
            suggestion_freq: entry.suggestion_freq,
            conversion_freq: 0,
            next_entry_fps: entry.next_entry_fps.clone(),
            next_entries_deprecated: Vec::new(),
            last_access_time: entry.last_access_time,
        }
    }

    /// Non-empty key and value, both valid UTF-8.
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty()
            && !self.value.is_empty()
            && std::str::from_utf8(&self.key).is_ok()
            && std::str::from_utf8(&self.value).is_ok()
    }

    /// Convert into an in-memory entry. None if key or value is empty or
    /// not valid UTF-8. Successors beyond MAX_NEXT_ENTRIES are trimmed from
    /// the oldest end.
    pub fn into_entry(self) -> Option<Entry> {
        if self.key.is_empty() || self.value.is_empty() {
            return None;
        }
        let key = String::from_utf8(self.key.into_vec()).ok()?;
        let value = String::from_utf8(self.value.into_vec()).ok()?;
        let mut next_entry_fps = self.next_entry_fps;
        if next_entry_fps.len() > MAX_NEXT_ENTRIES {
            let excess = next_entry_fps.len() - MAX_NEXT_ENTRIES;
            next_entry_fps.drain(..excess);
        }
        Some(Entry {
            key,
            value,
            suggestion_freq: self.suggestion_freq.max(self.conversion_freq),
            next_entry_fps,
            last_access_time: self.last_access_time,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Oldest first.
    pub entries: Vec<HistoryRecord>,
}

pub fn encode(message: &HistoryMessage) -> anyhow::Result<Vec<u8>> {
    bincode::serialize(message).context("encoding history message")
}

pub fn decode(bytes: &[u8]) -> anyhow::Result<HistoryMessage> {
    bincode::deserialize(bytes).context("decoding history message")
}
