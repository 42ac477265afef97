// Rewrites successor references from the legacy 32-bit fingerprint to the
// 64-bit one. Runs on every load; a no-op once nothing legacy remains.

use fxhash::FxHashMap;
use tracing::{debug, info};

use crate::fingerprint::{fingerprint_bytes, legacy_fingerprint32_bytes};
use crate::message::HistoryRecord;

/// Migrate `records` in place. Returns how many records carried legacy
/// references (0 means nothing was done).
pub fn migrate_next_entries(records: &mut [HistoryRecord]) -> usize {
    let legacy = records
        .iter()
        .filter(|r| !r.next_entries_deprecated.is_empty())
        .count();
    if legacy == 0 {
        return 0;
    }

    let mut fp32_to_fp: FxHashMap<u32, u64> = FxHashMap::default();
    for r in records.iter().filter(|r| r.is_valid()) {
        fp32_to_fp.insert(
            legacy_fingerprint32_bytes(&r.key, &r.value),
            fingerprint_bytes(&r.key, &r.value),
        );
    }

    let mut dropped = 0usize;
    for r in records.iter_mut() {
        for old in std::mem::take(&mut r.next_entries_deprecated) {
            match fp32_to_fp.get(&old.entry_fp) {
                Some(&fp) => {
                    if !r.next_entry_fps.contains(&fp) {
                        r.next_entry_fps.push(fp);
                    }
                }
                None => dropped += 1,
            }
        }
    }

    if dropped > 0 {
        debug!("Dropped {} legacy references with no target", dropped);
    }
    info!("Migrated next-entry references of {} history entries", legacy);
    legacy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::fingerprint::{fingerprint, legacy_fingerprint32};
    use crate::message::LegacyNextEntry;

    fn record(key: &str, value: &str, next: &[(&str, &str)]) -> HistoryRecord {
        let mut r = HistoryRecord::from_entry(&Entry::new(key, value));
        r.next_entries_deprecated = next
            .iter()
            .map(|(k, v)| LegacyNextEntry { entry_fp: legacy_fingerprint32(k, v) })
            .collect();
        r
    }

    #[test]
    fn test_translates_legacy_refs() {
        let mut records = vec![
            record("a", "A", &[("b", "B"), ("gone", "GONE")]),
            record("b", "B", &[("a", "A")]),
            record("c", "C", &[]),
            record("bad", "", &[]),
            record("d", "D", &[("bad", "")]),
        ];
        assert_eq!(migrate_next_entries(&mut records), 3);
        assert_eq!(records[0].next_entry_fps, vec![fingerprint("b", "B")]);
        assert_eq!(records[1].next_entry_fps, vec![fingerprint("a", "A")]);
        assert!(records[2].next_entry_fps.is_empty());
        assert!(records[4].next_entry_fps.is_empty());
        assert!(records.iter().all(|r| r.next_entries_deprecated.is_empty()));
    }

    #[test]
    fn test_migration_is_idempotent() {
        let mut records = vec![record("a", "A", &[("b", "B")]), record("b", "B", &[("a", "A")])];
        migrate_next_entries(&mut records);
        let once = records.clone();
        assert_eq!(migrate_next_entries(&mut records), 0);
        assert_eq!(records, once);
    }

    #[test]
    fn test_keeps_existing_refs() {
        let mut records = vec![record("a", "A", &[("b", "B")]), record("b", "B", &[])];
        records[0].next_entry_fps.push(fingerprint("b", "B"));
        migrate_next_entries(&mut records);
        assert_eq!(records[0].next_entry_fps, vec![fingerprint("b", "B")]);
    }
}
