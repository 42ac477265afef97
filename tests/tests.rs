#[cfg(test)]
mod store_tests {
    use ime_user_history::message::{self, HistoryMessage, HistoryRecord};
    use ime_user_history::{Entry, MemoryStorage, UserHistoryStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn entry(key: &str, value: &str, freq: u32) -> Entry {
        let mut e = Entry::new(key, value);
        e.suggestion_freq = freq;
        e
    }

    fn open(storage: &Arc<MemoryStorage>, capacity: usize) -> UserHistoryStore {
        let store = UserHistoryStore::with_storage(Box::new(Arc::clone(storage)), capacity);
        store.wait();
        store
    }

    fn keys_mru_first(store: &UserHistoryStore) -> Vec<String> {
        let mut keys = Vec::new();
        store.for_each(|_, e| keys.push(e.key.clone()));
        keys
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 100);
        for i in 0..105 {
            assert!(store.insert(entry(&format!("k{}", i), &format!("v{}", i), 1)));
        }
        assert_eq!(store.len(), 100);
        for i in 0..5 {
            let fp = UserHistoryStore::fingerprint(&format!("k{}", i), &format!("v{}", i));
            assert!(store.lookup(fp).is_none(), "k{} should be evicted", i);
        }
        for i in 5..105 {
            let fp = UserHistoryStore::fingerprint(&format!("k{}", i), &format!("v{}", i));
            assert!(store.lookup(fp).get().is_some());
        }
    }

    #[test]
    fn test_save_only_when_dirty() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 10);
        assert!(store.save());
        assert_eq!(storage.save_count(), 0);

        store.insert(entry("a", "A", 1));
        assert!(store.needs_sync());
        assert!(store.save());
        assert!(!store.needs_sync());
        assert!(store.save());
        assert_eq!(storage.save_count(), 1);

        // reads do not dirty the store
        let fp = UserHistoryStore::fingerprint("a", "A");
        assert!(store.lookup(fp).get().is_some());
        assert!(store.head().get().is_some());
        assert!(store.save());
        assert_eq!(storage.save_count(), 1);

        store.insert(entry("b", "B", 1));
        assert!(store.save());
        assert_eq!(storage.save_count(), 2);
    }

    #[test]
    fn test_save_writes_oldest_first() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 10);
        store.insert(entry("a", "A", 1));
        store.insert(entry("b", "B", 1));
        store.insert(entry("c", "C", 1));
        // touching a makes it the newest
        assert!(store.lookup(UserHistoryStore::fingerprint("a", "A")).get().is_some());
        store.insert(entry("d", "D", 1));
        assert!(store.save());

        let msg = message::decode(&storage.blob().unwrap()).unwrap();
        let keys: Vec<Vec<u8>> = msg.entries.iter().map(|r| r.key.to_vec()).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"a".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn test_reload_restores_recency_and_head() {
        let storage = Arc::new(MemoryStorage::new());
        let expected;
        {
            let store = open(&storage, 10);
            for i in 0..8 {
                let mut e = entry(&format!("k{}", i), &format!("v{}", i), i);
                e.add_next_entry_fp(UserHistoryStore::fingerprint("k0", "v0"));
                store.insert(e);
            }
            store.lookup(UserHistoryStore::fingerprint("k3", "v3"));
            store.insert(entry("k5", "v5", 50));
            assert!(store.save());
            expected = keys_mru_first(&store);
        }
        let store = open(&storage, 10);
        assert_eq!(keys_mru_first(&store), expected);
        let head = store.head();
        let head = head.get().unwrap();
        assert_eq!((head.key.as_str(), head.suggestion_freq), ("k5", 50));
        assert_eq!(head.next_entry_fps, Vec::<u64>::new());
    }

    #[test]
    fn test_load_drops_invalid_entries() {
        let mut bad_text = HistoryRecord::from_entry(&entry("k", "x", 1));
        bad_text.value = serde_bytes::ByteBuf::from(vec![0xc3, 0x28]);
        let entries = vec![
            HistoryRecord::from_entry(&entry("empty", "", 3)),
            bad_text,
            HistoryRecord::from_entry(&entry("ok", "OK", 2)),
        ];
        let blob = message::encode(&HistoryMessage { entries }).unwrap();
        let storage = Arc::new(MemoryStorage::with_blob(blob));
        let store = open(&storage, 10);

        assert!(store.load());
        assert_eq!(store.len(), 1);
        let head = store.head();
        assert_eq!(head.get().map(|e| e.key.as_str()), Some("ok"));
    }

    #[test]
    fn test_failed_load_keeps_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 10);
        store.insert(entry("a", "A", 1));

        assert!(!store.load());
        storage.set_blob(Some(vec![0xff, 0x01, 0x02]));
        assert!(!store.load());
        assert_eq!(store.len(), 1);
        assert!(store.needs_sync());
    }

    #[test]
    fn test_failed_save_stays_dirty() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 10);
        store.insert(entry("a", "A", 1));
        storage.fail_saves.store(true, Ordering::SeqCst);
        assert!(!store.save());
        assert!(store.needs_sync());
        storage.fail_saves.store(false, Ordering::SeqCst);
        assert!(store.save());
        assert!(storage.blob().is_some());
    }

    #[test]
    fn test_async_save_requires_dirty() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 10);
        assert!(!store.async_save());
        store.insert(entry("a", "A", 1));
        assert!(store.async_save());
        store.wait();
        assert_eq!(storage.save_count(), 1);
        assert!(!store.needs_sync());
        assert!(!store.async_save());
    }

    #[test]
    fn test_drop_during_load_keeps_persisted_history() {
        let entries = (0..50_000)
            .map(|i| HistoryRecord::from_entry(&entry(&format!("k{}", i), &format!("v{}", i), 1)))
            .collect();
        let blob = message::encode(&HistoryMessage { entries }).unwrap();
        let storage = Arc::new(MemoryStorage::with_blob(blob));
        {
            let store = UserHistoryStore::with_storage(Box::new(Arc::clone(&storage)), 100_000);
            store.insert(entry("typed", "early", 1));
        }
        // either the load finished first or the early edit was discarded
        let msg = message::decode(&storage.blob().unwrap()).unwrap();
        assert!(msg.entries.len() >= 50_000);
    }

    #[test]
    fn test_drop_saves_pending_changes() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let store = open(&storage, 10);
            store.insert(entry("a", "A", 7));
        }
        assert_eq!(storage.save_count(), 1);
        let store = open(&storage, 10);
        let snap = store.lookup(UserHistoryStore::fingerprint("a", "A"));
        assert_eq!(snap.get().map(|e| e.suggestion_freq), Some(7));
    }

    #[test]
    fn test_clear_removes_blob() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 10);
        store.insert(entry("a", "A", 1));
        assert!(store.save());
        assert!(storage.blob().is_some());
        assert!(store.clear());
        assert!(store.is_empty());
        assert!(storage.blob().is_none());
        assert_eq!(storage.save_count(), 1);
    }

    #[test]
    fn test_insert_fp_and_mutable_lookup() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 10);
        let fp = UserHistoryStore::fingerprint("kyou", "今日");
        {
            let mut snap = store.insert_fp(fp);
            let e = snap.get_mut().unwrap();
            e.key = "kyou".into();
            e.value = "今日".into();
        }
        {
            let mut snap = store.mutable_lookup(fp);
            snap.get_mut().unwrap().record_use();
        }
        assert!(store.mutable_lookup(12345).is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup(fp).get().map(|e| e.suggestion_freq), Some(1));
    }

    #[test]
    fn test_erase() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 10);
        let mut fps = Vec::new();
        for (i, t) in [100u64, 200, 300].iter().enumerate() {
            let mut e = entry(&format!("k{}", i), "v", 1);
            e.touch(*t);
            fps.push(e.fingerprint());
            store.insert(e);
        }
        assert!(store.save());
        assert_eq!(store.erase_entries_before(250), 2);
        assert!(store.needs_sync());
        assert_eq!(keys_mru_first(&store), vec!["k2".to_string()]);

        store.erase(&[fps[2], 999]);
        assert!(store.is_empty());
        assert!(store.head().is_none());
    }

    #[test]
    fn test_snapshot_blocks_concurrent_eviction() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 1);
        store.insert(entry("a", "A", 1));
        let fp_a = UserHistoryStore::fingerprint("a", "A");
        let inserted = AtomicBool::new(false);

        std::thread::scope(|s| {
            let mut snap = store.mutable_lookup(fp_a);
            let writer = s.spawn(|| {
                store.insert(entry("b", "B", 1));
                inserted.store(true, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(100));
            assert!(!inserted.load(Ordering::SeqCst));
            snap.get_mut().unwrap().suggestion_freq = 42;
            assert_eq!(snap.get().map(|e| e.suggestion_freq), Some(42));
            drop(snap);
            writer.join().unwrap();
        });

        assert!(inserted.load(Ordering::SeqCst));
        assert!(store.lookup(fp_a).is_none());
        assert!(store.lookup(UserHistoryStore::fingerprint("b", "B")).get().is_some());
    }

    #[test]
    fn test_insert_rejects_empty() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage, 10);
        assert!(!store.insert(entry("", "A", 1)));
        assert!(!store.insert(entry("a", "", 1)));
        assert!(store.is_empty());
        assert!(!store.needs_sync());
    }
}

#[cfg(test)]
mod file_tests {
    use ime_user_history::{Entry, HistoryConfig, UserHistoryStore};
    use rand::{distributions::Alphanumeric, Rng};
    use tempfile::tempdir;

    fn random_word() -> String {
        rand::thread_rng().sample_iter(&Alphanumeric).take(12).map(char::from).collect()
    }

    fn triples(store: &UserHistoryStore) -> Vec<(String, String, u32)> {
        let mut out = Vec::new();
        store.for_each(|_, e| out.push((e.key.clone(), e.value.clone(), e.suggestion_freq)));
        out
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".user_history.db");
        let (expected, last_key) = {
            let store = UserHistoryStore::new(&path);
            store.wait();
            let mut last = String::new();
            for i in 0..200u32 {
                let mut e = Entry::new(random_word(), random_word());
                e.suggestion_freq = i;
                last = e.key.clone();
                store.insert(e);
            }
            assert!(store.save());
            (triples(&store), last)
        };
        assert!(path.exists());

        let store = UserHistoryStore::new(&path);
        store.wait();
        assert_eq!(triples(&store), expected);
        assert_eq!(store.head().get().map(|e| e.key.clone()), Some(last_key));
    }

    #[test]
    fn test_file_capacity_from_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.db");
        let config = HistoryConfig { path: Some(path.clone()), capacity: 3 };
        {
            let store = UserHistoryStore::from_config(&config);
            store.wait();
            for i in 0..5 {
                store.insert(Entry::new(format!("k{}", i), "v"));
            }
            assert_eq!(store.len(), 3);
        }
        let store = UserHistoryStore::from_config(&config);
        store.wait();
        assert_eq!(store.capacity(), 3);
        let keys: Vec<String> = triples(&store).into_iter().map(|t| t.0).collect();
        assert_eq!(keys, vec!["k4", "k3", "k2"]);

        assert!(store.clear());
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_or_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.db");
        let store = UserHistoryStore::new(&path);
        store.wait();
        assert!(!store.load());
        assert!(store.is_empty());

        std::fs::write(&path, b"definitely not a history file").unwrap();
        assert!(!store.load());
        assert!(store.is_empty());
    }
}
