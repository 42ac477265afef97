use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::{HistoryConfig, DEFAULT_CAPACITY};
use crate::dic_cache::DicCache;
use crate::entry::Entry;
use crate::fingerprint;
use crate::message::{self, HistoryMessage, HistoryRecord};
use crate::migrate::migrate_next_entries;
use crate::storage::{BlobStorage, FileStorage};

/// Which job occupies the background slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackgroundTask {
    Load,
    Save,
}

struct HistoryState {
    cache: DicCache<Entry>,
    /// In-memory state differs from the last successful save/load.
    needs_sync: bool,
}

struct Shared {
    state: Mutex<HistoryState>,
    canceled: AtomicBool,
    storage: Box<dyn BlobStorage>,
    capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> bool {
        let path = self.storage.path().display().to_string();
        let raw = match self.storage.load() {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No user history at {}", path);
                return false;
            }
            Err(e) => {
                warn!("Failed to read user history {}: {}", path, e);
                return false;
            }
        };
        let mut message = match message::decode(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!("Malformed user history {}: {:#}", path, e);
                return false;
            }
        };
        migrate_next_entries(&mut message.entries);

        // Oldest first: the last inserted record ends up most recently used.
        let total = message.entries.len();
        let mut cache = DicCache::new(self.capacity);
        let mut dropped = 0usize;
        for record in message.entries {
            match record.into_entry() {
                Some(entry) => {
                    cache.insert_value(entry.fingerprint(), entry);
                }
                None => dropped += 1,
            }
            if self.canceled.load(Ordering::Acquire) {
                // The file holds history the live cache lacks. Edits made
                // while loading must not overwrite it on the final save.
                self.lock().needs_sync = false;
                info!("User history load canceled");
                return false;
            }
        }

        let mut state = self.lock();
        state.cache = cache;
        state.needs_sync = false;
        if dropped > 0 {
            warn!("Dropped {} invalid user history entries", dropped);
        }
        info!("Loaded {} of {} user history entries from {}", state.cache.len(), total, path);
        true
    }

    fn save(&self) -> bool {
        let mut entries: Vec<HistoryRecord> = {
            let mut state = self.lock();
            if !state.needs_sync {
                return true;
            }
            state.needs_sync = false;
            state
                .cache
                .iter()
                .take(self.capacity)
                .map(|(_, entry)| HistoryRecord::from_entry(entry))
                .collect()
        };
        entries.reverse();

        let count = entries.len();
        let result = if entries.is_empty() {
            self.storage.remove().context("removing empty user history")
        } else {
            message::encode(&HistoryMessage { entries }).and_then(|bytes| {
                self.storage.save(&bytes).context("writing user history")
            })
        };

        match result {
            Ok(()) => {
                debug!("Saved {} user history entries to {}", count, self.storage.path().display());
                true
            }
            Err(e) => {
                warn!("Failed to save user history to {}: {:#}", self.storage.path().display(), e);
                self.lock().needs_sync = true;
                false
            }
        }
    }
}

/// Write handle to one cache entry. Holds the store lock until dropped, so
/// the entry cannot be evicted or erased while the snapshot is alive.
pub struct EntrySnapshot<'a> {
    guard: MutexGuard<'a, HistoryState>,
    fp: u64,
}

impl EntrySnapshot<'_> {
    pub fn fingerprint(&self) -> u64 {
        self.fp
    }

    pub fn get(&self) -> Option<&Entry> {
        self.guard.cache.peek(self.fp)
    }

    pub fn get_mut(&mut self) -> Option<&mut Entry> {
        self.guard.cache.peek_mut(self.fp)
    }

    pub fn is_none(&self) -> bool {
        !self.guard.cache.contains(self.fp)
    }
}

/// Read handle to one cache entry (or nothing). Holds the store lock.
pub struct ConstEntrySnapshot<'a> {
    guard: MutexGuard<'a, HistoryState>,
    fp: Option<u64>,
}

impl ConstEntrySnapshot<'_> {
    pub fn fingerprint(&self) -> Option<u64> {
        self.fp
    }

    pub fn get(&self) -> Option<&Entry> {
        self.fp.and_then(|fp| self.guard.cache.peek(fp))
    }

    pub fn is_none(&self) -> bool {
        self.get().is_none()
    }
}

/// The single background slot. `running` stays set until the task has been
/// joined, also while a waiter holds the handle outside the lock.
#[derive(Default)]
struct TaskSlot {
    running: Option<BackgroundTask>,
    handle: Option<JoinHandle<bool>>,
}

impl TaskSlot {
    fn is_busy(&self) -> bool {
        match (&self.running, &self.handle) {
            (None, _) => false,
            (Some(_), Some(handle)) => !handle.is_finished(),
            (Some(_), None) => true,
        }
    }
}

fn join_task(kind: BackgroundTask, handle: JoinHandle<bool>) {
    if handle.join().is_err() {
        warn!("Background user history {:?} panicked", kind);
    }
}

/// Persistent LRU store of accepted conversions.
///
/// Construction schedules a background load; dropping the store cancels an
/// in-flight load, waits for the background task and saves synchronously.
pub struct UserHistoryStore {
    shared: Arc<Shared>,
    task: Mutex<TaskSlot>,
    task_done: Condvar,
}

impl UserHistoryStore {
    /// Store backed by [`FileStorage`] at `path` with the default capacity.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_storage(Box::new(FileStorage::new(path)), DEFAULT_CAPACITY)
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::with_storage(Box::new(FileStorage::new(config.resolved_path())), config.capacity)
    }

    pub fn with_storage(storage: Box<dyn BlobStorage>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let store = UserHistoryStore {
            shared: Arc::new(Shared {
                state: Mutex::new(HistoryState {
                    cache: DicCache::new(capacity),
                    needs_sync: false,
                }),
                canceled: AtomicBool::new(false),
                storage,
                capacity,
            }),
            task: Mutex::new(TaskSlot::default()),
            task_done: Condvar::new(),
        };
        store.async_load();
        store
    }

    pub fn fingerprint(key: &str, value: &str) -> u64 {
        fingerprint::fingerprint(key, value)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Replace the cache with the persisted history. False on any failure,
    /// leaving the cache as it was.
    pub fn load(&self) -> bool {
        self.shared.load()
    }

    /// Persist the cache if dirty. True when nothing needed saving.
    pub fn save(&self) -> bool {
        self.shared.save()
    }

    /// Schedule a load unless a background task is already running.
    pub fn async_load(&self) -> bool {
        self.schedule(BackgroundTask::Load)
    }

    /// Schedule a save if dirty and no background task is running.
    pub fn async_save(&self) -> bool {
        if !self.shared.lock().needs_sync {
            return false;
        }
        self.schedule(BackgroundTask::Save)
    }

    /// Block until the background task, if any, finishes. The slot stays
    /// occupied until the join completes.
    pub fn wait(&self) {
        let mut slot = self.task_slot();
        loop {
            let Some(kind) = slot.running else {
                return;
            };
            match slot.handle.take() {
                Some(handle) => {
                    drop(slot);
                    join_task(kind, handle);
                    let mut slot = self.task_slot();
                    slot.running = None;
                    self.task_done.notify_all();
                    return;
                }
                // another waiter is joining it
                None => {
                    slot = self
                        .task_done
                        .wait(slot)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// The background task still running, if any.
    pub fn running_task(&self) -> Option<BackgroundTask> {
        let slot = self.task_slot();
        if slot.is_busy() {
            slot.running
        } else {
            None
        }
    }

    fn task_slot(&self) -> MutexGuard<'_, TaskSlot> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(&self, kind: BackgroundTask) -> bool {
        let mut slot = self.task_slot();
        if slot.is_busy() {
            debug!("User history {:?} still running, not scheduling {:?}", slot.running, kind);
            return false;
        }
        if let (Some(done), Some(handle)) = (slot.running.take(), slot.handle.take()) {
            join_task(done, handle);
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("user-history".into())
            .spawn(move || match kind {
                BackgroundTask::Load => shared.load(),
                BackgroundTask::Save => shared.save(),
            });
        match spawned {
            Ok(handle) => {
                slot.running = Some(kind);
                slot.handle = Some(handle);
                true
            }
            Err(e) => {
                warn!("Failed to spawn user history {:?}: {}", kind, e);
                false
            }
        }
    }

    /// Drop every entry and persist the empty history (deletes the file).
    pub fn clear(&self) -> bool {
        {
            let mut state = self.shared.lock();
            state.cache = DicCache::new(self.shared.capacity);
            state.needs_sync = true;
        }
        self.save()
    }

    /// Insert or replace `entry`, keyed by its fingerprint. Entries with an
    /// empty key or value are ignored.
    pub fn insert(&self, entry: Entry) -> bool {
        if entry.key.is_empty() || entry.value.is_empty() {
            debug!("Ignoring user history entry with empty key or value");
            return false;
        }
        let mut state = self.shared.lock();
        state.needs_sync = true;
        state.cache.insert_value(entry.fingerprint(), entry);
        true
    }

    /// Slot for `fp`, created empty when missing. The caller fills it in.
    pub fn insert_fp(&self, fp: u64) -> EntrySnapshot<'_> {
        let mut guard = self.shared.lock();
        guard.needs_sync = true;
        guard.cache.insert(fp);
        EntrySnapshot { guard, fp }
    }

    /// Promotes `fp` when present and marks the store dirty.
    pub fn mutable_lookup(&self, fp: u64) -> EntrySnapshot<'_> {
        let mut guard = self.shared.lock();
        guard.needs_sync = true;
        guard.cache.mutable_lookup_without_insert(fp);
        EntrySnapshot { guard, fp }
    }

    /// Promotes `fp` when present; does not mark the store dirty.
    pub fn lookup(&self, fp: u64) -> ConstEntrySnapshot<'_> {
        let mut guard = self.shared.lock();
        let fp = guard.cache.lookup_without_insert(fp).map(|_| fp);
        ConstEntrySnapshot { guard, fp }
    }

    /// Most recently used entry. Does not reorder.
    pub fn head(&self) -> ConstEntrySnapshot<'_> {
        let guard = self.shared.lock();
        let fp = guard.cache.head_key();
        ConstEntrySnapshot { guard, fp }
    }

    pub fn erase(&self, fps: &[u64]) {
        let mut state = self.shared.lock();
        state.needs_sync = true;
        for &fp in fps {
            state.cache.erase(fp);
        }
    }

    /// Erase entries last used before `timestamp` (unix seconds). Returns how
    /// many were removed.
    pub fn erase_entries_before(&self, timestamp: u64) -> usize {
        let mut state = self.shared.lock();
        let stale: Vec<u64> = state
            .cache
            .iter()
            .filter(|(_, e)| e.last_access_time < timestamp)
            .map(|(fp, _)| fp)
            .collect();
        for &fp in &stale {
            state.cache.erase(fp);
        }
        if !stale.is_empty() {
            state.needs_sync = true;
        }
        stale.len()
    }

    /// Visit entries most recently used first, without reordering.
    pub fn for_each<F: FnMut(u64, &Entry)>(&self, mut visitor: F) {
        let state = self.shared.lock();
        for (fp, entry) in state.cache.iter() {
            visitor(fp, entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().cache.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().cache.len()
    }

    pub fn needs_sync(&self) -> bool {
        self.shared.lock().needs_sync
    }
}

impl Drop for UserHistoryStore {
    fn drop(&mut self) {
        self.shared.canceled.store(true, Ordering::Release);
        self.wait();
        self.save();
    }
}
