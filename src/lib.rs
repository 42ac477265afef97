//! ime_user_history: persistent LRU store of accepted input-method conversions
//!
//! Entries are keyed by a content fingerprint of (reading, surface form) and
//! kept in a bounded recency cache that is saved oldest-first so a reload
//! restores the same recency order.

pub mod fingerprint;
pub mod dic_cache;
pub mod entry;
pub mod message;
pub mod migrate;
pub mod storage;
pub mod config;
pub mod history_store;

pub use config::HistoryConfig;
pub use dic_cache::DicCache;
pub use entry::Entry;
pub use history_store::{BackgroundTask, ConstEntrySnapshot, EntrySnapshot, UserHistoryStore};
pub use storage::{BlobStorage, FileStorage, MemoryStorage};
