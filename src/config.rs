use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Reference capacity of the history cache.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[cfg(windows)]
const DEFAULT_FILENAME: &str = "user_history.db";
#[cfg(not(windows))]
const DEFAULT_FILENAME: &str = ".user_history.db";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Backing file. None resolves to [`default_history_path`].
    pub path: Option<PathBuf>,
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig { path: None, capacity: DEFAULT_CAPACITY }
    }
}

impl HistoryConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("parsing history config")
    }

    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_history_path)
    }
}

/// Platform default: a dotfile in $HOME on POSIX, a plain file under the
/// local app-data directory on Windows. Falls back to the working directory.
pub fn default_history_path() -> PathBuf {
    let base = if cfg!(windows) { dirs::data_local_dir() } else { dirs::home_dir() };
    base.unwrap_or_else(|| PathBuf::from(".")).join(DEFAULT_FILENAME)
}
