//! Memo History
//!
//! Bounded, ordered window of the most recent decoded memos.
//! The window is persisted as a JSON list of `{time, memo, addr}` records,
//! overwritten in full on every update and reloaded verbatim at startup.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::publisher::write_atomic;

/// Default number of memos kept in the window
pub const DEFAULT_HISTORY_LEN: usize = 5;

/// Errors that can occur while loading or persisting history
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Failed to read history file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("History file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write history file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One decoded memo
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoEntry {
    /// Unix timestamp in seconds
    pub time: i64,
    #[serde(rename = "memo")]
    pub text: String,
    #[serde(rename = "addr")]
    pub address: String,
}

impl MemoEntry {
    pub fn new(time: i64, text: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            time,
            text: text.into(),
            address: address.into(),
        }
    }
}

/// Bounded memo history, sole owner of the window
#[derive(Debug)]
pub struct HistoryStore {
    entries: VecDeque<MemoEntry>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl HistoryStore {
    /// Create an empty store
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of entries kept
    /// * `path` - Where the window is persisted; `None` keeps it in memory only
    pub fn new(capacity: usize, path: Option<PathBuf>) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            path,
        }
    }

    /// Load the persisted window
    ///
    /// A missing file starts an empty history. An unreadable or malformed
    /// file is an error; callers treat it as fatal at startup.
    pub fn load(capacity: usize, path: Option<PathBuf>) -> Result<Self, HistoryError> {
        let mut store = Self::new(capacity, path);
        let Some(path) = store.path.clone() else {
            return Ok(store);
        };

        if !path.exists() {
            info!(path = %path.display(), "No memo history found, starting empty");
            return Ok(store);
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| HistoryError::Read {
            path: path.clone(),
            source,
        })?;
        let entries: Vec<MemoEntry> =
            serde_json::from_str(&contents).map_err(|source| HistoryError::Corrupt {
                path: path.clone(),
                source,
            })?;

        if entries.len() > capacity {
            warn!(
                loaded = entries.len(),
                capacity, "History file holds more entries than the window, keeping the newest"
            );
        }
        store.entries = bounded(entries, capacity);
        info!(path = %path.display(), entries = store.entries.len(), "Loaded memo history");
        Ok(store)
    }

    /// Window that would result from appending `entry`, without committing it
    pub fn preview(&self, entry: &MemoEntry) -> Vec<MemoEntry> {
        bounded(
            self.entries.iter().cloned().chain(std::iter::once(entry.clone())),
            self.capacity,
        )
        .into()
    }

    /// Append an entry, evict the oldest beyond capacity, then persist
    ///
    /// The in-memory window only changes once the file write succeeded.
    pub fn append(&mut self, entry: MemoEntry) -> Result<(), HistoryError> {
        let mut next = self.entries.clone();
        next.push_back(entry);
        while next.len() > self.capacity {
            next.pop_front();
        }

        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        self.entries = next;
        debug!(entries = self.entries.len(), "History updated");
        Ok(())
    }

    /// Write the current window to the configured path, if any
    pub fn persist(&self) -> Result<(), HistoryError> {
        match &self.path {
            Some(path) => persist(path, &self.entries),
            None => Ok(()),
        }
    }

    /// Entries oldest first
    pub fn entries(&self) -> &VecDeque<MemoEntry> {
        &self.entries
    }

    /// Owned copy of the window, oldest first
    pub fn snapshot(&self) -> Vec<MemoEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn bounded(entries: impl IntoIterator<Item = MemoEntry>, capacity: usize) -> VecDeque<MemoEntry> {
    let mut window: VecDeque<MemoEntry> = entries.into_iter().collect();
    while window.len() > capacity {
        window.pop_front();
    }
    window
}

fn persist(path: &Path, entries: &VecDeque<MemoEntry>) -> Result<(), HistoryError> {
    let json = serde_json::to_vec(entries)?;
    write_atomic(path, &json).map_err(|source| HistoryError::Write {
        path: path.to_path_buf(),
        source,
    })
}
