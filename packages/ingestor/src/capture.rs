//! Capture Archive
//!
//! Records matched raw transactions during a live run and plays them back
//! in a later run. A run either captures or replays, never both.
//!
//! Two archive layouts are supported:
//! - `Log`: a JSON list of feed records, rewritten wholesale on flush
//! - `Keyed`: a sled database keyed by transaction hash, with an arrival
//!   index so replay follows capture order

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use thiserror::Error;
use tracing::{debug, info};

use crate::decoder::FeedMessage;
use crate::publisher::write_atomic;

/// sled tree holding raw records keyed by transaction hash
const TRANSACTIONS_TREE: &str = "transactions";

/// sled tree mapping big-endian arrival sequence numbers to hashes
const ARRIVAL_TREE: &str = "arrival";

/// Errors that can occur while opening, recording or flushing an archive
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Replay requested but no archive path was configured")]
    NoArchivePath,

    #[error("Archive not found: {0}")]
    MissingArchive(PathBuf),

    #[error("Archive I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Archive {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Archive index entry is malformed: {0}")]
    CorruptIndex(String),

    #[error("Archive database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// On-disk archive layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ArchiveFormat {
    /// Ordered JSON list of feed records
    #[default]
    Log,
    /// Embedded database keyed by transaction hash
    Keyed,
}

/// What the archive is used for in this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// No archive configured
    Inactive,
    /// Matched transactions are recorded and flushed on shutdown
    Capture,
    /// The archive is the sole transaction source
    Replay,
}

/// Archive handle owned by the process controller
#[derive(Debug)]
pub struct CaptureStore {
    mode: CaptureMode,
    archive: Option<Archive>,
    pending: Vec<FeedMessage>,
    pending_hashes: HashSet<String>,
    replay: Vec<FeedMessage>,
}

#[derive(Debug)]
enum Archive {
    Log(PathBuf),
    Keyed(KeyedArchive),
}

impl CaptureStore {
    /// Store that records and replays nothing
    pub fn inactive() -> Self {
        Self {
            mode: CaptureMode::Inactive,
            archive: None,
            pending: Vec::new(),
            pending_hashes: HashSet::new(),
            replay: Vec::new(),
        }
    }

    /// Open the archive in the mode implied by `replay`
    ///
    /// In replay mode the whole archive is loaded here; a missing or
    /// malformed archive is an error. Without a path, capture is inactive.
    pub fn open(path: Option<&Path>, format: ArchiveFormat, replay: bool) -> Result<Self, CaptureError> {
        let Some(path) = path else {
            if replay {
                return Err(CaptureError::NoArchivePath);
            }
            return Ok(Self::inactive());
        };

        if replay && !path.exists() {
            return Err(CaptureError::MissingArchive(path.to_path_buf()));
        }

        let archive = match format {
            ArchiveFormat::Log => Archive::Log(path.to_path_buf()),
            ArchiveFormat::Keyed => Archive::Keyed(KeyedArchive::open(path)?),
        };

        let mut store = Self::inactive();
        if replay {
            store.replay = match &archive {
                Archive::Log(path) => load_log(path)?,
                Archive::Keyed(keyed) => keyed.load()?,
            };
            store.mode = CaptureMode::Replay;
            info!(path = %path.display(), ?format, transactions = store.replay.len(), "Loaded capture archive for replay");
        } else {
            store.mode = CaptureMode::Capture;
            info!(path = %path.display(), ?format, "Capturing matched transactions");
        }
        store.archive = Some(archive);
        Ok(store)
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn is_capturing(&self) -> bool {
        self.mode == CaptureMode::Capture
    }

    /// Number of records waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Record a matched transaction in memory; no-op unless capturing
    ///
    /// A transaction already recorded in this run is ignored.
    pub fn record(&mut self, message: &FeedMessage) {
        if !self.is_capturing() {
            return;
        }
        if self.pending_hashes.insert(message.x.hash.clone()) {
            self.pending.push(message.clone());
            debug!(hash = %message.x.hash, "Captured transaction");
        }
    }

    /// Take the loaded archive for replay, in capture order
    pub fn take_replay(&mut self) -> Vec<FeedMessage> {
        std::mem::take(&mut self.replay)
    }

    /// Write recorded transactions to the archive
    ///
    /// # Returns
    /// The number of records written
    pub fn flush(&mut self) -> Result<usize, CaptureError> {
        if !self.is_capturing() {
            return Ok(0);
        }
        let Some(archive) = &self.archive else {
            return Ok(0);
        };

        let written = match archive {
            Archive::Log(path) => {
                let json = serde_json::to_vec(&self.pending)?;
                write_atomic(path, &json).map_err(|source| CaptureError::Io {
                    path: path.clone(),
                    source,
                })?;
                self.pending.len()
            }
            Archive::Keyed(keyed) => {
                let written = keyed.store(&self.pending)?;
                self.pending.clear();
                self.pending_hashes.clear();
                written
            }
        };
        info!(written, "Flushed capture archive");
        Ok(written)
    }

    /// Flush (when capturing) and release the archive
    pub fn close(mut self) -> Result<usize, CaptureError> {
        let written = self.flush()?;
        if let Some(Archive::Keyed(keyed)) = self.archive.take() {
            keyed.db.flush()?;
        }
        Ok(written)
    }
}

fn load_log(path: &Path) -> Result<Vec<FeedMessage>, CaptureError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CaptureError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| CaptureError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

struct KeyedArchive {
    db: sled::Db,
    transactions: sled::Tree,
    arrival: sled::Tree,
}

impl std::fmt::Debug for KeyedArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedArchive")
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

impl KeyedArchive {
    fn open(path: &Path) -> Result<Self, CaptureError> {
        let db = sled::open(path)?;
        let transactions = db.open_tree(TRANSACTIONS_TREE)?;
        let arrival = db.open_tree(ARRIVAL_TREE)?;
        Ok(Self {
            db,
            transactions,
            arrival,
        })
    }

    fn next_sequence(&self) -> Result<u64, CaptureError> {
        match self.arrival.last()? {
            Some((key, _)) => Ok(decode_sequence(&key)? + 1),
            None => Ok(0),
        }
    }

    /// Add records not already stored under their hash
    fn store(&self, messages: &[FeedMessage]) -> Result<usize, CaptureError> {
        let mut seq = self.next_sequence()?;
        let mut transactions = sled::Batch::default();
        let mut arrival = sled::Batch::default();
        let mut seen = HashSet::new();
        let mut written = 0;

        for message in messages {
            let hash = message.x.hash.as_bytes();
            if self.transactions.contains_key(hash)? || !seen.insert(hash) {
                continue;
            }
            transactions.insert(hash.to_vec(), serde_json::to_vec(message)?);
            arrival.insert(seq.to_be_bytes().to_vec(), hash.to_vec());
            seq += 1;
            written += 1;
        }

        self.transactions.apply_batch(transactions)?;
        self.arrival.apply_batch(arrival)?;
        self.db.flush()?;
        Ok(written)
    }

    /// All records in arrival order
    fn load(&self) -> Result<Vec<FeedMessage>, CaptureError> {
        let mut messages = Vec::with_capacity(self.arrival.len());
        for item in self.arrival.iter() {
            let (_, hash) = item?;
            let raw = self.transactions.get(&hash)?.ok_or_else(|| {
                CaptureError::CorruptIndex(format!(
                    "no record for hash {}",
                    String::from_utf8_lossy(&hash)
                ))
            })?;
            messages.push(serde_json::from_slice(&raw)?);
        }
        Ok(messages)
    }
}

fn decode_sequence(key: &[u8]) -> Result<u64, CaptureError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| CaptureError::CorruptIndex(format!("sequence key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn message(i: u32) -> FeedMessage {
        FeedMessage::from_parts(
            &format!("hash{i}"),
            1000 + i as i64,
            "A",
            &["6a026d020568656c6c6f"],
        )
    }

    // ==================== mode selection tests ====================

    #[test]
    fn test_open_without_path_is_inactive() {
        let store = CaptureStore::open(None, ArchiveFormat::Log, false).unwrap();
        assert_eq!(store.mode(), CaptureMode::Inactive);
    }

    #[test]
    fn test_replay_without_path_fails() {
        let result = CaptureStore::open(None, ArchiveFormat::Log, true);
        assert!(matches!(result, Err(CaptureError::NoArchivePath)));
    }

    #[test]
    fn test_replay_missing_archive_fails() {
        let dir = tempdir().unwrap();
        for format in [ArchiveFormat::Log, ArchiveFormat::Keyed] {
            let result = CaptureStore::open(Some(&dir.path().join("none")), format, true);
            assert!(matches!(result, Err(CaptureError::MissingArchive(_))));
        }
    }

    #[test]
    fn test_inactive_store_ignores_records() {
        let mut store = CaptureStore::inactive();
        store.record(&message(1));
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.flush().unwrap(), 0);
    }

    // ==================== log archive tests ====================

    #[test]
    fn test_log_capture_then_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.json");

        let mut capture = CaptureStore::open(Some(&path), ArchiveFormat::Log, false).unwrap();
        assert!(capture.is_capturing());
        for i in 0..3 {
            capture.record(&message(i));
        }
        // Nothing is written until shutdown
        assert!(!path.exists());
        assert_eq!(capture.close().unwrap(), 3);

        let mut replay = CaptureStore::open(Some(&path), ArchiveFormat::Log, true).unwrap();
        assert_eq!(replay.mode(), CaptureMode::Replay);
        let messages = replay.take_replay();
        assert_eq!(messages, (0..3).map(message).collect::<Vec<_>>());
    }

    #[test]
    fn test_log_capture_records_transaction_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.json");
        let mut capture = CaptureStore::open(Some(&path), ArchiveFormat::Log, false).unwrap();

        capture.record(&message(1));
        capture.record(&message(1));
        assert_eq!(capture.pending_len(), 1);
    }

    #[test]
    fn test_log_replay_corrupt_archive_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.json");
        std::fs::write(&path, "[{\"op\": \"utx\"}]").unwrap();

        let result = CaptureStore::open(Some(&path), ArchiveFormat::Log, true);
        assert!(matches!(result, Err(CaptureError::Corrupt { .. })));
    }

    #[test]
    fn test_replay_store_never_flushes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.json");
        std::fs::write(&path, serde_json::to_string(&vec![message(1)]).unwrap()).unwrap();

        let mut replay = CaptureStore::open(Some(&path), ArchiveFormat::Log, true).unwrap();
        replay.record(&message(2));
        assert_eq!(replay.close().unwrap(), 0);

        let on_disk: Vec<FeedMessage> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec![message(1)]);
    }

    // ==================== keyed archive tests ====================

    #[test]
    fn test_keyed_capture_then_replay_preserves_arrival_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.db");

        let mut capture = CaptureStore::open(Some(&path), ArchiveFormat::Keyed, false).unwrap();
        for i in [3, 1, 2] {
            capture.record(&message(i));
        }
        assert_eq!(capture.close().unwrap(), 3);

        let mut replay = CaptureStore::open(Some(&path), ArchiveFormat::Keyed, true).unwrap();
        let hashes: Vec<_> = replay.take_replay().into_iter().map(|m| m.x.hash).collect();
        assert_eq!(hashes, vec!["hash3", "hash1", "hash2"]);
    }

    #[test]
    fn test_keyed_capture_extends_existing_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.db");

        let mut first = CaptureStore::open(Some(&path), ArchiveFormat::Keyed, false).unwrap();
        first.record(&message(1));
        first.record(&message(2));
        first.close().unwrap();

        let mut second = CaptureStore::open(Some(&path), ArchiveFormat::Keyed, false).unwrap();
        second.record(&message(2));
        second.record(&message(3));
        assert_eq!(second.close().unwrap(), 1);

        let mut replay = CaptureStore::open(Some(&path), ArchiveFormat::Keyed, true).unwrap();
        let hashes: Vec<_> = replay.take_replay().into_iter().map(|m| m.x.hash).collect();
        assert_eq!(hashes, vec!["hash1", "hash2", "hash3"]);
    }

    #[test]
    fn test_decode_sequence_rejects_bad_key() {
        assert_eq!(decode_sequence(&7u64.to_be_bytes()).unwrap(), 7);
        assert!(matches!(
            decode_sequence(&[1, 2, 3]),
            Err(CaptureError::CorruptIndex(_))
        ));
    }
}
