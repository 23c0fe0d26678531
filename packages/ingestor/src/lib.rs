//! MemoScope Ingestor Library
//!
//! This crate provides components for watching unconfirmed Bitcoin Cash
//! transactions, picking out memo protocol posts and replies, and keeping
//! a small rendered HTML window of the most recent ones.

pub mod capture;
pub mod config;
pub mod decoder;
pub mod feed;
pub mod filter;
pub mod history;
pub mod monitor;
pub mod profile;
pub mod publisher;
pub mod render;
pub mod router;

// Re-export commonly used types
pub use capture::{ArchiveFormat, CaptureMode, CaptureStore};
pub use config::MonitorConfig;
pub use decoder::{decode_feed_message, decode_payload, DecodedMemo, FeedMessage, LossyPolicy};
pub use feed::{FeedConnection, TransactionSource};
pub use filter::{classify, get_action_name, is_memo_output, MemoAction};
pub use history::{HistoryStore, MemoEntry};
pub use monitor::{MemoMonitor, MonitorError, MonitorState};
pub use profile::{MemoCashLookup, ProfileInfo, ProfileLookup};
pub use render::Renderer;
pub use router::{RouteOutcome, Router};
