//! Monitor Configuration

use std::path::PathBuf;

use crate::capture::ArchiveFormat;
use crate::decoder::LossyPolicy;
use crate::feed::{FeedConfig, DEFAULT_FEED_URL};
use crate::history::DEFAULT_HISTORY_LEN;
use crate::profile::DEFAULT_PROFILE_URL;

/// Settings for one monitor run
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Only memos sent from this address are kept
    pub address: Option<String>,
    /// Output HTML document
    pub html_path: Option<PathBuf>,
    /// Persisted history window
    pub history_path: Option<PathBuf>,
    /// Capture archive (written when listening, read when replaying)
    pub archive_path: Option<PathBuf>,
    pub archive_format: ArchiveFormat,
    /// Replay the archive instead of listening to the feed
    pub replay: bool,
    pub history_len: usize,
    pub feed: FeedConfig,
    pub profile_url: String,
    /// Resolve display names and avatars when rendering
    pub profiles_enabled: bool,
    pub lossy_policy: LossyPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            address: None,
            html_path: None,
            history_path: None,
            archive_path: None,
            archive_format: ArchiveFormat::default(),
            replay: false,
            history_len: DEFAULT_HISTORY_LEN,
            feed: FeedConfig::with_url(DEFAULT_FEED_URL),
            profile_url: DEFAULT_PROFILE_URL.to_string(),
            profiles_enabled: true,
            lossy_policy: LossyPolicy::default(),
        }
    }
}

impl MonitorConfig {
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_html_path(mut self, path: impl Into<String>) -> Self {
        self.html_path = Some(expand_path(&path.into()));
        self
    }

    pub fn with_history_path(mut self, path: impl Into<String>) -> Self {
        self.history_path = Some(expand_path(&path.into()));
        self
    }

    pub fn with_archive(mut self, path: impl Into<String>, format: ArchiveFormat) -> Self {
        self.archive_path = Some(expand_path(&path.into()));
        self.archive_format = format;
        self
    }

    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay = replay;
        self
    }

    pub fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = len;
        self
    }

    pub fn with_feed_url(mut self, url: impl Into<String>) -> Self {
        self.feed.url = url.into();
        self
    }

    pub fn with_profile_url(mut self, url: impl Into<String>) -> Self {
        self.profile_url = url.into();
        self
    }

    pub fn with_profiles(mut self, enabled: bool) -> Self {
        self.profiles_enabled = enabled;
        self
    }

    pub fn with_lossy_policy(mut self, policy: LossyPolicy) -> Self {
        self.lossy_policy = policy;
        self
    }
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
