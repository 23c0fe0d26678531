//! Memo Monitor
//!
//! Process controller: `Initializing -> {Listening | Replaying} -> Terminating`.
//! Owns the router and the one capture store handle, and flushes the
//! archive on every path out of a run.

use thiserror::Error;
use tokio::signal;
use tracing::{error, info, warn};

use crate::capture::{CaptureError, CaptureMode, CaptureStore};
use crate::config::MonitorConfig;
use crate::decoder::decode_feed_message;
use crate::feed::{FeedError, TransactionSource};
use crate::history::{HistoryError, HistoryStore};
use crate::profile::ProfileLookup;
use crate::publisher::HtmlPublisher;
use crate::render::Renderer;
use crate::router::{RouteOutcome, Router};

/// Errors that end a monitor run
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to load history: {0}")]
    History(#[from] HistoryError),

    #[error("Capture archive error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: MonitorState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Initializing,
    Listening,
    Replaying,
    Terminating,
}

/// Running totals for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub received: usize,
    pub malformed: usize,
    pub matched: usize,
    pub appended: usize,
}

impl MonitorStats {
    fn add(&mut self, outcome: RouteOutcome) {
        if outcome.is_match() {
            self.matched += 1;
        }
        self.appended += outcome.appended;
    }
}

pub struct MemoMonitor<L> {
    state: MonitorState,
    router: Router<L>,
    capture: CaptureStore,
    stats: MonitorStats,
}

impl<L: ProfileLookup> MemoMonitor<L> {
    /// Load history, render it once, and open the capture store
    ///
    /// A corrupt history file or archive is fatal. A failed initial render
    /// is logged and the run continues.
    pub async fn start(config: &MonitorConfig, renderer: Renderer<L>) -> Result<Self, MonitorError> {
        let history = HistoryStore::load(config.history_len, config.history_path.clone())?;
        let mut router = Router::new(history, renderer, HtmlPublisher::new(config.html_path.clone()))
            .with_address_filter(config.address.clone())
            .with_lossy_policy(config.lossy_policy);

        if let Err(e) = router.render_current().await {
            error!(error = ?e, "Initial render failed");
        }

        let capture = CaptureStore::open(
            config.archive_path.as_deref(),
            config.archive_format,
            config.replay,
        )?;

        info!(
            address = config.address.as_deref().unwrap_or("*"),
            history = router.history().len(),
            mode = ?capture.mode(),
            "Monitor initialized"
        );

        Ok(Self {
            state: MonitorState::Initializing,
            router,
            capture,
            stats: MonitorStats::default(),
        })
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn router(&self) -> &Router<L> {
        &self.router
    }

    pub fn capture(&self) -> &CaptureStore {
        &self.capture
    }

    /// Decode and route one raw feed record, capturing when enabled
    pub async fn process(&mut self, raw: &str) -> Option<RouteOutcome> {
        self.stats.received += 1;
        let message = match decode_feed_message(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Skipping feed message");
                self.stats.malformed += 1;
                return None;
            }
        };

        let outcome = self.router.route(&message, Some(&mut self.capture)).await;
        self.stats.add(outcome);
        Some(outcome)
    }

    /// Route every archived transaction with capturing off, then terminate
    pub async fn replay(&mut self) -> Result<MonitorStats, MonitorError> {
        self.transition("replay", MonitorState::Replaying)?;

        let messages = self.capture.take_replay();
        info!(transactions = messages.len(), "Replaying capture archive");
        for message in &messages {
            self.stats.received += 1;
            let outcome = self.router.route(message, None).await;
            self.stats.add(outcome);
        }

        self.shutdown()?;
        Ok(self.stats)
    }

    /// Route records from `source` until interrupted or the source ends
    ///
    /// The interrupt is registered once for the whole run and observed
    /// between records, so one arriving mid-record stops the loop after it.
    /// The archive is flushed whether the loop ends cleanly or with a feed error.
    pub async fn listen<S: TransactionSource>(&mut self, source: &mut S) -> Result<MonitorStats, MonitorError> {
        self.transition("listen", MonitorState::Listening)?;

        let interrupt = signal::ctrl_c();
        tokio::pin!(interrupt);

        let result = loop {
            let next = tokio::select! {
                biased;
                _ = &mut interrupt => None,
                next = source.next_message() => Some(next),
            };

            match next {
                None => {
                    info!("Interrupt received, shutting down");
                    break Ok(());
                }
                Some(Ok(Some(raw))) => {
                    self.process(&raw).await;
                }
                Some(Ok(None)) => {
                    info!("Feed source exhausted");
                    break Ok(());
                }
                Some(Err(e)) => {
                    error!(error = %e, "Feed failed");
                    break Err(e);
                }
            }
        };

        self.shutdown()?;
        result?;
        Ok(self.stats)
    }

    /// Flush the archive if capturing and release it
    ///
    /// # Returns
    /// Number of archived records written
    pub fn shutdown(&mut self) -> Result<usize, MonitorError> {
        if self.state == MonitorState::Terminating {
            return Ok(0);
        }
        self.state = MonitorState::Terminating;

        let capture = std::mem::replace(&mut self.capture, CaptureStore::inactive());
        let mode = capture.mode();
        let written = capture.close()?;
        if mode == CaptureMode::Capture {
            info!(written, "Capture archive flushed");
        }
        info!(
            received = self.stats.received,
            matched = self.stats.matched,
            appended = self.stats.appended,
            "Monitor stopped"
        );
        Ok(written)
    }

    fn transition(&mut self, action: &'static str, next: MonitorState) -> Result<(), MonitorError> {
        if self.state != MonitorState::Initializing {
            return Err(MonitorError::InvalidState {
                action,
                state: self.state,
            });
        }
        self.state = next;
        Ok(())
    }
}
