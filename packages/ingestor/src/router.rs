//! Transaction Router
//!
//! Runs one feed record through classify, decode, address filter, render
//! and persist. Live and replayed records take the same path; only the
//! capture handle differs.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureStore;
use crate::decoder::{decode_payload, FeedMessage, LossyPolicy};
use crate::filter::classify;
use crate::history::{HistoryError, HistoryStore, MemoEntry};
use crate::profile::ProfileLookup;
use crate::publisher::{HtmlPublisher, PublishError};
use crate::render::{RenderError, Renderer};

/// Errors that abandon a single update
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("History update failed: {0}")]
    History(#[from] HistoryError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),
}

/// What happened to one feed record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Outputs recognized as memo protocol
    pub matched: usize,
    /// Entries added to history
    pub appended: usize,
    /// Matched text outputs dropped by decoding, filtering or a failed update
    pub skipped: usize,
}

impl RouteOutcome {
    pub fn is_match(&self) -> bool {
        self.matched > 0
    }
}

/// Routes feed records into the history window and the HTML output
#[derive(Debug)]
pub struct Router<L> {
    address_filter: Option<String>,
    policy: LossyPolicy,
    history: HistoryStore,
    renderer: Renderer<L>,
    publisher: HtmlPublisher,
}

impl<L: ProfileLookup> Router<L> {
    pub fn new(history: HistoryStore, renderer: Renderer<L>, publisher: HtmlPublisher) -> Self {
        Self {
            address_filter: None,
            policy: LossyPolicy::default(),
            history,
            renderer,
            publisher,
        }
    }

    /// Keep only memos sent from `address`
    pub fn with_address_filter(mut self, address: Option<String>) -> Self {
        self.address_filter = address;
        self
    }

    pub fn with_lossy_policy(mut self, policy: LossyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn renderer(&self) -> &Renderer<L> {
        &self.renderer
    }

    pub fn address_filter(&self) -> Option<&str> {
        self.address_filter.as_deref()
    }

    /// Whether memos from `sender` pass the address filter
    pub fn accepts(&self, sender: &str) -> bool {
        self.address_filter.as_deref().map_or(true, |wanted| wanted == sender)
    }

    /// Render the current window to the output file
    ///
    /// # Returns
    /// `true` if a document was written
    pub async fn render_current(&mut self) -> Result<bool, RouteError> {
        if !self.publisher.is_enabled() {
            return Ok(false);
        }
        let html = self.renderer.render(&self.history.snapshot()).await?;
        Ok(self.publisher.publish(&html)?)
    }

    /// Route one feed record
    ///
    /// Every output is classified. The record is captured once when any
    /// output matched and `capture` is given. Failures are logged and only
    /// drop the affected output.
    pub async fn route(
        &mut self,
        message: &FeedMessage,
        capture: Option<&mut CaptureStore>,
    ) -> RouteOutcome {
        let tx = &message.x;
        let mut outcome = RouteOutcome::default();

        for (index, output) in tx.outputs.iter().enumerate() {
            let Some(action) = classify(&output.script) else {
                continue;
            };
            outcome.matched += 1;

            if !action.carries_text() {
                info!(hash = %tx.hash, action = action.name(), "Observed memo action");
                continue;
            }

            let memo = match decode_payload(action, &output.script, self.policy) {
                Ok(memo) => memo,
                Err(e) => {
                    warn!(hash = %tx.hash, output = index, error = %e, "Skipping undecodable memo output");
                    outcome.skipped += 1;
                    continue;
                }
            };

            let Some(sender) = tx.sender() else {
                warn!(hash = %tx.hash, "Memo transaction has no sender address");
                outcome.skipped += 1;
                continue;
            };
            if !self.accepts(sender) {
                debug!(hash = %tx.hash, address = sender, "Memo from filtered-out address");
                outcome.skipped += 1;
                continue;
            }

            info!(
                address = sender,
                action = action.name(),
                payload = %output.script,
                reply_to = memo.reply_to.as_deref().unwrap_or(""),
                text = %memo.text,
                "Memo matched"
            );

            match self.commit(MemoEntry::new(tx.time, memo.text, sender)).await {
                Ok(()) => outcome.appended += 1,
                Err(e) => {
                    error!(hash = %tx.hash, error = ?e, "Update abandoned");
                    outcome.skipped += 1;
                }
            }
        }

        if outcome.is_match() {
            if let Some(capture) = capture {
                capture.record(message);
            }
        }
        outcome
    }

    /// Render the next window, publish it, then persist it
    ///
    /// A render or publish failure leaves history and its file untouched.
    async fn commit(&mut self, entry: MemoEntry) -> Result<(), RouteError> {
        if !self.publisher.is_enabled() {
            self.history.append(entry)?;
            return Ok(());
        }

        let window = self.history.preview(&entry);
        let html = self.renderer.render(&window).await?;
        self.publisher.publish(&html)?;
        self.history.append(entry)?;
        Ok(())
    }
}
