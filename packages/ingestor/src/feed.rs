//! Live Transaction Feed
//!
//! Handles the websocket connection to the unconfirmed-transaction feed.
//! Subscribes on connect and reconnects with exponential backoff when the
//! connection drops.

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Default feed endpoint (Bitcoin Cash unconfirmed transactions)
pub const DEFAULT_FEED_URL: &str = "wss://ws.blockchain.info/bch/inv";

/// Subscription request sent after every (re)connect
pub const SUBSCRIBE_MESSAGE: &str = r#"{"op":"unconfirmed_sub"}"#;

/// Maximum number of reconnection attempts before giving up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay for reconnection
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay for reconnection
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Connection timeout in milliseconds
pub const CONNECTION_TIMEOUT_MS: u64 = 5000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors that can occur on the feed connection
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    #[error("Max reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

/// Configuration for the feed connection
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Websocket URL of the feed
    pub url: String,
    /// Maximum reconnection attempts
    pub max_reconnect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            timeout_ms: CONNECTION_TIMEOUT_MS,
        }
    }
}

impl FeedConfig {
    /// Create a new config with the specified feed URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// Validate that a URL looks like a websocket endpoint
pub fn validate_feed_url(url: &str) -> Result<(), FeedError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(FeedError::InvalidUrl(url.to_string()))
    }
}

/// A source of raw feed records, one JSON document per message
pub trait TransactionSource {
    /// Wait for the next record
    ///
    /// `Ok(None)` means the source is exhausted.
    fn next_message(&mut self) -> impl Future<Output = Result<Option<String>, FeedError>> + Send;
}

/// Websocket feed connection with reconnection support
pub struct FeedConnection {
    config: FeedConfig,
    stream: Option<WsStream>,
    reconnect_attempts: u32,
}

impl FeedConnection {
    /// Create a new feed connection manager; nothing is opened until first use
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            stream: None,
            reconnect_attempts: 0,
        }
    }

    /// Create with default configuration
    pub fn with_default_config() -> Self {
        Self::new(FeedConfig::default())
    }

    /// Get the feed URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Whether a live connection is held
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Reset reconnection counter
    pub fn reset_reconnect_counter(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// Get current reconnection attempt count
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Calculate delay before next reconnection attempt
    pub fn next_backoff_delay(&self) -> Duration {
        self.config.backoff_delay(self.reconnect_attempts)
    }

    /// Connect and subscribe to unconfirmed transactions
    pub async fn connect(&mut self) -> Result<(), FeedError> {
        validate_feed_url(&self.config.url)?;
        info!("Connecting to feed at {}", self.config.url);

        let (mut stream, _) = timeout(
            Duration::from_millis(self.config.timeout_ms),
            connect_async(self.config.url.as_str()),
        )
        .await
        .map_err(|_| FeedError::Timeout(self.config.timeout_ms))?
        .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;

        stream
            .send(Message::Text(SUBSCRIBE_MESSAGE.to_string()))
            .await
            .map_err(|e| FeedError::SubscriptionFailed(e.to_string()))?;

        self.stream = Some(stream);
        self.reset_reconnect_counter();
        info!("Subscribed to unconfirmed transactions");
        Ok(())
    }

    /// Attempt to reconnect with exponential backoff
    pub async fn reconnect(&mut self) -> Result<(), FeedError> {
        self.stream = None;
        while self.reconnect_attempts < self.config.max_reconnect_attempts {
            let delay = self.next_backoff_delay();
            warn!(
                "Attempting to reconnect (attempt {}/{}), waiting {:?}",
                self.reconnect_attempts + 1,
                self.config.max_reconnect_attempts,
                delay
            );

            sleep(delay).await;
            self.reconnect_attempts += 1;

            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!("Reconnection attempt {} failed: {}", self.reconnect_attempts, e);
                }
            }
        }

        Err(FeedError::MaxReconnectAttemptsExceeded(self.config.max_reconnect_attempts))
    }

    /// Close the connection, if any
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!("Error closing feed connection: {}", e);
            }
        }
    }

    async fn ensure_connected(&mut self) -> Result<(), FeedError> {
        if self.stream.is_some() {
            return Ok(());
        }
        if let Err(e) = self.connect().await {
            error!("Feed connection failed: {}", e);
            self.reconnect().await?;
        }
        Ok(())
    }
}

impl TransactionSource for FeedConnection {
    async fn next_message(&mut self) -> Result<Option<String>, FeedError> {
        loop {
            self.ensure_connected().await?;
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };

            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = stream.send(Message::Pong(payload)).await {
                        warn!("Failed to answer ping: {}", e);
                        self.reconnect().await?;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!("Feed closed by server: {:?}", frame);
                    self.reconnect().await?;
                }
                Some(Ok(other)) => debug!("Ignoring non-text frame ({} bytes)", other.len()),
                Some(Err(e)) => {
                    warn!("Feed read error: {}", e);
                    self.reconnect().await?;
                }
                None => {
                    warn!("Feed stream ended");
                    self.reconnect().await?;
                }
            }
        }
    }
}
