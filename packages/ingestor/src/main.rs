use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use memoscope_ingestor::capture::ArchiveFormat;
use memoscope_ingestor::config::MonitorConfig;
use memoscope_ingestor::feed::{FeedConnection, DEFAULT_FEED_URL};
use memoscope_ingestor::history::DEFAULT_HISTORY_LEN;
use memoscope_ingestor::monitor::MemoMonitor;
use memoscope_ingestor::profile::{MemoCashLookup, DEFAULT_PROFILE_URL};
use memoscope_ingestor::render::Renderer;

/// Watch the BCH mempool for memo posts and keep an HTML summary of the latest ones
#[derive(Parser, Debug)]
#[command(name = "memoscope", version, about)]
struct Cli {
    /// Only keep memos sent from this address
    #[arg(long)]
    address: Option<String>,

    /// Output HTML file, rewritten on every update
    #[arg(long = "html-summary", value_name = "PATH")]
    html_summary: Option<String>,

    /// JSON file holding the memo history window
    #[arg(long = "memo-history", value_name = "PATH")]
    memo_history: Option<String>,

    /// Archive of matched transactions (written when listening, read with --replay)
    #[arg(long = "debug-json-data-store", value_name = "PATH")]
    debug_json_data_store: Option<String>,

    /// Replay the archive instead of listening to the live feed
    #[arg(long, requires = "debug_json_data_store")]
    replay: bool,

    /// Archive layout
    #[arg(long, value_enum, default_value_t = ArchiveFormat::Log)]
    archive_format: ArchiveFormat,

    /// Number of memos kept in the window
    #[arg(long, default_value_t = DEFAULT_HISTORY_LEN)]
    history_len: usize,

    #[arg(long, default_value = DEFAULT_FEED_URL)]
    feed_url: String,

    /// Profile page prefix the address is appended to
    #[arg(long, default_value = DEFAULT_PROFILE_URL)]
    profile_url: String,

    /// Show bare addresses instead of profile names and avatars
    #[arg(long)]
    no_profiles: bool,
}

impl Cli {
    fn into_config(self) -> MonitorConfig {
        let mut config = MonitorConfig::default()
            .with_replay(self.replay)
            .with_history_len(self.history_len)
            .with_feed_url(self.feed_url)
            .with_profile_url(self.profile_url)
            .with_profiles(!self.no_profiles);
        if let Some(address) = self.address {
            config = config.with_address(address);
        }
        if let Some(path) = self.html_summary {
            config = config.with_html_path(path);
        }
        if let Some(path) = self.memo_history {
            config = config.with_history_path(path);
        }
        if let Some(path) = self.debug_json_data_store {
            config = config.with_archive(path, self.archive_format);
        }
        config
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(env_filter).try_init();
}

fn show_path(path: Option<&Path>) -> String {
    path.map_or_else(|| "-".to_string(), |p| p.display().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Cli::parse().into_config();

    info!(
        "memoscope v{} starting (html: {}, history: {}, archive: {})",
        env!("CARGO_PKG_VERSION"),
        show_path(config.html_path.as_deref()),
        show_path(config.history_path.as_deref()),
        show_path(config.archive_path.as_deref())
    );

    let renderer = if config.profiles_enabled {
        let lookup = MemoCashLookup::new(config.profile_url.clone())
            .context("failed to build profile client")?;
        Renderer::with_profiles(lookup)
    } else {
        Renderer::without_profiles()
    };

    let mut monitor = MemoMonitor::start(&config, renderer)
        .await
        .context("failed to initialize monitor")?;

    let stats = if config.replay {
        monitor.replay().await.context("replay failed")?
    } else {
        let mut feed = FeedConnection::new(config.feed.clone());
        let result = monitor.listen(&mut feed).await;
        feed.close().await;
        result.context("listener stopped")?
    };

    info!(
        received = stats.received,
        matched = stats.matched,
        appended = stats.appended,
        "Done"
    );
    Ok(())
}
