//! HTML Rendering
//!
//! Builds the memo feed document from a history window, newest first.
//! Rendering is deterministic: the same window and the same profile cache
//! state always produce byte-identical output.

use std::sync::LazyLock;

use chrono::DateTime;
use regex::{Captures, Regex};
use thiserror::Error;

use crate::history::MemoEntry;
use crate::profile::{ProfileError, ProfileLookup, ProfileResolver};

/// Longest link text shown before it is shortened around a central ellipsis
pub const MAX_LINK_TEXT: usize = 255;

/// Timestamp format used in rendered rows (UTC)
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Avatar width in pixels
const AVATAR_WIDTH: u32 = 32;

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"http([^\.\s]+\.[^\.\s]*)+[^\.\s]{2,}").expect("url regex"));

/// Errors that can occur while rendering
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Profile lookup failed: {0}")]
    Profile(#[from] ProfileError),

    #[error("Timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

/// Renders history windows, optionally enriched with profile data
#[derive(Debug)]
pub struct Renderer<L> {
    profiles: Option<ProfileResolver<L>>,
    max_link_text: usize,
}

impl<L: ProfileLookup> Renderer<L> {
    pub fn new(profiles: Option<ProfileResolver<L>>) -> Self {
        Self {
            profiles,
            max_link_text: MAX_LINK_TEXT,
        }
    }

    /// Renderer that shows each author's name and avatar
    pub fn with_profiles(lookup: L) -> Self {
        Self::new(Some(ProfileResolver::new(lookup)))
    }

    /// Renderer that shows the bare address and no avatar
    pub fn without_profiles() -> Self {
        Self::new(None)
    }

    pub fn profiles(&self) -> Option<&ProfileResolver<L>> {
        self.profiles.as_ref()
    }

    /// Render a window (oldest first) into a full HTML document
    ///
    /// Any profile lookup failure abandons the whole document.
    pub async fn render(&mut self, entries: &[MemoEntry]) -> Result<String, RenderError> {
        let mut html = String::from("<html><body>\n");
        html.push_str(r#"<div class="divMemoTable">"#);
        html.push_str(r#"<div class="divMemoTableBody">"#);

        for entry in entries.iter().rev() {
            let time = format_timestamp(entry.time)?;
            let text = linkify(&escape_html(&entry.text), self.max_link_text);

            html.push_str(r#"<div class="divMemoTableRow">"#);
            let name = match self.profiles.as_mut() {
                Some(resolver) => {
                    let profile = resolver.resolve(&entry.address).await?;
                    html.push_str(&format!(
                        r#"<div class="divMemoTableCell"><img src="{}" width={} align="left"></div>"#,
                        escape_html(&profile.avatar_url),
                        AVATAR_WIDTH
                    ));
                    escape_html(&profile.display_name)
                }
                None => escape_html(&entry.address),
            };
            html.push_str(&format!(
                "<div class=\"divMemoTableCell\">{name} {time}<br>{text}<br>\n</div>"
            ));
            html.push_str("</div>");
        }

        html.push_str("</div>");
        html.push_str("</div>");
        html.push_str("</body></html>\n");
        Ok(html)
    }
}

/// Format a Unix timestamp as `YYYY-MM-DD HH:MM:SS` in UTC
pub fn format_timestamp(secs: i64) -> Result<String, RenderError> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format(TIME_FORMAT).to_string())
        .ok_or(RenderError::InvalidTimestamp(secs))
}

/// Replace raw URLs in `text` with hyperlinks
///
/// The link text drops the scheme and a leading `www.`, and is shortened
/// to `max_len` characters around a `...` when longer.
pub fn linkify(text: &str, max_len: usize) -> String {
    URL.replace_all(text, |caps: &Captures| {
        let url = &caps[0];
        format!(
            r#"<a class="comurl" href="{}" target="_blank" rel="nofollow">{}</a>"#,
            url,
            link_text(url, max_len)
        )
    })
    .into_owned()
}

fn link_text(url: &str, max_len: usize) -> String {
    let shown = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    let shown = shown.strip_prefix("www.").unwrap_or(shown);

    let chars: Vec<char> = shown.chars().collect();
    if chars.len() <= max_len {
        return shown.to_string();
    }
    let half = max_len / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[chars.len() - half..].iter().collect();
    format!("{head}...{tail}")
}

/// Minimal HTML escaping for text and attribute values
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
