//! Profile Resolution
//!
//! Resolves an address to a display name and avatar through the memo.cash
//! profile page. Results are cached for the lifetime of the process and are
//! never refreshed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

/// Default profile page prefix; the address is appended
pub const DEFAULT_PROFILE_URL: &str = "https://memo.cash/profile/";

/// Request timeout for profile lookups
pub const PROFILE_TIMEOUT_SECS: u64 = 10;

/// Characters of fixed wrapper text before and after the name in `og:title`
const TITLE_PREFIX_CHARS: usize = 6;
const TITLE_SUFFIX_CHARS: usize = 8;

static META_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("meta tag regex"));

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("attribute regex")
});

/// Errors that can occur while resolving a profile
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Profile request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Profile page for {address} has no {field} metadata")]
    MissingField {
        address: String,
        field: &'static str,
    },

    #[error("Profile title {0:?} is not in the expected format")]
    MalformedTitle(String),
}

/// Display information for an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInfo {
    pub address: String,
    pub display_name: String,
    pub avatar_url: String,
}

/// Source of profile information for an address
pub trait ProfileLookup {
    fn lookup(&self, address: &str) -> impl Future<Output = Result<ProfileInfo, ProfileError>> + Send;
}

/// Looks profiles up on the memo.cash profile page
#[derive(Debug, Clone)]
pub struct MemoCashLookup {
    client: reqwest::Client,
    base_url: String,
}

impl MemoCashLookup {
    /// Create a lookup against `base_url`, which the address is appended to
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProfileError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROFILE_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Profile page URL for an address
    pub fn profile_url(&self, address: &str) -> String {
        format!("{}{}", self.base_url, address)
    }
}

impl ProfileLookup for MemoCashLookup {
    async fn lookup(&self, address: &str) -> Result<ProfileInfo, ProfileError> {
        let url = self.profile_url(address);
        info!(%url, "Fetching profile");
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_profile_page(address, &body)
    }
}

/// Extract the profile from a profile page's `og:title` and `og:image` metadata
pub fn parse_profile_page(address: &str, html: &str) -> Result<ProfileInfo, ProfileError> {
    let missing = |field| ProfileError::MissingField {
        address: address.to_string(),
        field,
    };
    let title = meta_content(html, "og:title").ok_or_else(|| missing("og:title"))?;
    let avatar_url = meta_content(html, "og:image").ok_or_else(|| missing("og:image"))?;

    Ok(ProfileInfo {
        address: address.to_string(),
        display_name: strip_title(&title)?,
        avatar_url,
    })
}

/// Content of the first `<meta>` tag whose `name` (or `property`) is `field`
pub fn meta_content(html: &str, field: &str) -> Option<String> {
    META_TAG.find_iter(html).find_map(|tag| {
        let mut key = None;
        let mut content = None;
        for attr in ATTRIBUTE.captures_iter(tag.as_str()) {
            let value = attr.get(2).or_else(|| attr.get(3)).map_or("", |m| m.as_str());
            match attr[1].to_ascii_lowercase().as_str() {
                "name" | "property" => key = Some(value),
                "content" => content = Some(value),
                _ => {}
            }
        }
        (key == Some(field)).then(|| content.map(unescape)).flatten()
    })
}

fn strip_title(title: &str) -> Result<String, ProfileError> {
    let chars: Vec<char> = title.chars().collect();
    if chars.len() < TITLE_PREFIX_CHARS + TITLE_SUFFIX_CHARS {
        return Err(ProfileError::MalformedTitle(title.to_string()));
    }
    let name: String = chars[TITLE_PREFIX_CHARS..chars.len() - TITLE_SUFFIX_CHARS]
        .iter()
        .collect();
    Ok(name.trim().to_string())
}

fn unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Process-wide profile cache in front of a [`ProfileLookup`]
#[derive(Debug)]
pub struct ProfileResolver<L> {
    lookup: L,
    cache: HashMap<String, ProfileInfo>,
}

impl<L: ProfileLookup> ProfileResolver<L> {
    pub fn new(lookup: L) -> Self {
        Self {
            lookup,
            cache: HashMap::new(),
        }
    }

    /// Resolve an address, consulting the cache first
    ///
    /// A failed lookup is not cached; the next render tries again.
    pub async fn resolve(&mut self, address: &str) -> Result<&ProfileInfo, ProfileError> {
        if !self.cache.contains_key(address) {
            let profile = self.lookup.lookup(address).await?;
            debug!(address, name = %profile.display_name, "Cached profile");
            return Ok(&*self.cache.entry(address.to_string()).or_insert(profile));
        }
        Ok(&self.cache[address])
    }

    /// Cached profile for an address, without a lookup
    pub fn cached(&self, address: &str) -> Option<&ProfileInfo> {
        self.cache.get(address)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
