//! Source hosts.
//!
//! Trust is keyed by host. The host of a finding is always resolved from the
//! URL that actually answered, never from the source the query asked for.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ValidationError;

/// Normalized host name (lowercase, no `www.` prefix, no port).
///
/// # Examples
///
/// ```
/// use market_consensus::SourceHost;
///
/// let host = SourceHost::from_url("https://www.Zillow.com/research/data/").unwrap();
/// assert_eq!(host.as_str(), "zillow.com");
///
/// let hinted = SourceHost::parse("site:redfin.com").unwrap();
/// assert_eq!(hinted.as_str(), "redfin.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceHost(String);

impl SourceHost {
    /// Placeholder host for results whose URL cannot be parsed.
    pub const UNKNOWN: &'static str = "unknown";

    /// Parses a host from a loose hint: a bare domain, `site:domain`, or a URL.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyHost` if nothing host-like remains.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix("site:").unwrap_or(trimmed);
        if trimmed.contains("://") {
            return Self::from_url(trimmed);
        }
        let host = trimmed
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .split(':')
            .next()
            .unwrap_or_default();
        Self::normalize(host)
    }

    /// Resolves the host of a result URL.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyHost` if the URL is malformed or has no host.
    pub fn from_url(raw: &str) -> Result<Self, ValidationError> {
        let url = Url::parse(raw.trim()).map_err(|_| ValidationError::EmptyHost)?;
        let host = url.host_str().ok_or(ValidationError::EmptyHost)?;
        Self::normalize(host)
    }

    /// Resolves the host of a URL, falling back to [`SourceHost::UNKNOWN`].
    #[must_use]
    pub fn from_url_lossy(raw: &str) -> Self {
        Self::from_url(raw).unwrap_or_else(|_| Self::unknown())
    }

    /// The placeholder host.
    #[must_use]
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn normalize(host: &str) -> Result<Self, ValidationError> {
        let lower = host.trim().trim_end_matches('.').to_ascii_lowercase();
        let bare = lower.strip_prefix("www.").unwrap_or(&lower);
        if bare.is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        Ok(Self(bare.to_string()))
    }
}

impl fmt::Display for SourceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SourceHost {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
