//! Fingerprint derivation for cache lookup and de-duplication.
//!
//! Equivalent submissions (same content, locale and options) map to the
//! same fingerprint regardless of URL spelling:
//! - YouTube links in any form collapse to the 11-character video id
//! - Other URLs are normalized (host case, `www.`, tracking params, query order)

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use url::Url;

use crate::JobPayload;

/// Version tag mixed into every fingerprint so the scheme can evolve.
const FINGERPRINT_VERSION: &str = "v1";

/// Query parameters that never change the content behind a URL.
const TRACKING_PARAMS: &[&str] = &["si", "feature", "fbclid", "gclid", "ref", "pp"];

/// Errors that can occur while deriving a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    #[error("URL could not be parsed: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,
}

/// Normalized key derived from a job payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Derive the fingerprint of a payload.
    pub fn derive(payload: &JobPayload) -> Result<Self, FingerprintError> {
        let canonical = canonical_url(&payload.url)?;
        let locale = payload
            .locale
            .as_deref()
            .map(|l| l.trim().to_ascii_lowercase())
            .unwrap_or_default();
        // serde_json::Map keeps keys sorted, so equal options serialize equally
        let options = serde_json::Value::Object(payload.options.clone()).to_string();

        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION.as_bytes());
        hasher.update(b"|");
        hasher.update(canonical.as_bytes());
        hasher.update(b"|");
        hasher.update(locale.as_bytes());
        hasher.update(b"|");
        hasher.update(options.as_bytes());

        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical textual form of a content URL.
pub fn canonical_url(raw: &str) -> Result<String, FingerprintError> {
    let url = Url::parse(raw.trim()).map_err(|e| FingerprintError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(FingerprintError::UnsupportedScheme(other.to_string())),
    }

    if let Some(id) = youtube_id_from_url(&url) {
        return Ok(format!("youtube:{}", id));
    }

    let host = url.host_str().ok_or(FingerprintError::MissingHost)?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    let path = url.path().trim_end_matches('/');
    let mut canonical = format!("{}{}", host, path);
    if let Some(port) = url.port() {
        canonical = format!("{}:{}{}", host, port, path);
    }
    if !params.is_empty() {
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        canonical.push('?');
        canonical.push_str(&query.join("&"));
    }

    Ok(canonical)
}

/// Extract the YouTube video id from any supported URL shape.
///
/// Supports `watch?v=`, `youtu.be/`, `/embed/`, `/v/`, `/shorts/` and `/live/`.
pub fn extract_youtube_id(raw: &str) -> Option<String> {
    Url::parse(raw.trim()).ok().and_then(|u| youtube_id_from_url(&u))
}

fn youtube_id_from_url(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    let candidate = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtube-nocookie.com" => {
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("embed") | Some("v") | Some("shorts") | Some("live") => {
                    segments.next().map(str::to_string)
                }
                _ => None,
            }
        }
        _ => None,
    }?;

    is_valid_youtube_id(&candidate).then_some(candidate)
}

fn is_valid_youtube_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_variants_share_canonical_form() {
        let urls = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://m.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
        ];
        for url in urls {
            assert_eq!(canonical_url(url).unwrap(), "youtube:dQw4w9WgXcQ", "{}", url);
        }
    }

    #[test]
    fn test_rejects_invalid_youtube_id() {
        assert_eq!(extract_youtube_id("https://youtu.be/short"), None);
        assert_eq!(extract_youtube_id("https://youtube.com/watch?v=bad$id!!!!"), None);
    }

    #[test]
    fn test_generic_url_normalization() {
        let a = canonical_url("https://WWW.Example.com/videos/42/?b=2&a=1&utm_source=x").unwrap();
        let b = canonical_url("http://example.com/videos/42?a=1&b=2#t=10").unwrap();
        assert_eq!(a, "example.com/videos/42?a=1&b=2");
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        assert!(matches!(
            canonical_url("ftp://example.com/file.mp4"),
            Err(FingerprintError::UnsupportedScheme(_))
        ));
        assert!(matches!(canonical_url("not a url"), Err(FingerprintError::InvalidUrl(_))));
    }

    #[test]
    fn test_fingerprint_includes_locale_and_options() {
        let base = JobPayload::new("https://youtu.be/dQw4w9WgXcQ");
        let same = JobPayload::new("https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        let localized = base.clone().with_locale("pt-BR");
        let with_opts = base.clone().with_option("maxHighlights", serde_json::json!(5));

        let fp = Fingerprint::derive(&base).unwrap();
        assert_eq!(fp, Fingerprint::derive(&same).unwrap());
        assert_ne!(fp, Fingerprint::derive(&localized).unwrap());
        assert_ne!(fp, Fingerprint::derive(&with_opts).unwrap());
        assert_eq!(fp.as_str().len(), 64);
    }

    #[test]
    fn test_locale_is_case_insensitive() {
        let a = JobPayload::new("https://example.com/a").with_locale("EN");
        let b = JobPayload::new("https://example.com/a").with_locale("en");
        assert_eq!(Fingerprint::derive(&a).unwrap(), Fingerprint::derive(&b).unwrap());
    }
}
