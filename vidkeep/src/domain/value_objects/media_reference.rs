//! Media reference value object.

use serde::{Deserialize, Serialize};
use url::Url;

use super::JobId;
use crate::Error;

const WATCH_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com"];
const SHORT_HOST: &str = "youtu.be";

/// A validated reference to externally hosted media.
///
/// Accepted forms:
/// - `https://www.youtube.com/watch?v=<id>` (also without `www.` and on `m.`)
/// - `https://youtu.be/<id>`
/// - `https://www.youtube.com/embed/<id>`
///
/// The scheme may be omitted. The reference is normalized to the canonical
/// watch URL so equal media always produce equal references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaReference {
    id: JobId,
    url: String,
}

impl MediaReference {
    /// Parse a user supplied reference.
    ///
    /// Empty or syntactically broken input yields [`Error::InvalidReference`];
    /// a well-formed URL that does not point at supported media yields
    /// [`Error::Validation`].
    pub fn parse(input: &str) -> Result<Self, Error> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::invalid_reference("reference is required"));
        }
        if input.contains(char::is_whitespace) {
            return Err(Error::invalid_reference("reference cannot contain whitespace"));
        }

        let candidate = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{input}")
        };
        let url = Url::parse(&candidate)
            .map_err(|e| Error::invalid_reference(format!("malformed URL: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::validation(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .ok_or_else(|| Error::invalid_reference("URL has no host"))?;

        let raw_id = if host == SHORT_HOST {
            url.path_segments().and_then(|mut s| s.next()).map(str::to_string)
        } else if WATCH_HOSTS.contains(&host.as_str()) {
            Self::extract_watch_id(&url)
        } else {
            return Err(Error::validation(format!("unsupported host '{host}'")));
        };

        let raw_id = raw_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::validation("URL does not reference a video"))?;
        let id = JobId::parse(&raw_id)
            .map_err(|_| Error::validation(format!("invalid video id '{raw_id}'")))?;

        Ok(Self {
            url: format!("https://www.youtube.com/watch?v={id}"),
            id,
        })
    }

    /// Rebuild a reference from trusted storage without re-validating the URL.
    pub fn from_trusted(id: JobId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
        }
    }

    fn extract_watch_id(url: &Url) -> Option<String> {
        let mut segments = url.path_segments()?;
        match segments.next()? {
            "watch" => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            "embed" => segments.next().map(str::to_string),
            _ => None,
        }
    }

    /// The job id derived from this reference.
    pub fn job_id(&self) -> &JobId {
        &self.id
    }

    /// The normalized URL.
    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for MediaReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}
