//! Job identifier value object.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Media ids are 11 characters from the URL-safe base64 alphabet.
static JOB_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap());

/// Identifier of a job and of the asset it produces.
///
/// The id is the media id extracted from the external reference, so two
/// submissions of the same media map to the same job. Because it is also used
/// to build file names in the asset store, only the restricted alphabet is
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Parse and validate a job id.
    pub fn parse(id: impl AsRef<str>) -> Result<Self, Error> {
        let id = id.as_ref();
        if JOB_ID_REGEX.is_match(id) {
            Ok(Self(id.to_string()))
        } else {
            Err(Error::not_found("Job", id))
        }
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
