//! Artifact locations and the public locator formula.

use std::fmt;

use catchframe_ids::ReportId;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Which form of a report's artifact a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactForm {
    /// As uploaded by the submitter
    Raw,
    /// Output of the external transform
    Processed,
}

/// A blob address: bucket plus key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// `"{id}.{ext}"` inside `bucket`.
    pub fn for_report(bucket: &str, id: &ReportId, extension: &str) -> Self {
        Self::new(bucket, artifact_key(id, extension))
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Storage key for a report artifact.
pub fn artifact_key(id: &ReportId, extension: &str) -> String {
    format!("{}.{}", id, extension.trim_start_matches('.'))
}

/// Object visibility toggled when an artifact is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

/// Deterministic public locator: `{base_url}/{bucket}/{key}`.
///
/// Retries of the terminal stage must compute the same value, so nothing
/// time- or random-dependent may enter the formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicUrlFormat {
    base_url: String,
}

impl PublicUrlFormat {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, location: &ObjectLocation) -> String {
        format!("{}/{}/{}", self.base_url, location.bucket, location.key)
    }

    /// Inverse of [`url_for`](Self::url_for).
    pub fn parse(&self, url: &str) -> Result<ObjectLocation, ProtocolError> {
        let rest = url
            .strip_prefix(&self.base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| ProtocolError::ForeignUrl {
                url: url.to_string(),
                base: self.base_url.clone(),
            })?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| ProtocolError::InvalidLocation(url.to_string()))?;
        if bucket.is_empty() || key.is_empty() {
            return Err(ProtocolError::InvalidLocation(url.to_string()));
        }
        Ok(ObjectLocation::new(bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_id_plus_extension() {
        let id = ReportId::parse("0d7c4a5e-5f6a-4b7e-9a52-3f1f1d9b2c11").unwrap();
        let loc = ObjectLocation::for_report("raw", &id, ".webm");
        assert_eq!(loc.key, "0d7c4a5e-5f6a-4b7e-9a52-3f1f1d9b2c11.webm");
        assert_eq!(loc.to_string(), "raw/0d7c4a5e-5f6a-4b7e-9a52-3f1f1d9b2c11.webm");
    }

    #[test]
    fn public_url_is_stable_and_parses_back() {
        let format = PublicUrlFormat::new("https://storage.googleapis.com/");
        let loc = ObjectLocation::new("catchframe-public-reports", "abc.mp4");

        let url = format.url_for(&loc);
        assert_eq!(
            url,
            "https://storage.googleapis.com/catchframe-public-reports/abc.mp4"
        );
        assert_eq!(format.url_for(&loc), url);
        assert_eq!(format.parse(&url).unwrap(), loc);
    }

    #[test]
    fn parse_rejects_foreign_and_truncated_urls() {
        let format = PublicUrlFormat::new("https://cdn.example.com");
        assert!(matches!(
            format.parse("https://other.example.com/b/k"),
            Err(ProtocolError::ForeignUrl { .. })
        ));
        assert!(format.parse("https://cdn.example.com/bucket-only").is_err());
        assert!(format.parse("https://cdn.example.com/b/").is_err());
    }
}
