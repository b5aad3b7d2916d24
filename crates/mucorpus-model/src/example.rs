//! Submitted records and committed examples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::content_digest;
use crate::error::CorpusError;
use crate::key::ExampleKey;

/// One curator submission, exactly as received.
///
/// `misuse_id` is signed so out-of-range values survive decoding and are
/// rejected by identity resolution with the field named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleRecord {
    pub project: String,
    pub misuse_id: i64,
    pub pattern_name: String,
    pub source_text: String,
    #[serde(default)]
    pub referenced_apis: Vec<String>,
}

impl ExampleRecord {
    pub fn new(
        project: impl Into<String>,
        misuse_id: i64,
        pattern_name: impl Into<String>,
        source_text: impl Into<String>,
        referenced_apis: Vec<String>,
    ) -> Self {
        Self {
            project: project.into(),
            misuse_id,
            pattern_name: pattern_name.into(),
            source_text: source_text.into(),
            referenced_apis,
        }
    }

    /// Resolve the composite key (shape checks only).
    pub fn key(&self) -> Result<ExampleKey, CorpusError> {
        ExampleKey::resolve(&self.project, self.misuse_id, &self.pattern_name)
    }
}

/// A committed misuse example.
///
/// Immutable once stored, apart from `superseded_by`, which is written at
/// most once when a corrected version is committed under a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Example {
    pub project: String,
    pub misuse_id: u32,
    pub pattern_name: String,
    pub source_text: String,
    pub referenced_apis: Vec<String>,
    pub content_digest: String,
    /// Taxonomy version the example was classified against.
    pub taxonomy_version: u64,
    pub ingested_at: DateTime<Utc>,
    pub superseded_by: Option<ExampleKey>,
}

impl Example {
    /// Build the stored form of a record whose key has already been resolved.
    pub fn from_record(key: ExampleKey, record: ExampleRecord, taxonomy_version: u64) -> Self {
        let content_digest = content_digest(&record.source_text);
        Self {
            project: key.project,
            misuse_id: key.misuse_id,
            pattern_name: key.pattern_name,
            source_text: record.source_text,
            referenced_apis: record.referenced_apis,
            content_digest,
            taxonomy_version,
            ingested_at: Utc::now(),
            superseded_by: None,
        }
    }

    pub fn key(&self) -> ExampleKey {
        ExampleKey {
            project: self.project.clone(),
            misuse_id: self.misuse_id,
            pattern_name: self.pattern_name.clone(),
        }
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    /// Case-sensitive substring match of `marker` against the referenced APIs.
    pub fn references_api_marker(&self, marker: &str) -> bool {
        self.referenced_apis.iter().any(|api| api.contains(marker))
    }

    /// True when a resubmission of `source_text` is the same content.
    pub fn same_content(&self, source_text: &str) -> bool {
        self.source_text.as_bytes() == source_text.as_bytes()
    }
}
