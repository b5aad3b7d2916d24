//! Error taxonomy for corpus operations.
//!
//! Every variant except [`CorpusError::TransientStoreError`] is terminal for
//! the request that produced it. Errors carry the offending field (see
//! [`CorpusError::field`]) so callers can report it verbatim.

use thiserror::Error;

use crate::key::ExampleKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorpusError {
    #[error("invalid identity: `{field}` {reason}")]
    InvalidIdentity { field: &'static str, reason: String },

    #[error("duplicate identity {key}: already stored with different sourceText")]
    DuplicateIdentity { key: ExampleKey },

    #[error("unknown pattern `{pattern}`")]
    UnknownPattern { pattern: String },

    #[error("pattern `{pattern}` is deactivated and accepts no new examples")]
    InactivePattern { pattern: String },

    #[error(
        "pattern `{pattern}` requires a referencedApis entry containing one of [{}]",
        .markers.join(", ")
    )]
    MissingRequiredApiMarker {
        pattern: String,
        markers: Vec<String>,
    },

    #[error("malformed sourceText: {reason}")]
    MalformedSource { reason: String },

    #[error("duplicate category `{name}`")]
    DuplicateCategory { name: String },

    #[error("not found: {key}")]
    NotFound { key: ExampleKey },

    #[error("{key} is already superseded by {by}")]
    AlreadySuperseded { key: ExampleKey, by: ExampleKey },

    #[error("invalid filter on `{field}`: {reason}")]
    InvalidFilter { field: String, reason: String },

    #[error("transient store error: {reason}")]
    TransientStoreError { reason: String },

    #[error("store fault: {reason}")]
    StoreFault { reason: String },
}

impl CorpusError {
    /// Only transient store failures may be retried by callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CorpusError::TransientStoreError { .. })
    }

    /// The record field this error is about, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            CorpusError::InvalidIdentity { field, .. } => Some(*field),
            CorpusError::DuplicateIdentity { .. } => Some("sourceText"),
            CorpusError::UnknownPattern { .. } | CorpusError::InactivePattern { .. } => {
                Some("patternName")
            }
            CorpusError::MissingRequiredApiMarker { .. } => Some("referencedApis"),
            CorpusError::MalformedSource { .. } => Some("sourceText"),
            CorpusError::DuplicateCategory { .. } => Some("name"),
            CorpusError::InvalidFilter { field, .. } => Some(field.as_str()),
            CorpusError::NotFound { .. }
            | CorpusError::AlreadySuperseded { .. }
            | CorpusError::TransientStoreError { .. }
            | CorpusError::StoreFault { .. } => None,
        }
    }

    /// Short, stable name of the error class (used in reports and logs).
    pub fn kind(&self) -> &'static str {
        match self {
            CorpusError::InvalidIdentity { .. } => "InvalidIdentity",
            CorpusError::DuplicateIdentity { .. } => "DuplicateIdentity",
            CorpusError::UnknownPattern { .. } => "UnknownPattern",
            CorpusError::InactivePattern { .. } => "InactivePattern",
            CorpusError::MissingRequiredApiMarker { .. } => "MissingRequiredApiMarker",
            CorpusError::MalformedSource { .. } => "MalformedSource",
            CorpusError::DuplicateCategory { .. } => "DuplicateCategory",
            CorpusError::NotFound { .. } => "NotFound",
            CorpusError::AlreadySuperseded { .. } => "AlreadySuperseded",
            CorpusError::InvalidFilter { .. } => "InvalidFilter",
            CorpusError::TransientStoreError { .. } => "TransientStoreError",
            CorpusError::StoreFault { .. } => "StoreFault",
        }
    }
}

/// Failure reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be reached or timed out; the request may be retried.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend is in a state that retrying will not fix.
    #[error("backend fault: {0}")]
    Fault(String),
}

impl From<BackendError> for CorpusError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(reason) => CorpusError::TransientStoreError { reason },
            BackendError::Fault(reason) => CorpusError::StoreFault { reason },
        }
    }
}
