//! Identity resolution against the Corpus Store.
//!
//! Shape checks come from [`ExampleKey::resolve`]; this adds the single
//! existence lookup that decides between a fresh key, an idempotent
//! resubmission and a conflicting duplicate.

use mucorpus_model::{CorpusError, ExampleKey, ExampleRecord};
use mucorpus_store::CorpusStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No example stored under this key yet.
    Fresh(ExampleKey),
    /// Byte-identical content already stored under this key.
    Resubmission(ExampleKey),
}

impl Identity {
    pub fn key(&self) -> &ExampleKey {
        match self {
            Identity::Fresh(key) | Identity::Resubmission(key) => key,
        }
    }
}

/// `resolve(project, misuseId, patternName)` plus the store existence check.
pub fn resolve_identity(store: &CorpusStore, record: &ExampleRecord) -> Result<Identity, CorpusError> {
    let key = record.key()?;
    match store.find(&key)? {
        None => Ok(Identity::Fresh(key)),
        Some(existing) if existing.same_content(&record.source_text) => {
            Ok(Identity::Resubmission(key))
        }
        Some(_) => Err(CorpusError::DuplicateIdentity { key }),
    }
}
