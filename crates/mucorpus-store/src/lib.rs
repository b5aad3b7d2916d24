//! MuCorpus Corpus Store
//!
//! The append-mostly collection of validated examples:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        CORPUS STORE                           │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │   put(example) ──► compare_and_set(key, None) ─┐              │
//! │                                                ▼              │
//! │   get(key) ─────────────────────────────► CorpusBackend       │
//! │                                          (memory | file log)  │
//! │   scan(filter) ──► sorted key snapshot ──► lazy get + filter  │
//! │                                                               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Idempotent puts**: re-putting byte-identical `sourceText` under an
//!   existing key succeeds without writing; different content is a
//!   `DuplicateIdentity`, decided by the backend's per-key compare-and-set
//!   so racing writers agree on one winner.
//! - **Stable scans**: scans walk keys in ascending key order, so the same
//!   filter over an unchanged store yields the same sequence.
//! - **Append-mostly**: the only in-place update is the one-time
//!   `superseded_by` back-reference, cleared again only when the supersede
//!   that wrote it fails to commit.

pub mod backend;
pub mod persistence;


use std::path::PathBuf;
use std::sync::Arc;

use mucorpus_model::{CorpusError, Example, ExampleKey};
use serde::{Deserialize, Serialize};

pub use backend::{CasOutcome, CorpusBackend, MemoryBackend, Versioned};
pub use persistence::FileBackend;

/// Attempts made when a compare-and-set loses to a concurrent writer before
/// giving up with a transient error.
const CAS_ATTEMPTS: usize = 8;

// ============================================================================
// Configuration
// ============================================================================

/// Which backend the store runs on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    File {
        path: PathBuf,
    },
}

// ============================================================================
// Filters
// ============================================================================

/// Conjunctive filter over stored examples. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFilter {
    pub project: Option<String>,
    pub misuse_id: Option<u32>,
    pub pattern_name: Option<String>,
    /// Case-sensitive substring that some referenced API must contain.
    pub api_marker: Option<String>,
    /// Skip examples that carry a superseded-by back-reference.
    #[serde(default)]
    pub current_only: bool,
}

impl ScanFilter {
    /// Matches every example.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn misuse_id(mut self, misuse_id: u32) -> Self {
        self.misuse_id = Some(misuse_id);
        self
    }

    pub fn pattern_name(mut self, pattern_name: impl Into<String>) -> Self {
        self.pattern_name = Some(pattern_name.into());
        self
    }

    pub fn api_marker(mut self, marker: impl Into<String>) -> Self {
        self.api_marker = Some(marker.into());
        self
    }

    pub fn current_only(mut self) -> Self {
        self.current_only = true;
        self
    }

    /// Key-only part of the filter; lets scans skip a fetch.
    pub fn matches_key(&self, key: &ExampleKey) -> bool {
        self.project.as_deref().map_or(true, |p| p == key.project)
            && self.misuse_id.map_or(true, |id| id == key.misuse_id)
            && self
                .pattern_name
                .as_deref()
                .map_or(true, |p| p == key.pattern_name)
    }

    pub fn matches(&self, example: &Example) -> bool {
        self.matches_key(&example.key())
            && self
                .api_marker
                .as_deref()
                .map_or(true, |m| example.references_api_marker(m))
            && !(self.current_only && example.is_superseded())
    }
}

// ============================================================================
// Store
// ============================================================================

/// Outcome of a successful [`CorpusStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted { revision: u64 },
    /// Same key and byte-identical content already stored; nothing written.
    Unchanged,
}

/// Shared handle to the corpus. Cloning is cheap; clones see the same data.
#[derive(Clone)]
pub struct CorpusStore {
    backend: Arc<dyn CorpusBackend>,
}

impl std::fmt::Debug for CorpusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusStore")
            .field("generation", &self.generation())
            .finish()
    }
}

impl CorpusStore {
    pub fn with_backend(backend: Arc<dyn CorpusBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    pub fn open(config: &StoreConfig) -> anyhow::Result<Self> {
        match config {
            StoreConfig::Memory => Ok(Self::in_memory()),
            StoreConfig::File { path } => Ok(Self::with_backend(Arc::new(FileBackend::open(path)?))),
        }
    }

    /// Store a new example under its own key.
    pub fn put(&self, example: Example) -> Result<PutOutcome, CorpusError> {
        let key = example.key();

        for _ in 0..CAS_ATTEMPTS {
            match self.backend.compare_and_set(&key, None, example.clone())? {
                CasOutcome::Stored { revision } => {
                    tracing::debug!(key = %key, revision, "stored example");
                    return Ok(PutOutcome::Inserted { revision });
                }
                CasOutcome::Conflict {
                    current: Some(existing),
                } => {
                    return if existing.example.same_content(&example.source_text) {
                        Ok(PutOutcome::Unchanged)
                    } else {
                        Err(CorpusError::DuplicateIdentity { key })
                    };
                }
                // Absent-key expectation only conflicts when the key exists;
                // a conflict without a current value is a racing backend, retry.
                CasOutcome::Conflict { current: None } => continue,
            }
        }

        Err(CorpusError::TransientStoreError {
            reason: format!("compare-and-set on {key} did not settle"),
        })
    }

    pub fn get(&self, key: &ExampleKey) -> Result<Example, CorpusError> {
        self.find(key)?
            .ok_or_else(|| CorpusError::NotFound { key: key.clone() })
    }

    /// Like [`CorpusStore::get`] but absence is `Ok(None)`.
    pub fn find(&self, key: &ExampleKey) -> Result<Option<Example>, CorpusError> {
        Ok(self.backend.get(key)?.map(|v| v.example))
    }

    /// Write the one-time superseded-by back-reference on `old`.
    pub fn mark_superseded(&self, old: &ExampleKey, by: &ExampleKey) -> Result<u64, CorpusError> {
        for _ in 0..CAS_ATTEMPTS {
            let current = self
                .backend
                .get(old)?
                .ok_or_else(|| CorpusError::NotFound { key: old.clone() })?;

            if let Some(existing) = &current.example.superseded_by {
                return Err(CorpusError::AlreadySuperseded {
                    key: old.clone(),
                    by: existing.clone(),
                });
            }

            let mut updated = current.example;
            updated.superseded_by = Some(by.clone());

            match self
                .backend
                .compare_and_set(old, Some(current.revision), updated)?
            {
                CasOutcome::Stored { revision } => {
                    tracing::info!(old = %old, by = %by, "recorded superseded-by");
                    return Ok(revision);
                }
                CasOutcome::Conflict { .. } => continue,
            }
        }

        Err(CorpusError::TransientStoreError {
            reason: format!("superseded-by write on {old} did not settle"),
        })
    }

    /// Undo [`CorpusStore::mark_superseded`]. Only a back-reference that
    /// still points at `by` is cleared; returns whether one was.
    pub fn clear_superseded(
        &self,
        old: &ExampleKey,
        by: &ExampleKey,
    ) -> Result<bool, CorpusError> {
        for _ in 0..CAS_ATTEMPTS {
            let Some(current) = self.backend.get(old)? else {
                return Ok(false);
            };
            if current.example.superseded_by.as_ref() != Some(by) {
                return Ok(false);
            }

            let mut updated = current.example;
            updated.superseded_by = None;

            match self
                .backend
                .compare_and_set(old, Some(current.revision), updated)?
            {
                CasOutcome::Stored { .. } => {
                    tracing::info!(old = %old, by = %by, "cleared superseded-by");
                    return Ok(true);
                }
                CasOutcome::Conflict { .. } => continue,
            }
        }

        Err(CorpusError::TransientStoreError {
            reason: format!("superseded-by rollback on {old} did not settle"),
        })
    }

    /// Lazy, restartable scan of examples matching `filter`.
    pub fn scan(&self, filter: ScanFilter) -> Scan {
        Scan {
            backend: Arc::clone(&self.backend),
            filter,
            keys: None,
            pos: 0,
        }
    }

    /// Changes whenever a write succeeds; equal generations mean no writes
    /// happened in between.
    pub fn generation(&self) -> u64 {
        self.backend.generation()
    }
}

// ============================================================================
// Scans
// ============================================================================

/// Lazy sequence of examples matching a [`ScanFilter`].
///
/// The key set is snapshotted on the first `next()` and walked in ascending
/// order; records are fetched one at a time. Dropping the scan early is the
/// cancellation mechanism. [`Scan::restart`] starts over with a fresh key
/// snapshot.
pub struct Scan {
    backend: Arc<dyn CorpusBackend>,
    filter: ScanFilter,
    keys: Option<Vec<ExampleKey>>,
    pos: usize,
}

impl Scan {
    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    pub fn restart(&mut self) {
        self.keys = None;
        self.pos = 0;
    }
}

impl Iterator for Scan {
    type Item = Result<Example, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.keys.is_none() {
            match self.backend.keys() {
                Ok(keys) => self.keys = Some(keys),
                Err(err) => {
                    // Leave an empty key set so the scan ends after reporting.
                    self.keys = Some(Vec::new());
                    return Some(Err(err.into()));
                }
            }
        }
        let keys = self.keys.as_ref()?;

        while self.pos < keys.len() {
            let key = &keys[self.pos];
            self.pos += 1;
            if !self.filter.matches_key(key) {
                continue;
            }
            match self.backend.get(key) {
                Ok(Some(v)) if self.filter.matches(&v.example) => return Some(Ok(v.example)),
                Ok(_) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }

        None
    }
}
