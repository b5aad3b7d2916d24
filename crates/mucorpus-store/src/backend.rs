//! Storage backend contract and the in-memory backend.
//!
//! A backend is an exact-key store with one write primitive: a per-key
//! compare-and-set on record revisions. Everything the Corpus Store promises
//! (idempotent puts, single back-reference writes, no torn commits) is built
//! on that primitive alone, so any key-value or document store that offers it
//! can sit behind [`crate::CorpusStore`].

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mucorpus_model::{BackendError, Example, ExampleKey};

/// A stored record with its revision. Revisions start at 1 and increase by
/// one per successful compare-and-set on the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub revision: u64,
    pub example: Example,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Stored { revision: u64 },
    /// The expectation did not hold; `current` is what the key holds now.
    Conflict { current: Option<Versioned> },
}

pub trait CorpusBackend: Send + Sync {
    fn get(&self, key: &ExampleKey) -> Result<Option<Versioned>, BackendError>;

    /// Write `example` under `key` iff the key's current revision equals
    /// `expected` (`None` = key must be absent).
    fn compare_and_set(
        &self,
        key: &ExampleKey,
        expected: Option<u64>,
        example: Example,
    ) -> Result<CasOutcome, BackendError>;

    /// All stored keys in ascending key order.
    fn keys(&self) -> Result<Vec<ExampleKey>, BackendError>;

    /// Count of successful writes since the backend was opened (or replayed).
    fn generation(&self) -> u64;
}

// ============================================================================
// Shared record table
// ============================================================================

/// Concurrent key -> record table used by the bundled backends.
///
/// The DashMap entry lock scopes every compare-and-set to its shard; writers
/// on different keys do not wait on each other beyond shard contention.
#[derive(Debug, Default)]
pub(crate) struct RecordTable {
    records: DashMap<ExampleKey, Versioned>,
    generation: AtomicU64,
}

impl RecordTable {
    pub(crate) fn get(&self, key: &ExampleKey) -> Option<Versioned> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Compare-and-set; `persist` runs under the entry lock before the
    /// in-memory table changes, so a failed persist leaves nothing behind.
    pub(crate) fn compare_and_set<F>(
        &self,
        key: &ExampleKey,
        expected: Option<u64>,
        example: Example,
        persist: F,
    ) -> Result<CasOutcome, BackendError>
    where
        F: FnOnce(u64, &Example) -> Result<(), BackendError>,
    {
        match self.records.entry(key.clone()) {
            Entry::Vacant(slot) => {
                if expected.is_some() {
                    return Ok(CasOutcome::Conflict { current: None });
                }
                persist(1, &example)?;
                slot.insert(Versioned {
                    revision: 1,
                    example,
                });
                self.generation.fetch_add(1, Ordering::SeqCst);
                Ok(CasOutcome::Stored { revision: 1 })
            }
            Entry::Occupied(mut slot) => {
                if expected != Some(slot.get().revision) {
                    return Ok(CasOutcome::Conflict {
                        current: Some(slot.get().clone()),
                    });
                }
                let revision = slot.get().revision + 1;
                persist(revision, &example)?;
                slot.insert(Versioned { revision, example });
                self.generation.fetch_add(1, Ordering::SeqCst);
                Ok(CasOutcome::Stored { revision })
            }
        }
    }

    /// Install a replayed record without persisting it again.
    pub(crate) fn restore(&self, revision: u64, example: Example) {
        self.records
            .insert(example.key(), Versioned { revision, example });
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn sorted_keys(&self) -> Vec<ExampleKey> {
        let mut keys: Vec<ExampleKey> = self.records.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local backend; contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    table: RecordTable,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }
}

impl CorpusBackend for MemoryBackend {
    fn get(&self, key: &ExampleKey) -> Result<Option<Versioned>, BackendError> {
        Ok(self.table.get(key))
    }

    fn compare_and_set(
        &self,
        key: &ExampleKey,
        expected: Option<u64>,
        example: Example,
    ) -> Result<CasOutcome, BackendError> {
        self.table
            .compare_and_set(key, expected, example, |_, _| Ok(()))
    }

    fn keys(&self) -> Result<Vec<ExampleKey>, BackendError> {
        Ok(self.table.sorted_keys())
    }

    fn generation(&self) -> u64 {
        self.table.generation()
    }
}
