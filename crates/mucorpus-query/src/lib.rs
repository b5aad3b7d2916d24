//! MuCorpus Query Engine
//!
//! Read-only access for detector-evaluation tooling:
//!
//! ```text
//!   filter mapping ──► ScanFilter ──► CorpusStore::scan ──► Examples
//!
//!   count_by_pattern / list_projects
//!        │
//!        ▼
//!   cached stats ── stale? (store generation moved) ──► full scan, recompute
//! ```
//!
//! Derived stats are never persisted. They are recomputed from a full scan
//! whenever the store generation differs from the one they were built at.

pub mod filter;
pub mod index;
pub mod revalidate;

use std::collections::{BTreeMap, BTreeSet};

use mucorpus_model::{CorpusError, Example, ExampleKey};
use mucorpus_store::{CorpusStore, Scan, ScanFilter};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use filter::{filter_from_mapping, parse_filter};
pub use index::write_index;
pub use revalidate::{revalidate, RevalidationFailure, RevalidationReport};

/// Aggregates derived from one full scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusStats {
    /// Store generation the scan started at.
    pub generation: u64,
    pub examples: usize,
    pub count_by_pattern: BTreeMap<String, usize>,
    pub projects: BTreeSet<String>,
}

impl CorpusStats {
    fn collect(store: &CorpusStore) -> Result<Self, CorpusError> {
        let mut stats = CorpusStats {
            generation: store.generation(),
            ..Default::default()
        };
        for example in store.scan(ScanFilter::any()) {
            let example = example?;
            stats.examples += 1;
            *stats
                .count_by_pattern
                .entry(example.pattern_name.clone())
                .or_default() += 1;
            stats.projects.insert(example.project);
        }
        Ok(stats)
    }
}

#[derive(Debug)]
pub struct QueryEngine {
    store: CorpusStore,
    stats: RwLock<Option<CorpusStats>>,
}

impl QueryEngine {
    pub fn new(store: CorpusStore) -> Self {
        Self {
            store,
            stats: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &CorpusStore {
        &self.store
    }

    pub fn get(&self, key: &ExampleKey) -> Result<Example, CorpusError> {
        self.store.get(key)
    }

    pub fn scan(&self, filter: ScanFilter) -> Scan {
        self.store.scan(filter)
    }

    /// Scan with a filter given as a field mapping.
    pub fn query(&self, mapping: &Map<String, Value>) -> Result<Scan, CorpusError> {
        Ok(self.scan(filter_from_mapping(mapping)?))
    }

    /// Number of stored examples per pattern name, superseded ones included.
    pub fn count_by_pattern(&self) -> Result<BTreeMap<String, usize>, CorpusError> {
        Ok(self.stats()?.count_by_pattern)
    }

    pub fn list_projects(&self) -> Result<BTreeSet<String>, CorpusError> {
        Ok(self.stats()?.projects)
    }

    pub fn stats(&self) -> Result<CorpusStats, CorpusError> {
        let generation = self.store.generation();
        if let Some(cached) = self.stats.read().as_ref() {
            if cached.generation == generation {
                return Ok(cached.clone());
            }
        }

        let fresh = CorpusStats::collect(&self.store)?;
        tracing::debug!(
            generation = fresh.generation,
            examples = fresh.examples,
            "recomputed corpus stats"
        );
        *self.stats.write() = Some(fresh.clone());
        Ok(fresh)
    }
}
