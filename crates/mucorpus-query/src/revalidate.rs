//! Re-checking stored examples against a taxonomy snapshot.
//!
//! Taxonomy changes never touch stored examples. This report shows which
//! current examples would no longer classify under a given snapshot, e.g.
//! after a category is deactivated or its markers tightened.

use mucorpus_model::CorpusError;
use mucorpus_store::{CorpusStore, ScanFilter};
use mucorpus_taxonomy::TaxonomySnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevalidationFailure {
    /// `project:misuseId:patternName`
    pub key: String,
    /// Taxonomy version the example was committed under.
    pub committed_under: u64,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevalidationReport {
    pub taxonomy_version: u64,
    pub checked: usize,
    pub failures: Vec<RevalidationFailure>,
}

impl RevalidationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Classify every current (not superseded) example under `taxonomy`.
/// Read-only.
pub fn revalidate(
    store: &CorpusStore,
    taxonomy: &TaxonomySnapshot,
) -> Result<RevalidationReport, CorpusError> {
    let mut report = RevalidationReport {
        taxonomy_version: taxonomy.version(),
        ..Default::default()
    };

    for example in store.scan(ScanFilter::any().current_only()) {
        let example = example?;
        report.checked += 1;
        if let Err(err) = taxonomy.classify(&example.pattern_name, &example.referenced_apis) {
            report.failures.push(RevalidationFailure {
                key: example.key().to_string(),
                committed_under: example.taxonomy_version,
                kind: err.kind().to_string(),
                message: err.to_string(),
            });
        }
    }

    tracing::info!(
        taxonomy_version = report.taxonomy_version,
        checked = report.checked,
        failures = report.failures.len(),
        "revalidated corpus"
    );
    Ok(report)
}
