//! Ingestion pipeline.
//!
//! Each submission walks a fixed state machine:
//!
//! ```text
//! Received ──► IdentityChecked ──► TaxonomyChecked ──► Committed
//!    │               │                    │                │
//!    └───────────────┴────────────────────┴────────────────┴──► Rejected(reason)
//! ```
//!
//! While the submission is `Received`, a well-shaped pattern name that the
//! taxonomy does not know fails with `UnknownPattern` before any other check;
//! the well-formedness check follows. All checks are read-only; the single
//! compare-and-set in the commit step is the only write, so a rejected
//! submission leaves the store untouched and a committed one becomes visible
//! all at once.
//!
//! A supersede writes twice: the back-reference on the old example first,
//! then the corrected example. A failed commit clears the back-reference
//! again, so a failed supersede leaves no new key behind.

use mucorpus_model::{CorpusError, Example, ExampleKey, ExampleRecord};
use mucorpus_store::{CorpusStore, PutOutcome};
use mucorpus_taxonomy::TaxonomySnapshot;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{resolve_identity, Identity};
use crate::retry::RetryPolicy;
use crate::wellformed::{check_well_formed, WellFormednessConfig};

// ============================================================================
// States & Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestState {
    Received,
    IdentityChecked,
    TaxonomyChecked,
    Committed,
    Rejected(CorpusError),
}

/// Successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    pub submission: Uuid,
    pub key: ExampleKey,
    /// Category the pattern name classified under (differs from the pattern
    /// name for numbered variants).
    pub category: String,
    pub taxonomy_version: u64,
    pub outcome: PutOutcome,
}

/// Full trace of one submission.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub submission: Uuid,
    pub key: Option<ExampleKey>,
    pub states: Vec<IngestState>,
    pub result: Result<IngestReceipt, CorpusError>,
}

impl IngestReport {
    pub fn final_state(&self) -> &IngestState {
        // `states` always starts with `Received`.
        self.states.last().unwrap_or(&IngestState::Received)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.final_state(), IngestState::Committed)
    }

    pub fn into_result(self) -> Result<IngestReceipt, CorpusError> {
        self.result
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub well_formedness: WellFormednessConfig,
    pub retry: RetryPolicy,
}

// ============================================================================
// Submission
// ============================================================================

struct Submission {
    id: Uuid,
    record: ExampleRecord,
    states: Vec<IngestState>,
    key: Option<ExampleKey>,
}

impl Submission {
    fn new(record: ExampleRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
            states: vec![IngestState::Received],
            key: None,
        }
    }

    fn advance(&mut self, state: IngestState) {
        tracing::trace!(submission = %self.id, state = ?state, "submission advanced");
        self.states.push(state);
    }

    fn reject(mut self, err: CorpusError) -> IngestReport {
        tracing::warn!(
            submission = %self.id,
            project = %self.record.project,
            misuse_id = self.record.misuse_id,
            pattern = %self.record.pattern_name,
            kind = err.kind(),
            field = err.field().unwrap_or("-"),
            error = %err,
            "submission rejected"
        );
        self.advance(IngestState::Rejected(err.clone()));
        IngestReport {
            submission: self.id,
            key: self.key,
            states: self.states,
            result: Err(err),
        }
    }

    fn commit(
        mut self,
        key: ExampleKey,
        category: String,
        version: u64,
        outcome: PutOutcome,
    ) -> IngestReport {
        self.advance(IngestState::Committed);
        tracing::info!(
            submission = %self.id,
            key = %key,
            category = %category,
            taxonomy_version = version,
            outcome = ?outcome,
            "submission committed"
        );

        IngestReport {
            submission: self.id,
            key: Some(key.clone()),
            states: self.states,
            result: Ok(IngestReceipt {
                submission: self.id,
                key,
                category,
                taxonomy_version: version,
                outcome,
            }),
        }
    }
}

// ============================================================================
// Ingestor
// ============================================================================

/// Drives submissions into a [`CorpusStore`]. Every call takes the taxonomy
/// snapshot it validates against.
#[derive(Debug, Clone)]
pub struct Ingestor {
    store: CorpusStore,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(store: CorpusStore) -> Self {
        Self::with_config(store, IngestConfig::default())
    }

    pub fn with_config(store: CorpusStore, config: IngestConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &CorpusStore {
        &self.store
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Validate and commit one record.
    pub fn ingest(
        &self,
        record: ExampleRecord,
        taxonomy: &TaxonomySnapshot,
    ) -> Result<IngestReceipt, CorpusError> {
        self.process(record, taxonomy).into_result()
    }

    /// Validate and commit one record, keeping the state trace.
    pub fn process(&self, record: ExampleRecord, taxonomy: &TaxonomySnapshot) -> IngestReport {
        let mut sub = Submission::new(record);
        let (identity, category) = match self.check(&mut sub, taxonomy) {
            Ok(checked) => checked,
            Err(err) => return sub.reject(err),
        };
        match self.write(&identity, &sub.record, taxonomy) {
            Ok(outcome) => sub.commit(identity.key().clone(), category, taxonomy.version(), outcome),
            Err(err) => sub.reject(err),
        }
    }

    /// Every read-only check, advancing `sub` up to `TaxonomyChecked`.
    fn check(
        &self,
        sub: &mut Submission,
        taxonomy: &TaxonomySnapshot,
    ) -> Result<(Identity, String), CorpusError> {
        // Received: unknown patterns, then gross well-formedness.
        let pattern = &sub.record.pattern_name;
        if ExampleKey::check_pattern_name(pattern).is_ok()
            && taxonomy.resolve_category(pattern).is_none()
        {
            return Err(CorpusError::UnknownPattern {
                pattern: pattern.clone(),
            });
        }
        check_well_formed(&sub.record.source_text, &self.config.well_formedness)?;

        let identity = resolve_identity(&self.store, &sub.record)?;
        sub.key = Some(identity.key().clone());
        sub.advance(IngestState::IdentityChecked);

        let category = taxonomy
            .classify(&sub.record.pattern_name, &sub.record.referenced_apis)?
            .name
            .clone();
        sub.advance(IngestState::TaxonomyChecked);

        Ok((identity, category))
    }

    fn write(
        &self,
        identity: &Identity,
        record: &ExampleRecord,
        taxonomy: &TaxonomySnapshot,
    ) -> Result<PutOutcome, CorpusError> {
        match identity {
            Identity::Resubmission(_) => Ok(PutOutcome::Unchanged),
            Identity::Fresh(key) => self.store.put(Example::from_record(
                key.clone(),
                record.clone(),
                taxonomy.version(),
            )),
        }
    }

    /// [`Ingestor::ingest`] with the configured retry policy applied to
    /// transient store failures.
    pub fn ingest_with_retry(
        &self,
        record: ExampleRecord,
        taxonomy: &TaxonomySnapshot,
    ) -> Result<IngestReceipt, CorpusError> {
        self.config
            .retry
            .run(|_| self.ingest(record.clone(), taxonomy))
    }

    /// Commit `corrected` under its own identity and point `old` at it.
    ///
    /// The old example is kept for audit. Preconditions on `old` and every
    /// check on `corrected` run before anything is written. The back-reference
    /// goes first, so a rival supersede of `old` fails this call before the
    /// corrected example exists.
    pub fn supersede(
        &self,
        old: &ExampleKey,
        corrected: ExampleRecord,
        taxonomy: &TaxonomySnapshot,
    ) -> Result<IngestReceipt, CorpusError> {
        let previous = self.store.get(old)?;
        if let Some(by) = previous.superseded_by {
            return Err(CorpusError::AlreadySuperseded {
                key: old.clone(),
                by,
            });
        }
        if corrected.key()? == *old {
            return Err(CorpusError::InvalidIdentity {
                field: "misuseId",
                reason: format!("corrected version must use a new identity, not {old}"),
            });
        }

        let mut sub = Submission::new(corrected);
        let (identity, category) = match self.check(&mut sub, taxonomy) {
            Ok(checked) => checked,
            Err(err) => return sub.reject(err).into_result(),
        };
        let key = identity.key().clone();

        if let Err(err) = self.store.mark_superseded(old, &key) {
            return sub.reject(err).into_result();
        }
        match self.write(&identity, &sub.record, taxonomy) {
            Ok(outcome) => sub.commit(key, category, taxonomy.version(), outcome).into_result(),
            Err(err) => {
                if let Err(undo) = self.store.clear_superseded(old, &key) {
                    tracing::error!(
                        old = %old,
                        by = %key,
                        error = %undo,
                        "failed to clear superseded-by after rejected commit"
                    );
                }
                sub.reject(err).into_result()
            }
        }
    }

    /// Ingest many records independently; one failure does not stop the rest.
    pub fn ingest_batch<I>(&self, records: I, taxonomy: &TaxonomySnapshot) -> BatchReport
    where
        I: IntoIterator<Item = ExampleRecord>,
    {
        let mut report = BatchReport::default();
        for (index, record) in records.into_iter().enumerate() {
            let label = format!("{}:{}:{}", record.project, record.misuse_id, record.pattern_name);
            match self.ingest_with_retry(record, taxonomy) {
                Ok(receipt) => match receipt.outcome {
                    PutOutcome::Inserted { .. } => report.committed += 1,
                    PutOutcome::Unchanged => report.unchanged += 1,
                },
                Err(err) => report.rejected.push(Rejection::new(index, label, &err)),
            }
        }
        report
    }
}

// ============================================================================
// Batch reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub index: usize,
    /// `project:misuseId:patternName` as submitted.
    pub record: String,
    pub kind: String,
    pub field: Option<String>,
    pub message: String,
}

impl Rejection {
    pub fn new(index: usize, record: String, err: &CorpusError) -> Self {
        Self {
            index,
            record,
            kind: err.kind().to_string(),
            field: err.field().map(str::to_string),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub committed: usize,
    pub unchanged: usize,
    pub rejected: Vec<Rejection>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.committed + self.unchanged + self.rejected.len()
    }

    pub fn merge(&mut self, other: BatchReport) {
        let offset = self.total();
        self.committed += other.committed;
        self.unchanged += other.unchanged;
        self.rejected.extend(other.rejected.into_iter().map(|mut r| {
            r.index += offset;
            r
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mucorpus_model::BackendError;
    use mucorpus_store::{CasOutcome, CorpusBackend, MemoryBackend, Versioned};
    use mucorpus_taxonomy::TaxonomyRegistry;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn flush_record(project: &str, id: i64, source: &str) -> ExampleRecord {
        ExampleRecord::new(
            project,
            id,
            "FlushStreamBeforeGetBytes",
            source,
            vec![
                "DataOutputStream.flush".into(),
                "ByteArrayOutputStream.toByteArray".into(),
            ],
        )
    }

    #[test]
    fn committed_submission_walks_every_state() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let ingestor = Ingestor::new(CorpusStore::in_memory());

        let report = ingestor.process(flush_record("bcel", 101, "class A { }"), &taxonomy);
        assert_eq!(
            report.states,
            vec![
                IngestState::Received,
                IngestState::IdentityChecked,
                IngestState::TaxonomyChecked,
                IngestState::Committed,
            ]
        );
        let receipt = report.into_result().unwrap();
        assert_eq!(receipt.outcome, PutOutcome::Inserted { revision: 1 });
        assert_eq!(receipt.taxonomy_version, taxonomy.version());
    }

    #[test]
    fn malformed_source_is_rejected_while_received() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let ingestor = Ingestor::new(CorpusStore::in_memory());

        let report = ingestor.process(flush_record("bcel", 101, "class A {"), &taxonomy);
        assert_eq!(report.states.len(), 2);
        assert!(matches!(
            report.final_state(),
            IngestState::Rejected(CorpusError::MalformedSource { .. })
        ));
        assert!(report.key.is_none());
    }

    #[test]
    fn taxonomy_rejection_happens_after_identity_and_writes_nothing() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let store = CorpusStore::in_memory();
        let ingestor = Ingestor::new(store.clone());

        let mut record = flush_record("bcel", 101, "class A { }");
        record.referenced_apis = vec!["ByteArrayOutputStream.toByteArray".into()];
        let report = ingestor.process(record, &taxonomy);

        assert_eq!(
            report.states[..2],
            [IngestState::Received, IngestState::IdentityChecked]
        );
        assert!(matches!(
            report.final_state(),
            IngestState::Rejected(CorpusError::MissingRequiredApiMarker { .. })
        ));
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn resubmission_is_unchanged_and_conflict_is_duplicate() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let ingestor = Ingestor::new(CorpusStore::in_memory());

        ingestor
            .ingest(flush_record("bcel", 101, "class A { }"), &taxonomy)
            .unwrap();
        let again = ingestor
            .ingest(flush_record("bcel", 101, "class A { }"), &taxonomy)
            .unwrap();
        assert_eq!(again.outcome, PutOutcome::Unchanged);

        let err = ingestor
            .ingest(flush_record("bcel", 101, "class B { }"), &taxonomy)
            .unwrap_err();
        assert!(matches!(err, CorpusError::DuplicateIdentity { .. }));
    }

    #[test]
    fn supersede_links_old_to_new_and_keeps_old() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let store = CorpusStore::in_memory();
        let ingestor = Ingestor::new(store.clone());

        let old = ingestor
            .ingest(flush_record("bcel", 101, "class A { }"), &taxonomy)
            .unwrap()
            .key;
        let new = ingestor
            .supersede(&old, flush_record("bcel", 102, "class A2 { }"), &taxonomy)
            .unwrap()
            .key;

        assert_eq!(store.get(&old).unwrap().superseded_by, Some(new.clone()));
        assert!(store.get(&new).unwrap().superseded_by.is_none());

        let err = ingestor
            .supersede(&old, flush_record("bcel", 103, "class A3 { }"), &taxonomy)
            .unwrap_err();
        assert!(matches!(err, CorpusError::AlreadySuperseded { .. }));
        // The failed supersede committed nothing.
        assert!(store
            .find(&ExampleKey::resolve("bcel", 103, "FlushStreamBeforeGetBytes").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn supersede_requires_existing_old_and_new_identity() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let ingestor = Ingestor::new(CorpusStore::in_memory());

        let missing = ExampleKey::resolve("bcel", 1, "FlushStreamBeforeGetBytes").unwrap();
        assert!(matches!(
            ingestor.supersede(&missing, flush_record("bcel", 2, "class A { }"), &taxonomy),
            Err(CorpusError::NotFound { .. })
        ));

        let old = ingestor
            .ingest(flush_record("bcel", 1, "class A { }"), &taxonomy)
            .unwrap()
            .key;
        assert!(matches!(
            ingestor.supersede(&old, flush_record("bcel", 1, "class B { }"), &taxonomy),
            Err(CorpusError::InvalidIdentity { .. })
        ));
    }

    /// Memory backend that interferes with two keys: just before the first
    /// update of `contested`, a rival back-reference to `rival` lands on it;
    /// inserts of `refused` fault.
    struct Interfering {
        inner: MemoryBackend,
        contested: Option<ExampleKey>,
        rival: ExampleKey,
        refused: Option<ExampleKey>,
        fired: AtomicBool,
    }

    impl Interfering {
        fn new(contested: Option<ExampleKey>, refused: Option<ExampleKey>) -> Self {
            Self {
                inner: MemoryBackend::new(),
                contested,
                rival: ExampleKey::resolve("bcel", 999, "FlushStreamBeforeGetBytes").unwrap(),
                refused,
                fired: AtomicBool::new(false),
            }
        }
    }

    impl CorpusBackend for Interfering {
        fn get(&self, key: &ExampleKey) -> Result<Option<Versioned>, BackendError> {
            self.inner.get(key)
        }

        fn compare_and_set(
            &self,
            key: &ExampleKey,
            expected: Option<u64>,
            example: Example,
        ) -> Result<CasOutcome, BackendError> {
            if expected.is_none() && self.refused.as_ref() == Some(key) {
                return Err(BackendError::Fault("device refused write".into()));
            }
            if expected.is_some()
                && self.contested.as_ref() == Some(key)
                && !self.fired.swap(true, Ordering::SeqCst)
            {
                if let Some(current) = self.inner.get(key)? {
                    let mut rival = current.example;
                    rival.superseded_by = Some(self.rival.clone());
                    self.inner.compare_and_set(key, Some(current.revision), rival)?;
                }
            }
            self.inner.compare_and_set(key, expected, example)
        }

        fn keys(&self) -> Result<Vec<ExampleKey>, BackendError> {
            self.inner.keys()
        }

        fn generation(&self) -> u64 {
            self.inner.generation()
        }
    }

    fn key(id: u32) -> ExampleKey {
        ExampleKey::resolve("bcel", i64::from(id), "FlushStreamBeforeGetBytes").unwrap()
    }

    #[test]
    fn supersede_losing_a_race_commits_nothing() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let backend = Arc::new(Interfering::new(Some(key(101)), None));
        let store = CorpusStore::with_backend(backend.clone());
        let ingestor = Ingestor::new(store.clone());

        ingestor
            .ingest(flush_record("bcel", 101, "class A { }"), &taxonomy)
            .unwrap();
        let err = ingestor
            .supersede(&key(101), flush_record("bcel", 102, "class A2 { }"), &taxonomy)
            .unwrap_err();

        assert_eq!(
            err,
            CorpusError::AlreadySuperseded {
                key: key(101),
                by: backend.rival.clone()
            }
        );
        assert!(store.find(&key(102)).unwrap().is_none());
        assert_eq!(store.get(&key(101)).unwrap().superseded_by, Some(key(999)));
    }

    #[test]
    fn supersede_clears_back_reference_when_commit_fails() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let store = CorpusStore::with_backend(Arc::new(Interfering::new(None, Some(key(102)))));
        let ingestor = Ingestor::new(store.clone());

        ingestor
            .ingest(flush_record("bcel", 101, "class A { }"), &taxonomy)
            .unwrap();
        let err = ingestor
            .supersede(&key(101), flush_record("bcel", 102, "class A2 { }"), &taxonomy)
            .unwrap_err();

        assert!(matches!(err, CorpusError::StoreFault { .. }));
        assert!(store.find(&key(102)).unwrap().is_none());
        assert!(!store.get(&key(101)).unwrap().is_superseded());

        // The old example can still be superseded afterwards.
        let receipt = ingestor
            .supersede(&key(101), flush_record("bcel", 103, "class A3 { }"), &taxonomy)
            .unwrap();
        assert_eq!(store.get(&key(101)).unwrap().superseded_by, Some(receipt.key));
    }

    #[test]
    fn supersede_rejects_invalid_correction_before_linking() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let store = CorpusStore::in_memory();
        let ingestor = Ingestor::new(store.clone());

        ingestor
            .ingest(flush_record("bcel", 101, "class A { }"), &taxonomy)
            .unwrap();
        let generation = store.generation();
        let err = ingestor
            .supersede(&key(101), flush_record("bcel", 102, "class A2 {"), &taxonomy)
            .unwrap_err();

        assert!(matches!(err, CorpusError::MalformedSource { .. }));
        assert!(!store.get(&key(101)).unwrap().is_superseded());
        assert_eq!(store.generation(), generation);
    }

    #[test]
    fn unknown_pattern_wins_over_every_other_failure() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let store = CorpusStore::in_memory();
        let ingestor = Ingestor::new(store.clone());

        let mut records = vec![
            flush_record("bcel", 101, ""),
            flush_record("not a slug", 101, "class A { }"),
            flush_record("bcel", 0, "class A {"),
        ];
        for record in &mut records {
            record.pattern_name = "NotARealPattern".into();
            record.referenced_apis.clear();
        }
        for record in records {
            let report = ingestor.process(record, &taxonomy);
            assert_eq!(report.states.len(), 2);
            assert!(matches!(
                report.into_result(),
                Err(CorpusError::UnknownPattern { ref pattern }) if pattern == "NotARealPattern"
            ));
        }

        // An empty or spaced name is still an identity error.
        let mut spaced = flush_record("bcel", 101, "class A { }");
        spaced.pattern_name = "Not A Pattern".into();
        let err = ingestor.ingest(spaced, &taxonomy).unwrap_err();
        assert_eq!(err.field(), Some("patternName"));
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn batch_counts_each_outcome() {
        let taxonomy = TaxonomyRegistry::builtin().snapshot();
        let ingestor = Ingestor::new(CorpusStore::in_memory());

        let report = ingestor.ingest_batch(
            vec![
                flush_record("tbuktu-ntru", 473, "class A { }"),
                flush_record("tbuktu-ntru", 474, "class B { }"),
                flush_record("tbuktu-ntru", 474, "class B { }"),
                flush_record("tbuktu-ntru", 0, "class C { }"),
            ],
            &taxonomy,
        );

        assert_eq!(report.committed, 2);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 3);
        assert_eq!(report.rejected[0].kind, "InvalidIdentity");
        assert_eq!(report.rejected[0].field.as_deref(), Some("misuseId"));
    }
}
