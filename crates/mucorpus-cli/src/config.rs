//! Engine configuration file.
//!
//! ```json
//! {
//!   "store": {"kind": "file", "path": "corpus.log"},
//!   "taxonomy_path": "taxonomy.json",
//!   "retry": {"max_attempts": 3, "initial_backoff_ms": 25, "max_backoff_ms": 500},
//!   "well_formedness": {"skip_literals_and_comments": true}
//! }
//! ```
//!
//! Every section is optional. Without a `store` section the CLI uses an
//! append-only log at `mucorpus.log` in the working directory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use mucorpus_ingest::{IngestConfig, RetryPolicy, WellFormednessConfig};
use mucorpus_store::{CorpusStore, StoreConfig};
use mucorpus_taxonomy::TaxonomyRegistry;
use serde::{Deserialize, Serialize};

pub const DEFAULT_STORE_PATH: &str = "mucorpus.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    /// Falls back to the builtin taxonomy when unset or not yet on disk.
    pub taxonomy_path: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub well_formedness: WellFormednessConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::File {
                path: PathBuf::from(DEFAULT_STORE_PATH),
            },
            taxonomy_path: None,
            retry: RetryPolicy::default(),
            well_formedness: WellFormednessConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            well_formedness: self.well_formedness.clone(),
            retry: self.retry.clone(),
        }
    }

    pub fn open_store(&self) -> Result<CorpusStore> {
        CorpusStore::open(&self.store).context("opening corpus store")
    }

    /// [`EngineConfig::open_store`] for commands that write. An in-memory
    /// store would be dropped when the process exits, so it is refused.
    pub fn open_durable_store(&self) -> Result<CorpusStore> {
        if self.store == StoreConfig::Memory {
            bail!(
                "the in-memory store does not outlive this command; \
                 configure a file store or pass --store"
            );
        }
        self.open_store()
    }

    pub fn load_taxonomy(&self) -> Result<TaxonomyRegistry> {
        match &self.taxonomy_path {
            Some(path) if path.exists() => TaxonomyRegistry::load(path),
            _ => Ok(TaxonomyRegistry::builtin()),
        }
    }

    pub fn save_taxonomy(&self, registry: &TaxonomyRegistry) -> Result<PathBuf> {
        let path = self
            .taxonomy_path
            .clone()
            .context("no taxonomy path configured (set taxonomy_path or pass --taxonomy)")?;
        registry.save(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(
            config.store,
            StoreConfig::File {
                path: PathBuf::from(DEFAULT_STORE_PATH)
            }
        );
    }

    #[test]
    fn config_without_store_section_keeps_the_file_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mucorpus.json");
        std::fs::write(&path, r#"{"retry": {"max_attempts": 2}}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(matches!(config.store, StoreConfig::File { .. }));
    }

    #[test]
    fn writes_survive_between_commands_and_memory_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            store: StoreConfig::File {
                path: dir.path().join(DEFAULT_STORE_PATH),
            },
            ..Default::default()
        };
        let taxonomy = config.load_taxonomy().unwrap().snapshot();

        // One command ingests, a later one reads.
        let record = mucorpus_model::ExampleRecord::new(
            "tbuktu-ntru",
            474,
            "FlushStreamBeforeGetBytes",
            "class A { }",
            vec![
                "DataOutputStream.flush".into(),
                "ByteArrayOutputStream.toByteArray".into(),
            ],
        );
        let key = mucorpus_ingest::Ingestor::with_config(
            config.open_durable_store().unwrap(),
            config.ingest_config(),
        )
        .ingest(record, &taxonomy)
        .unwrap()
        .key;
        assert!(config.open_store().unwrap().find(&key).unwrap().is_some());

        let memory = EngineConfig {
            store: StoreConfig::Memory,
            ..Default::default()
        };
        assert!(memory.open_durable_store().is_err());
        assert!(memory.open_store().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mucorpus.json");
        std::fs::write(
            &path,
            r#"{"store": {"kind": "file", "path": "corpus.log"}, "retry": {"max_attempts": 5}}"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::File {
                path: PathBuf::from("corpus.log")
            }
        );
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 25);
        assert!(config.well_formedness.skip_literals_and_comments);
    }

    #[test]
    fn taxonomy_falls_back_to_builtin_and_saves_where_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            taxonomy_path: Some(dir.path().join("taxonomy.json")),
            ..Default::default()
        };
        let registry = config.load_taxonomy().unwrap();
        assert!(registry.snapshot().get("TokenizerHasNext").is_some());

        let saved = config.save_taxonomy(&registry).unwrap();
        assert!(saved.exists());
        assert_eq!(config.load_taxonomy().unwrap().version(), registry.version());

        assert!(EngineConfig::default().save_taxonomy(&registry).is_err());
    }
}
