//! MuCorpus Taxonomy Registry
//!
//! The closed, versioned set of misuse-pattern categories an Example may
//! claim, plus the structural check that ties an Example to its category:
//!
//! ```text
//!   curator ──register/deactivate──► TaxonomyRegistry ──snapshot()──► Arc<TaxonomySnapshot>
//!                                      (copy-on-write)                     │
//!                                                                          ▼
//!                              ingestion / re-validation ──classify(pattern, apis)
//! ```
//!
//! ## Rules
//!
//! - Category names are unique. Registering an existing name fails with
//!   `DuplicateCategory`; there is no rename.
//! - Categories are never deleted. Deactivation only stops new ingestion.
//! - Every mutation produces a new snapshot with `version + 1`. Snapshots are
//!   immutable, so a validation run is reproducible against the exact
//!   taxonomy it was given.

pub mod builtin;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use mucorpus_model::CorpusError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ============================================================================
// Categories
// ============================================================================

/// One taxonomy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternCategory {
    pub name: String,
    /// API name fragments; at least one must occur (case-sensitive substring)
    /// in an Example's `referencedApis`. Empty means unconstrained.
    pub required_api_markers: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Taxonomy version in which the category was registered.
    #[serde(default)]
    pub since_version: u64,
}

fn default_active() -> bool {
    true
}

impl PatternCategory {
    pub fn new(
        name: impl Into<String>,
        required_api_markers: impl IntoIterator<Item = impl Into<String>>,
        description: impl Into<String>,
    ) -> Self {
        let mut markers: Vec<String> = required_api_markers.into_iter().map(Into::into).collect();
        markers.sort();
        markers.dedup();
        Self {
            name: name.into(),
            required_api_markers: markers,
            description: description.into(),
            active: true,
            since_version: 0,
        }
    }

    /// Whether `referenced_apis` satisfies this category's marker rule.
    pub fn accepts_apis(&self, referenced_apis: &[String]) -> bool {
        self.required_api_markers.is_empty()
            || self.required_api_markers.iter().any(|marker| {
                referenced_apis
                    .iter()
                    .any(|api| api.contains(marker.as_str()))
            })
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Immutable view of the taxonomy at one version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomySnapshot {
    version: u64,
    categories: BTreeMap<String, PatternCategory>,
}

impl TaxonomySnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&PatternCategory> {
        self.categories.get(name)
    }

    /// Categories in name order.
    pub fn categories(&self) -> impl Iterator<Item = &PatternCategory> {
        self.categories.values()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Find the category a pattern name belongs to.
    ///
    /// An exact match wins. Otherwise a trailing run of digits is treated as
    /// a variant suffix (`FlushStreamBeforeGetBytes390`) and the base name is
    /// looked up instead.
    pub fn resolve_category(&self, pattern_name: &str) -> Option<&PatternCategory> {
        if let Some(category) = self.categories.get(pattern_name) {
            return Some(category);
        }
        let base = pattern_name.trim_end_matches(|c: char| c.is_ascii_digit());
        if base.is_empty() || base.len() == pattern_name.len() {
            return None;
        }
        self.categories.get(base)
    }

    /// Check that `pattern_name` is a known, active category and that
    /// `referenced_apis` carries one of its required markers.
    pub fn classify(
        &self,
        pattern_name: &str,
        referenced_apis: &[String],
    ) -> Result<&PatternCategory, CorpusError> {
        let category =
            self.resolve_category(pattern_name)
                .ok_or_else(|| CorpusError::UnknownPattern {
                    pattern: pattern_name.to_string(),
                })?;

        if !category.active {
            return Err(CorpusError::InactivePattern {
                pattern: pattern_name.to_string(),
            });
        }

        if !category.accepts_apis(referenced_apis) {
            return Err(CorpusError::MissingRequiredApiMarker {
                pattern: pattern_name.to_string(),
                markers: category.required_api_markers.clone(),
            });
        }

        Ok(category)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// On-disk taxonomy format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyFile {
    pub version: u64,
    pub categories: Vec<PatternCategory>,
}

/// Shared, versioned taxonomy.
#[derive(Debug, Default)]
pub struct TaxonomyRegistry {
    current: RwLock<Arc<TaxonomySnapshot>>,
}

impl TaxonomyRegistry {
    /// Empty registry at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the builtin categories.
    pub fn builtin() -> Self {
        let registry = Self::new();
        for category in builtin::categories() {
            // Builtin names are distinct, so registration cannot collide.
            if let Err(err) = registry.register(category) {
                tracing::warn!(error = %err, "skipping builtin category");
            }
        }
        registry
    }

    /// The current immutable snapshot.
    pub fn snapshot(&self) -> Arc<TaxonomySnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Add a category. Returns the new taxonomy version.
    pub fn register(&self, mut category: PatternCategory) -> Result<u64, CorpusError> {
        if category.name.is_empty() || category.name.chars().any(char::is_whitespace) {
            return Err(CorpusError::InvalidIdentity {
                field: "patternName",
                reason: format!("category name `{}` is empty or has whitespace", category.name),
            });
        }

        let mut current = self.current.write();
        if current.categories.contains_key(&category.name) {
            return Err(CorpusError::DuplicateCategory {
                name: category.name,
            });
        }

        let mut next = TaxonomySnapshot::clone(&current);
        next.version += 1;
        category.since_version = next.version;
        category.active = true;
        tracing::info!(
            category = %category.name,
            version = next.version,
            markers = ?category.required_api_markers,
            "registered pattern category"
        );
        next.categories.insert(category.name.clone(), category);

        let version = next.version;
        *current = Arc::new(next);
        Ok(version)
    }

    /// Mark a category as closed for new ingestion. Deactivating an inactive
    /// category is a no-op that returns the current version.
    pub fn deactivate(&self, name: &str) -> Result<u64, CorpusError> {
        let mut current = self.current.write();
        let Some(existing) = current.categories.get(name) else {
            return Err(CorpusError::UnknownPattern {
                pattern: name.to_string(),
            });
        };
        if !existing.active {
            return Ok(current.version);
        }

        let mut next = TaxonomySnapshot::clone(&current);
        next.version += 1;
        if let Some(category) = next.categories.get_mut(name) {
            category.active = false;
        }
        tracing::info!(category = %name, version = next.version, "deactivated pattern category");

        let version = next.version;
        *current = Arc::new(next);
        Ok(version)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn to_file(&self) -> TaxonomyFile {
        let snapshot = self.snapshot();
        TaxonomyFile {
            version: snapshot.version,
            categories: snapshot.categories.values().cloned().collect(),
        }
    }

    pub fn from_file(file: TaxonomyFile) -> Result<Self, CorpusError> {
        let mut categories = BTreeMap::new();
        for category in file.categories {
            if categories.contains_key(&category.name) {
                return Err(CorpusError::DuplicateCategory {
                    name: category.name,
                });
            }
            categories.insert(category.name.clone(), category);
        }
        Ok(Self {
            current: RwLock::new(Arc::new(TaxonomySnapshot {
                version: file.version,
                categories,
            })),
        })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.to_file())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write taxonomy to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read taxonomy from {}", path.display()))?;
        let file: TaxonomyFile = serde_json::from_str(&contents)
            .with_context(|| format!("invalid taxonomy file {}", path.display()))?;
        let registry = Self::from_file(file)?;
        tracing::debug!(
            path = %path.display(),
            version = registry.version(),
            "loaded taxonomy"
        );
        Ok(registry)
    }
}
