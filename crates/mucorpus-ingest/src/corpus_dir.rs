//! Importing a benchmark-style corpus directory.
//!
//! Expected layout:
//!
//! ```text
//! <root>/
//!   <project>/
//!     misuses/
//!       <misuseId>/
//!         misuse.json            optional: {"apis": ["Type.method", ...]}
//!         patterns/
//!           <PatternName>.java   one fragment per pattern
//! ```
//!
//! Referenced APIs are listed lexically: sidecar entries first, then
//! `receiver.method(` calls whose receiver is a typed declaration or a
//! capitalised type, then `new Type(` constructions, then `import`s. No
//! attempt is made to infer the pattern itself; classification comes from the
//! file name.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mucorpus_model::ExampleRecord;
use mucorpus_taxonomy::TaxonomySnapshot;
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::pipeline::{BatchReport, Ingestor};

pub const MISUSES_DIR: &str = "misuses";
pub const PATTERNS_DIR: &str = "patterns";
pub const SIDECAR_FILE: &str = "misuse.json";

// ============================================================================
// API extraction
// ============================================================================

/// Lexical lister of the APIs a fragment imports or invokes.
#[derive(Debug, Clone)]
pub struct ApiExtractor {
    noise: Regex,
    import: Regex,
    declaration: Regex,
    call: Regex,
    construction: Regex,
}

impl ApiExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            noise: Regex::new(
                r#"(?s)//[^\n]*|/\*.*?\*/|"(?:\\.|[^"\\\n])*"|'(?:\\.|[^'\\\n])*'"#,
            )?,
            import: Regex::new(r"(?m)^\s*import\s+(?:static\s+)?([A-Za-z_][\w.]*(?:\.\*)?)\s*;")?,
            declaration: Regex::new(
                r"\b([A-Z]\w*(?:\.[A-Z]\w*)*)\s*(?:<[^;(){}=]*>)?(?:\[\])*\s+([a-z_]\w*)\s*[=;,):]",
            )?,
            call: Regex::new(r"\b([A-Za-z_]\w*)\s*\.\s*([a-z_]\w*)\s*\(")?,
            construction: Regex::new(r"\bnew\s+([A-Z]\w*(?:\.[A-Z]\w*)*)\s*(?:<[^;(){}=]*>)?\s*\(")?,
        })
    }

    pub fn extract(&self, source_text: &str) -> Vec<String> {
        let code = self.noise.replace_all(source_text, " ");

        let imports: Vec<String> = self
            .import
            .captures_iter(&code)
            .map(|caps| caps[1].to_string())
            .collect();
        let body = self.import.replace_all(&code, " ");

        let mut types: HashMap<&str, &str> = HashMap::new();
        for caps in self.declaration.captures_iter(&body) {
            if let (Some(ty), Some(name)) = (caps.get(1), caps.get(2)) {
                types.insert(name.as_str(), ty.as_str());
            }
        }

        let mut apis = Vec::new();
        for caps in self.call.captures_iter(&body) {
            let receiver = &caps[1];
            let method = &caps[2];
            if let Some(ty) = types.get(receiver) {
                apis.push(format!("{ty}.{method}"));
            } else if receiver.starts_with(|c: char| c.is_ascii_uppercase()) {
                apis.push(format!("{receiver}.{method}"));
            }
        }
        apis.extend(
            self.construction
                .captures_iter(&body)
                .map(|caps| format!("{}.<init>", &caps[1])),
        );
        apis.extend(imports);

        dedup_in_order(apis)
    }
}

fn dedup_in_order(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[derive(Debug, Deserialize)]
struct Sidecar {
    #[serde(default)]
    apis: Vec<String>,
}

// ============================================================================
// Dataset whitelists
// ============================================================================

/// `datasets.json`: dataset name → entries, each a project (`"testng"`) or a
/// single misuse (`"testng.18"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetCatalog {
    pub datasets: BTreeMap<String, Vec<String>>,
}

impl DatasetCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading dataset catalog {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing dataset catalog {}", path.display()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn whitelist(&self, name: &str) -> Result<DatasetWhitelist> {
        let entries = self.datasets.get(name).with_context(|| {
            let known: Vec<&str> = self.names().collect();
            format!("unknown dataset `{name}` (known: {})", known.join(", "))
        })?;
        Ok(DatasetWhitelist::from_entries(entries))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetWhitelist {
    projects: BTreeSet<String>,
    misuses: BTreeSet<(String, i64)>,
}

impl DatasetWhitelist {
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut whitelist = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            let misuse = entry
                .rsplit_once('.')
                .and_then(|(project, id)| Some((project, id.parse::<i64>().ok()?)));
            match misuse {
                Some((project, id)) => {
                    whitelist.misuses.insert((project.to_string(), id));
                }
                None => {
                    whitelist.projects.insert(entry.to_string());
                }
            }
        }
        whitelist
    }

    pub fn admits(&self, project: &str, misuse_id: i64) -> bool {
        self.projects.contains(project) || self.misuses.contains(&(project.to_string(), misuse_id))
    }
}

// ============================================================================
// Discovery
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredExample {
    pub path: PathBuf,
    pub record: ExampleRecord,
}

/// A file under the root that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub examples: Vec<DiscoveredExample>,
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub skipped: Vec<SkippedEntry>,
    /// Rejections carry `project:misuseId:patternName` labels.
    pub batch: BatchReport,
}

/// Walk `root` and build one record per pattern fragment, in path order.
pub fn discover(root: &Path, whitelist: Option<&DatasetWhitelist>) -> Result<Discovery> {
    let extractor = ApiExtractor::new().context("compiling API extraction patterns")?;
    let mut sidecars: HashMap<PathBuf, std::result::Result<Vec<String>, String>> = HashMap::new();
    let mut discovery = Discovery::default();

    if !root.is_dir() {
        anyhow::bail!("corpus root {} is not a directory", root.display());
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.depth() != 5 {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts[4].starts_with('.') {
            continue;
        }
        if parts[1] != MISUSES_DIR || parts[3] != PATTERNS_DIR {
            continue;
        }

        let project = parts[0].as_str();
        let misuse_id = match parts[2].parse::<i64>() {
            Ok(id) => id,
            Err(_) => {
                discovery.skipped.push(SkippedEntry {
                    path: path.to_path_buf(),
                    reason: format!("misuse directory `{}` is not a number", parts[2]),
                });
                continue;
            }
        };
        if whitelist.is_some_and(|w| !w.admits(project, misuse_id)) {
            continue;
        }

        let pattern_name = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };

        let source_text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                discovery.skipped.push(SkippedEntry {
                    path: path.to_path_buf(),
                    reason: format!("unreadable fragment: {err}"),
                });
                continue;
            }
        };

        let misuse_dir = root.join(project).join(MISUSES_DIR).join(&parts[2]);
        let sidecar = sidecars
            .entry(misuse_dir.clone())
            .or_insert_with(|| read_sidecar(&misuse_dir.join(SIDECAR_FILE)));
        let mut apis = match sidecar {
            Ok(apis) => apis.clone(),
            Err(reason) => {
                discovery.skipped.push(SkippedEntry {
                    path: path.to_path_buf(),
                    reason: reason.clone(),
                });
                continue;
            }
        };
        apis.extend(extractor.extract(&source_text));

        tracing::debug!(
            project,
            misuse_id,
            pattern = %pattern_name,
            apis = apis.len(),
            "discovered fragment"
        );
        discovery.examples.push(DiscoveredExample {
            path: path.to_path_buf(),
            record: ExampleRecord::new(
                project,
                misuse_id,
                pattern_name,
                source_text,
                dedup_in_order(apis),
            ),
        });
    }

    Ok(discovery)
}

fn read_sidecar(path: &Path) -> std::result::Result<Vec<String>, String> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|err| format!("unreadable {}: {err}", path.display()))?;
    serde_json::from_str::<Sidecar>(&text)
        .map(|sidecar| sidecar.apis)
        .map_err(|err| format!("invalid {}: {err}", path.display()))
}

/// Discover and ingest every fragment under `root`.
pub fn import_dir(
    ingestor: &Ingestor,
    root: &Path,
    taxonomy: &TaxonomySnapshot,
    whitelist: Option<&DatasetWhitelist>,
) -> Result<ImportReport> {
    let discovery = discover(root, whitelist)?;
    tracing::info!(
        root = %root.display(),
        fragments = discovery.examples.len(),
        skipped = discovery.skipped.len(),
        "importing corpus directory"
    );
    let batch = ingestor.ingest_batch(
        discovery.examples.into_iter().map(|found| found.record),
        taxonomy,
    );
    Ok(ImportReport {
        skipped: discovery.skipped,
        batch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mucorpus_store::{CorpusStore, ScanFilter};
    use mucorpus_taxonomy::TaxonomyRegistry;

    const MQTT_389: &str = r#"import java.io.ByteArrayOutputStream;
import java.io.DataOutputStream;
import java.io.IOException;

class FlushStreamWithByteBeforeGetBytes {
  byte[] pattern(byte b) {
    ByteArrayOutputStream baos = new ByteArrayOutputStream();
    DataOutputStream dos = new DataOutputStream(baos);
    try {
      dos.writeByte(b);
      dos.flush();
      return baos.toByteArray();
    } catch (IOException e) {
      return new byte[0];
    }
  }
}
"#;

    // Carries one `}` too many.
    const NTRU_473: &str = r#"import java.io.DataOutputStream;
import java.io.IOException;
import java.io.OutputStream;

class FlushStreamBeforeGetBytes {
  byte[] pattern(OutputStream out) throws IOException {
      DataOutputStream dout = new DataOutputStream(out);
      dout.writeInt(0);
      dout.flush();
    }
  }
}
"#;

    const NTRU_474: &str = r#"import java.io.DataOutputStream;
import java.io.IOException;
import java.io.OutputStream;

class FlushStreamBeforeGetBytes {
  void pattern(OutputStream out) throws IOException {
    DataOutputStream dout = new DataOutputStream(out);
    dout.writeInt(0);
    dout.flush();
  }
}
"#;

    const TESTNG_18: &str = r#"import java.util.List;

class IterateSynchonized {
  void pattern(List<String> items) {
    synchronized(items) {
      for (String item : items) {
        // item.hashCode() is only mentioned here
      }
    }
  }
}
"#;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn corpus() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "mqtt/misuses/389/patterns/FlushStreamWithByteBeforeGetBytes.java", MQTT_389);
        write(root, "tbuktu-ntru/misuses/473/patterns/FlushStreamBeforeGetBytes.java", NTRU_473);
        write(root, "tbuktu-ntru/misuses/474/patterns/FlushStreamBeforeGetBytes.java", NTRU_474);
        write(root, "testng/misuses/18/patterns/IterateSynchronized.java", TESTNG_18);
        write(
            root,
            "testng/misuses/18/misuse.json",
            r#"{"apis": ["Collections.synchronizedList"]}"#,
        );
        write(root, "testng/misuses/latest/patterns/IterateSynchronized.java", TESTNG_18);
        write(root, "testng/README.md", "not a fragment");
        dir
    }

    #[test]
    fn extracts_calls_in_source_order_then_constructions_then_imports() {
        let apis = ApiExtractor::new().unwrap().extract(MQTT_389);
        assert_eq!(
            apis,
            vec![
                "DataOutputStream.writeByte",
                "DataOutputStream.flush",
                "ByteArrayOutputStream.toByteArray",
                "ByteArrayOutputStream.<init>",
                "DataOutputStream.<init>",
                "java.io.ByteArrayOutputStream",
                "java.io.DataOutputStream",
                "java.io.IOException",
            ]
        );
    }

    #[test]
    fn extraction_ignores_comments_and_literals() {
        let src = r#"
class HandleNotANumber {
  Cid cid(String value) {
    try {
      // The constructor invokes Long.parseLong() on the string parameter.
      return new Cid(value);
    } catch (NumberFormatException e) {
      throw new NumberFormatException(String.format("Integer.parseInt(%s)", value));
    }
  }
}
"#;
        let apis = ApiExtractor::new().unwrap().extract(src);
        assert!(apis.contains(&"String.format".to_string()), "{apis:?}");
        assert!(apis.contains(&"NumberFormatException.<init>".to_string()), "{apis:?}");
        assert!(!apis.iter().any(|a| a.contains("parseLong") || a.contains("parseInt")));
    }

    #[test]
    fn static_calls_keep_their_type_and_unknown_receivers_are_dropped() {
        let src = "class A { void p() { Collections.synchronizedList(xs); this.helper(); other.call(); } }";
        let apis = ApiExtractor::new().unwrap().extract(src);
        assert_eq!(apis, vec!["Collections.synchronizedList"]);
    }

    #[test]
    fn discovery_walks_layout_in_path_order() {
        let dir = corpus();
        let discovery = discover(dir.path(), None).unwrap();

        let keys: Vec<(String, i64, String)> = discovery
            .examples
            .iter()
            .map(|d| {
                (
                    d.record.project.clone(),
                    d.record.misuse_id,
                    d.record.pattern_name.clone(),
                )
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                ("mqtt".into(), 389, "FlushStreamWithByteBeforeGetBytes".into()),
                ("tbuktu-ntru".into(), 473, "FlushStreamBeforeGetBytes".into()),
                ("tbuktu-ntru".into(), 474, "FlushStreamBeforeGetBytes".into()),
                ("testng".into(), 18, "IterateSynchronized".into()),
            ]
        );
        assert_eq!(discovery.skipped.len(), 1);
        assert!(discovery.skipped[0].reason.contains("`latest`"));

        let testng = &discovery.examples[3].record;
        assert_eq!(testng.referenced_apis[0], "Collections.synchronizedList");
    }

    #[test]
    fn whitelist_restricts_discovery() {
        let dir = corpus();
        let catalog: DatasetCatalog = serde_json::from_str(
            r#"{"flush": ["mqtt", "tbuktu-ntru.474"], "sync": ["testng"]}"#,
        )
        .unwrap();

        let flush = catalog.whitelist("flush").unwrap();
        let found = discover(dir.path(), Some(&flush)).unwrap();
        let ids: Vec<i64> = found.examples.iter().map(|d| d.record.misuse_id).collect();
        assert_eq!(ids, vec![389, 474]);

        assert!(catalog.whitelist("missing").is_err());
    }

    #[test]
    fn import_commits_well_formed_fragments_and_reports_the_rest() {
        let dir = corpus();
        let store = CorpusStore::in_memory();
        let ingestor = Ingestor::new(store.clone());
        let taxonomy = TaxonomyRegistry::builtin().snapshot();

        let report = import_dir(&ingestor, dir.path(), &taxonomy, None).unwrap();

        assert_eq!(report.batch.committed, 3);
        assert_eq!(report.batch.rejected.len(), 1);
        assert_eq!(report.batch.rejected[0].record, "tbuktu-ntru:473:FlushStreamBeforeGetBytes");
        assert_eq!(report.batch.rejected[0].kind, "MalformedSource");

        let ntru: Vec<_> = store
            .scan(ScanFilter::any().project("tbuktu-ntru"))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(ntru.len(), 1);
        assert_eq!(ntru[0].misuse_id, 474);

        // Re-importing the same tree changes nothing.
        let again = import_dir(&ingestor, dir.path(), &taxonomy, None).unwrap();
        assert_eq!(again.batch.committed, 0);
        assert_eq!(again.batch.unchanged, 3);
    }

    #[test]
    fn broken_sidecar_skips_its_fragments() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "mqtt/misuses/389/patterns/FlushStreamWithByteBeforeGetBytes.java", MQTT_389);
        write(dir.path(), "mqtt/misuses/389/misuse.json", "{not json");

        let discovery = discover(dir.path(), None).unwrap();
        assert!(discovery.examples.is_empty());
        assert!(discovery.skipped[0].reason.contains("invalid"));
    }
}
