//! Cross-project index export.
//!
//! One tab-separated line per example, in scan order:
//!
//! ```text
//! project <TAB> misuseId <TAB> patternName <TAB> firstReferencedApi
//! ```

use std::io::Write;

use anyhow::{Context, Result};
use mucorpus_model::Example;
use mucorpus_store::{CorpusStore, ScanFilter};

pub fn index_line(example: &Example) -> String {
    let first_api = example
        .referenced_apis
        .first()
        .map(String::as_str)
        .unwrap_or("");
    format!(
        "{}\t{}\t{}\t{}",
        example.project, example.misuse_id, example.pattern_name, first_api
    )
}

/// Write the index for every example matching `filter`. Returns the number
/// of lines written.
pub fn write_index<W: Write>(store: &CorpusStore, filter: ScanFilter, mut out: W) -> Result<usize> {
    let mut lines = 0;
    for example in store.scan(filter) {
        let example = example.context("scanning corpus for index export")?;
        writeln!(out, "{}", index_line(&example))?;
        lines += 1;
    }
    out.flush()?;
    tracing::debug!(lines, "wrote cross-project index");
    Ok(lines)
}
