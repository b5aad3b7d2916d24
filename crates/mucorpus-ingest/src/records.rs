//! Reading submission records from JSON.
//!
//! Two layouts are accepted: a single JSON array of records, or one record
//! per line (JSONL). Blank lines in JSONL input are skipped.

use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use mucorpus_model::ExampleRecord;

/// Parse records from an in-memory document.
pub fn parse_records(text: &str) -> Result<Vec<ExampleRecord>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("parsing JSON array of records");
    }

    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line)
            .with_context(|| format!("parsing record on line {}", index + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub fn read_records<R: Read>(reader: R) -> Result<Vec<ExampleRecord>> {
    let mut text = String::new();
    BufReader::new(reader)
        .read_to_string(&mut text)
        .context("reading records")?;
    parse_records(&text)
}

pub fn load_records(path: &Path) -> Result<Vec<ExampleRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening records file {}", path.display()))?;
    read_records(file).with_context(|| format!("loading records from {}", path.display()))
}

/// Serialize records as JSONL, one per line.
pub fn write_records<W: std::io::Write>(mut writer: W, records: &[ExampleRecord]) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
