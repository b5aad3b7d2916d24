//! Query filters from field mappings.
//!
//! A filter is a JSON object from field name to an exact value or "any":
//!
//! ```json
//! {"project": "mqtt", "misuseId": 389, "patternName": "any", "apiMarker": null}
//! ```
//!
//! `"any"`, `"*"` and `null` all mean "no constraint". Omitted fields are
//! unconstrained too.

use mucorpus_model::CorpusError;
use mucorpus_store::ScanFilter;
use serde_json::{Map, Value};

pub const FILTER_FIELDS: &[&str] = &["project", "misuseId", "patternName", "apiMarker", "currentOnly"];

fn invalid(field: &str, reason: impl Into<String>) -> CorpusError {
    CorpusError::InvalidFilter {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn is_any(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s == "any" || s == "*",
        _ => false,
    }
}

fn exact_string(field: &str, value: &Value) -> Result<String, CorpusError> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::String(_) => Err(invalid(field, "must not be empty")),
        other => Err(invalid(field, format!("expected a string, got {other}"))),
    }
}

fn exact_misuse_id(value: &Value) -> Result<u32, CorpusError> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid("misuseId", format!("expected an integer, got {value}")))?;

    match u32::try_from(id) {
        Ok(id) if id >= 1 => Ok(id),
        _ => Err(invalid("misuseId", format!("{id} is not a positive 32-bit id"))),
    }
}

/// Build a [`ScanFilter`] from a field mapping. Unknown fields are rejected.
pub fn filter_from_mapping(mapping: &Map<String, Value>) -> Result<ScanFilter, CorpusError> {
    let mut filter = ScanFilter::any();

    for (field, value) in mapping {
        if !FILTER_FIELDS.contains(&field.as_str()) {
            return Err(invalid(
                field,
                format!("unknown field (expected one of {})", FILTER_FIELDS.join(", ")),
            ));
        }
        if is_any(value) {
            continue;
        }
        match field.as_str() {
            "project" => filter.project = Some(exact_string(field, value)?),
            "misuseId" => filter.misuse_id = Some(exact_misuse_id(value)?),
            "patternName" => filter.pattern_name = Some(exact_string(field, value)?),
            "apiMarker" => filter.api_marker = Some(exact_string(field, value)?),
            "currentOnly" => {
                filter.current_only = value
                    .as_bool()
                    .ok_or_else(|| invalid(field, format!("expected a boolean, got {value}")))?;
            }
            _ => {}
        }
    }

    Ok(filter)
}

/// Parse a filter from JSON text. An empty document means "any".
pub fn parse_filter(text: &str) -> Result<ScanFilter, CorpusError> {
    if text.trim().is_empty() {
        return Ok(ScanFilter::any());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mapping)) => filter_from_mapping(&mapping),
        Ok(other) => Err(invalid("filter", format!("expected an object, got {other}"))),
        Err(err) => Err(invalid("filter", err.to_string())),
    }
}
