//! Categories shipped with the engine.
//!
//! These cover the patterns present in the seed benchmark data. Curators add
//! further categories through [`crate::TaxonomyRegistry::register`].

use crate::PatternCategory;

struct CategoryDef {
    name: &'static str,
    markers: &'static [&'static str],
    description: &'static str,
}

const BUILTIN: &[CategoryDef] = &[
    CategoryDef {
        name: "IterateSynchronized",
        markers: &["synchronized"],
        description: "Iterate over a synchronized collection without holding its lock.",
    },
    CategoryDef {
        name: "FlushStreamBeforeGetBytes",
        markers: &["flush"],
        description: "Read the bytes of a wrapped output stream before flushing the wrapper.",
    },
    CategoryDef {
        name: "FlushStreamWithByteBeforeGetBytes",
        markers: &["flush"],
        description: "Single-byte write through a wrapping stream, read back before flush.",
    },
    CategoryDef {
        name: "FlushStreamWithShortBeforeGetBytes",
        markers: &["flush"],
        description: "Short write through a wrapping stream, read back before flush.",
    },
    CategoryDef {
        name: "TokenizerHasNext",
        markers: &["hasMoreTokens", "countTokens"],
        description: "Take the next token without checking that one is available.",
    },
    CategoryDef {
        name: "HandleNotANumber",
        markers: &["NumberFormatException", "parseLong", "parseInt"],
        description: "Parse a numeric string without handling the not-a-number case.",
    },
];

/// Fresh copies of the builtin categories.
pub fn categories() -> Vec<PatternCategory> {
    BUILTIN
        .iter()
        .map(|def| PatternCategory::new(def.name, def.markers.iter().copied(), def.description))
        .collect()
}
