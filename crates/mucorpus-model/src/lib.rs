//! MuCorpus data model
//!
//! This crate defines the types shared by every other corpus crate:
//!
//! - [`ExampleRecord`]: one curator submission, as it arrives on the wire
//! - [`ExampleKey`]: the composite identity `(project, misuseId, patternName)`
//! - [`Example`]: a committed, stored misuse example
//! - [`CorpusError`]: the single error taxonomy surfaced to callers
//!
//! The engine never interprets `sourceText`; it only fingerprints it (see
//! [`digest`]) and hands it to the well-formedness check at ingestion time.

pub mod digest;
pub mod error;
pub mod example;
pub mod key;

pub use error::{BackendError, CorpusError};
pub use example::{Example, ExampleRecord};
pub use key::ExampleKey;
