//! MuCorpus Ingestion
//!
//! Turns curator submissions into committed corpus examples:
//!
//! ```text
//!   records.json / corpus dir
//!            │
//!            ▼
//!   ┌─────────────────┐   ┌──────────────────┐   ┌───────────────────┐
//!   │ well-formedness │──►│ identity (store) │──►│ taxonomy snapshot │
//!   └─────────────────┘   └──────────────────┘   └─────────┬─────────┘
//!                                                          ▼
//!                                             CorpusStore::put (single CAS)
//! ```
//!
//! Validation is read-only. Nothing becomes visible to scans until the
//! commit step succeeds.

pub mod corpus_dir;
pub mod identity;
pub mod pipeline;
pub mod records;
pub mod retry;
pub mod wellformed;

pub use corpus_dir::{
    discover, import_dir, ApiExtractor, DatasetCatalog, DatasetWhitelist, ImportReport,
};
pub use identity::{resolve_identity, Identity};
pub use pipeline::{
    BatchReport, IngestConfig, IngestReceipt, IngestReport, IngestState, Ingestor, Rejection,
};
pub use records::{load_records, parse_records, read_records};
pub use retry::RetryPolicy;
pub use wellformed::{check_well_formed, WellFormednessConfig};
