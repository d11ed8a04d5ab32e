//! `tally-recon`: normalization, deduplication and reconciliation of
//! collection records gathered from legacy logs and tabular exports.
//!
//! Pure engine crate: receives already-decoded text and tables, returns
//! records, plans and reports. File and database I/O live in `tally-io`.

pub mod breakdown;
pub mod config;
pub mod dedup;
pub mod error;
pub mod log_parser;
pub mod model;
pub mod reconcile;
pub mod sections;
pub mod store;
pub mod summary;
pub mod tabular;
pub mod verify;

pub use breakdown::Breakdown;
pub use config::TallyConfig;
pub use dedup::{DedupOutcome, DedupPolicy};
pub use error::{ReconError, StoreError};
pub use log_parser::{LogParser, ParsedLog};
pub use model::{Candidate, Intake, Provenance, Record, RecordId, RejectReason, RejectedEntry};
pub use reconcile::{reconcile, ReconcilePlan};
pub use store::{CanonicalStore, MemoryStore, RecordFilter};
pub use summary::RunSummary;
pub use tabular::{CellValue, Table};
