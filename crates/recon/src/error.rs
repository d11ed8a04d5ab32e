use chrono::NaiveDate;

#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (zero threshold, empty label, bad source reference, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// A section-header pattern that does not compile or lacks a capture group.
    #[error("invalid section pattern '{pattern}': {reason}")]
    SectionPattern { pattern: String, reason: String },
    /// A named tabular source is not configured.
    #[error("unknown source: {0}")]
    UnknownSource(String),
    /// Missing required column in tabular input.
    #[error("source '{source_name}': missing column '{column}'")]
    MissingColumn { source_name: String, column: String },
    /// A candidate record failed the quantity/label invariants.
    #[error("invalid record for {period}: {reason}")]
    InvalidRecord { period: NaiveDate, reason: String },
}

/// Errors surfaced by a [`crate::store::CanonicalStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store cannot be reached at all. Fatal for any write path.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store refused a record (invariant or constraint violation).
    #[error("record rejected by store: {0}")]
    Rejected(String),
    /// A read or write statement failed.
    #[error("store query failed: {0}")]
    Query(String),
}
