//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `tally` exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Codes
//!
//! | Code | Meaning                                                     |
//! |------|-------------------------------------------------------------|
//! | 0    | Success                                                     |
//! | 1    | General error (unspecified)                                 |
//! | 2    | CLI usage error (bad or conflicting arguments)              |
//! | 3    | Configuration invalid (parse, validation, unknown source)   |
//! | 4    | Input unreadable (missing file, bad encoding, missing column) |
//! | 5    | Store unavailable (fatal before any write)                  |
//! | 6    | Partial apply (some isolated writes failed)                 |
//! | 7    | Aborted at the confirmation prompt (nothing written)        |
//! | 8    | Discrepancies remain (report commands with `--strict`)      |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use tally_recon::error::{ReconError, StoreError};

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Config file could not be parsed or failed validation.
pub const EXIT_CONFIG: u8 = 3;

/// A source file could not be read or decoded, or lacks a configured column.
pub const EXIT_INPUT: u8 = 4;

/// The canonical store could not be opened. Any apply aborts before writing.
pub const EXIT_STORE_UNAVAILABLE: u8 = 5;

/// An apply ran to completion but at least one write failed.
pub const EXIT_PARTIAL_APPLY: u8 = 6;

/// The operator declined the confirmation prompt.
pub const EXIT_ABORTED: u8 = 7;

/// `--strict` report found material discrepancies.
pub const EXIT_DISCREPANCIES: u8 = 8;

/// Map a core error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_)
        | ReconError::ConfigValidation(_)
        | ReconError::SectionPattern { .. }
        | ReconError::UnknownSource(_) => EXIT_CONFIG,
        ReconError::MissingColumn { .. } => EXIT_INPUT,
        ReconError::InvalidRecord { .. } => EXIT_ERROR,
    }
}

/// Map a store error to its exit code.
pub fn store_exit_code(err: &StoreError) -> u8 {
    match err {
        StoreError::Unavailable(_) => EXIT_STORE_UNAVAILABLE,
        StoreError::Rejected(_) | StoreError::Query(_) => EXIT_ERROR,
    }
}

/// Machine-readable error line for `--json` runs.
#[derive(Debug, serde::Serialize)]
pub struct ErrorOutput<'a> {
    pub error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'a str>,
    pub exit_code: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_CONFIG,
            EXIT_INPUT,
            EXIT_STORE_UNAVAILABLE,
            EXIT_PARTIAL_APPLY,
            EXIT_ABORTED,
            EXIT_DISCREPANCIES,
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn error_mapping() {
        assert_eq!(recon_exit_code(&ReconError::ConfigParse("x".into())), EXIT_CONFIG);
        assert_eq!(
            recon_exit_code(&ReconError::MissingColumn {
                source_name: "s".into(),
                column: "c".into()
            }),
            EXIT_INPUT
        );
        assert_eq!(
            recon_exit_code(&ReconError::InvalidRecord {
                period: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                reason: "r".into()
            }),
            EXIT_ERROR
        );
        assert_eq!(store_exit_code(&StoreError::Unavailable("db".into())), EXIT_STORE_UNAVAILABLE);
        assert_eq!(store_exit_code(&StoreError::Query("q".into())), EXIT_ERROR);
    }
}
