//! Human and JSON rendering shared by commands. Reports go to stdout,
//! status lines to stderr.

use serde::Serialize;

use tally_recon::model::RejectedEntry;
use tally_recon::summary::RunSummary;

use crate::exit_codes::EXIT_ERROR;
use crate::CliError;

/// Rejected entries listed in full up to this many; the rest are counted.
const MAX_LISTED_REJECTIONS: usize = 50;

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::new(EXIT_ERROR, format!("cannot encode JSON: {e}")))?;
    println!("{text}");
    Ok(())
}

/// `1234567` as `1,234,567`.
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn signed(n: i64) -> String {
    let magnitude = thousands(n.unsigned_abs());
    if n < 0 {
        format!("-{magnitude}")
    } else if n > 0 {
        format!("+{magnitude}")
    } else {
        magnitude
    }
}

pub fn print_rejected(rejected: &[RejectedEntry]) {
    if rejected.is_empty() {
        return;
    }
    println!();
    println!("Rejected entries ({}):", rejected.len());
    for entry in rejected.iter().take(MAX_LISTED_REJECTIONS) {
        println!("  {:<12} {:<22} {}", entry.origin, entry.reason.to_string(), entry.raw);
    }
    if rejected.len() > MAX_LISTED_REJECTIONS {
        println!("  ... and {} more (use --json for the full list)", rejected.len() - MAX_LISTED_REJECTIONS);
    }
}

/// The closing lines every run prints.
pub fn print_run_summary(summary: &RunSummary) {
    print_rejected(&summary.rejected_entries);
    println!();
    println!("Summary: {}", summary.counts_line());
    if summary.filtered > 0 {
        println!("         {} rows skipped by the source's validity filter", summary.filtered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_separators() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }

    #[test]
    fn signed_values() {
        assert_eq!(signed(-1500), "-1,500");
        assert_eq!(signed(20), "+20");
        assert_eq!(signed(0), "0");
    }
}
