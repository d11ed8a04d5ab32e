//! Run-level accounting printed at the end of every command.

use serde::Serialize;

use crate::model::{Intake, RejectedEntry};
use crate::store::ApplyReport;

/// Counts for one invocation. Every run reports these, including runs that
/// never reach a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub filtered: usize,
    pub corrected: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub failed: usize,
    pub rejected_entries: Vec<RejectedEntry>,
}

impl RunSummary {
    pub fn from_intake(intake: &Intake) -> Self {
        Self {
            accepted: intake.records.len(),
            rejected: intake.rejected.len(),
            filtered: intake.filtered,
            rejected_entries: intake.rejected.clone(),
            ..Self::default()
        }
    }

    pub fn with_rejections(mut self, rejected: &[RejectedEntry]) -> Self {
        self.rejected += rejected.len();
        self.rejected_entries.extend_from_slice(rejected);
        self
    }

    /// Fold a corrective batch in.
    pub fn record_corrections(&mut self, report: &ApplyReport) {
        self.corrected += report.committed.len();
        self.failed += report.failed.len();
    }

    /// Fold a plain insert batch in.
    pub fn record_inserts(&mut self, report: &ApplyReport) {
        self.inserted += report.committed.len();
        self.failed += report.failed.len();
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// One-line form for the status stream.
    pub fn counts_line(&self) -> String {
        format!(
            "accepted {}, rejected {}, corrected {}, inserted {}, skipped {}, deleted {}, failed {}",
            self.accepted,
            self.rejected,
            self.corrected,
            self.inserted,
            self.skipped,
            self.deleted,
            self.failed
        )
    }
}
