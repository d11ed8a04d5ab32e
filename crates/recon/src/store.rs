//! The canonical store seam: filters, the store trait, an in-memory
//! implementation, and batch writers with per-record failure isolation.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::StoreError;
use crate::model::{Record, RecordId};

// ---------------------------------------------------------------------------
// Label patterns
// ---------------------------------------------------------------------------

/// SQL LIKE-style pattern: `%` matches any run, `_` one character.
/// Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPattern {
    raw: String,
    folded: Vec<char>,
}

impl LabelPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let folded = raw.to_lowercase().chars().collect();
        Self { raw, folded }
    }

    /// Pattern matching exactly `label` (wildcards are not escaped; labels
    /// rarely carry `%` or `_`).
    pub fn exact(label: &str) -> Self {
        Self::new(label)
    }

    pub fn as_like(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, label: &str) -> bool {
        let text: Vec<char> = label.to_lowercase().chars().collect();
        wildcard_match(&self.folded, &text)
    }
}

/// Iterative wildcard match with single-star backtracking.
fn wildcard_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub label: Option<LabelPattern>,
    pub exclude_labels: Vec<LabelPattern>,
    pub period_from: Option<NaiveDate>,
    pub period_to: Option<NaiveDate>,
    /// Drop records tagged `reconciliation-adjustment`.
    pub exclude_adjustments: bool,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn label(mut self, pattern: LabelPattern) -> Self {
        self.label = Some(pattern);
        self
    }

    pub fn period_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.period_from = from;
        self.period_to = to;
        self
    }

    /// Exclude tagged adjustments plus any record whose label matches one of
    /// `legacy_labels` (adjustments written before tags existed).
    pub fn without_adjustments<S: AsRef<str>>(mut self, legacy_labels: &[S]) -> Self {
        self.exclude_adjustments = true;
        self.exclude_labels
            .extend(legacy_labels.iter().map(|l| LabelPattern::new(l.as_ref())));
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        let label = record.source_label();
        let period = record.period_key();
        !(self.exclude_adjustments && record.is_adjustment())
            && self.label.as_ref().map_or(true, |p| p.matches(label))
            && !self.exclude_labels.iter().any(|p| p.matches(label))
            && self.period_from.map_or(true, |from| period >= from)
            && self.period_to.map_or(true, |to| period <= to)
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// The authoritative record collection.
///
/// Inserts are atomic per record. Deletes touch exactly the supplied ids.
pub trait CanonicalStore {
    fn enumerate_records(&self, filter: &RecordFilter) -> Result<Vec<Record>, StoreError>;

    /// Persist one record and return its new id. A record that already has
    /// an id has been persisted once and is refused.
    fn insert_record(&mut self, record: &Record) -> Result<RecordId, StoreError>;

    /// Delete the records with these ids; returns how many existed.
    fn delete_records(&mut self, ids: &[RecordId]) -> Result<usize, StoreError>;
}

/// Vec-backed store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<Record>,
    next_id: RecordId,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `records`, assigning fresh ids.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for record in records {
            store.insert_record(&record)?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CanonicalStore for MemoryStore {
    fn enumerate_records(&self, filter: &RecordFilter) -> Result<Vec<Record>, StoreError> {
        Ok(self.records.iter().filter(|r| filter.matches(r)).cloned().collect())
    }

    fn insert_record(&mut self, record: &Record) -> Result<RecordId, StoreError> {
        if let Some(id) = record.id() {
            return Err(StoreError::Rejected(format!("record already persisted as id {id}")));
        }
        self.next_id += 1;
        self.records.push(record.clone().with_id(self.next_id));
        Ok(self.next_id)
    }

    fn delete_records(&mut self, ids: &[RecordId]) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records
            .retain(|r| !r.id().is_some_and(|id| ids.contains(&id)));
        Ok(before - self.records.len())
    }
}

// ---------------------------------------------------------------------------
// Batch writes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FailedWrite {
    pub record: Record,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    /// Records as persisted, carrying their new ids.
    pub committed: Vec<Record>,
    pub failed: Vec<FailedWrite>,
}

impl ApplyReport {
    pub fn committed_total(&self) -> u64 {
        self.committed.iter().map(Record::effective_total).sum()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Insert each record on its own. A failed insert is logged and recorded;
/// the rest of the batch still runs.
pub fn apply_inserts<S: CanonicalStore + ?Sized>(store: &mut S, records: &[Record]) -> ApplyReport {
    let mut report = ApplyReport::default();
    for record in records {
        match store.insert_record(record) {
            Ok(id) => report.committed.push(record.clone().with_id(id)),
            Err(e) => {
                tracing::warn!(
                    period = %record.period_key(),
                    amount = record.effective_total(),
                    label = record.source_label(),
                    error = %e,
                    "insert failed"
                );
                report.failed.push(FailedWrite {
                    record: record.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    tracing::info!(
        committed = report.committed.len(),
        failed = report.failed.len(),
        "applied inserts"
    );
    report
}

/// Delete exactly `ids`. An empty id set never reaches the store.
pub fn apply_deletions<S: CanonicalStore + ?Sized>(
    store: &mut S,
    ids: &[RecordId],
) -> Result<usize, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let deleted = store.delete_records(ids)?;
    tracing::info!(requested = ids.len(), deleted, "applied deletions");
    Ok(deleted)
}

/// Split `incoming` into records the store lacks and records it already
/// holds with the same period, label and quantity.
pub fn partition_new(existing: &[Record], incoming: Vec<Record>) -> (Vec<Record>, Vec<Record>) {
    let mut seen: std::collections::HashSet<(NaiveDate, String, u64)> = existing
        .iter()
        .map(|r| (r.period_key(), r.source_label().to_lowercase(), r.quantity()))
        .collect();
    incoming.into_iter().partition(|r| {
        seen.insert((r.period_key(), r.source_label().to_lowercase(), r.quantity()))
    })
}
