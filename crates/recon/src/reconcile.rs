//! Per-period comparison of a source population against the canonical store,
//! and the corrective records that close material gaps.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::ReconcileConfig;
use crate::error::ReconError;
use crate::model::{Provenance, Record};

/// Sum of effective totals per period.
pub type PeriodTotals = BTreeMap<NaiveDate, u64>;

pub fn reduce_by_period<'a>(records: impl IntoIterator<Item = &'a Record>) -> PeriodTotals {
    let mut totals = PeriodTotals::new();
    for record in records {
        let slot = totals.entry(record.period_key()).or_insert(0);
        *slot = slot.saturating_add(record.effective_total());
    }
    totals
}

/// `delta = source_total - canonical_total` for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub period: NaiveDate,
    pub source_total: u64,
    pub canonical_total: u64,
    pub delta: i64,
}

impl Discrepancy {
    pub fn new(period: NaiveDate, source_total: u64, canonical_total: u64) -> Self {
        Self {
            period,
            source_total,
            canonical_total,
            delta: signed_delta(source_total, canonical_total),
        }
    }

    pub fn magnitude(&self) -> u64 {
        self.delta.unsigned_abs()
    }

    /// Canonical is short of the source: data is missing.
    pub fn is_missing(&self) -> bool {
        self.delta > 0
    }
}

/// Grand totals over the periods the source covers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapSummary {
    pub source_total: u64,
    pub canonical_total: u64,
    /// Canonical quantity in periods the source does not mention.
    pub canonical_outside_source: u64,
    pub gap: i64,
    /// `canonical_total / source_total` as a percentage; `None` for an empty source.
    pub completion_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcilePlan {
    /// Material discrepancies, largest magnitude first.
    pub discrepancies: Vec<Discrepancy>,
    /// One corrective record per corrected period, in ranking order.
    pub corrections: Vec<Record>,
    /// Material missing-data gaps left for a later run by the cap.
    pub deferred: Vec<Discrepancy>,
    /// Material gaps where the canonical store holds more than the source.
    pub excess: Vec<Discrepancy>,
    /// Periods whose non-zero delta is within the threshold.
    pub immaterial: usize,
    pub summary: GapSummary,
}

impl ReconcilePlan {
    pub fn correction_total(&self) -> u64 {
        self.corrections.iter().map(Record::quantity).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Compare `source` with `canonical` and plan corrective records.
///
/// Adjustment records are ignored on the source side. On the canonical side
/// they count toward the period total, so a gap closed by an earlier run
/// stays closed. Periods absent from the source are never corrected.
pub fn reconcile(
    source: &[Record],
    canonical: &[Record],
    config: &ReconcileConfig,
    run_at: DateTime<Utc>,
) -> Result<ReconcilePlan, ReconError> {
    if config.threshold == 0 {
        return Err(ReconError::ConfigValidation(
            "reconcile.threshold must be non-zero".into(),
        ));
    }

    let source_totals = reduce_by_period(source.iter().filter(|r| !r.is_adjustment()));
    let canonical_totals = reduce_by_period(canonical);

    let mut discrepancies = Vec::new();
    let mut immaterial = 0;
    let mut covered = 0u64;
    for (&period, &source_total) in &source_totals {
        let canonical_total = canonical_totals.get(&period).copied().unwrap_or(0);
        covered = covered.saturating_add(canonical_total);
        let d = Discrepancy::new(period, source_total, canonical_total);
        if d.magnitude() > config.threshold {
            discrepancies.push(d);
        } else if d.delta != 0 {
            immaterial += 1;
        }
    }
    discrepancies.sort_by(|a, b| b.magnitude().cmp(&a.magnitude()).then(a.period.cmp(&b.period)));

    let mut corrections = Vec::new();
    let mut deferred = Vec::new();
    let mut excess = Vec::new();
    for d in &discrepancies {
        if !d.is_missing() {
            excess.push(d.clone());
        } else if corrections.len() < config.max_corrections {
            corrections.push(corrective_record(d, config, run_at)?);
        } else {
            deferred.push(d.clone());
        }
    }

    let source_total: u64 = source_totals.values().sum();
    let canonical_all: u64 = canonical_totals.values().sum();
    let summary = GapSummary {
        source_total,
        canonical_total: covered,
        canonical_outside_source: canonical_all.saturating_sub(covered),
        gap: signed_delta(source_total, covered),
        completion_pct: (source_total > 0).then(|| covered as f64 * 100.0 / source_total as f64),
    };

    tracing::info!(
        periods = source_totals.len(),
        material = discrepancies.len(),
        corrections = corrections.len(),
        deferred = deferred.len(),
        excess = excess.len(),
        immaterial,
        "reconciled source against canonical store"
    );

    Ok(ReconcilePlan {
        discrepancies,
        corrections,
        deferred,
        excess,
        immaterial,
        summary,
    })
}

/// `a - b`, saturating at the `i64` bounds.
pub fn signed_delta(a: u64, b: u64) -> i64 {
    let wide = i128::from(a) - i128::from(b);
    i64::try_from(wide).unwrap_or(if wide > 0 { i64::MAX } else { i64::MIN })
}

fn corrective_record(
    d: &Discrepancy,
    config: &ReconcileConfig,
    run_at: DateTime<Utc>,
) -> Result<Record, ReconError> {
    Ok(Record::counted(
        d.period,
        config.adjustment_label.as_str(),
        d.magnitude(),
        run_at,
        Provenance::ReconciliationAdjustment,
    )?
    .with_note(format!("Adjustment to match source total of {}", d.source_total)))
}
