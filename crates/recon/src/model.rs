use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::breakdown::Breakdown;
use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Where a record came from. Machine-generated corrections carry
/// `ReconciliationAdjustment` so later runs can recognise them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    RawImport,
    ReconciliationAdjustment,
    DeduplicationSurvivor,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawImport => "raw-import",
            Self::ReconciliationAdjustment => "reconciliation-adjustment",
            Self::DeduplicationSurvivor => "deduplication-survivor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw-import" => Some(Self::RawImport),
            "reconciliation-adjustment" => Some(Self::ReconciliationAdjustment),
            "deduplication-survivor" => Some(Self::DeduplicationSurvivor),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Store-assigned identity of a persisted record.
pub type RecordId = i64;

/// A single attributed collection event, normalized from any source.
///
/// Fields are private: a `Record` can only be built through [`Record::new`]
/// or [`Record::counted`], which enforce the quantity and label invariants.
/// The supplemental quantity is always derived from its [`Breakdown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    id: Option<RecordId>,
    period_key: NaiveDate,
    source_label: String,
    quantity: u64,
    supplemental_quantity: u64,
    #[serde(skip_serializing_if = "Breakdown::is_empty")]
    breakdown: Breakdown,
    submitted_at: DateTime<Utc>,
    provenance_tag: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl Record {
    /// Build a record, rejecting negative quantities and blank labels.
    pub fn new(
        period_key: NaiveDate,
        source_label: impl Into<String>,
        quantity: i64,
        submitted_at: DateTime<Utc>,
        provenance_tag: Provenance,
    ) -> Result<Self, ReconError> {
        let quantity = u64::try_from(quantity).map_err(|_| ReconError::InvalidRecord {
            period: period_key,
            reason: format!("negative quantity {quantity}"),
        })?;
        Self::counted(period_key, source_label, quantity, submitted_at, provenance_tag)
    }

    /// Like [`Record::new`] for amounts that are already unsigned.
    pub fn counted(
        period_key: NaiveDate,
        source_label: impl Into<String>,
        quantity: u64,
        submitted_at: DateTime<Utc>,
        provenance_tag: Provenance,
    ) -> Result<Self, ReconError> {
        let source_label = source_label.into().trim().to_string();
        if source_label.is_empty() {
            return Err(ReconError::InvalidRecord {
                period: period_key,
                reason: "source label is empty".into(),
            });
        }

        Ok(Self {
            id: None,
            period_key,
            source_label,
            quantity,
            supplemental_quantity: 0,
            breakdown: Breakdown::empty(),
            submitted_at,
            provenance_tag,
            note: None,
        })
    }

    /// Attach a breakdown; the supplemental quantity becomes its total.
    pub fn with_breakdown(mut self, breakdown: Breakdown) -> Self {
        self.supplemental_quantity = breakdown.total();
        self.breakdown = breakdown;
        self
    }

    /// Attach the identity assigned by the store that holds this record.
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub(crate) fn with_provenance(mut self, provenance_tag: Provenance) -> Self {
        self.provenance_tag = provenance_tag;
        self
    }

    pub fn id(&self) -> Option<RecordId> {
        self.id
    }

    pub fn period_key(&self) -> NaiveDate {
        self.period_key
    }

    pub fn source_label(&self) -> &str {
        &self.source_label
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn supplemental_quantity(&self) -> u64 {
        self.supplemental_quantity
    }

    pub fn breakdown(&self) -> &Breakdown {
        &self.breakdown
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn provenance_tag(&self) -> Provenance {
        self.provenance_tag
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// `quantity + supplemental_quantity`: the only amount ever compared.
    pub fn effective_total(&self) -> u64 {
        self.quantity.saturating_add(self.supplemental_quantity)
    }

    pub fn is_adjustment(&self) -> bool {
        self.provenance_tag == Provenance::ReconciliationAdjustment
    }
}

// ---------------------------------------------------------------------------
// Rejections + intake
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MalformedPeriod,
    UnparseableDate,
    NonNumericTotal,
    NegativeQuantity,
    MissingLabel,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedPeriod => write!(f, "malformed period number"),
            Self::UnparseableDate => write!(f, "unparseable date"),
            Self::NonNumericTotal => write!(f, "non-numeric total"),
            Self::NegativeQuantity => write!(f, "negative quantity"),
            Self::MissingLabel => write!(f, "missing source label"),
        }
    }
}

/// An input entry excluded from the output, kept for operator follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedEntry {
    /// Human locator, e.g. `byte 1042` or `row 17`.
    pub origin: String,
    /// The offending raw text or field value.
    pub raw: String,
    pub reason: RejectReason,
}

/// One item of an adapter's output sequence.
pub type Candidate = Result<Record, RejectedEntry>;

/// Accepted records and rejected entries collected from a candidate sequence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Intake {
    pub records: Vec<Record>,
    pub rejected: Vec<RejectedEntry>,
    /// Rows dropped by a validity predicate (not errors).
    pub filtered: usize,
}

impl Intake {
    pub fn total(&self) -> u64 {
        self.records.iter().map(Record::effective_total).sum()
    }
}

impl FromIterator<Candidate> for Intake {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        let mut intake = Intake::default();
        for candidate in iter {
            match candidate {
                Ok(record) => intake.records.push(record),
                Err(rejected) => intake.rejected.push(rejected),
            }
        }
        intake
    }
}
