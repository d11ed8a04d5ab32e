//! Conversion of already-decoded row/column data into candidate records.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::breakdown::Breakdown;
use crate::config::{SourceConfig, Validity};
use crate::error::ReconError;
use crate::model::{Candidate, Intake, Provenance, Record, RejectReason, RejectedEntry};

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// A decoded cell. CSV input is all `Text`; spreadsheets keep their types.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Display form used for flag comparisons and rejection reports.
    pub fn as_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => format!("{n}"),
            Self::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Self::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Header row plus data rows. Short rows read as `Empty` past their end.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.headers.iter().position(|h| h.trim() == name)
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

struct Columns {
    date: usize,
    total: usize,
    valid: Option<usize>,
    breakdown: Option<usize>,
    label: Option<usize>,
    submitted: Option<usize>,
}

/// Lazy sequence of candidates from one table. Rows dropped by the
/// source's validity predicate produce no item; see [`TabularRecords::filtered`].
pub struct TabularRecords<'a> {
    config: &'a SourceConfig,
    columns: Columns,
    rows: std::iter::Enumerate<std::slice::Iter<'a, Vec<CellValue>>>,
    submitted_at: DateTime<Utc>,
    filtered: usize,
}

/// Start converting `table` with the named source's column mapping.
///
/// Missing configured columns are a structural error for the whole source;
/// problems inside individual rows are reported per row instead.
pub fn adapt<'a>(
    source_name: &str,
    table: &'a Table,
    config: &'a SourceConfig,
    submitted_at: DateTime<Utc>,
) -> Result<TabularRecords<'a>, ReconError> {
    let required = |column: &str| {
        table.column(column).ok_or_else(|| ReconError::MissingColumn {
            source_name: source_name.into(),
            column: column.into(),
        })
    };
    let optional = |column: &Option<String>| column.as_deref().map(required).transpose();

    let columns = Columns {
        date: required(&config.date_column)?,
        total: required(&config.total_column)?,
        valid: match config.validity {
            Validity::Flagged => optional(&config.valid_column)?,
            _ => None,
        },
        breakdown: optional(&config.breakdown_column)?,
        label: optional(&config.label_column)?,
        submitted: optional(&config.submitted_column)?,
    };

    Ok(TabularRecords {
        config,
        columns,
        rows: table.rows.iter().enumerate(),
        submitted_at,
        filtered: 0,
    })
}

impl TabularRecords<'_> {
    /// Rows dropped by the validity predicate so far.
    pub fn filtered(&self) -> usize {
        self.filtered
    }

    pub fn into_intake(mut self) -> Intake {
        let mut intake = Intake::default();
        for candidate in self.by_ref() {
            match candidate {
                Ok(record) => intake.records.push(record),
                Err(rejected) => intake.rejected.push(rejected),
            }
        }
        intake.filtered = self.filtered;
        tracing::info!(
            accepted = intake.records.len(),
            rejected = intake.rejected.len(),
            filtered = intake.filtered,
            "converted tabular source"
        );
        intake
    }

    /// `None` when the row is filtered out.
    fn convert(&self, index: usize, row: &[CellValue]) -> Option<Candidate> {
        static EMPTY: CellValue = CellValue::Empty;
        let cell = |i: usize| row.get(i).unwrap_or(&EMPTY);
        // header is line 1
        let origin = format!("row {}", index + 2);
        let reject = |raw: &CellValue, reason: RejectReason| {
            Some(Err(RejectedEntry {
                origin: origin.clone(),
                raw: raw.as_text(),
                reason,
            }))
        };

        if let Some(vi) = self.columns.valid {
            let flag = cell(vi).as_text();
            if !self.config.valid_values.iter().any(|v| flag_matches(v, &flag)) {
                return None;
            }
        }

        let total_cell = cell(self.columns.total);
        if total_cell.is_blank() {
            return None;
        }
        let Some(total) = coerce_total(total_cell) else {
            return reject(total_cell, RejectReason::NonNumericTotal);
        };
        if total < 0 {
            return reject(total_cell, RejectReason::NegativeQuantity);
        }
        if total == 0 && self.config.validity == Validity::PositiveTotal {
            return None;
        }

        let date_cell = cell(self.columns.date);
        let Some(date) = coerce_date(date_cell) else {
            return reject(date_cell, RejectReason::UnparseableDate);
        };

        let label = self
            .columns
            .label
            .map(|i| cell(i).as_text())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.config.label.clone());

        let breakdown = match self.columns.breakdown.map(cell) {
            Some(CellValue::Text(raw)) => Breakdown::decode(raw),
            Some(CellValue::Number(n)) => Breakdown::decode(&CellValue::Number(*n).as_text()),
            _ => Breakdown::empty(),
        };

        let submitted_at = self
            .columns
            .submitted
            .and_then(|i| coerce_timestamp(cell(i)))
            .unwrap_or(self.submitted_at);

        match Record::new(date, label.as_str(), total, submitted_at, Provenance::RawImport) {
            Ok(record) => Some(Ok(record.with_breakdown(breakdown))),
            Err(_) => reject(&CellValue::Text(label), RejectReason::MissingLabel),
        }
    }
}

impl Iterator for TabularRecords<'_> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            let (index, row) = self.rows.next()?;
            match self.convert(index, row) {
                Some(candidate) => return Some(candidate),
                None => self.filtered += 1,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

fn flag_matches(expected: &str, actual: &str) -> bool {
    let expected = expected.trim();
    if expected.eq_ignore_ascii_case(actual) {
        return true;
    }
    // "1" matches "1.0" and vice versa
    match (expected.parse::<f64>(), actual.parse::<f64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Whole-number total; fractional values truncate toward zero.
fn coerce_total(cell: &CellValue) -> Option<i64> {
    let value = match cell {
        CellValue::Number(n) => *n,
        CellValue::Text(s) => {
            let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
            cleaned.parse::<f64>().ok()?
        }
        _ => return None,
    };
    if !value.is_finite() || value.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(value.trunc() as i64)
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%m-%d-%Y", "%d-%b-%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M:%S"];

/// `%Y` also accepts a two-digit year (`24` parses as year 24); such a
/// result is left for the `%y` formats.
fn full_year(date: NaiveDate) -> bool {
    date.year() >= 1000
}

/// Excel's day zero for the 1900 date system.
fn excel_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

pub fn coerce_date(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::DateTime(dt) => Some(dt.date()),
        CellValue::Number(n) if n.is_finite() && *n >= 1.0 && *n < 2_958_466.0 => {
            excel_epoch()?.checked_add_signed(Duration::days(n.floor() as i64))
        }
        CellValue::Text(s) => {
            let s = s.trim();
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .filter(|dt| full_year(dt.date()))
                .map(|dt| dt.date())
                .or_else(|| {
                    DATE_FORMATS
                        .iter()
                        .filter_map(|f| NaiveDate::parse_from_str(s, f).ok())
                        .find(|d| full_year(*d))
                })
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        }
        _ => None,
    }
}

fn coerce_timestamp(cell: &CellValue) -> Option<DateTime<Utc>> {
    match cell {
        CellValue::DateTime(dt) => Some(dt.and_utc()),
        // serial day plus fraction of a day
        CellValue::Number(n) if n.is_finite() && *n >= 1.0 && *n < 2_958_466.0 => {
            let seconds = (n * 86_400.0).round() as i64;
            excel_epoch()?
                .and_hms_opt(0, 0, 0)?
                .checked_add_signed(Duration::seconds(seconds))
                .map(|dt| dt.and_utc())
        }
        CellValue::Text(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|| {
                    DATETIME_FORMATS
                        .iter()
                        .filter_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                        .find(|dt| full_year(dt.date()))
                        .map(|dt| dt.and_utc())
                })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.into())
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn source(validity: Validity) -> SourceConfig {
        SourceConfig {
            date_column: "Date".into(),
            total_column: "Total".into(),
            validity,
            valid_column: Some("VALID WEEK?".into()),
            valid_values: vec!["1".into()],
            breakdown_column: None,
            label: "Master Spreadsheet".into(),
            label_column: None,
            submitted_column: None,
            sheet: None,
        }
    }

    fn table(rows: Vec<Vec<CellValue>>) -> Table {
        Table {
            headers: vec!["Date".into(), "Total".into(), "VALID WEEK?".into()],
            rows,
        }
    }

    #[test]
    fn positive_total_filters_zero_and_blank() {
        let t = table(vec![
            vec![text("2024-01-05"), text("120"), CellValue::Empty],
            vec![text("2024-01-12"), text("0"), CellValue::Empty],
            vec![text("2024-01-19"), CellValue::Empty, CellValue::Empty],
            vec![text("2024-01-26"), text("1,250"), CellValue::Empty],
        ]);
        let config = source(Validity::PositiveTotal);
        let intake = adapt("master", &t, &config, at()).unwrap().into_intake();
        assert_eq!(intake.records.len(), 2);
        assert_eq!(intake.filtered, 2);
        assert!(intake.rejected.is_empty());
        assert_eq!(intake.records[1].quantity(), 1250);
        assert_eq!(intake.records[0].source_label(), "Master Spreadsheet");
    }

    #[test]
    fn flagged_rows_only() {
        let t = table(vec![
            vec![text("2024-01-05"), CellValue::Number(120.0), CellValue::Number(1.0)],
            vec![text("2024-01-12"), CellValue::Number(80.0), CellValue::Number(0.0)],
            vec![text("2024-01-19"), CellValue::Number(90.0), text("1.0")],
            vec![text("2024-01-26"), CellValue::Number(70.0)],
        ]);
        let config = source(Validity::Flagged);
        let intake = adapt("master", &t, &config, at()).unwrap().into_intake();
        let totals: Vec<u64> = intake.records.iter().map(|r| r.quantity()).collect();
        assert_eq!(totals, vec![120, 90]);
        assert_eq!(intake.filtered, 2);
    }

    #[test]
    fn non_numeric_and_bad_dates_are_rejected() {
        let t = table(vec![
            vec![text("2024-01-05"), text("about 40"), CellValue::Empty],
            vec![text("sometime in May"), text("50"), CellValue::Empty],
            vec![text("2024-01-12"), text("-5"), CellValue::Empty],
            vec![text("01/19/2024"), text("60"), CellValue::Empty],
        ]);
        let config = source(Validity::Any);
        let intake = adapt("master", &t, &config, at()).unwrap().into_intake();
        assert_eq!(intake.records.len(), 1);
        assert_eq!(intake.records[0].period_key(), day("2024-01-19"));
        let reasons: Vec<_> = intake.rejected.iter().map(|r| r.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                RejectReason::NonNumericTotal,
                RejectReason::UnparseableDate,
                RejectReason::NegativeQuantity,
            ]
        );
        assert_eq!(intake.rejected[0].origin, "row 2");
        assert_eq!(intake.rejected[1].raw, "sometime in May");
    }

    #[test]
    fn breakdown_column_feeds_supplemental() {
        let t = Table {
            headers: vec!["Collection Date".into(), "Individual".into(), "Groups".into(), "Host".into()],
            rows: vec![
                vec![
                    text("2024-02-01"),
                    text("30"),
                    text(r#"[{"groupName":"Scouts","sandwichCount":20}]"#),
                    text("Dunwoody"),
                ],
                vec![text("2024-02-08"), text("10"), text("not json"), CellValue::Empty],
            ],
        };
        let config = SourceConfig {
            date_column: "Collection Date".into(),
            total_column: "Individual".into(),
            validity: Validity::Any,
            valid_column: None,
            valid_values: vec![],
            breakdown_column: Some("Groups".into()),
            label: "Groups".into(),
            label_column: Some("Host".into()),
            submitted_column: None,
            sheet: None,
        };
        let intake = adapt("groups", &t, &config, at()).unwrap().into_intake();
        assert_eq!(intake.records[0].effective_total(), 50);
        assert_eq!(intake.records[0].source_label(), "Dunwoody");
        assert_eq!(intake.records[1].effective_total(), 10);
        assert_eq!(intake.records[1].source_label(), "Groups");
    }

    #[test]
    fn missing_column_is_structural() {
        let t = Table {
            headers: vec!["Date".into()],
            rows: vec![],
        };
        let config = source(Validity::Any);
        let err = adapt("master", &t, &config, at()).err().unwrap();
        assert!(err.to_string().contains("missing column 'Total'"));
    }

    #[test]
    fn date_coercions() {
        assert_eq!(coerce_date(&text("2024-01-05 00:00:00")), Some(day("2024-01-05")));
        assert_eq!(coerce_date(&text("1/5/2024")), Some(day("2024-01-05")));
        assert_eq!(coerce_date(&text("1/5/24")), Some(day("2024-01-05")));
        assert_eq!(coerce_date(&text("01/05/24")), Some(day("2024-01-05")));
        assert_eq!(coerce_date(&CellValue::Number(45296.0)), Some(day("2024-01-05")));
        assert_eq!(coerce_date(&text("2024-01-05T10:00:00Z")), Some(day("2024-01-05")));
        assert_eq!(coerce_date(&text("")), None);
        assert_eq!(coerce_date(&CellValue::Bool(true)), None);
    }

    #[test]
    fn spreadsheet_serial_submission_time() {
        let t = Table {
            headers: vec!["Date".into(), "Total".into(), "Submitted".into()],
            rows: vec![
                vec![text("2024-01-05"), text("40"), CellValue::Number(45296.5)],
                vec![text("2024-01-05"), text("40"), text("2024-01-03T08:15:00Z")],
                vec![text("2024-01-05"), text("40"), CellValue::Empty],
            ],
        };
        let config = SourceConfig {
            submitted_column: Some("Submitted".into()),
            ..source(Validity::Any)
        };
        let intake = adapt("master", &t, &config, at()).unwrap().into_intake();
        let stamps: Vec<_> = intake.records.iter().map(Record::submitted_at).collect();
        assert_eq!(
            stamps,
            vec![
                Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 3, 8, 15, 0).unwrap(),
                at(),
            ]
        );
    }

    #[test]
    fn fractional_totals_truncate() {
        assert_eq!(coerce_total(&CellValue::Number(99.9)), Some(99));
        assert_eq!(coerce_total(&text(" 1,024.0 ")), Some(1024));
        assert_eq!(coerce_total(&text("NaN")), None);
    }
}
