//! Tolerant parser for the legacy free-text collection log.
//!
//! Entries look like `Week 41 (0/12/2023): 1,250 sandwiches`, interleaved
//! with RTF or other markup. The parser makes a single pass over the text:
//! [`LogParser::entries`] yields one item per match, lazily, and
//! [`LogParser::parse`] folds them through a [`PeriodAccumulator`] into one
//! record per declared period.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::{CaptureMatches, Regex};
use serde::Serialize;

use crate::config::LogConfig;
use crate::error::ReconError;
use crate::model::{Candidate, Provenance, Record, RejectReason, RejectedEntry};
use crate::sections::{boundary_for, SectionBoundary, SectionHeader};

/// One matched log entry, after date repair and section attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub period_id: u32,
    pub date: NaiveDate,
    /// Date text as it appeared in the log, before repair.
    pub original_date: String,
    pub repaired: bool,
    pub quantity: u64,
    pub source_label: String,
    /// Byte offset of the match in the source text.
    pub offset: usize,
}

impl LogEntry {
    pub fn to_record(&self, submitted_at: DateTime<Utc>) -> Result<Record, ReconError> {
        Record::counted(
            self.date,
            self.source_label.as_str(),
            self.quantity,
            submitted_at,
            Provenance::RawImport,
        )
    }
}

pub struct LogParser {
    entry_pattern: Regex,
    sections: Box<dyn SectionBoundary>,
    repair: String,
    fallback_label: String,
    aggregate_label: String,
}

impl LogParser {
    /// Parser using the section dialect named in the config.
    pub fn new(config: &LogConfig) -> Result<Self, ReconError> {
        Self::with_sections(config, boundary_for(config)?)
    }

    /// Parser with an explicit section-boundary strategy.
    pub fn with_sections(
        config: &LogConfig,
        sections: Box<dyn SectionBoundary>,
    ) -> Result<Self, ReconError> {
        // marker, period number, a parenthesised span holding the date
        // (markup allowed), optional colon, quantity with separators, unit.
        let markup = r"(?:\\[a-z]+-?\d*\s*)*";
        let pattern = format!(
            r"(?i){marker}\s+(\d+)\s*\([^)]*?\b(\d{{1,2}}[/.\-]\d{{1,2}}[/.\-]\d{{2,4}})\b[^)]*\)\s*{markup}:?\s*{markup}([0-9][0-9,]*)\s*{markup}{unit}",
            marker = regex::escape(config.period_marker.trim()),
            unit = regex::escape(config.unit_word.trim()),
        );
        let entry_pattern = Regex::new(&pattern).map_err(|e| {
            ReconError::ConfigValidation(format!("log entry pattern: {e}"))
        })?;

        Ok(Self {
            entry_pattern,
            sections,
            repair: config.leading_zero_repair.clone(),
            fallback_label: config.fallback_label.trim().to_string(),
            aggregate_label: config.aggregate_label.trim().to_string(),
        })
    }

    /// Lazy, single-pass sequence of matched entries.
    pub fn entries<'p, 't>(&'p self, text: &'t str) -> LogEntries<'p, 't> {
        LogEntries {
            matches: self.entry_pattern.captures_iter(text),
            headers: self.sections.headers(text),
            next_header: 0,
            current_label: self.fallback_label.clone(),
            repair: &self.repair,
        }
    }

    /// Lazy sequence of per-entry candidate records, each carrying its
    /// section label.
    pub fn records<'a>(
        &'a self,
        text: &'a str,
        submitted_at: DateTime<Utc>,
    ) -> impl Iterator<Item = Candidate> + 'a {
        self.entries(text).map(move |item| -> Candidate {
            let entry = item?;
            entry.to_record(submitted_at).map_err(|_| RejectedEntry {
                origin: format!("byte {}", entry.offset),
                raw: entry.source_label.clone(),
                reason: RejectReason::MissingLabel,
            })
        })
    }

    /// Parse the whole log and aggregate to one record per declared period.
    pub fn parse(&self, text: &str, submitted_at: DateTime<Utc>) -> ParsedLog {
        self.entries(text)
            .fold(PeriodAccumulator::default(), PeriodAccumulator::absorb)
            .finish(&self.aggregate_label, submitted_at)
    }
}

// ---------------------------------------------------------------------------
// Entry iterator
// ---------------------------------------------------------------------------

pub struct LogEntries<'p, 't> {
    matches: CaptureMatches<'p, 't>,
    headers: Vec<SectionHeader>,
    next_header: usize,
    current_label: String,
    repair: &'p str,
}

impl Iterator for LogEntries<'_, '_> {
    type Item = Result<LogEntry, RejectedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let caps = self.matches.next()?;
        let whole = caps.get(0)?;
        let offset = whole.start();

        while let Some(header) = self.headers.get(self.next_header) {
            if header.offset > offset {
                break;
            }
            self.current_label = header.label.clone();
            self.next_header += 1;
        }

        let reject = |reason: RejectReason| RejectedEntry {
            origin: format!("byte {offset}"),
            raw: whole.as_str().trim().to_string(),
            reason,
        };

        let Some(period_id) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            return Some(Err(reject(RejectReason::MalformedPeriod)));
        };

        let original_date = caps.get(2).map(|m| m.as_str()).unwrap_or_default().to_string();
        let (date_text, repaired) = repair_date(&original_date, self.repair);
        // a short year is captured so it lands in `rejected`; `%Y` would
        // otherwise read `24` as year 24
        let date = match NaiveDate::parse_from_str(&date_text, "%m/%d/%Y") {
            Ok(d) if d.year() >= 1000 => d,
            _ => {
                tracing::debug!(offset, date = %original_date, "skipping entry with unparseable date");
                return Some(Err(reject(RejectReason::UnparseableDate)));
            }
        };
        if repaired {
            tracing::debug!(offset, from = %original_date, to = %date_text, "repaired leading-zero date");
        }

        let quantity_text: String = caps
            .get(3)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .chars()
            .filter(|c| *c != ',')
            .collect();
        let Ok(quantity) = quantity_text.parse::<u64>() else {
            return Some(Err(reject(RejectReason::NonNumericTotal)));
        };

        Some(Ok(LogEntry {
            period_id,
            date,
            original_date,
            repaired,
            quantity,
            source_label: self.current_label.clone(),
            offset,
        }))
    }
}

/// Normalise separators to `/` and substitute a leading `0` component.
fn repair_date(raw: &str, repair: &str) -> (String, bool) {
    let normalized: String = raw
        .chars()
        .map(|c| if c == '-' || c == '.' { '/' } else { c })
        .collect();
    match normalized.split_once('/') {
        Some(("0", rest)) => (format!("{repair}/{rest}"), true),
        _ => (normalized, false),
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PeriodTally {
    date: NaiveDate,
    original_date: String,
    quantity: u64,
    entry_count: usize,
    labels: BTreeSet<String>,
}

/// Running per-period totals threaded through a parse.
#[derive(Debug, Clone, Default)]
pub struct PeriodAccumulator {
    periods: BTreeMap<u32, PeriodTally>,
    label_totals: BTreeMap<String, u64>,
    rejected: Vec<RejectedEntry>,
    entry_count: usize,
    repaired_count: usize,
}

impl PeriodAccumulator {
    /// Fold one parse result in. The first valid date seen for a period is
    /// kept; later entries for the same period only add quantity.
    pub fn absorb(mut self, item: Result<LogEntry, RejectedEntry>) -> Self {
        let entry = match item {
            Ok(entry) => entry,
            Err(rejected) => {
                self.rejected.push(rejected);
                return self;
            }
        };

        self.entry_count += 1;
        if entry.repaired {
            self.repaired_count += 1;
        }
        let label_total = self.label_totals.entry(entry.source_label.clone()).or_insert(0);
        *label_total = label_total.saturating_add(entry.quantity);

        let tally = self.periods.entry(entry.period_id).or_insert_with(|| PeriodTally {
            date: entry.date,
            original_date: entry.original_date.clone(),
            quantity: 0,
            entry_count: 0,
            labels: BTreeSet::new(),
        });
        tally.quantity = tally.quantity.saturating_add(entry.quantity);
        tally.entry_count += 1;
        tally.labels.insert(entry.source_label);
        self
    }

    pub fn finish(self, aggregate_label: &str, submitted_at: DateTime<Utc>) -> ParsedLog {
        let mut periods = Vec::with_capacity(self.periods.len());
        let mut records = Vec::with_capacity(self.periods.len());
        let mut rejected = self.rejected;

        for (period_id, tally) in self.periods {
            // a single contributing section keeps its own label
            let label = match tally.labels.iter().next() {
                Some(only) if tally.labels.len() == 1 => only.clone(),
                _ => aggregate_label.to_string(),
            };
            match Record::counted(tally.date, label.as_str(), tally.quantity, submitted_at, Provenance::RawImport) {
                Ok(record) => records.push(record),
                Err(_) => rejected.push(RejectedEntry {
                    origin: format!("period {period_id}"),
                    raw: label.clone(),
                    reason: RejectReason::MissingLabel,
                }),
            }
            periods.push(PeriodSummary {
                period_id,
                date: tally.date,
                original_date: tally.original_date,
                quantity: tally.quantity,
                entry_count: tally.entry_count,
                source_label: label,
            });
        }

        tracing::info!(
            entries = self.entry_count,
            periods = periods.len(),
            rejected = rejected.len(),
            repaired = self.repaired_count,
            "parsed legacy log"
        );

        ParsedLog {
            periods,
            records,
            label_totals: self.label_totals,
            rejected,
            entry_count: self.entry_count,
            repaired_count: self.repaired_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodSummary {
    pub period_id: u32,
    pub date: NaiveDate,
    pub original_date: String,
    pub quantity: u64,
    pub entry_count: usize,
    pub source_label: String,
}

/// Result of a full parse.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedLog {
    /// One summary per declared period, ordered by period number.
    pub periods: Vec<PeriodSummary>,
    /// One record per declared period.
    pub records: Vec<Record>,
    /// Quantity per section label, across all valid entries.
    pub label_totals: BTreeMap<String, u64>,
    pub rejected: Vec<RejectedEntry>,
    pub entry_count: usize,
    pub repaired_count: usize,
}

impl ParsedLog {
    pub fn total(&self) -> u64 {
        self.periods.iter().map(|p| p.quantity).sum()
    }

    pub fn first_period(&self) -> Option<&PeriodSummary> {
        self.periods.first()
    }

    pub fn last_period(&self) -> Option<&PeriodSummary> {
        self.periods.last()
    }

    /// The `n` largest periods by quantity; ties keep period order.
    pub fn highest(&self, n: usize) -> Vec<&PeriodSummary> {
        let mut ranked: Vec<&PeriodSummary> = self.periods.iter().collect();
        ranked.sort_by(|a, b| b.quantity.cmp(&a.quantity));
        ranked.truncate(n);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SectionDialect;
    use crate::sections::NoSections;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn plain() -> LogParser {
        LogParser::with_sections(&LogConfig::default(), Box::new(NoSections)).unwrap()
    }

    #[test]
    fn aggregates_by_period_keeping_first_date() {
        let text = "\
Week 1 (01/07/2024): 100 sandwiches
Week 1 (01/08/2024): 50 sandwiches
Week 2 (01/14/2024): 1,250 sandwiches
";
        let parsed = plain().parse(text, at());
        assert_eq!(parsed.periods.len(), 2);
        assert_eq!(parsed.periods[0].period_id, 1);
        assert_eq!(parsed.periods[0].quantity, 150);
        assert_eq!(parsed.periods[0].entry_count, 2);
        assert_eq!(parsed.periods[0].date, day("2024-01-07"));
        assert_eq!(parsed.periods[1].quantity, 1250);
        assert_eq!(parsed.total(), 1400);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].quantity(), 150);
        assert_eq!(parsed.records[0].source_label(), "Parsed Entry");
    }

    #[test]
    fn repairs_leading_zero_month() {
        let parsed = plain().parse("Week 41 (0/12/2023): 300 sandwiches", at());
        assert_eq!(parsed.periods[0].date, day("2023-10-12"));
        assert_eq!(parsed.periods[0].original_date, "0/12/2023");
        assert_eq!(parsed.repaired_count, 1);
    }

    #[test]
    fn invalid_date_is_rejected_not_fatal() {
        let text = "\
Week 3 (02/30/2024): 40 sandwiches
Week 4 (02/04/2024): 60 sandwiches
";
        let parsed = plain().parse(text, at());
        assert_eq!(parsed.periods.len(), 1);
        assert_eq!(parsed.total(), 60);
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].reason, RejectReason::UnparseableDate);
        assert!(parsed.rejected[0].raw.contains("02/30/2024"));
    }

    #[test]
    fn short_year_is_rejected_not_dropped() {
        let text = "\
Week 1 (01/07/24): 100 sandwiches
Week 2 (01/14/2024): 60 sandwiches
";
        let parsed = plain().parse(text, at());
        assert_eq!(parsed.entry_count, 1);
        assert_eq!(parsed.periods.len(), 1);
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].reason, RejectReason::UnparseableDate);
        assert!(parsed.rejected[0].raw.contains("01/07/24"));
    }

    #[test]
    fn invalid_first_date_does_not_claim_period() {
        let text = "\
Week 5 (13/01/2024): 10 sandwiches
Week 5 (01/28/2024): 20 sandwiches
";
        let parsed = plain().parse(text, at());
        assert_eq!(parsed.periods[0].date, day("2024-01-28"));
        assert_eq!(parsed.periods[0].quantity, 20);
    }

    #[test]
    fn tolerates_markup_and_delimiters() {
        let text = "\\f0\\b WEEK 7 (\\i Sunday 02-18-2024\\i0 )\\b0 : \\b 2,000\\b0  Sandwiches\\par";
        let entries: Vec<_> = plain().entries(text).collect();
        assert_eq!(entries.len(), 1);
        let entry = entries[0].as_ref().unwrap();
        assert_eq!(entry.period_id, 7);
        assert_eq!(entry.date, day("2024-02-18"));
        assert_eq!(entry.quantity, 2000);
    }

    #[test]
    fn section_labels_follow_headers() {
        let config = LogConfig {
            sections: SectionDialect::Markdown,
            ..LogConfig::default()
        };
        let parser = LogParser::new(&config).unwrap();
        let text = "\
Week 1 (01/07/2024): 5 sandwiches
# Dunwoody
Week 1 (01/07/2024): 100 sandwiches
Week 2 (01/14/2024): 80 sandwiches
# Roswell
Week 2 (01/14/2024): 20 sandwiches
";
        let labels: Vec<String> = parser
            .entries(text)
            .map(|e| e.unwrap().source_label)
            .collect();
        assert_eq!(labels, vec!["Parsed Entry", "Dunwoody", "Dunwoody", "Roswell"]);

        let parsed = parser.parse(text, at());
        assert_eq!(parsed.label_totals["Dunwoody"], 180);
        assert_eq!(parsed.label_totals["Roswell"], 20);
        // both periods mix sections, so aggregates carry the aggregate label
        assert!(parsed.records.iter().all(|r| r.source_label() == "Legacy Log"));
        assert_eq!(parsed.total(), 205);
    }

    #[test]
    fn single_section_period_keeps_label() {
        let config = LogConfig {
            sections: SectionDialect::Markdown,
            ..LogConfig::default()
        };
        let parser = LogParser::new(&config).unwrap();
        let parsed = parser.parse("# Midtown\nWeek 9 (03/03/2024): 12 sandwiches\n", at());
        assert_eq!(parsed.records[0].source_label(), "Midtown");
    }

    #[test]
    fn fallback_keeps_every_match_without_headers() {
        let config = LogConfig::default(); // rtf dialect, but no rtf headers present
        let parser = LogParser::new(&config).unwrap();
        let text = "Week 1 (01/07/2024): 1 sandwiches\nWeek 2 (01/14/2024): 2 sandwiches\nWeek 3 (01/21/2024): 3 sandwiches";
        let records: Vec<_> = parser.records(text, at()).collect();
        assert_eq!(records.len(), 3);
        assert!(records
            .iter()
            .all(|r| r.as_ref().unwrap().source_label() == "Parsed Entry"));
    }

    #[test]
    fn custom_marker_and_unit() {
        let config = LogConfig {
            period_marker: "Shift".into(),
            unit_word: "meals".into(),
            ..LogConfig::default()
        };
        let parser = LogParser::with_sections(&config, Box::new(NoSections)).unwrap();
        let parsed = parser.parse("Shift 2 (05/05/2024): 75 meals; Week 2 (05/05/2024): 9 sandwiches", at());
        assert_eq!(parsed.total(), 75);
    }

    #[test]
    fn summary_helpers() {
        let text = "\
Week 1 (01/07/2024): 100 sandwiches
Week 2 (01/14/2024): 300 sandwiches
Week 3 (01/21/2024): 200 sandwiches
";
        let parsed = plain().parse(text, at());
        assert_eq!(parsed.first_period().unwrap().period_id, 1);
        assert_eq!(parsed.last_period().unwrap().period_id, 3);
        let top: Vec<u32> = parsed.highest(2).iter().map(|p| p.period_id).collect();
        assert_eq!(top, vec![2, 3]);
    }

    #[test]
    fn repair_date_forms() {
        assert_eq!(repair_date("0/5/2023", "10"), ("10/5/2023".to_string(), true));
        assert_eq!(repair_date("01.05.2023", "10"), ("01/05/2023".to_string(), false));
        assert_eq!(repair_date("0-5-2023", "11"), ("11/5/2023".to_string(), true));
    }
}
