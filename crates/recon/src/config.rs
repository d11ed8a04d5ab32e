use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

fn default_name() -> String {
    "collections".into()
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            reconcile: ReconcileConfig::default(),
            dedup: DedupConfig::default(),
            log: LogConfig::default(),
            sources: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Discrepancies with `|delta| <= threshold` are noise. Must be non-zero.
    pub threshold: u64,
    /// At most this many corrective records are emitted per run.
    pub max_corrections: usize,
    /// Reserved label stamped on every corrective record.
    pub adjustment_label: String,
    /// LIKE-style patterns (`%` any run, `_` one char) naming adjustments
    /// written before provenance tags existed.
    pub legacy_adjustment_labels: Vec<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            max_corrections: 20,
            adjustment_label: "Data Reconciliation".into(),
            legacy_adjustment_labels: vec!["%Reconciliation%".into(), "%Alignment%".into()],
        }
    }
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Population A: always authoritative over population B.
    pub authoritative_label: String,
    /// Population B: labels containing any of these (case-insensitive).
    pub unattributed_patterns: Vec<String>,
    /// Label given to legacy rows that arrive with no label at all.
    pub unattributed_label: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            authoritative_label: "OG Sandwich Project".into(),
            unattributed_patterns: vec!["unknown".into(), "no location".into()],
            unattributed_label: "Unattributed".into(),
        }
    }
}

impl DedupConfig {
    pub fn is_authoritative(&self, label: &str) -> bool {
        label.trim().eq_ignore_ascii_case(self.authoritative_label.trim())
    }

    pub fn is_unattributed(&self, label: &str) -> bool {
        let label = label.trim().to_lowercase();
        label.is_empty()
            || label == self.unattributed_label.trim().to_lowercase()
            || self
                .unattributed_patterns
                .iter()
                .any(|p| !p.is_empty() && label.contains(&p.to_lowercase()))
    }
}

// ---------------------------------------------------------------------------
// Legacy log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionDialect {
    Rtf,
    Markdown,
    None,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Word that opens an entry, e.g. `Week` in `Week 12 (03/05/2023): 400 sandwiches`.
    pub period_marker: String,
    /// Word that closes an entry.
    pub unit_word: String,
    /// Replacement for a leading date component of `0` (a known export defect).
    pub leading_zero_repair: String,
    /// Label for entries seen before any recognised section header.
    pub fallback_label: String,
    /// Label for per-period aggregates that span several sections.
    pub aggregate_label: String,
    pub sections: SectionDialect,
    /// Regex with one capture group (the label); required for `custom`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_pattern: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            period_marker: "Week".into(),
            unit_word: "sandwiches".into(),
            leading_zero_repair: "10".into(),
            fallback_label: "Parsed Entry".into(),
            aggregate_label: "Legacy Log".into(),
            sections: SectionDialect::Rtf,
            section_pattern: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tabular sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    /// Every row with a coercible date and total.
    Any,
    /// Only rows whose total coerces to a number greater than zero.
    #[default]
    PositiveTotal,
    /// Only rows whose `valid_column` holds one of `valid_values`.
    Flagged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub date_column: String,
    pub total_column: String,
    #[serde(default)]
    pub validity: Validity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_column: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown_column: Option<String>,
    /// Label used when `label_column` is absent or blank for a row.
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_column: Option<String>,
    /// Worksheet to read from a spreadsheet file; the first sheet when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl TallyConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: TallyConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ReconError> {
        toml::to_string_pretty(self).map_err(|e| ReconError::ConfigParse(e.to_string()))
    }

    pub fn source(&self, name: &str) -> Result<&SourceConfig, ReconError> {
        self.sources
            .get(name)
            .ok_or_else(|| ReconError::UnknownSource(name.to_string()))
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let invalid = |msg: String| Err(ReconError::ConfigValidation(msg));

        let rc = &self.reconcile;
        if rc.threshold == 0 {
            return invalid("reconcile.threshold must be non-zero".into());
        }
        if rc.max_corrections == 0 {
            return invalid("reconcile.max_corrections must be at least 1".into());
        }
        if rc.adjustment_label.trim().is_empty() {
            return invalid("reconcile.adjustment_label must not be empty".into());
        }

        let dd = &self.dedup;
        if dd.authoritative_label.trim().is_empty() {
            return invalid("dedup.authoritative_label must not be empty".into());
        }
        if dd.unattributed_label.trim().is_empty() {
            return invalid("dedup.unattributed_label must not be empty".into());
        }
        if dd.is_authoritative(&rc.adjustment_label) {
            return invalid(
                "reconcile.adjustment_label must differ from dedup.authoritative_label".into(),
            );
        }

        let log = &self.log;
        if log.period_marker.trim().is_empty() || log.unit_word.trim().is_empty() {
            return invalid("log.period_marker and log.unit_word must not be empty".into());
        }
        let repair = log.leading_zero_repair.as_str();
        if repair.is_empty() || repair.len() > 2 || !repair.bytes().all(|b| b.is_ascii_digit()) {
            return invalid(format!(
                "log.leading_zero_repair must be one or two digits, got '{repair}'"
            ));
        }
        if log.fallback_label.trim().is_empty() || log.aggregate_label.trim().is_empty() {
            return invalid("log.fallback_label and log.aggregate_label must not be empty".into());
        }
        crate::sections::boundary_for(log)?;

        for (name, source) in &self.sources {
            if source.label.trim().is_empty() {
                return invalid(format!("source '{name}': label must not be empty"));
            }
            if source.validity == Validity::Flagged
                && (source.valid_column.is_none() || source.valid_values.is_empty())
            {
                return invalid(format!(
                    "source '{name}': validity = \"flagged\" requires valid_column and valid_values"
                ));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
