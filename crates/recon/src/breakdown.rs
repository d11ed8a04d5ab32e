//! Decoding of the nested sub-group breakdown attached to a collection.
//!
//! Legacy exports store the breakdown as a JSON document whose shape drifted
//! over time: a list of objects keyed `sandwichCount`, a list keyed
//! `sandwiches`, a bare number, or a stringly-typed count. Anything that
//! cannot be read contributes zero; decoding never fails.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Keys that may hold a sub-entry count, in lookup order.
pub const COUNT_KEYS: &[&str] = &["sandwichCount", "sandwiches", "count"];

/// Keys that may hold a sub-entry name, in lookup order.
const LABEL_KEYS: &[&str] = &["groupName", "name", "label"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Ordered list of sub-entries. The sum of their counts is a record's
/// supplemental quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Breakdown {
    entries: Vec<BreakdownEntry>,
}

impl Breakdown {
    pub fn new(entries: Vec<BreakdownEntry>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Convenience for tests and adapters: unnamed entries with the given counts.
    pub fn from_counts(counts: &[u64]) -> Self {
        Self {
            entries: counts
                .iter()
                .map(|&c| BreakdownEntry { label: None, count: Some(c) })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[BreakdownEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of per-entry counts. Entries without a count contribute zero.
    pub fn total(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|e| e.count)
            .fold(0u64, |acc, c| acc.saturating_add(c))
    }

    /// Decode a raw breakdown field. Blank, absent, or malformed input
    /// yields an empty breakdown.
    pub fn decode(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::empty();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(&value),
            Err(e) => {
                tracing::debug!(error = %e, "malformed breakdown treated as empty");
                Self::empty()
            }
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let entries = match value {
            Value::Array(items) => items.iter().map(entry_from_value).collect(),
            Value::Object(_) | Value::Number(_) | Value::String(_) => {
                vec![entry_from_value(value)]
            }
            Value::Null | Value::Bool(_) => Vec::new(),
        };
        Self { entries }
    }

    /// Canonical JSON form used for persistence.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".into())
    }
}

fn entry_from_value(value: &Value) -> BreakdownEntry {
    match value {
        Value::Object(map) => BreakdownEntry {
            label: LABEL_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            count: COUNT_KEYS.iter().find_map(|k| map.get(*k).and_then(parse_count)),
        },
        other => BreakdownEntry {
            label: None,
            count: parse_count(other),
        },
    }
}

/// A count is a non-negative integer, an integral float, or a string of digits.
fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_sandwich_count_objects() {
        let b = Breakdown::decode(
            r#"[{"groupName":"Scouts","sandwichCount":40},{"groupName":"Church","sandwichCount":"25"}]"#,
        );
        assert_eq!(b.entries().len(), 2);
        assert_eq!(b.total(), 65);
        assert_eq!(b.entries()[0].label.as_deref(), Some("Scouts"));
    }

    #[test]
    fn accepts_alternate_count_key() {
        let b = Breakdown::decode(r#"[{"name":"A","sandwiches":12}]"#);
        assert_eq!(b.total(), 12);
    }

    #[test]
    fn empty_and_absent_contribute_zero() {
        assert_eq!(Breakdown::decode("").total(), 0);
        assert_eq!(Breakdown::decode("   ").total(), 0);
        assert_eq!(Breakdown::decode("[]").total(), 0);
        assert_eq!(Breakdown::decode("null").total(), 0);
    }

    #[test]
    fn malformed_document_contributes_zero() {
        assert_eq!(Breakdown::decode("[{not json").total(), 0);
        assert!(Breakdown::decode("{{").is_empty());
    }

    #[test]
    fn malformed_entries_contribute_zero() {
        let b = Breakdown::decode(
            r#"[{"sandwichCount":"12a"},{"sandwichCount":-4},{"sandwichCount":7.5},{"sandwichCount":8},true]"#,
        );
        assert_eq!(b.entries().len(), 5);
        assert_eq!(b.total(), 8);
    }

    #[test]
    fn bare_number_and_integral_float() {
        assert_eq!(Breakdown::decode("30").total(), 30);
        assert_eq!(Breakdown::decode("[30.0]").total(), 30);
        assert_eq!(Breakdown::decode(r#""15""#).total(), 15);
    }

    #[test]
    fn json_form_decodes_back() {
        let b = Breakdown::new(vec![
            BreakdownEntry { label: Some("Youth group".into()), count: Some(20) },
            BreakdownEntry { label: Some("No count".into()), count: None },
        ]);
        let decoded = Breakdown::decode(&b.to_json());
        assert_eq!(decoded, b);
        assert_eq!(decoded.total(), 20);
    }
}
