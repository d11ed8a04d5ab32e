//! Two-way comparison of per-period totals, used to check the legacy log
//! against the canonical store.

use chrono::NaiveDate;
use serde::Serialize;

use crate::reconcile::{signed_delta, PeriodTotals};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodDifference {
    pub period: NaiveDate,
    pub left: u64,
    pub right: u64,
    /// `left - right`
    pub difference: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodComparison {
    pub only_left: Vec<(NaiveDate, u64)>,
    pub only_right: Vec<(NaiveDate, u64)>,
    /// Shared periods differing by more than the threshold, largest first.
    pub differences: Vec<PeriodDifference>,
    pub matched: usize,
    pub left_total: u64,
    pub right_total: u64,
}

impl PeriodComparison {
    pub fn is_consistent(&self) -> bool {
        self.only_left.is_empty() && self.only_right.is_empty() && self.differences.is_empty()
    }

    pub fn total_difference(&self) -> i64 {
        signed_delta(self.left_total, self.right_total)
    }
}

/// Compare two period-total maps. Differences within `threshold` count as
/// matched.
pub fn compare_periods(left: &PeriodTotals, right: &PeriodTotals, threshold: u64) -> PeriodComparison {
    let mut comparison = PeriodComparison {
        only_left: Vec::new(),
        only_right: Vec::new(),
        differences: Vec::new(),
        matched: 0,
        left_total: left.values().sum(),
        right_total: right.values().sum(),
    };

    for (&period, &l) in left {
        match right.get(&period) {
            None => comparison.only_left.push((period, l)),
            Some(&r) => {
                let difference = signed_delta(l, r);
                if difference.unsigned_abs() > threshold {
                    comparison.differences.push(PeriodDifference {
                        period,
                        left: l,
                        right: r,
                        difference,
                    });
                } else {
                    comparison.matched += 1;
                }
            }
        }
    }
    comparison.only_right = right
        .iter()
        .filter(|(p, _)| !left.contains_key(p))
        .map(|(&p, &t)| (p, t))
        .collect();
    comparison.differences.sort_by(|a, b| {
        b.difference
            .unsigned_abs()
            .cmp(&a.difference.unsigned_abs())
            .then(a.period.cmp(&b.period))
    });
    comparison
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn totals(entries: &[(&str, u64)]) -> PeriodTotals {
        entries.iter().map(|(d, t)| (day(d), *t)).collect()
    }

    #[test]
    fn classifies_periods() {
        let log = totals(&[("2023-01-07", 100), ("2023-01-14", 200), ("2023-01-21", 50), ("2023-01-28", 10)]);
        let store = totals(&[("2023-01-07", 105), ("2023-01-14", 120), ("2023-01-21", 500), ("2023-02-04", 7)]);
        let c = compare_periods(&log, &store, 10);
        assert_eq!(c.matched, 1);
        assert_eq!(c.only_left, vec![(day("2023-01-28"), 10)]);
        assert_eq!(c.only_right, vec![(day("2023-02-04"), 7)]);
        let diffs: Vec<i64> = c.differences.iter().map(|d| d.difference).collect();
        assert_eq!(diffs, vec![-450, 80]);
        assert_eq!(c.total_difference(), 360 - 732);
        assert!(!c.is_consistent());
    }

    #[test]
    fn identical_maps_are_consistent() {
        let t = totals(&[("2023-01-07", 100)]);
        assert!(compare_periods(&t, &t, 1).is_consistent());
    }
}
