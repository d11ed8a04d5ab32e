//! Duplicate detection over one or two populations of records.
//!
//! Two records are treated as the same real event when they share a
//! [`MatchKey`]: the period plus the effective total. Distinct events that
//! happen to share both are merged too; callers that need a finer key must
//! pre-partition their input.
//!
//! The engine is pure. It returns a partition of its input into survivors
//! and deletions; applying deletions is the store's job.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::DedupConfig;
use crate::model::{Provenance, Record, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MatchKey {
    pub period: NaiveDate,
    pub total: u64,
}

impl MatchKey {
    pub fn of(record: &Record) -> Self {
        Self {
            period: record.period_key(),
            total: record.effective_total(),
        }
    }
}

/// A named set of records that is deduplicated as a unit.
#[derive(Debug, Clone, Default)]
pub struct Population {
    pub name: String,
    pub records: Vec<Record>,
}

impl Population {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep the most recently submitted member of each key group.
    Within,
    /// Authoritative population wins over the superseded one on any shared key.
    Authoritative,
}

/// Why a set of records collapsed to one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupKind {
    Within { population: String },
    Across { authoritative: String, superseded: String },
}

/// One key group that produced deletions. `kept` is the record that stays
/// for this key; for cross-population groups it belongs to the
/// authoritative population.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub key: MatchKey,
    pub kind: GroupKind,
    pub kept: Record,
    pub discarded: Vec<Record>,
}

/// Every input record lands in exactly one of `survivors` or `to_delete`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupOutcome {
    pub survivors: Vec<Record>,
    pub to_delete: Vec<Record>,
    pub groups: Vec<DuplicateGroup>,
}

impl DedupOutcome {
    /// Store ids of the records marked for deletion. Records that were
    /// never persisted have nothing to delete and are skipped.
    pub fn delete_ids(&self) -> Vec<RecordId> {
        self.to_delete.iter().filter_map(Record::id).collect()
    }

    pub fn removed_total(&self) -> u64 {
        self.to_delete.iter().map(Record::effective_total).sum()
    }

    fn absorb(&mut self, other: DedupOutcome) {
        self.survivors.extend(other.survivors);
        self.to_delete.extend(other.to_delete);
        self.groups.extend(other.groups);
    }
}

/// Within one population, keep the newest member of each key group.
///
/// "Newest" is the latest `submitted_at`; ties go to the higher store id,
/// then to the earlier input position. Survivors and deletions keep input
/// order.
pub fn dedup_within(population: Population) -> DedupOutcome {
    let Population { name, records } = population;

    let mut members: BTreeMap<MatchKey, Vec<usize>> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        members.entry(MatchKey::of(record)).or_default().push(i);
    }

    let mut winners: HashSet<usize> = HashSet::with_capacity(members.len());
    let mut grouped: Vec<(MatchKey, usize, Vec<usize>)> = Vec::new();
    for (key, indices) in &members {
        let mut best = indices[0];
        for &i in &indices[1..] {
            if newer(&records[i], &records[best]) {
                best = i;
            }
        }
        winners.insert(best);
        if indices.len() > 1 {
            let losers = indices.iter().copied().filter(|&i| i != best).collect();
            grouped.push((*key, best, losers));
        }
    }

    let mut survivors = Vec::with_capacity(winners.len());
    let mut to_delete = Vec::with_capacity(records.len() - winners.len());
    let mut retag = HashSet::new();
    for (_, best, _) in &grouped {
        // persisted records are never rewritten
        if records[*best].id().is_none()
            && records[*best].provenance_tag() == Provenance::RawImport
        {
            retag.insert(*best);
        }
    }

    let groups = grouped
        .iter()
        .map(|(key, best, losers)| DuplicateGroup {
            key: *key,
            kind: GroupKind::Within {
                population: name.clone(),
            },
            kept: survivor_form(&records[*best], retag.contains(best)),
            discarded: losers.iter().map(|&i| records[i].clone()).collect(),
        })
        .collect();

    for (i, record) in records.into_iter().enumerate() {
        if winners.contains(&i) {
            survivors.push(if retag.contains(&i) {
                record.with_provenance(Provenance::DeduplicationSurvivor)
            } else {
                record
            });
        } else {
            to_delete.push(record);
        }
    }

    tracing::debug!(
        population = %name,
        survivors = survivors.len(),
        deleted = to_delete.len(),
        "deduplicated population"
    );

    DedupOutcome {
        survivors,
        to_delete,
        groups,
    }
}

/// Cross-population pass followed by an intra-population pass on each side.
///
/// Every `superseded` record whose key appears anywhere in `authoritative`
/// is deleted. The authoritative population and what remains of the
/// superseded one are then each deduplicated on their own.
pub fn dedup_across(authoritative: Population, superseded: Population) -> DedupOutcome {
    let authority_name = authoritative.name.clone();
    let superseded_name = superseded.name.clone();

    let mut outcome = dedup_within(authoritative);
    let holders: BTreeMap<MatchKey, Record> = outcome
        .survivors
        .iter()
        .map(|r| (MatchKey::of(r), r.clone()))
        .collect();

    let mut remaining = Vec::new();
    let mut shadowed: BTreeMap<MatchKey, Vec<Record>> = BTreeMap::new();
    for record in superseded.records {
        let key = MatchKey::of(&record);
        if holders.contains_key(&key) {
            shadowed.entry(key).or_default().push(record);
        } else {
            remaining.push(record);
        }
    }

    for (key, discarded) in shadowed {
        outcome.to_delete.extend(discarded.iter().cloned());
        if let Some(kept) = holders.get(&key) {
            outcome.groups.push(DuplicateGroup {
                key,
                kind: GroupKind::Across {
                    authoritative: authority_name.clone(),
                    superseded: superseded_name.clone(),
                },
                kept: kept.clone(),
                discarded,
            });
        }
    }

    outcome.absorb(dedup_within(Population::new(superseded_name, remaining)));
    outcome
}

/// Records grouped by the configured population selectors.
#[derive(Debug, Clone, Default)]
pub struct PopulationSplit {
    pub authoritative: Population,
    pub unattributed: Population,
    /// Records in neither population; untouched by a cross-population run.
    pub other: Vec<Record>,
}

pub fn split_populations(records: Vec<Record>, config: &DedupConfig) -> PopulationSplit {
    let mut split = PopulationSplit {
        authoritative: Population::new(config.authoritative_label.trim(), Vec::new()),
        unattributed: Population::new(config.unattributed_label.trim(), Vec::new()),
        other: Vec::new(),
    };
    for record in records {
        if config.is_authoritative(record.source_label()) {
            split.authoritative.records.push(record);
        } else if config.is_unattributed(record.source_label()) {
            split.unattributed.records.push(record);
        } else {
            split.other.push(record);
        }
    }
    split
}

/// Run one policy over a store snapshot.
pub fn run(policy: DedupPolicy, records: Vec<Record>, config: &DedupConfig) -> DedupOutcome {
    match policy {
        DedupPolicy::Within => dedup_within(Population::new("all", records)),
        DedupPolicy::Authoritative => {
            let split = split_populations(records, config);
            let mut outcome = dedup_across(split.authoritative, split.unattributed);
            outcome.survivors.extend(split.other);
            outcome
        }
    }
}

fn newer(candidate: &Record, current: &Record) -> bool {
    (candidate.submitted_at(), candidate.id()) > (current.submitted_at(), current.id())
}

fn survivor_form(record: &Record, retag: bool) -> Record {
    if retag {
        record.clone().with_provenance(Provenance::DeduplicationSurvivor)
    } else {
        record.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, hour, 0, 0).unwrap()
    }

    fn rec(period: &str, label: &str, qty: i64, hour: u32, id: i64) -> Record {
        Record::new(day(period), label, qty, at(hour), Provenance::RawImport)
            .unwrap()
            .with_id(id)
    }

    #[test]
    fn keeps_latest_submission() {
        let records = vec![
            rec("2024-03-01", "A", 40, 1, 1),
            rec("2024-03-01", "A", 40, 3, 2),
            rec("2024-03-01", "A", 40, 2, 3),
            rec("2024-03-01", "A", 41, 1, 4),
        ];
        let outcome = dedup_within(Population::new("a", records));
        let kept: Vec<_> = outcome.survivors.iter().filter_map(Record::id).collect();
        assert_eq!(kept, vec![2, 4]);
        assert_eq!(outcome.delete_ids(), vec![1, 3]);
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].kept.id(), Some(2));
    }

    #[test]
    fn tie_breaks_on_id_then_position() {
        let records = vec![
            rec("2024-03-01", "A", 40, 1, 7),
            rec("2024-03-01", "A", 40, 1, 9),
        ];
        let outcome = dedup_within(Population::new("a", records));
        assert_eq!(outcome.delete_ids(), vec![7]);

        let transient = |label: &str| Record::new(day("2024-03-01"), label, 5, at(1), Provenance::RawImport).unwrap();
        let outcome = dedup_within(Population::new("t", vec![transient("first"), transient("second")]));
        assert_eq!(outcome.survivors[0].source_label(), "first");
        assert_eq!(outcome.survivors[0].provenance_tag(), Provenance::DeduplicationSurvivor);
    }

    #[test]
    fn persisted_survivor_keeps_tag() {
        let records = vec![rec("2024-03-01", "A", 40, 1, 1), rec("2024-03-01", "A", 40, 2, 2)];
        let outcome = dedup_within(Population::new("a", records));
        assert_eq!(outcome.survivors[0].provenance_tag(), Provenance::RawImport);
    }

    #[test]
    fn authoritative_wins_across() {
        let a = Population::new("og", vec![rec("2024-02-01", "OG", 50, 1, 1)]);
        let b = Population::new(
            "unknown",
            vec![
                rec("2024-02-01", "Unknown", 50, 5, 2),
                rec("2024-02-01", "Unknown", 49, 5, 3),
            ],
        );
        let outcome = dedup_across(a, b);
        assert_eq!(outcome.delete_ids(), vec![2]);
        assert_eq!(outcome.survivors.len(), 2);
        assert!(matches!(outcome.groups[0].kind, GroupKind::Across { .. }));
        assert_eq!(outcome.groups[0].kept.id(), Some(1));
    }

    #[test]
    fn split_by_label() {
        let config = DedupConfig::default();
        let records = vec![
            rec("2024-02-01", "OG Sandwich Project", 50, 1, 1),
            rec("2024-02-01", "Unknown location", 50, 1, 2),
            rec("2024-02-01", "Dunwoody", 50, 1, 3),
        ];
        let split = split_populations(records, &config);
        assert_eq!(split.authoritative.records.len(), 1);
        assert_eq!(split.unattributed.records.len(), 1);
        assert_eq!(split.other.len(), 1);
    }

    #[test]
    fn authoritative_policy_leaves_other_hosts_alone() {
        let config = DedupConfig::default();
        let records = vec![
            rec("2024-02-01", "OG Sandwich Project", 50, 1, 1),
            rec("2024-02-01", "Unattributed", 50, 1, 2),
            rec("2024-02-01", "Dunwoody", 50, 1, 3),
            rec("2024-02-01", "Dunwoody", 50, 2, 4),
        ];
        let outcome = run(DedupPolicy::Authoritative, records, &config);
        assert_eq!(outcome.delete_ids(), vec![2]);
        assert_eq!(outcome.survivors.len(), 3);
    }
}
