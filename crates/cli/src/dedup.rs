//! `tally dedup`: find and remove probable duplicate records.

use std::path::PathBuf;

use clap::{Subcommand, ValueEnum};
use serde::Serialize;

use tally_recon::dedup::{run, DedupOutcome, DedupPolicy, GroupKind};
use tally_recon::store::{apply_deletions, CanonicalStore, LabelPattern, RecordFilter};
use tally_recon::summary::RunSummary;

use crate::context::{confirm, open_store, Context};
use crate::output::{print_json, print_run_summary, thousands};
use crate::CliError;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Mode {
    /// Keep the newest record of each (period, total) group
    Within,
    /// Delete unattributed records shadowed by the authoritative label, then
    /// dedup each side
    Authoritative,
}

impl From<Mode> for DedupPolicy {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Within => DedupPolicy::Within,
            Mode::Authoritative => DedupPolicy::Authoritative,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct DedupArgs {
    /// SQLite store
    #[arg(long, env = "TALLY_DB")]
    db: PathBuf,

    #[arg(long, value_enum, default_value = "within")]
    mode: Mode,

    /// Restrict the scan to labels matching this LIKE pattern (`%`, `_`)
    #[arg(long)]
    label: Option<String>,

    /// Duplicate groups listed in the human report
    #[arg(long, default_value_t = 20)]
    top: usize,
}

#[derive(Subcommand)]
pub enum DedupCommands {
    /// List duplicate groups and what an apply would delete
    #[command(after_help = "\
Examples:
  tally dedup report --db tally.db
  tally dedup report --db tally.db --mode authoritative
  tally dedup report --db tally.db --label 'Dunwoody%' --json")]
    Report(DedupArgs),

    /// Delete the duplicates, after confirmation
    #[command(after_help = "\
Examples:
  tally dedup apply --db tally.db --mode authoritative --yes")]
    Apply(DedupArgs),
}

#[derive(Serialize)]
struct DedupOutput<'a> {
    policy: DedupPolicy,
    scanned: usize,
    groups: &'a [tally_recon::dedup::DuplicateGroup],
    delete_ids: Vec<i64>,
    removed_total: u64,
    summary: &'a RunSummary,
}

pub fn cmd_dedup(cmd: DedupCommands, ctx: &Context) -> Result<(), CliError> {
    match cmd {
        DedupCommands::Report(args) => cmd_dedup_run(ctx, args, false),
        DedupCommands::Apply(args) => cmd_dedup_run(ctx, args, true),
    }
}

fn cmd_dedup_run(ctx: &Context, args: DedupArgs, apply: bool) -> Result<(), CliError> {
    let mut store = open_store(&args.db)?;

    // past adjustments are never dedup candidates
    let legacy = ctx.config.reconcile.legacy_adjustment_labels.as_slice();
    let mut filter = RecordFilter::all().without_adjustments(legacy);
    if let Some(label) = &args.label {
        filter = filter.label(LabelPattern::new(label.as_str()));
    }
    let records = store.enumerate_records(&filter).map_err(CliError::store)?;
    let scanned = records.len();

    let policy = DedupPolicy::from(args.mode);
    let outcome = run(policy, records, &ctx.config.dedup);
    let ids = outcome.delete_ids();

    let mut summary = RunSummary {
        accepted: scanned,
        ..RunSummary::default()
    };

    if !ctx.json {
        print_outcome(policy, scanned, &outcome, args.top);
    }

    if apply && !ids.is_empty() {
        confirm(
            &format!(
                "Delete {} duplicate record(s) totalling {} from {}?",
                ids.len(),
                thousands(outcome.removed_total()),
                args.db.display()
            ),
            ctx.yes,
        )?;
        summary.deleted = apply_deletions(&mut store, &ids).map_err(CliError::store)?;
    } else if apply && !ctx.json {
        println!();
        println!("Nothing to delete.");
    }

    if ctx.json {
        print_json(&DedupOutput {
            policy,
            scanned,
            groups: &outcome.groups,
            delete_ids: ids,
            removed_total: outcome.removed_total(),
            summary: &summary,
        })
    } else {
        print_run_summary(&summary);
        Ok(())
    }
}

fn print_outcome(policy: DedupPolicy, scanned: usize, outcome: &DedupOutcome, top: usize) {
    let mode = match policy {
        DedupPolicy::Within => "within",
        DedupPolicy::Authoritative => "authoritative",
    };
    println!("Mode: {mode}, records scanned: {scanned}");
    if outcome.groups.is_empty() {
        println!("No duplicates found.");
        return;
    }
    println!(
        "Duplicate groups: {}, records to delete: {} (total {})",
        outcome.groups.len(),
        outcome.to_delete.len(),
        thousands(outcome.removed_total())
    );
    println!();
    for group in outcome.groups.iter().take(top) {
        let scope = match &group.kind {
            GroupKind::Within { population } => format!("within {population}"),
            GroupKind::Across { authoritative, superseded } => {
                format!("{superseded} shadowed by {authoritative}")
            }
        };
        println!(
            "  {} total {:>8}  {}",
            group.key.period,
            thousands(group.key.total),
            scope
        );
        println!(
            "    keep   #{:<6} {:<28} {}",
            id_text(group.kept.id()),
            group.kept.source_label(),
            group.kept.submitted_at().format("%Y-%m-%d %H:%M")
        );
        for record in &group.discarded {
            println!(
                "    delete #{:<6} {:<28} {}",
                id_text(record.id()),
                record.source_label(),
                record.submitted_at().format("%Y-%m-%d %H:%M")
            );
        }
    }
    if outcome.groups.len() > top {
        println!("  ... {} more groups", outcome.groups.len() - top);
    }
}

fn id_text(id: Option<i64>) -> String {
    id.map_or_else(|| "-".to_string(), |id| id.to_string())
}
