//! `tally reconcile`: compare a source with the store and close material gaps.

use std::path::PathBuf;

use clap::Subcommand;
use serde::Serialize;

use tally_recon::reconcile::{reconcile, ReconcilePlan};
use tally_recon::store::{apply_inserts, ApplyReport, CanonicalStore, RecordFilter};
use tally_recon::summary::RunSummary;

use crate::context::{confirm, open_store, Context, SourceArgs, SourceData};
use crate::exit_codes::{EXIT_DISCREPANCIES, EXIT_PARTIAL_APPLY};
use crate::output::{print_json, print_run_summary, signed, thousands};
use crate::CliError;

#[derive(Subcommand)]
pub enum ReconcileCommands {
    /// Show per-period discrepancies and the corrections an apply would write
    #[command(after_help = "\
Examples:
  tally reconcile report --db tally.db --source master --file master.xlsx
  tally reconcile report --db tally.db --log collections.rtf --top 25
  tally reconcile report --db tally.db --source master --file master.csv --strict --json")]
    Report {
        /// SQLite store
        #[arg(long, env = "TALLY_DB")]
        db: PathBuf,

        #[command(flatten)]
        source: SourceArgs,

        /// Discrepancies listed in the human report
        #[arg(long, default_value_t = 20)]
        top: usize,

        /// Exit 8 when material discrepancies remain
        #[arg(long)]
        strict: bool,
    },

    /// Insert one corrective record per material gap, after confirmation
    #[command(after_help = "\
Examples:
  tally reconcile apply --db tally.db --source master --file master.xlsx
  tally reconcile apply --db tally.db --source master --file master.xlsx --yes")]
    Apply {
        /// SQLite store
        #[arg(long, env = "TALLY_DB")]
        db: PathBuf,

        #[command(flatten)]
        source: SourceArgs,

        /// Discrepancies listed in the human report
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
}

#[derive(Serialize)]
struct ReconcileOutput<'a> {
    source: &'a str,
    threshold: u64,
    max_corrections: usize,
    plan: &'a ReconcilePlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied: Option<&'a ApplyReport>,
    summary: &'a RunSummary,
}

pub fn cmd_reconcile(cmd: ReconcileCommands, ctx: &Context) -> Result<(), CliError> {
    match cmd {
        ReconcileCommands::Report { db, source, top, strict } => {
            cmd_reconcile_run(ctx, db, source, top, strict, false)
        }
        ReconcileCommands::Apply { db, source, top } => {
            cmd_reconcile_run(ctx, db, source, top, false, true)
        }
    }
}

fn cmd_reconcile_run(
    ctx: &Context,
    db: PathBuf,
    source_args: SourceArgs,
    top: usize,
    strict: bool,
    apply: bool,
) -> Result<(), CliError> {
    // store first: an unreachable store aborts before any analysis is shown
    let mut store = open_store(&db)?;
    let source = source_args.load(ctx)?;
    let canonical = store
        .enumerate_records(&RecordFilter::all())
        .map_err(CliError::store)?;

    let plan = reconcile(&source.records, &canonical, &ctx.config.reconcile, ctx.now)
        .map_err(CliError::recon)?;

    let mut summary = RunSummary {
        accepted: source.records.len(),
        filtered: source.filtered,
        ..RunSummary::default()
    }
    .with_rejections(&source.rejected);

    if !ctx.json {
        print_plan(ctx, &source, &plan, top);
    }

    let mut applied = None;
    if apply && !plan.corrections.is_empty() {
        confirm(
            &format!(
                "Insert {} corrective record(s) totalling {} into {}?",
                plan.corrections.len(),
                thousands(plan.correction_total()),
                db.display()
            ),
            ctx.yes,
        )?;
        let report = apply_inserts(&mut store, &plan.corrections);
        summary.record_corrections(&report);
        if !ctx.json {
            for failure in &report.failed {
                eprintln!(
                    "failed: {} +{} ({})",
                    failure.record.period_key(),
                    thousands(failure.record.quantity()),
                    failure.error
                );
            }
        }
        applied = Some(report);
    } else if apply && !ctx.json {
        println!();
        println!("Nothing to apply.");
    }

    if ctx.json {
        print_json(&ReconcileOutput {
            source: &source.label,
            threshold: ctx.config.reconcile.threshold,
            max_corrections: ctx.config.reconcile.max_corrections,
            plan: &plan,
            applied: applied.as_ref(),
            summary: &summary,
        })?;
    } else {
        print_run_summary(&summary);
    }

    if summary.has_failures() {
        return Err(CliError::new(
            EXIT_PARTIAL_APPLY,
            format!("{} of {} corrective inserts failed", summary.failed, plan.corrections.len()),
        )
        .with_hint("re-run `tally reconcile apply`; committed corrections are not repeated"));
    }
    if strict && !plan.is_clean() {
        return Err(CliError::new(
            EXIT_DISCREPANCIES,
            format!("{} material discrepancies remain", plan.discrepancies.len()),
        ));
    }
    Ok(())
}

fn print_plan(ctx: &Context, source: &SourceData, plan: &ReconcilePlan, top: usize) {
    let gap = &plan.summary;
    println!("Source:    {}", source.label);
    println!(
        "Threshold: {} (cap {} corrections per run)",
        ctx.config.reconcile.threshold, ctx.config.reconcile.max_corrections
    );
    println!();
    println!("Source total:     {:>12}", thousands(gap.source_total));
    println!("Canonical total:  {:>12}", thousands(gap.canonical_total));
    println!("Gap:              {:>12}", signed(gap.gap));
    if let Some(pct) = gap.completion_pct {
        println!("Completion:       {:>11.1}%", pct);
    }
    if gap.canonical_outside_source > 0 {
        println!(
            "Outside source:   {:>12}  (store periods the source does not cover)",
            thousands(gap.canonical_outside_source)
        );
    }

    println!();
    if plan.discrepancies.is_empty() {
        println!("No discrepancies above threshold ({} within threshold).", plan.immaterial);
        return;
    }
    println!(
        "Discrepancies above threshold: {} ({} within threshold)",
        plan.discrepancies.len(),
        plan.immaterial
    );
    println!("  {:<12} {:>10} {:>10} {:>10}  action", "period", "source", "store", "delta");
    for d in plan.discrepancies.iter().take(top) {
        let action = if !d.is_missing() {
            "review (store exceeds source)"
        } else if plan.deferred.iter().any(|x| x.period == d.period) {
            "deferred (cap reached)"
        } else {
            "correct"
        };
        println!(
            "  {:<12} {:>10} {:>10} {:>10}  {}",
            d.period.to_string(),
            thousands(d.source_total),
            thousands(d.canonical_total),
            signed(d.delta),
            action
        );
    }
    if plan.discrepancies.len() > top {
        println!("  ... {} more", plan.discrepancies.len() - top);
    }
    println!();
    println!(
        "Corrections: {} totalling {} (label \"{}\")",
        plan.corrections.len(),
        thousands(plan.correction_total()),
        ctx.config.reconcile.adjustment_label
    );
    if !plan.deferred.is_empty() {
        println!("Deferred to a later run: {}", plan.deferred.len());
    }
    if !plan.excess.is_empty() {
        println!("Store exceeds source (not corrected): {}", plan.excess.len());
    }
}
