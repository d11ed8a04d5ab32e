//! `tally verify`: check the legacy log against the store, period by period.

use std::path::PathBuf;

use serde::Serialize;

use tally_recon::reconcile::reduce_by_period;
use tally_recon::store::{CanonicalStore, RecordFilter};
use tally_recon::summary::RunSummary;
use tally_recon::verify::{compare_periods, PeriodComparison};

use crate::context::{load_log, open_store, Context};
use crate::exit_codes::EXIT_DISCREPANCIES;
use crate::output::{print_json, print_run_summary, signed, thousands};
use crate::CliError;

#[derive(clap::Args, Debug)]
pub struct VerifyArgs {
    /// SQLite store
    #[arg(long, env = "TALLY_DB")]
    db: PathBuf,

    /// Legacy free-text log
    #[arg(long)]
    log: PathBuf,

    /// Differences listed in the human report
    #[arg(long, default_value_t = 20)]
    top: usize,

    /// Exit 8 when the log and the store disagree
    #[arg(long)]
    strict: bool,
}

#[derive(Serialize)]
struct VerifyOutput<'a> {
    log: String,
    threshold: u64,
    comparison: &'a PeriodComparison,
    summary: &'a RunSummary,
}

pub fn cmd_verify(args: VerifyArgs, ctx: &Context) -> Result<(), CliError> {
    let store = open_store(&args.db)?;
    let parsed = load_log(&ctx.config, &args.log, ctx.now)?;

    let filter = RecordFilter::all()
        .without_adjustments(ctx.config.reconcile.legacy_adjustment_labels.as_slice());
    let stored = store.enumerate_records(&filter).map_err(CliError::store)?;

    let log_totals = reduce_by_period(&parsed.records);
    let store_totals = reduce_by_period(&stored);
    let comparison = compare_periods(&log_totals, &store_totals, ctx.config.reconcile.threshold);

    let summary = RunSummary {
        accepted: parsed.records.len(),
        ..RunSummary::default()
    }
    .with_rejections(&parsed.rejected);

    if ctx.json {
        print_json(&VerifyOutput {
            log: args.log.display().to_string(),
            threshold: ctx.config.reconcile.threshold,
            comparison: &comparison,
            summary: &summary,
        })?;
    } else {
        print_comparison(&comparison, args.top);
        print_run_summary(&summary);
    }

    if args.strict && !comparison.is_consistent() {
        return Err(CliError::new(
            EXIT_DISCREPANCIES,
            format!(
                "log and store disagree: {} differing, {} log-only, {} store-only periods",
                comparison.differences.len(),
                comparison.only_left.len(),
                comparison.only_right.len()
            ),
        ));
    }
    Ok(())
}

fn print_comparison(c: &PeriodComparison, top: usize) {
    println!("Log total:    {:>12}", thousands(c.left_total));
    println!("Store total:  {:>12}", thousands(c.right_total));
    println!("Difference:   {:>12}", signed(c.total_difference()));
    println!();
    println!("Matching periods: {}", c.matched);

    if !c.only_left.is_empty() {
        println!();
        println!("Only in the log ({}):", c.only_left.len());
        for (period, total) in c.only_left.iter().take(top) {
            println!("  {period}  {:>10}", thousands(*total));
        }
    }
    if !c.only_right.is_empty() {
        println!();
        println!("Only in the store ({}):", c.only_right.len());
        for (period, total) in c.only_right.iter().take(top) {
            println!("  {period}  {:>10}", thousands(*total));
        }
    }
    if !c.differences.is_empty() {
        println!();
        println!("Differing periods ({}):", c.differences.len());
        println!("  {:<12} {:>10} {:>10} {:>10}", "period", "log", "store", "diff");
        for d in c.differences.iter().take(top) {
            println!(
                "  {:<12} {:>10} {:>10} {:>10}",
                d.period.to_string(),
                thousands(d.left),
                thousands(d.right),
                signed(d.difference)
            );
        }
        if c.differences.len() > top {
            println!("  ... {} more", c.differences.len() - top);
        }
    }
    if c.is_consistent() {
        println!("Log and store agree.");
    }
}
