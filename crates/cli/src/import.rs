//! `tally import`: load a tabular source into the store.

use std::path::PathBuf;

use serde::Serialize;

use tally_recon::model::Record;
use tally_recon::store::{apply_inserts, partition_new, ApplyReport, CanonicalStore, RecordFilter};
use tally_recon::summary::RunSummary;

use crate::context::{confirm, load_tabular, open_store, Context};
use crate::exit_codes::EXIT_PARTIAL_APPLY;
use crate::output::{print_json, print_run_summary, thousands};
use crate::CliError;

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// SQLite store
    #[arg(long, env = "TALLY_DB")]
    db: PathBuf,

    /// Configured tabular source (a `[sources.<name>]` table)
    #[arg(long)]
    source: String,

    /// Tabular export to read
    #[arg(long)]
    file: PathBuf,

    /// Show what would be inserted without writing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Serialize)]
struct ImportOutput<'a> {
    source: &'a str,
    to_insert: &'a [Record],
    duplicates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied: Option<&'a ApplyReport>,
    summary: &'a RunSummary,
}

pub fn cmd_import(args: ImportArgs, ctx: &Context) -> Result<(), CliError> {
    let mut store = open_store(&args.db)?;
    let intake = load_tabular(&ctx.config, &args.source, &args.file, ctx.now)?;
    let mut summary = RunSummary::from_intake(&intake);

    // identical (period, label, quantity) rows already in the store are skipped
    let existing = store
        .enumerate_records(&RecordFilter::all())
        .map_err(CliError::store)?;
    let (fresh, duplicates) = partition_new(&existing, intake.records);
    summary.skipped = duplicates.len();
    let fresh_total: u64 = fresh.iter().map(Record::effective_total).sum();

    if !ctx.json {
        println!("Source: {} ({})", args.source, args.file.display());
        println!(
            "New records: {} totalling {}; already present: {}",
            fresh.len(),
            thousands(fresh_total),
            duplicates.len()
        );
    }

    let mut applied = None;
    if !args.dry_run && !fresh.is_empty() {
        confirm(
            &format!(
                "Insert {} record(s) totalling {} into {}?",
                fresh.len(),
                thousands(fresh_total),
                args.db.display()
            ),
            ctx.yes,
        )?;
        let report = apply_inserts(&mut store, &fresh);
        summary.record_inserts(&report);
        applied = Some(report);
    }

    if ctx.json {
        print_json(&ImportOutput {
            source: &args.source,
            to_insert: &fresh,
            duplicates: duplicates.len(),
            applied: applied.as_ref(),
            summary: &summary,
        })?;
    } else {
        print_run_summary(&summary);
    }

    if summary.has_failures() {
        return Err(CliError::new(
            EXIT_PARTIAL_APPLY,
            format!("{} of {} inserts failed", summary.failed, fresh.len()),
        )
        .with_hint("re-run the import; records already written are skipped"));
    }
    Ok(())
}
