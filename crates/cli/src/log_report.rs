//! `tally parse`: read a legacy log and report what it contains, without
//! touching any store.

use std::path::PathBuf;

use serde::Serialize;

use tally_recon::log_parser::ParsedLog;
use tally_recon::summary::RunSummary;

use crate::context::{load_log, Context};
use crate::output::{print_json, print_run_summary, thousands};
use crate::CliError;

#[derive(clap::Args, Debug)]
pub struct ParseArgs {
    /// Legacy free-text log (RTF, markdown or plain text)
    log: PathBuf,

    /// Highest periods listed
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Also list every period record
    #[arg(long)]
    records: bool,
}

#[derive(Serialize)]
struct ParseOutput<'a> {
    log: String,
    total: u64,
    #[serde(flatten)]
    parsed: &'a ParsedLog,
    summary: &'a RunSummary,
}

pub fn cmd_parse(args: ParseArgs, ctx: &Context) -> Result<(), CliError> {
    let parsed = load_log(&ctx.config, &args.log, ctx.now)?;
    let summary = RunSummary {
        accepted: parsed.records.len(),
        ..RunSummary::default()
    }
    .with_rejections(&parsed.rejected);

    if ctx.json {
        return print_json(&ParseOutput {
            log: args.log.display().to_string(),
            total: parsed.total(),
            parsed: &parsed,
            summary: &summary,
        });
    }

    println!("Log: {}", args.log.display());
    println!(
        "Entries: {}  periods: {}  repaired dates: {}  rejected: {}",
        parsed.entry_count,
        parsed.periods.len(),
        parsed.repaired_count,
        parsed.rejected.len()
    );
    if let (Some(first), Some(last)) = (parsed.first_period(), parsed.last_period()) {
        println!(
            "Range: {} {} ({}) to {} {} ({})",
            ctx.config.log.period_marker,
            first.period_id,
            first.date,
            ctx.config.log.period_marker,
            last.period_id,
            last.date
        );
    }
    println!("Total: {} {}", thousands(parsed.total()), ctx.config.log.unit_word);

    let highest = parsed.highest(args.top);
    if !highest.is_empty() {
        println!();
        println!("Highest periods:");
        for p in highest {
            println!(
                "  {:>4}  {}  {:>10}  {}",
                p.period_id,
                p.date,
                thousands(p.quantity),
                p.source_label
            );
        }
    }

    if !parsed.label_totals.is_empty() {
        println!();
        println!("By source:");
        for (label, total) in &parsed.label_totals {
            println!("  {:<30} {:>10}", label, thousands(*total));
        }
    }

    if args.records {
        println!();
        println!("Records:");
        for r in &parsed.records {
            println!(
                "  {}  {:>10}  {}",
                r.period_key(),
                thousands(r.quantity()),
                r.source_label()
            );
        }
    }

    print_run_summary(&summary);
    Ok(())
}
