//! Shared plumbing for commands: config, store, sources, confirmation.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Args;

use tally_io::SqliteStore;
use tally_recon::config::TallyConfig;
use tally_recon::log_parser::ParsedLog;
use tally_recon::model::{Intake, Record, RejectedEntry};
use tally_recon::tabular::adapt;
use tally_recon::LogParser;

use crate::exit_codes::{EXIT_ABORTED, EXIT_CONFIG, EXIT_INPUT, EXIT_USAGE};
use crate::CliError;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG: &str = "tally.toml";

/// Global options threaded into every command.
pub struct Context {
    pub config: TallyConfig,
    pub json: bool,
    pub yes: bool,
    /// Stamp for every record created by this invocation.
    pub now: DateTime<Utc>,
}

pub fn load_config(explicit: Option<&Path>) -> Result<TallyConfig, CliError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG);
            if !fallback.is_file() {
                tracing::debug!("no {DEFAULT_CONFIG} found, using built-in defaults");
                return Ok(TallyConfig::default());
            }
            fallback
        }
    };
    read_config(&path)
}

pub fn read_config(path: &Path) -> Result<TallyConfig, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CliError::new(EXIT_CONFIG, format!("cannot read config {}: {e}", path.display()))
    })?;
    let config = TallyConfig::from_toml(&text).map_err(CliError::recon)?;
    tracing::debug!(path = %path.display(), name = %config.name, "loaded config");
    Ok(config)
}

pub fn open_store(db: &Path) -> Result<SqliteStore, CliError> {
    SqliteStore::open(db)
        .map_err(|e| CliError::store(e).with_hint("run `tally init <db>` to create a store"))
}

/// Where the source population comes from: a configured tabular source or
/// the legacy log.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Configured tabular source (a `[sources.<name>]` table)
    #[arg(long, requires = "file", conflicts_with = "log")]
    pub source: Option<String>,

    /// Tabular export to read (CSV, TSV, XLSX, XLS, ODS)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Legacy free-text log to read instead of a tabular source
    #[arg(long)]
    pub log: Option<PathBuf>,
}

/// Records from the chosen source, plus what was turned away.
pub struct SourceData {
    pub label: String,
    pub records: Vec<Record>,
    pub rejected: Vec<RejectedEntry>,
    pub filtered: usize,
}

impl SourceArgs {
    pub fn load(&self, ctx: &Context) -> Result<SourceData, CliError> {
        match (&self.source, &self.file, &self.log) {
            (Some(name), Some(file), None) => {
                let intake = load_tabular(&ctx.config, name, file, ctx.now)?;
                Ok(SourceData {
                    label: format!("{name} ({})", file.display()),
                    records: intake.records,
                    rejected: intake.rejected,
                    filtered: intake.filtered,
                })
            }
            (None, None, Some(log)) => {
                let parsed = load_log(&ctx.config, log, ctx.now)?;
                Ok(SourceData {
                    label: format!("log ({})", log.display()),
                    records: parsed.records,
                    rejected: parsed.rejected,
                    filtered: 0,
                })
            }
            _ => Err(CliError::new(
                EXIT_USAGE,
                "choose one source: --source <name> --file <path>, or --log <path>",
            )),
        }
    }
}

pub fn load_tabular(
    config: &TallyConfig,
    name: &str,
    file: &Path,
    run_at: DateTime<Utc>,
) -> Result<Intake, CliError> {
    let source = config.source(name).map_err(|e| {
        let known: Vec<&str> = config.sources.keys().map(String::as_str).collect();
        CliError::recon(e).with_hint(if known.is_empty() {
            "no [sources.<name>] tables are configured".to_string()
        } else {
            format!("configured sources: {}", known.join(", "))
        })
    })?;
    let table = tally_io::load_table(file, source.sheet.as_deref())
        .map_err(|e| CliError::new(EXIT_INPUT, e))?;
    let records = adapt(name, &table, source, run_at).map_err(CliError::recon)?;
    Ok(records.into_intake())
}

pub fn load_log(config: &TallyConfig, path: &Path, run_at: DateTime<Utc>) -> Result<ParsedLog, CliError> {
    let text = tally_io::read_log(path).map_err(|e| CliError::new(EXIT_INPUT, e))?;
    let parser = LogParser::new(&config.log).map_err(CliError::recon)?;
    Ok(parser.parse(&text, run_at))
}

/// Ask before writing. `--yes` skips the prompt; anything but `y`/`yes`
/// (including end of input) aborts.
pub fn confirm(question: &str, yes: bool) -> Result<(), CliError> {
    if yes {
        return Ok(());
    }
    eprint!("{question} [y/N] ");
    io::stderr().flush().ok();
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| CliError::new(EXIT_ABORTED, format!("cannot read confirmation: {e}")))?;
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Ok(()),
        _ => Err(CliError::new(EXIT_ABORTED, "aborted; nothing was written")
            .with_hint("pass --yes to apply without prompting")),
    }
}
