//! tally: reconcile a canonical collection store against the spreadsheets
//! and free-text logs it was built from.

mod context;
mod dedup;
mod exit_codes;
mod import;
mod log_report;
mod output;
mod reconcile;
mod verify;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tally_io::SqliteStore;
use tally_recon::error::{ReconError, StoreError};

use context::{load_config, read_config, Context};
use exit_codes::{recon_exit_code, store_exit_code, ErrorOutput, EXIT_CONFIG, EXIT_SUCCESS};

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\ntarget:  ", env!("TARGET"),
        "\nstore schema: 1",
    )
}

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Reconcile canonical collection records against source spreadsheets and logs")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./tally.toml, then built-in defaults)
    #[arg(long, global = true, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Machine-readable output on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Apply without the confirmation prompt
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty store
    #[command(after_help = "\
Examples:
  tally init tally.db")]
    Init {
        /// Path of the SQLite store to create
        db: PathBuf,
    },

    /// Parse a legacy log and summarise it
    #[command(after_help = "\
Examples:
  tally parse collections.rtf
  tally parse notes.md --top 5 --records
  tally parse collections.rtf --json")]
    Parse(log_report::ParseArgs),

    /// Compare a source with the store and insert corrective records
    Reconcile {
        #[command(subcommand)]
        command: reconcile::ReconcileCommands,
    },

    /// Find and remove duplicate records in the store
    Dedup {
        #[command(subcommand)]
        command: dedup::DedupCommands,
    },

    /// Insert a tabular source's records, skipping ones already stored
    #[command(after_help = "\
Examples:
  tally import --db tally.db --source master --file master.csv
  tally import --db tally.db --source master --file master.xlsx --dry-run")]
    Import(import::ImportArgs),

    /// Check a legacy log against the store period by period
    #[command(after_help = "\
Examples:
  tally verify --db tally.db --log collections.rtf
  tally verify --db tally.db --log collections.rtf --strict --json")]
    Verify(verify::VerifyArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Parse and validate a config file
    Validate {
        /// Config file to check
        file: PathBuf,
    },
    /// Print the effective configuration as TOML
    Show,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let json = cli.json;
    match run(cli) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(err) => {
            report(&err, json);
            ExitCode::from(err.code)
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    // commands that don't need a loaded config
    match &cli.command {
        Commands::Init { db } => return cmd_init(db),
        Commands::Config { command: ConfigCommands::Validate { file } } => {
            return cmd_config_validate(file)
        }
        _ => {}
    }

    let ctx = Context {
        config: load_config(cli.config.as_deref())?,
        json: cli.json,
        yes: cli.yes,
        now: Utc::now(),
    };

    match cli.command {
        Commands::Parse(args) => log_report::cmd_parse(args, &ctx),
        Commands::Reconcile { command } => reconcile::cmd_reconcile(command, &ctx),
        Commands::Dedup { command } => dedup::cmd_dedup(command, &ctx),
        Commands::Import(args) => import::cmd_import(args, &ctx),
        Commands::Verify(args) => verify::cmd_verify(args, &ctx),
        Commands::Config { command: ConfigCommands::Show } => cmd_config_show(&ctx),
        Commands::Init { .. } | Commands::Config { .. } => Ok(()),
    }
}

/// `TALLY_LOG` wins when set; otherwise the verbosity flags pick the level
/// for tally's own crates.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(format!("tally_recon={level},tally_io={level},tally={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report(err: &CliError, json: bool) {
    if json {
        let out = ErrorOutput {
            error: &err.message,
            hint: err.hint.as_deref(),
            exit_code: err.code,
        };
        match serde_json::to_string(&out) {
            Ok(line) => println!("{line}"),
            Err(_) => eprintln!("error: {}", err.message),
        }
        return;
    }
    eprintln!("error: {}", err.message);
    if let Some(hint) = &err.hint {
        eprintln!("hint: {hint}");
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A command failure carrying its exit code.
#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn recon(err: ReconError) -> Self {
        Self::new(recon_exit_code(&err), err.to_string())
    }

    pub fn store(err: StoreError) -> Self {
        Self::new(store_exit_code(&err), err.to_string())
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// init / config
// ============================================================================

fn cmd_init(db: &Path) -> Result<(), CliError> {
    let store = SqliteStore::init(db).map_err(CliError::store)?;
    let count = store.count().map_err(CliError::store)?;
    println!("Store ready: {} ({} records)", db.display(), count);
    Ok(())
}

fn cmd_config_validate(file: &Path) -> Result<(), CliError> {
    // read_config validates as it parses
    let config = read_config(file)?;
    println!(
        "OK: {} ({} source{})",
        file.display(),
        config.sources.len(),
        if config.sources.len() == 1 { "" } else { "s" }
    );
    Ok(())
}

fn cmd_config_show(ctx: &Context) -> Result<(), CliError> {
    let text = ctx
        .config
        .to_toml()
        .map_err(|e| CliError::new(EXIT_CONFIG, e.to_string()))?;
    print!("{text}");
    Ok(())
}
