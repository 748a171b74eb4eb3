#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::{ErrorReport, OutputMode};
use std::env;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "pubguard: per-campaign publisher blacklisting from tracking events",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Output format.
    #[arg(long, value_enum, global = true)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run the optimization job",
        long_about = "Aggregate events into counters, judge every campaign's publishers and save the resulting blacklists.",
        after_help = "EXAMPLES:\n    # Run with ./pubguard.toml or defaults\n    pubguard run\n\n    # Explicit sources and cutoff\n    pubguard run --campaigns campaigns.csv --events events.csv --start \"2024-02-01 00:00:00\"\n\n    # Keep counters in a SQLite store for inspection\n    pubguard run --store sqlite --keep-counters --json"
    )]
    Run(cmd::run::RunArgs),

    #[command(
        about = "List counters of one campaign",
        long_about = "Scan one campaign bucket of a SQLite counter store.",
        after_help = "EXAMPLES:\n    # All counters of campaign 1\n    pubguard counters --campaign 1\n\n    # Only installs\n    pubguard counters --campaign 1 --pattern 'install:*'"
    )]
    Counters(cmd::counters::CountersArgs),

    #[command(
        about = "Wipe a SQLite counter store",
        after_help = "EXAMPLES:\n    pubguard clear --store-path .pubguard/counters.sqlite3"
    )]
    Clear(cmd::clear::ClearArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PUBGUARD_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "pubguard=debug,pubguard_core=debug,info"
        } else {
            "pubguard=info,pubguard_core=info,warn"
        })
    });

    let format = env::var("PUBGUARD_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }
    let output = cli.output_mode();

    let command_result = env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|project_root| match &cli.command {
            Commands::Run(args) => cmd::run::run_run(args, output, &project_root),
            Commands::Counters(args) => {
                cmd::counters::run_counters(args, output, &project_root)
            }
            Commands::Clear(args) => cmd::clear::run_clear(args, output, &project_root),
        });

    match command_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if output::emit_error(output, &ErrorReport::from(&err)).is_err() {
                eprintln!("{err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
