#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod host;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::{Path, PathBuf};
use turbotest_core::Config;

#[derive(Parser, Debug)]
#[command(name = "turbotest")]
#[command(author, version, about = "Discover and run Turborepo tests", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v INFO, -vv DEBUG, -vvv TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the workspace directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Discover tests and print the test tree
    Discover {
        /// Scope discovery to the package owning this file
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Run tests through turbo
    Run {
        /// Test node ids to run (all packages when omitted)
        ids: Vec<String>,

        /// Scope discovery to the package owning this file
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Keep the test tree in sync with file changes until interrupted
    Watch {
        /// Scope discovery to the package owning this file
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Debounce window for file events, in milliseconds
        #[arg(long, default_value_t = 100)]
        debounce_ms: u64,
    },
}

/// Resolve `path` against `cwd` and normalize it.
fn resolve(cwd: &Path, path: &Path) -> PathBuf {
    let joined = cwd.join(path);
    dunce::canonicalize(&joined).unwrap_or(joined)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Discover { file }) => {
            let span = tracing::info_span!("discover", cmd = "discover", cwd = %cwd.display());
            let _guard = span.enter();
            let file = file.map(|f| resolve(&cwd, &f));
            commands::discover::run(&config, file)
        }
        Some(Commands::Run { ids, file }) => {
            let span = tracing::info_span!("run", cmd = "run", cwd = %cwd.display());
            let _guard = span.enter();
            let file = file.map(|f| resolve(&cwd, &f));
            commands::run::run(&config, ids, file)
        }
        Some(Commands::Watch { file, debounce_ms }) => {
            let span = tracing::info_span!("watch", cmd = "watch", cwd = %cwd.display());
            let _guard = span.enter();
            let file = file.map(|f| resolve(&cwd, &f));
            commands::watch::run(&config, file, debounce_ms)
        }
    }
}
