//! Nereus CLI - run analysis units to a fixed point and query the result.
//!
//! Nereus collects the resources under a workspace (directories, archives and
//! archives nested in archives), runs the registered units over them until
//! nothing changes, and keeps the resulting property graph in `SQLite`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod cli;

/// Nereus: fixed-point analysis over a shared property graph.
#[derive(Parser)]
#[command(name = "nereus")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Workspace root directory (defaults to current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every unit until the graph stops changing
    Analyze {
        /// Path to analyze, relative to the workspace (defaults to the workspace root)
        path: Option<PathBuf>,

        /// Clear the graph and the run ledger first
        #[arg(long)]
        rebuild: bool,

        /// Override the configured pass ceiling
        #[arg(long)]
        max_passes: Option<u32>,

        /// Run work items on the calling thread
        #[arg(long)]
        sequential: bool,
    },

    /// List nodes by tag and type
    Query {
        /// Tag to match (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Require every tag instead of any
        #[arg(short, long)]
        all: bool,

        /// Restrict to one node type
        #[arg(short = 'T', long = "type")]
        node_type: Option<String>,
    },

    /// Show the edges of a node
    Edges {
        /// Node id (a resource URI for collected resources)
        id: String,

        /// Show incoming instead of outgoing edges
        #[arg(long)]
        incoming: bool,
    },

    /// List registered units in execution order
    Units,

    /// Show graph statistics
    Stats,

    /// List the direct children of a resource
    Ls {
        /// Resource URI or path
        uri: String,
    },

    /// Print the content of a resource
    Cat {
        /// Resource URI or path
        uri: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let workspace = match cli.workspace {
        Some(w) => w,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!(
                    "{}: failed to get current directory: {e}",
                    "error".red().bold()
                );
                return ExitCode::FAILURE;
            }
        },
    };

    let result = match cli.command {
        Commands::Analyze {
            path,
            rebuild,
            max_passes,
            sequential,
        } => cli::analyze::run(
            &workspace,
            &cli::analyze::AnalyzeArgs {
                path,
                rebuild,
                max_passes,
                sequential,
            },
        ),
        Commands::Query {
            tags,
            all,
            node_type,
        } => cli::query::run(&workspace, &tags, all, node_type.as_deref()),
        Commands::Edges { id, incoming } => cli::edges::run(&workspace, &id, incoming),
        Commands::Units => cli::units::run(&workspace),
        Commands::Stats => cli::stats::run(&workspace),
        Commands::Ls { uri } => cli::resources::ls(&workspace, &uri),
        Commands::Cat { uri } => cli::resources::cat(&workspace, &uri),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  {}: {cause}", "caused by".dimmed());
                source = std::error::Error::source(cause);
            }
            ExitCode::FAILURE
        }
    }
}
