//! segfetch CLI - Command-line interface
//!
//! This binary provides a command-line interface to the segfetch library:
//! segmented downloads from S3-compatible object storage with MD5
//! verification and optional streaming tar extraction.

mod commands;
mod error;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use segfetch::logging::{init_logging, level_for_verbosity, LoggingConfig};
use tracing::error;

use commands::common::StoreOverrides;
use commands::config::ConfigCommands;
use commands::get::GetArgs;
use error::{CliError, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "segfetch")]
#[command(version = segfetch::VERSION)]
#[command(about = "Parallel ranged downloads from S3-compatible object storage", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Flags selecting and tuning the object store.
#[derive(Debug, Args)]
struct StoreArgs {
    /// S3-compatible endpoint URL (default: config storage.endpoint)
    #[arg(long)]
    endpoint: Option<String>,

    /// Bytes per ranged request, e.g. 8M (default: config download.segment_size)
    #[arg(long)]
    segment_size: Option<String>,

    /// Number of parallel workers (default: config download.workers)
    #[arg(long)]
    workers: Option<usize>,
}

impl From<StoreArgs> for StoreOverrides {
    fn from(args: StoreArgs) -> Self {
        StoreOverrides {
            endpoint: args.endpoint,
            segment_size: args.segment_size,
            workers: args.workers,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Download an object
    Get {
        /// Object URL (s3://bucket/key)
        source: String,

        /// Output file, or directory when extracting
        destination: PathBuf,

        /// Unpack the object as a tar archive into DESTINATION while downloading
        #[arg(long)]
        extract_tar: bool,

        /// Expected MD5 (overrides the hash advertised by the store)
        #[arg(long)]
        expected_md5: Option<String>,

        /// Skip MD5 verification
        #[arg(long, conflicts_with = "expected_md5")]
        no_verify: bool,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Check whether an object exists and print its size
    Exists {
        /// Object URL (s3://bucket/key)
        source: String,

        /// S3-compatible endpoint URL (default: config storage.endpoint)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Print the MD5 of a local file
    Md5 {
        /// File to hash
        file: PathBuf,

        /// Fail unless the digest equals this value
        #[arg(long)]
        expected: Option<String>,
    },

    /// View or modify configuration settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Get {
            source,
            destination,
            extract_tar,
            expected_md5,
            no_verify,
            store,
        } => commands::get::run(GetArgs {
            source,
            destination,
            extract_tar,
            expected_md5,
            no_verify,
            store: store.into(),
        }),
        Commands::Exists { source, endpoint } => {
            let overrides = StoreOverrides {
                endpoint,
                ..Default::default()
            };
            commands::exists::run(&source, &overrides)
        }
        Commands::Md5 { file, expected } => commands::md5::run(&file, expected.as_deref()),
        Commands::Config { command } => commands::config::run(command),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::default()
        .with_level(level_for_verbosity(cli.verbose))
        .with_ansi(std::io::stderr().is_terminal());
    if let Some(path) = cli.log_file {
        logging = logging.with_log_file(path);
    }

    // Dropping the guard flushes the log file, so it lives until exit
    let _guard = match init_logging(logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
