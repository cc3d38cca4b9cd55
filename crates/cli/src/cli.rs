//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Courier - stream delivery and alert fan-out engine
#[derive(Parser, Debug)]
#[command(
    name = "courier",
    author,
    version,
    about = "Stream delivery and alert fan-out engine",
    long_about = "Buffers records from a shared stream into batches, transforms and \n\
                  converts them, and writes partitioned objects to a sink. A second \n\
                  reader of the same stream sends alerts for matching records."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "COURIER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "COURIER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every configured delivery stream and the alert fan-out
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "courier.toml", env = "COURIER_CONFIG")]
    pub config: PathBuf,

    /// Newline-delimited input records (`-` reads stdin)
    #[arg(short, long, env = "COURIER_INPUT", conflicts_with = "synthetic")]
    pub input: Option<PathBuf>,

    /// Generate this many synthetic request-log records instead of reading input
    #[arg(long)]
    pub synthetic: Option<usize>,

    /// Seed for synthetic records
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Stop and drain after this many seconds (0 = run until input ends)
    #[arg(long, default_value = "0", env = "COURIER_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Prometheus metrics port (0 = disabled)
    #[arg(long, default_value = "0", env = "COURIER_METRICS_PORT")]
    pub metrics_port: u16,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "courier.toml", env = "COURIER_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "courier.toml", env = "COURIER_CONFIG")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show per-stream buffer, retry and schema settings
    #[arg(long)]
    pub streams: bool,

    /// Show alert predicate and notifiers
    #[arg(long)]
    pub alerts: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::parse_from([
            "courier",
            "-v",
            "run",
            "--config",
            "pipe.toml",
            "--synthetic",
            "100",
            "--timeout",
            "5",
        ]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("pipe.toml"));
                assert_eq!(args.synthetic, Some(100));
                assert_eq!(args.timeout, 5);
                assert!(args.input.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_input_conflicts_with_synthetic() {
        let result = Cli::try_parse_from([
            "courier", "run", "--input", "a.ndjson", "--synthetic", "10",
        ]);
        assert!(result.is_err());
    }
}
