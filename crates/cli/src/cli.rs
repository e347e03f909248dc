//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// beamctl - time-partitioned event router
#[derive(Parser, Debug)]
#[command(
    name = "beamctl",
    author,
    version,
    about = "Route timestamped events to per-interval destinations",
    long_about = "Routes newline-delimited JSON events to destinations keyed by time bucket.\n\n\
                  Producers sharing a coordination store converge on one set of \n\
                  destinations per bucket; late events inside the window period are \n\
                  accepted, later ones are dropped and counted."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "BEAMCTL_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "BEAMCTL_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream events through the router
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
    #[arg(short, long, default_value = "router.toml", env = "BEAMCTL_CONFIG")]
    pub config: PathBuf,

    /// Newline-delimited JSON input (default: stdin)
    #[arg(short, long, env = "BEAMCTL_INPUT")]
    pub input: Option<PathBuf>,

    /// Records per proposal
    #[arg(long, default_value = "500", env = "BEAMCTL_BATCH_SIZE")]
    pub batch_size: usize,

    /// Flush a partial batch after this many milliseconds without new input
    #[arg(long, default_value = "500", env = "BEAMCTL_LINGER_MS")]
    pub linger_ms: u64,

    /// Stop after this many seconds (0 = run until input ends)
    #[arg(long, default_value = "0", env = "BEAMCTL_TIMEOUT")]
    pub timeout: u64,

    /// Override the producer id recorded on registrations
    #[arg(long, env = "BEAMCTL_PRODUCER_ID")]
    pub producer_id: Option<String>,

    /// Validate configuration and exit without routing
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "BEAMCTL_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "router.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "router.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show the destinations this producer would propose for the current bucket
    #[arg(long)]
    pub destinations: bool,

    /// List registrations currently held in the coordination store
    #[arg(long)]
    pub registrations: bool,
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
