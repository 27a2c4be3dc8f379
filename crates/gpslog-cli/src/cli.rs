//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

/// Where recorded fixes come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum InputKind {
    /// `lat,lon[,timestamp]` lines
    #[default]
    Lines,
    /// NMEA 0183 sentences (RMC and GGA)
    Nmea,
    /// Seeded random walk
    Simulate,
}

#[derive(Parser)]
#[command(name = "gpslog")]
#[command(author, version, about = "Record GPS fixes into a synced location log", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Database file (overrides the config file)
    #[arg(long, global = true, env = "GPSLOG_DB")]
    pub db: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "GPSLOG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record fixes from a source until it ends or Ctrl-C
    Record(RecordArgs),

    /// List recorded locations
    List(ListArgs),

    /// Delete locations older than a given age
    Purge {
        /// Age threshold in hours (defaults to the configured retention)
        #[arg(long)]
        older_than_hours: Option<u64>,
    },

    /// Delete every recorded location
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Delete one location by id
    #[command(alias = "rm")]
    Delete {
        /// Record id as shown by `list --format json`
        id: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Arguments for `record`
#[derive(Debug, Clone, Args)]
pub struct RecordArgs {
    /// Input format
    #[arg(short = 'k', long, value_enum, default_value = "lines")]
    pub kind: InputKind,

    /// Input file, or `-` for stdin (ignored when simulating)
    #[arg(short, long, default_value = "-")]
    pub input: PathBuf,

    /// Write map pins as GeoJSON to this file (overrides the config file)
    #[arg(long)]
    pub geojson: Option<PathBuf>,

    /// Minimum distance in meters between recorded fixes (0 keeps all)
    #[arg(long)]
    pub min_distance: Option<f64>,

    /// Skip the retention purge at startup
    #[arg(long)]
    pub no_purge: bool,

    /// Print the full list after every change
    #[arg(long)]
    pub follow: bool,

    #[command(flatten)]
    pub simulate: SimulateArgs,
}

/// Options for the simulated source
#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// Starting point as `lat,lon`
    #[arg(long, default_value = "35.681236,139.767125", value_parser = parse_start)]
    pub start: (f64, f64),

    /// Number of simulated fixes
    #[arg(long, default_value = "10")]
    pub count: usize,

    /// Mean step length in meters
    #[arg(long, default_value = "150")]
    pub step: f64,

    /// Delay between simulated fixes in milliseconds
    #[arg(long, default_value = "0")]
    pub interval_ms: u64,

    /// Random seed
    #[arg(long, default_value = "0")]
    pub seed: u64,
}

/// Arguments for `list`
#[derive(Debug, Clone, Args)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Number of records to show (0 for all)
    #[arg(short = 'n', long, default_value = "0")]
    pub count: u32,

    /// Only records since this date/time (RFC3339 or YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,

    /// Only records until this date/time (RFC3339 or YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,

    /// Show the newest records first
    #[arg(long)]
    pub newest_first: bool,

    /// Omit header row in CSV output (useful for appending)
    #[arg(long)]
    pub no_header: bool,
}

/// Configuration subcommands
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn parse_start(s: &str) -> Result<(f64, f64), String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected `lat,lon`, got '{}'", s))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a valid latitude", lat.trim()))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a valid longitude", lon.trim()))?;
    Ok((lat, lon))
}
