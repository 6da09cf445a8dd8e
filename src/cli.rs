//! CLI argument parsing for replay-probe

use clap::{Parser, ValueEnum};

/// Output format for the status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "replay-probe")]
#[command(version)]
#[command(
    about = "Report which record/replay backend capabilities this process can reach",
    long_about = None
)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Look capabilities up in this already-loaded module
    #[arg(short = 'm', long = "module", value_name = "NAME", conflicts_with = "global")]
    pub module: Option<String>,

    /// Look capabilities up in the process-wide export table
    #[arg(long = "global")]
    pub global: bool,

    /// Query the feature gate for FEATURE
    #[arg(long = "feature", value_name = "FEATURE")]
    pub feature: Option<String>,

    /// Subfeature for --feature
    #[arg(long = "subfeature", value_name = "SUBFEATURE", requires = "feature")]
    pub subfeature: Option<String>,

    /// Enable debug tracing output (to stderr)
    #[arg(long = "debug")]
    pub debug: bool,
}
