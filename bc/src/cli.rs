//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// bc - fan stdin lines out to a set of subscribers
#[derive(Parser, Debug)]
#[command(name = "bc")]
#[command(author, version, about = "Fan-out broadcaster demo", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cast every stdin line to N subscribers and print what each receives
    Fanout {
        /// Number of subscribers
        #[arg(short = 'n', long, default_value = "2")]
        subscribers: usize,

        /// Per-delivery wait time in milliseconds (overrides config)
        #[arg(short, long)]
        wait_time_ms: Option<u64>,

        /// Delay each subscriber takes per message, to provoke dropped deliveries
        #[arg(long, default_value = "0")]
        consumer_delay_ms: u64,

        /// Output format for the summary
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Output format for the fanout summary
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
