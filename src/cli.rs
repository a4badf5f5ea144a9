//! CLI arguments and subcommands for herakles-proc-sampler.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Output format for sampled process data
#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-proc-sampler",
    about = "Cached per-process CPU, memory, disk and network rate sampler",
    long_about = "Cached per-process CPU, memory, disk and network rate sampler.\n\n\
                  Answers per-PID queries from a background-refreshed cache so that \
                  dashboards can poll as often as they like without re-reading /proc \
                  on every request.",
    author = "Michael Moll <proc-mem@herakles.io> - Herakles IO",
    version = "0.1.0",
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides config file)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Maximum snapshot age in milliseconds before a refresh is scheduled
    #[arg(long)]
    pub staleness_ms: Option<u64>,

    /// Number of background refresh workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Drop cache entries not refreshed for this many milliseconds
    #[arg(long)]
    pub entry_ttl_ms: Option<u64>,

    /// Maximum number of cached processes
    #[arg(long)]
    pub max_entries: Option<usize>,

    /// Skip the privilege check
    #[arg(long)]
    pub no_privileges: bool,

    /// Alternative procfs mount point
    #[arg(long)]
    pub proc_root: Option<PathBuf>,

    /// TLS certificate (PEM) for the HTTP server
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM) for the HTTP server
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve sampled data over HTTP (default when no subcommand is given)
    Serve,

    /// Poll processes and print their snapshots
    Watch {
        /// Process IDs to sample
        #[arg(required = true)]
        pids: Vec<u32>,

        /// Delay between polls in milliseconds
        #[arg(short = 'i', long, default_value_t = 1000)]
        interval_ms: u64,

        /// Stop after N polls (runs until Ctrl+C when omitted)
        #[arg(short = 'n', long)]
        iterations: Option<usize>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Validate procfs access and privileges
    Check {
        /// Process to test counter access against (defaults to this process)
        #[arg(long)]
        pid: Option<u32>,
    },

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },
}
