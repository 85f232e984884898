//! Command-line interface for callrelay
//!
//! Provides argument parsing using clap derive macros.

use crate::config::Config;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Phone-call media stream bridge
#[derive(Parser, Debug)]
#[command(
    name = "callrelay",
    version,
    about = "Phone-call media stream bridge: speech in, generated reply spoken back in order"
)]
pub struct Cli {
    /// Subcommand to execute (default: serve)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug for callrelay, -vv: trace everything)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Address to bind (overrides server.host)
    #[arg(long, global = true, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to listen on (overrides server.port)
    #[arg(long, short = 'p', global = true, value_name = "PORT")]
    pub port: Option<u16>,

    /// Synthesis requests in flight per call (overrides pipeline.max_concurrent_synthesis)
    #[arg(long, global = true, value_name = "N")]
    pub max_concurrent: Option<usize>,

    /// Upper bound for one synthesis request. Examples: 10s, 2500ms
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_duration_ms)]
    pub synthesis_timeout: Option<u64>,

    /// Wait before skipping missing segments. Examples: 500ms, 1s
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_duration_ms)]
    pub flush_grace: Option<u64>,
}

/// Parse a duration string into milliseconds.
///
/// Supports any duration format accepted by `humantime` (`250ms`, `10s`,
/// `1m30s`); a bare number is taken as milliseconds.
fn parse_duration_ms(s: &str) -> Result<u64, String> {
    let s = s.trim();
    // Bare number → milliseconds
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP / media stream server (default)
    Serve,

    /// Inspect configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

impl Cli {
    /// Applies command-line overrides on top of file and environment configuration.
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.pipeline.max_concurrent_synthesis = max_concurrent;
        }
        if let Some(ms) = self.synthesis_timeout {
            config.pipeline.synthesis_timeout_ms = ms;
        }
        if let Some(ms) = self.flush_grace {
            config.pipeline.flush_grace_ms = ms;
        }
        config
    }
}
