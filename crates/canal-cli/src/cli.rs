use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::common::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "canal", author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    /// Optimizer configuration (TOML); defaults to the user config file if present
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a full optimization cycle on a JSON request
    Optimize {
        /// Request file (JSON); `-` reads stdin
        #[arg(value_hint = ValueHint::FilePath)]
        request: String,
        /// Write the result here instead of stdout
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        out: Option<PathBuf>,
        /// Wall-clock budget in milliseconds (overrides the request)
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Reference time for deadlines (RFC 3339; overrides the request)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
        /// Exit with an error unless the gate settings are actionable
        #[arg(long)]
        strict: bool,
    },
    /// Normal depth of a trapezoidal channel
    NormalDepth {
        /// Discharge (m³/s)
        #[arg(long)]
        flow: f64,
        /// Bed width (m)
        #[arg(long)]
        bed_width: f64,
        /// Side slope z (horizontal per vertical)
        #[arg(long, default_value_t = 0.0)]
        side_slope: f64,
        /// Bed slope (m/m)
        #[arg(long)]
        slope: f64,
        /// Manning roughness
        #[arg(long, default_value_t = 0.025)]
        manning_n: f64,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Check whether gravity can deliver to a zone
    Feasibility {
        /// Network file (JSON snapshot or full request)
        #[arg(value_hint = ValueHint::FilePath)]
        network: String,
        /// Zone node id
        #[arg(long)]
        zone: usize,
        /// Design flow (m³/s)
        #[arg(long)]
        flow: f64,
        /// Water surface required at the outlet (m MSL)
        #[arg(long)]
        target_elevation: f64,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Alternative routes around blocked channels and gates
    Route {
        /// Network file (JSON snapshot or full request)
        #[arg(value_hint = ValueHint::FilePath)]
        network: String,
        /// Zone node id to reach (repeatable)
        #[arg(long = "zone", required = true)]
        zones: Vec<usize>,
        /// Flow each zone needs (m³/s)
        #[arg(long, default_value_t = 0.0)]
        flow: f64,
        /// Water surface required at each zone (m MSL)
        #[arg(long)]
        target_elevation: f64,
        /// Blocked channel id (repeatable)
        #[arg(long = "block-channel")]
        block_channels: Vec<usize>,
        /// Blocked gate id (repeatable)
        #[arg(long = "block-gate")]
        block_gates: Vec<usize>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Graph utilities
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },
    /// Show or check optimizer configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
        /// Write output to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum GraphCommands {
    /// Graph stats summary
    Stats {
        /// Network file (JSON snapshot or full request)
        network: String,
    },
    /// Find islands in the network
    Islands {
        /// Network file (JSON snapshot or full request)
        network: String,
        /// Emit node to island assignments
        #[arg(long)]
        emit: bool,
    },
    /// Export graph to various formats
    Export {
        /// Network file (JSON snapshot or full request)
        network: String,
        /// Output format (graphviz/dot)
        #[arg(long, default_value = "graphviz")]
        format: String,
        /// Write output to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Validate a configuration file
    Check {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
    },
}

pub fn build_cli_command() -> clap::Command {
    Cli::command()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_route_with_repeated_flags() {
        let cli = Cli::try_parse_from([
            "canal",
            "route",
            "net.json",
            "--zone",
            "3",
            "--zone",
            "4",
            "--target-elevation",
            "218.0",
            "--block-channel",
            "2",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Route {
                zones,
                block_channels,
                block_gates,
                ..
            }) => {
                assert_eq!(zones, vec![3, 4]);
                assert_eq!(block_channels, vec![2]);
                assert!(block_gates.is_empty());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "canal",
            "config",
            "show",
            "--log-level",
            "debug",
            "--config",
            "canal.toml",
        ])
        .unwrap();
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
        assert_eq!(cli.config, Some(PathBuf::from("canal.toml")));
    }
}
