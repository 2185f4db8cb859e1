pub mod cli;
pub mod common;
pub mod config;

pub use cli::{build_cli_command, Cli, Commands, ConfigCommands, GraphCommands};
pub use common::OutputFormat;
