use anyhow::Result;
use canal_cli::cli::ConfigCommands;
use canal_cli::common::write_output;
use canal_cli::config::{load_config, load_config_file, render_config};
use std::path::Path;

pub fn handle(command: &ConfigCommands, explicit: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = load_config(explicit)?;
            write_output(None, &render_config(&config)?)
        }
        ConfigCommands::Check { path } => {
            load_config_file(path)?;
            println!("{} is valid", path.display());
            Ok(())
        }
    }
}
