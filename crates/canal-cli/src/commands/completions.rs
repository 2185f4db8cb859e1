use anyhow::Result;
use canal_cli::cli::build_cli_command;
use clap_complete::{generate, Shell};
use std::fs;
use std::io;
use std::path::Path;

pub fn handle(shell: Shell, out: Option<&Path>) -> Result<()> {
    let mut cmd = build_cli_command();
    if let Some(path) = out {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        generate(shell, &mut cmd, "canal", &mut file);
        println!("Wrote {shell:?} completion to {}", path.display());
    } else {
        generate(shell, &mut cmd, "canal", &mut io::stdout());
    }
    Ok(())
}
