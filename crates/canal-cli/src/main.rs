use anyhow::Result;
use canal_cli::cli::{build_cli_command, Cli, Commands};
use canal_cli::config::load_config;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

mod commands;

fn run(cli: &Cli) -> Result<()> {
    let config = || load_config(cli.config.as_deref());

    match &cli.command {
        Some(Commands::Optimize {
            request,
            out,
            timeout_ms,
            as_of,
            strict,
        }) => commands::optimize::handle(
            request,
            out.as_deref(),
            *timeout_ms,
            *as_of,
            *strict,
            &config()?,
        ),
        Some(Commands::NormalDepth {
            flow,
            bed_width,
            side_slope,
            slope,
            manning_n,
            format,
        }) => commands::hydraulics::normal_depth(
            *flow,
            *bed_width,
            *side_slope,
            *slope,
            *manning_n,
            *format,
            &config()?,
        ),
        Some(Commands::Feasibility {
            network,
            zone,
            flow,
            target_elevation,
            format,
        }) => commands::hydraulics::feasibility(
            network,
            *zone,
            *flow,
            *target_elevation,
            *format,
            &config()?,
        ),
        Some(Commands::Route {
            network,
            zones,
            flow,
            target_elevation,
            block_channels,
            block_gates,
            format,
        }) => commands::route::handle(
            network,
            zones,
            *flow,
            *target_elevation,
            block_channels,
            block_gates,
            *format,
            &config()?,
        ),
        Some(Commands::Graph { command }) => commands::graph::handle(command),
        Some(Commands::Config { command }) => commands::config::handle(command, cli.config.as_deref()),
        Some(Commands::Completions { shell, out }) => {
            commands::completions::handle(*shell, out.as_deref())
        }
        None => {
            build_cli_command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // stdout carries command output; logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("canal {}", env!("CARGO_PKG_VERSION"));

    if let Err(err) = run(&cli) {
        error!("{err:#}");
        std::process::exit(1);
    }
}
