use anyhow::Result;
use canal_cli::cli::GraphCommands;
use canal_cli::common::{load_network, write_output};
use canal_core::graph_utils;
use tracing::info;

pub fn handle(command: &GraphCommands) -> Result<()> {
    match command {
        GraphCommands::Stats { network } => {
            let net = load_network(network)?;
            let stats = graph_utils::graph_stats(&net)?;
            println!("Graph statistics for {network}:");
            println!("  Nodes         : {}", stats.node_count);
            println!("  Channels      : {}", stats.edge_count);
            println!("  Components    : {}", stats.connected_components);
            println!(
                "  Degree [in/out max, avg]: {}/{}, {:.2}",
                stats.max_in_degree, stats.max_out_degree, stats.avg_degree
            );
            println!("  Merge points  : {}", stats.merge_points);
            println!("  {}", net.stats());
            Ok(())
        }
        GraphCommands::Islands { network, emit } => {
            let net = load_network(network)?;
            let analysis = graph_utils::find_islands(&net)?;
            for summary in &analysis.islands {
                println!(
                    "Island {}: {} node(s){}",
                    summary.island_id,
                    summary.node_count,
                    if summary.has_source { "" } else { " (no source)" }
                );
            }
            let unreachable = graph_utils::unreachable_zones(&net);
            if !unreachable.is_empty() {
                let names: Vec<String> = unreachable.iter().map(|n| n.to_string()).collect();
                println!("Unreachable zones: {}", names.join(", "));
            }
            if *emit {
                println!("\nNode → Island assignments:");
                for assignment in &analysis.assignments {
                    println!(
                        "  {:>8}: {:<20} -> island {}",
                        assignment.node_id.to_string(),
                        assignment.label,
                        assignment.island_id
                    );
                }
            }
            Ok(())
        }
        GraphCommands::Export {
            network,
            format,
            out,
        } => {
            let net = load_network(network)?;
            let dot = graph_utils::export_graph(&net, format)?;
            write_output(out.as_deref(), &dot)?;
            if let Some(path) = out {
                info!("Graph exported to {}", path.display());
            }
            Ok(())
        }
    }
}
