use std::io::{self, Write};

use anyhow::Result;
use canal_algo::contingency::{find_routes, RouteDemand};
use canal_algo::{Blockage, OptimizerConfig};
use canal_cli::common::{load_network, print_json, OutputFormat};
use canal_core::{ChannelId, GateId, NodeId};
use tabwriter::TabWriter;
use tracing::{info, warn};

#[allow(clippy::too_many_arguments)]
pub fn handle(
    network_file: &str,
    zones: &[usize],
    flow: f64,
    target_elevation: f64,
    block_channels: &[usize],
    block_gates: &[usize],
    format: OutputFormat,
    config: &OptimizerConfig,
) -> Result<()> {
    let network = load_network(network_file)?;
    let blockages: Vec<Blockage> = block_channels
        .iter()
        .map(|&id| Blockage::channel(ChannelId::new(id)))
        .chain(block_gates.iter().map(|&id| Blockage::gate(GateId::new(id))))
        .collect();
    let demands: Vec<RouteDemand> = zones
        .iter()
        .map(|&id| RouteDemand {
            node: NodeId::new(id),
            flow,
            target_elevation,
        })
        .collect();

    let report = find_routes(
        &network,
        &blockages,
        &demands,
        &config.feasibility,
        &config.normal_depth,
        &config.contingency,
        None,
    )?;
    let stranded = report.stranded();
    if stranded.is_empty() {
        info!("all {} zone(s) reachable", demands.len());
    } else {
        for node in &stranded {
            warn!("{node} has no feasible route");
        }
    }

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => {
            let mut writer = TabWriter::new(io::stdout());
            writeln!(writer, "ZONE\tRANK\tSOURCE\tCHANNELS\tBOTTLENECK\tLENGTH\tMARGIN\tCARRIES")?;
            for destination in &report.destinations {
                if destination.candidates.is_empty() {
                    writeln!(writer, "{}\t-\tstranded\t\t\t\t\t", destination.destination)?;
                    continue;
                }
                for (rank, route) in destination.candidates.iter().enumerate() {
                    let channels: Vec<String> = route
                        .channels
                        .iter()
                        .map(|c| c.value().to_string())
                        .collect();
                    writeln!(
                        writer,
                        "{}\t{}\t{}\t{}\t{:.2}\t{:.0}\t{:.3}\t{}",
                        destination.destination,
                        rank + 1,
                        route.source,
                        channels.join(","),
                        route.bottleneck,
                        route.length,
                        route.feasibility.margin(),
                        if route.carries_demand { "yes" } else { "no" }
                    )?;
                }
            }
            writer.flush()?;
            Ok(())
        }
    }
}
