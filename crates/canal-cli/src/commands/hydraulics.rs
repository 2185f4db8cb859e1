use anyhow::{anyhow, Result};
use canal_algo::feasibility::{self, gates_on_path, segments_for_path};
use canal_algo::hydraulics::{froude_number, TrapezoidalSection};
use canal_algo::workflows::delivery_path;
use canal_algo::OptimizerConfig;
use canal_cli::common::{load_network, print_json, OutputFormat};
use canal_core::NodeId;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Serialize)]
struct NormalDepthOutput {
    depth: f64,
    velocity: f64,
    area: f64,
    froude: f64,
    iterations: usize,
    converged: bool,
    residual: f64,
}

pub fn normal_depth(
    flow: f64,
    bed_width: f64,
    side_slope: f64,
    slope: f64,
    manning_n: f64,
    format: OutputFormat,
    config: &OptimizerConfig,
) -> Result<()> {
    let section = TrapezoidalSection::new(bed_width, side_slope);
    let sol = config.normal_depth.solve(&section, slope, manning_n, flow);
    if !sol.converged {
        warn!(
            "normal depth did not converge after {} iterations (residual {:.2e} m³/s)",
            sol.iterations, sol.residual
        );
    }
    let output = NormalDepthOutput {
        depth: sol.depth,
        velocity: sol.velocity,
        area: sol.area,
        froude: froude_number(sol.velocity, section.hydraulic_depth(sol.depth)),
        iterations: sol.iterations,
        converged: sol.converged,
        residual: sol.residual,
    };

    match format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Table => {
            println!("Normal depth for Q = {flow} m³/s:");
            println!("  Depth         : {:.3} m", output.depth);
            println!("  Velocity      : {:.3} m/s", output.velocity);
            println!("  Area          : {:.3} m²", output.area);
            println!("  Froude        : {:.3}", output.froude);
            println!(
                "  Iterations    : {} ({})",
                output.iterations,
                if output.converged { "converged" } else { "not converged" }
            );
            Ok(())
        }
    }
}

pub fn feasibility(
    network_file: &str,
    zone: usize,
    flow: f64,
    target_elevation: f64,
    format: OutputFormat,
    config: &OptimizerConfig,
) -> Result<()> {
    let network = load_network(network_file)?;
    let zone = NodeId::new(zone);
    network
        .node(zone)
        .ok_or_else(|| anyhow!("{zone} is not in {network_file}"))?;
    let path = delivery_path(&network, zone)
        .ok_or_else(|| anyhow!("no in-service path from a source reaches {zone}"))?;

    let segments = segments_for_path(&network, &path.channels, flow, &config.normal_depth)?;
    let source_level = network
        .node(path.source)
        .map(|n| n.water_level.value())
        .ok_or_else(|| anyhow!("path source {} missing", path.source))?;
    let report = feasibility::analyze(
        &segments,
        gates_on_path(&network, &path.channels),
        source_level,
        target_elevation,
        &config.feasibility,
    );
    info!(
        "{} via {} channel(s): margin {:.3} m",
        zone,
        path.channels.len(),
        report.margin()
    );

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "path": path,
            "report": report,
        })),
        OutputFormat::Table => {
            let route: Vec<String> = path.nodes.iter().map(|n| n.to_string()).collect();
            println!("Path          : {}", route.join(" -> "));
            println!("Available head: {:.3} m", report.available_head);
            println!("Friction loss : {:.3} m", report.friction_loss);
            println!("Minor loss    : {:.3} m", report.minor_loss);
            println!("Gate loss     : {:.3} m", report.gate_loss);
            println!("Required head : {:.3} m", report.required_head);
            let verdict = if !report.feasible {
                format!("INFEASIBLE (shortfall {:.3} m)", report.shortfall)
            } else if !report.meets_safety_factor {
                "FEASIBLE (inside safety margin)".to_string()
            } else {
                "FEASIBLE".to_string()
            };
            println!("Verdict       : {verdict}");
            Ok(())
        }
    }
}
