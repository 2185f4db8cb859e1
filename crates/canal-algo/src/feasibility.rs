//! Gravity-delivery feasibility.
//!
//! Without pumps, water only reaches a zone if the source sits high enough
//! above it to pay for every loss on the way:
//!
//! ```text
//! available = z_source - z_target
//! required  = Σ L·S_f  +  minor·Σ L·S_f  +  gate_loss·n_gates  +  min_depth
//! ```
//!
//! A shortfall is reported, never raised: the analyzer answers a question,
//! it does not reject the request.

use canal_core::{CanalError, CanalResult, ChannelId, Network};
use serde::{Deserialize, Serialize};

use crate::hydraulics::{friction_slope, TrapezoidalSection};
use crate::normal_depth::NormalDepthSolver;

/// Loss allowances used by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeasibilityConfig {
    /// Minimum depth that must remain at the delivery point (m)
    pub min_depth: f64,
    /// Margin factor applied on top of the required head
    pub safety_factor: f64,
    /// Minor losses (bends, transitions) as a fraction of friction loss
    pub minor_loss_fraction: f64,
    /// Head lost through each gate on the path (m)
    pub gate_loss: f64,
}

impl Default for FeasibilityConfig {
    fn default() -> Self {
        Self {
            min_depth: 0.3,
            safety_factor: 1.2,
            minor_loss_fraction: 0.1,
            gate_loss: 0.1,
        }
    }
}

/// One channel of a candidate delivery path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    pub channel: ChannelId,
    pub length: f64,
    pub friction_slope: f64,
}

impl PathSegment {
    pub fn friction_loss(&self) -> f64 {
        self.length * self.friction_slope
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeasibilityReport {
    pub feasible: bool,
    /// Whether the available head also covers `required × safety_factor`
    pub meets_safety_factor: bool,
    pub available_head: f64,
    pub required_head: f64,
    pub friction_loss: f64,
    pub minor_loss: f64,
    pub gate_loss: f64,
    /// required - available; negative values are spare head
    pub shortfall: f64,
}

impl FeasibilityReport {
    /// Spare head (available - required)
    pub fn margin(&self) -> f64 {
        -self.shortfall
    }
}

/// Evaluate whether a path can deliver by gravity.
pub fn analyze(
    segments: &[PathSegment],
    gate_count: usize,
    source_elevation: f64,
    target_elevation: f64,
    config: &FeasibilityConfig,
) -> FeasibilityReport {
    let available_head = source_elevation - target_elevation;
    let friction_loss: f64 = segments.iter().map(PathSegment::friction_loss).sum();
    let minor_loss = config.minor_loss_fraction * friction_loss;
    let gate_loss = config.gate_loss * gate_count as f64;
    let required_head = friction_loss + minor_loss + gate_loss + config.min_depth;

    FeasibilityReport {
        feasible: available_head >= required_head,
        meets_safety_factor: available_head >= required_head * config.safety_factor,
        available_head,
        required_head,
        friction_loss,
        minor_loss,
        gate_loss,
        shortfall: required_head - available_head,
    }
}

/// Build path segments for a chain of channels carrying `design_flow`.
///
/// The friction slope is taken at the current stage depth (the upstream
/// node's depth); dry channels fall back to the normal depth for the flow.
pub fn segments_for_path(
    network: &Network,
    channels: &[ChannelId],
    design_flow: f64,
    solver: &NormalDepthSolver,
) -> CanalResult<Vec<PathSegment>> {
    channels
        .iter()
        .map(|&id| {
            let channel = network
                .channel(id)
                .ok_or_else(|| CanalError::Network(format!("unknown {id} on path")))?;
            let stage = network
                .node(channel.upstream)
                .map(|n| n.depth().value())
                .unwrap_or(0.0);
            let depth = if stage > solver.depth_floor {
                stage
            } else {
                solver.solve_channel(channel, design_flow).depth
            };
            let section = TrapezoidalSection::of(channel);
            Ok(PathSegment {
                channel: id,
                length: channel.length.value(),
                friction_slope: friction_slope(design_flow, depth, &section, channel.manning_n),
            })
        })
        .collect()
}

/// Number of gates hosted on a chain of channels.
pub fn gates_on_path(network: &Network, channels: &[ChannelId]) -> usize {
    channels
        .iter()
        .filter(|&&id| network.gate_on_channel(id).is_some())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use canal_core::{Channel, Node, NodeId, NodeRole};

    #[test]
    fn test_reference_path_is_feasible() {
        let segments = [PathSegment {
            channel: ChannelId::new(1),
            length: 2000.0,
            friction_slope: 0.0002,
        }];
        let report = analyze(&segments, 3, 221.0, 217.5, &FeasibilityConfig::default());

        assert!((report.available_head - 3.5).abs() < 1e-12);
        assert!((report.friction_loss - 0.4).abs() < 1e-12);
        assert!((report.minor_loss - 0.04).abs() < 1e-12);
        assert!((report.gate_loss - 0.3).abs() < 1e-12);
        assert!((report.required_head - 1.04).abs() < 1e-9);
        assert!(report.feasible);
        assert!(report.meets_safety_factor);
        assert!((report.margin() - 2.46).abs() < 1e-9);
    }

    #[test]
    fn test_shortfall_is_reported_not_raised() {
        let segments = [PathSegment {
            channel: ChannelId::new(1),
            length: 5000.0,
            friction_slope: 0.0004,
        }];
        let report = analyze(&segments, 2, 220.0, 217.5, &FeasibilityConfig::default());
        // required = 2.0 + 0.2 + 0.2 + 0.3 = 2.7 > 2.5
        assert!(!report.feasible);
        assert!((report.shortfall - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_feasible_without_safety_margin() {
        let report = analyze(&[], 0, 100.5, 100.0, &FeasibilityConfig::default());
        // required 0.3 m, with margin 0.36 m
        assert!(report.feasible);
        assert!(report.meets_safety_factor);

        let tight = analyze(&[], 0, 100.32, 100.0, &FeasibilityConfig::default());
        assert!(tight.feasible);
        assert!(!tight.meets_safety_factor);
    }

    #[test]
    fn test_segments_use_stage_depth() {
        let mut network = Network::new();
        network.add_node(Node::new(NodeId::new(1), "S", NodeRole::Source, 218.0, 221.0));
        network.add_node(Node::new(NodeId::new(2), "Z", NodeRole::Zone, 217.0, 217.0));
        network
            .add_channel(Channel::trapezoidal(
                ChannelId::new(1),
                NodeId::new(1),
                NodeId::new(2),
                2000.0,
                4.0,
                1.5,
            ))
            .unwrap();

        let solver = NormalDepthSolver::new();
        let segments = segments_for_path(&network, &[ChannelId::new(1)], 5.0, &solver).unwrap();
        let section = TrapezoidalSection::new(4.0, 1.5);
        let expected = friction_slope(5.0, 3.0, &section, 0.025);
        assert!((segments[0].friction_slope - expected).abs() < 1e-15);
        assert_eq!(gates_on_path(&network, &[ChannelId::new(1)]), 0);

        assert!(segments_for_path(&network, &[ChannelId::new(7)], 5.0, &solver).is_err());
    }
}
