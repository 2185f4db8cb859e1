//! Micro-hydro potential at gates and drops.
//!
//! Read-only post-processing of a solved state. Every gate and every ungated
//! channel whose water-level drop exceeds `head_threshold` is a candidate
//! site:
//!
//! ```text
//! P = ρ·g·Q·H·η_turbine·η_generator        E_year = P · hours_per_year · availability
//! ```

use canal_core::{ChannelId, GateId, Kilowatts, Network};
use serde::{Deserialize, Serialize};

use crate::gate_opt::GateSettingSolution;
use crate::hydraulics::GRAVITY;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyRecoveryConfig {
    /// Minimum head worth a turbine (m)
    pub head_threshold: f64,
    /// kg/m³
    pub water_density: f64,
    pub turbine_efficiency: f64,
    pub generator_efficiency: f64,
    /// Fraction of the year the site runs
    pub availability: f64,
    pub hours_per_year: f64,
}

impl Default for EnergyRecoveryConfig {
    fn default() -> Self {
        Self {
            head_threshold: 2.0,
            water_density: 1000.0,
            turbine_efficiency: 0.85,
            generator_efficiency: 0.92,
            availability: 0.9,
            hours_per_year: 8760.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SiteKind {
    Gate { gate: GateId },
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoverySite {
    pub kind: SiteKind,
    pub channel: ChannelId,
    pub head: f64,
    pub flow: f64,
    pub power: Kilowatts,
    pub annual_energy_mwh: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergyRecoveryReport {
    /// Sorted by power, largest first
    pub sites: Vec<RecoverySite>,
    pub total_power: Kilowatts,
    pub total_annual_mwh: f64,
}

/// Electrical output of a turbine passing `flow` under `head`.
pub fn hydro_power(flow: f64, head: f64, config: &EnergyRecoveryConfig) -> Kilowatts {
    if flow <= 0.0 || head <= 0.0 {
        return Kilowatts::ZERO;
    }
    let watts = config.water_density
        * GRAVITY
        * flow
        * head
        * config.turbine_efficiency
        * config.generator_efficiency;
    Kilowatts(watts / 1000.0)
}

fn site(kind: SiteKind, channel: ChannelId, head: f64, flow: f64, config: &EnergyRecoveryConfig) -> RecoverySite {
    let power = hydro_power(flow, head, config);
    RecoverySite {
        kind,
        channel,
        head,
        flow,
        power,
        annual_energy_mwh: power.energy_mwh(config.hours_per_year * config.availability),
    }
}

/// Scan a solved network for recoverable head.
pub fn analyze(
    network: &Network,
    solution: &GateSettingSolution,
    config: &EnergyRecoveryConfig,
) -> EnergyRecoveryReport {
    let mut sites = Vec::new();

    for setting in &solution.gates {
        if setting.head_loss > config.head_threshold && setting.flow > 0.0 {
            sites.push(site(
                SiteKind::Gate { gate: setting.gate },
                setting.channel,
                setting.head_loss,
                setting.flow,
                config,
            ));
        }
    }

    for state in &solution.channels {
        if state.flow <= 0.0 || network.gate_on_channel(state.channel).is_some() {
            continue;
        }
        let Some(channel) = network.channel(state.channel) else {
            continue;
        };
        let (Some(up), Some(down)) = (network.node(channel.upstream), network.node(channel.downstream)) else {
            continue;
        };
        let drop = (up.water_level - down.water_level).value();
        if drop > config.head_threshold {
            sites.push(site(SiteKind::Drop, state.channel, drop, state.flow, config));
        }
    }

    sites.sort_by(|a, b| b.power.value().total_cmp(&a.power.value()).then(a.channel.cmp(&b.channel)));
    let total_power = sites.iter().map(|s| s.power).sum();
    let total_annual_mwh = sites.iter().map(|s| s.annual_energy_mwh).sum();

    EnergyRecoveryReport {
        sites,
        total_power,
        total_annual_mwh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate_opt::{ChannelState, GateSetting};
    use crate::hydraulics::FlowRegime;
    use canal_core::{Channel, Gate, Node, NodeId, NodeRole};

    #[test]
    fn test_hydro_power_formula() {
        let config = EnergyRecoveryConfig::default();
        let p = hydro_power(2.0, 3.0, &config);
        // 1000·9.81·2·3·0.85·0.92 W
        assert!((p.value() - 46.02852).abs() < 1e-6);
        let annual = p.energy_mwh(8760.0 * 0.9);
        assert!((annual - 362.889).abs() < 1e-2);
        assert_eq!(hydro_power(0.0, 3.0, &config), Kilowatts::ZERO);
    }

    fn channel_state(id: usize, flow: f64) -> ChannelState {
        ChannelState {
            channel: ChannelId::new(id),
            flow,
            depth: 1.0,
            velocity: 0.5,
            froude: 0.2,
            friction_loss: 0.1,
            depth_converged: true,
        }
    }

    #[test]
    fn test_sites_from_gates_and_drops() {
        let mut network = Network::new();
        network.add_node(Node::new(NodeId::new(1), "S", NodeRole::Source, 230.0, 232.0));
        network.add_node(Node::new(NodeId::new(2), "J", NodeRole::Junction, 226.0, 227.5));
        network.add_node(Node::new(NodeId::new(3), "Z", NodeRole::Zone, 222.0, 223.0));
        for (id, up, down) in [(1, 1, 2), (2, 2, 3)] {
            network
                .add_channel(Channel::trapezoidal(
                    ChannelId::new(id),
                    NodeId::new(up),
                    NodeId::new(down),
                    1000.0,
                    2.0,
                    1.0,
                ))
                .unwrap();
        }
        network
            .add_gate(Gate::automated(GateId::new(1), ChannelId::new(1), 0.5, 1.0, 2.0))
            .unwrap();

        let solution = GateSettingSolution {
            gates: vec![GateSetting {
                gate: GateId::new(1),
                channel: ChannelId::new(1),
                controllable: true,
                opening: 0.5,
                previous_opening: 0.5,
                flow: 1.5,
                regime: FlowRegime::Free,
                head_loss: 4.5,
                upstream_level: 232.0,
                downstream_level: 227.5,
                velocity: 0.6,
                froude: 0.2,
            }],
            channels: vec![channel_state(1, 1.5), channel_state(2, 1.5)],
            ..GateSettingSolution::default()
        };

        let report = analyze(&network, &solution, &EnergyRecoveryConfig::default());
        assert_eq!(report.sites.len(), 2);
        assert_eq!(report.sites[0].kind, SiteKind::Gate { gate: GateId::new(1) });
        assert_eq!(report.sites[1].kind, SiteKind::Drop);
        assert!((report.sites[1].head - 4.5).abs() < 1e-9);
        let total: f64 = report.sites.iter().map(|s| s.power.value()).sum();
        assert!((report.total_power.value() - total).abs() < 1e-9);
    }

    #[test]
    fn test_small_heads_ignored() {
        let network = Network::new();
        let solution = GateSettingSolution {
            channels: vec![channel_state(1, 3.0)],
            ..GateSettingSolution::default()
        };
        let report = analyze(&network, &solution, &EnergyRecoveryConfig::default());
        assert!(report.sites.is_empty());
        assert_eq!(report.total_annual_mwh, 0.0);
    }
}
