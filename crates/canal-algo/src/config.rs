//! Optimizer configuration.
//!
//! One struct per component, gathered in [`OptimizerConfig`] and passed
//! explicitly into every entry point. Every field has a default, so a TOML
//! file only needs the values it changes:
//!
//! ```toml
//! [gate.weights]
//! flow_deviation = 2.0
//!
//! [contingency]
//! max_hops = 6
//! ```

use canal_core::{CanalError, CanalResult};
use serde::{Deserialize, Serialize};

use crate::contingency::ContingencyConfig;
use crate::energy_recovery::EnergyRecoveryConfig;
use crate::feasibility::FeasibilityConfig;
use crate::gate_opt::GateOptimizerConfig;
use crate::normal_depth::NormalDepthSolver;
use crate::sequencer::SequencerConfig;
use crate::travel_time::TravelTimeConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub feasibility: FeasibilityConfig,
    #[serde(default)]
    pub normal_depth: NormalDepthSolver,
    #[serde(default)]
    pub gate: GateOptimizerConfig,
    #[serde(default)]
    pub travel_time: TravelTimeConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub energy: EnergyRecoveryConfig,
    #[serde(default)]
    pub contingency: ContingencyConfig,
    /// Also solve each request alone to give the sequencer per-request
    /// gate openings
    #[serde(default = "default_solo_runs")]
    pub solo_runs: bool,
}

fn default_solo_runs() -> bool {
    true
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            feasibility: FeasibilityConfig::default(),
            normal_depth: NormalDepthSolver::default(),
            gate: GateOptimizerConfig::default(),
            travel_time: TravelTimeConfig::default(),
            sequencer: SequencerConfig::default(),
            energy: EnergyRecoveryConfig::default(),
            contingency: ContingencyConfig::default(),
            solo_runs: default_solo_runs(),
        }
    }
}

impl OptimizerConfig {
    /// Reject settings no solver can work with.
    pub fn validate(&self) -> CanalResult<()> {
        let gate = &self.gate;
        let problem = if !(gate.min_velocity >= 0.0 && gate.max_velocity > gate.min_velocity) {
            Some(format!(
                "velocity limits [{}, {}] are not an increasing range",
                gate.min_velocity, gate.max_velocity
            ))
        } else if gate.penalty_growth <= 1.0 || gate.initial_penalty <= 0.0 {
            Some("penalty must start positive and grow each round".to_string())
        } else if gate.memory == 0 {
            Some("L-BFGS memory must be at least 1".to_string())
        } else if self.normal_depth.tolerance <= 0.0 || self.normal_depth.max_iterations == 0 {
            Some("normal-depth tolerance and iteration cap must be positive".to_string())
        } else if self.feasibility.safety_factor < 1.0 {
            Some("safety factor must be at least 1".to_string())
        } else if !(self.energy.availability > 0.0 && self.energy.availability <= 1.0) {
            Some("energy availability must lie in (0, 1]".to_string())
        } else if self.contingency.max_hops == 0 {
            Some("contingency max_hops must be at least 1".to_string())
        } else {
            None
        };
        match problem {
            Some(message) => Err(CanalError::Config(message)),
            None => Ok(()),
        }
    }
}
