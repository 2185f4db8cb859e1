//! # Gate Optimizer: Penalty Method with L-BFGS
//!
//! The constrained problem described in the [module docs](super) is turned
//! into a sequence of unconstrained problems
//!
//! ```text
//! P_μ(a) = f(a) + μ · Σ_i max(0, violation_i(a))²
//! ```
//!
//! where equality residuals (junction balance) enter with their absolute
//! value. Each `P_μ` is minimised with L-BFGS (history 7, More-Thuente line
//! search), warm-started from the previous round; μ starts at 1000 and grows
//! ×10 per round until every violation is below tolerance.
//!
//! ## Gradient
//!
//! The sluice-gate discharge jumps where the tailwater crosses the opening
//! plane, so a plain forward difference can report a huge slope straddling
//! the jump. The gradient uses the minmod of forward and backward
//! differences instead:
//!
//! ```text
//! g_i = minmod( (P(a + εe_i) - P(a)) / ε ,  (P(a) - P(a - εe_i)) / ε )
//! ```
//!
//! which takes the smaller one-sided slope when both agree in sign and zero
//! otherwise.
//!
//! ## Deadline
//!
//! A caller-supplied deadline is checked before every round and handed to
//! argmin as a timeout for the inner solve. When it expires the best point
//! so far is projected onto the bounds and returned as
//! [`SolutionQuality::TimedOut`].

use std::collections::HashMap;

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use canal_core::{CanalResult, Network, NodeId, NodeRole};
use tracing::{debug, info, warn};
use web_time::Instant;

use super::problem::{Control, GateProblem};
use super::types::{ChannelState, GateSetting, GateSettingSolution, SolutionQuality, ZoneDelivery};
use super::GateOptimizerConfig;
use crate::hydraulics::FlowRegime;

/// Gradient-norm tolerance for the inner solver.
const GRADIENT_TOLERANCE: f64 = 1e-6;

struct PenaltyProblem<'p, 'a> {
    problem: &'p GateProblem<'a>,
    penalty: f64,
    step: f64,
}

impl CostFunction for PenaltyProblem<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let eval = self.problem.evaluate(x);
        let objective = self.problem.objective(x, &eval).total;
        Ok(objective + self.penalty * self.problem.penalty_sum(x, &eval))
    }
}

impl Gradient for PenaltyProblem<'_, '_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let f0 = self.cost(x)?;
        let mut grad = vec![0.0; x.len()];
        let mut probe = x.clone();
        for i in 0..x.len() {
            probe[i] = x[i] + self.step;
            let forward = (self.cost(&probe)? - f0) / self.step;
            probe[i] = x[i] - self.step;
            let backward = (f0 - self.cost(&probe)?) / self.step;
            probe[i] = x[i];
            grad[i] = minmod(forward, backward);
        }
        Ok(grad)
    }
}

fn minmod(a: f64, b: f64) -> f64 {
    if a * b <= 0.0 {
        0.0
    } else if a.abs() < b.abs() {
        a
    } else {
        b
    }
}

fn project_onto_bounds(x: &mut [f64], lb: &[f64], ub: &[f64]) {
    for i in 0..x.len() {
        x[i] = x[i].max(lb[i]).min(ub[i]);
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Optimize automated gate openings for the given zone targets (m³/s).
///
/// Zones without an entry have a target of zero. Structural problems with
/// the targets (unknown node, non-zone node, negative flow) are errors;
/// everything else, including an infeasible network, comes back as a
/// solution with the appropriate [`SolutionQuality`].
pub fn optimize_gates(
    network: &Network,
    targets: &HashMap<NodeId, f64>,
    config: &GateOptimizerConfig,
    deadline: Option<Instant>,
) -> CanalResult<GateSettingSolution> {
    let start = Instant::now();
    let problem = GateProblem::new(network, targets, config)?;
    let (lb, ub) = problem.variable_bounds();

    let mut x = problem.initial_point();
    let mut penalty = config.initial_penalty;
    let mut total_iterations = 0;
    let mut rounds = 0;
    let mut inner_converged = problem.variables.is_empty();
    let mut timed_out = false;

    let rounds_budget = config.penalty_rounds.max(1);
    let inner_max_iter = (config.max_iterations / rounds_budget).max(1) as u64;

    if !problem.variables.is_empty() {
        for round in 0..rounds_budget {
            if deadline_passed(deadline) {
                timed_out = true;
                break;
            }
            rounds += 1;

            let penalty_problem = PenaltyProblem {
                problem: &problem,
                penalty,
                step: config.gradient_step,
            };
            let solver = match LBFGS::new(MoreThuenteLineSearch::new(), config.memory)
                .with_tolerance_grad(GRADIENT_TOLERANCE)
            {
                Ok(solver) => solver,
                Err(err) => {
                    warn!("could not configure L-BFGS: {err}");
                    break;
                }
            };

            let mut executor = Executor::new(penalty_problem, solver).configure(|state| {
                state
                    .param(x.clone())
                    .max_iters(inner_max_iter)
                    .target_cost(0.0)
            });
            if let Some(d) = deadline {
                executor = executor.timeout(d.saturating_duration_since(Instant::now()));
            }

            match executor.run() {
                Ok(res) => {
                    let state = res.state();
                    total_iterations += state.get_iter() as usize;
                    if let Some(best) = state.get_best_param() {
                        x = best.clone();
                    }
                    inner_converged = matches!(
                        state.get_termination_reason(),
                        Some(TerminationReason::SolverConverged)
                            | Some(TerminationReason::TargetCostReached)
                    );
                    if matches!(state.get_termination_reason(), Some(TerminationReason::Timeout)) {
                        timed_out = true;
                    }
                }
                Err(err) => {
                    // Line-search failure: keep the current point and tighten μ
                    debug!(round, "inner solve failed: {err}");
                    inner_converged = false;
                }
            }

            let eval = problem.evaluate(&x);
            let max_violation = problem
                .violations(&x, &eval)
                .iter()
                .map(|v| v.amount)
                .fold(0.0, f64::max);
            debug!(
                round,
                penalty,
                max_violation,
                iterations = total_iterations,
                "penalty round finished"
            );

            if timed_out || max_violation < config.tolerance {
                break;
            }
            penalty *= config.penalty_growth;
        }
    }

    project_onto_bounds(&mut x, &lb, &ub);

    let eval = problem.evaluate(&x);
    let objective = problem.objective(&x, &eval);
    let violations: Vec<_> = problem
        .violations(&x, &eval)
        .into_iter()
        .filter(|v| v.amount > config.tolerance)
        .collect();

    let quality = if timed_out {
        SolutionQuality::TimedOut
    } else if !violations.is_empty() {
        SolutionQuality::Infeasible
    } else if inner_converged {
        SolutionQuality::Optimal
    } else {
        SolutionQuality::Feasible
    };

    let mut gates = Vec::new();
    let mut channels = Vec::with_capacity(problem.channels.len());
    for (model, state) in problem.channels.iter().zip(&eval.channels) {
        channels.push(ChannelState {
            channel: model.id,
            flow: state.flow,
            depth: state.depth,
            velocity: state.velocity,
            froude: state.froude,
            friction_loss: state.friction_loss,
            depth_converged: state.depth_converged,
        });
        if let Control::Gated(slot) = &model.control {
            let opening = problem.opening(slot, &x);
            let regime = if model.in_service {
                slot.discharge(opening).regime
            } else {
                FlowRegime::Closed
            };
            gates.push(GateSetting {
                gate: slot.gate,
                channel: model.id,
                controllable: slot.variable.is_some(),
                opening,
                previous_opening: slot.current_opening,
                flow: state.flow,
                regime,
                head_loss: model.upstream_level - model.downstream_level,
                upstream_level: model.upstream_level,
                downstream_level: model.downstream_level,
                velocity: state.velocity,
                froude: state.froude,
            });
        }
    }

    let deliveries = problem
        .nodes
        .iter()
        .filter(|(_, _, role, _)| *role == NodeRole::Zone)
        .map(|&(idx, node, _, target)| ZoneDelivery {
            node,
            target,
            delivered: eval.net_inflow[idx],
        })
        .collect();

    let solution = GateSettingSolution {
        quality,
        gates,
        channels,
        deliveries,
        objective,
        violations,
        iterations: total_iterations,
        penalty_rounds: rounds,
        converged: inner_converged,
        timed_out,
        solve_time_ms: start.elapsed().as_millis(),
    };

    match solution.quality {
        SolutionQuality::Optimal | SolutionQuality::Feasible => info!("gate optimization {}", solution.summary()),
        _ => warn!("gate optimization {}", solution.summary()),
    }
    Ok(solution)
}
