//! # Normal-Depth Solver
//!
//! Finds the uniform-flow depth `y_n` at which a channel carries a target
//! discharge, i.e. the root of
//!
//! ```text
//! F(y) = Q_manning(y) - Q_target = 0
//! ```
//!
//! by Newton-Raphson with the analytic derivative from
//! [`manning_flow_derivative`]:
//!
//! ```text
//! y_{k+1} = y_k - F(y_k) / F'(y_k)
//! ```
//!
//! ## Initial Guess
//!
//! The wide-channel approximation (R ≈ y, A ≈ b·y) gives
//! `y_0 = (n·Q / (b·√S))^(3/5)`, which is close for canals with b ≫ y. For a
//! triangular section the same idea with A = z·y² and R ≈ y/2 is used.
//!
//! ## Safeguards
//!
//! - A Newton step that would make the depth non-positive is replaced by
//!   halving the current depth.
//! - Depth never drops below `depth_floor`, keeping the wetted perimeter away
//!   from zero.
//! - The best iterate (smallest residual) is returned when the iteration cap
//!   is hit, with `converged = false`.

use canal_core::Channel;
use serde::{Deserialize, Serialize};

use crate::hydraulics::{manning_flow_derivative, manning_flow_in, TrapezoidalSection};

/// Result of one normal-depth solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalDepthSolution {
    pub depth: f64,
    /// Manning discharge at `depth`
    pub flow: f64,
    pub area: f64,
    /// Mean velocity Q / A
    pub velocity: f64,
    pub iterations: usize,
    pub converged: bool,
    /// |Q(depth) - Q_target|
    pub residual: f64,
}

impl NormalDepthSolution {
    fn dry(converged: bool, target: f64) -> Self {
        Self {
            depth: 0.0,
            flow: 0.0,
            area: 0.0,
            velocity: 0.0,
            iterations: 0,
            converged,
            residual: target.abs(),
        }
    }
}

/// Newton-Raphson normal-depth solver.
///
/// # Example
///
/// ```
/// use canal_algo::hydraulics::TrapezoidalSection;
/// use canal_algo::normal_depth::NormalDepthSolver;
///
/// let solver = NormalDepthSolver::new().with_tolerance(1e-6);
/// let sol = solver.solve(&TrapezoidalSection::new(6.0, 1.5), 0.00018, 0.025, 20.0);
/// assert!(sol.converged);
/// assert!((sol.depth - 2.636).abs() < 0.005);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalDepthSolver {
    /// Convergence tolerance on |Q_calc - Q| (m³/s)
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Smallest depth ever evaluated (m)
    pub depth_floor: f64,
}

impl Default for NormalDepthSolver {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            max_iterations: 100,
            depth_floor: 1e-6,
        }
    }
}

impl NormalDepthSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    /// Normal depth of a network channel (condition factor not applied).
    pub fn solve_channel(&self, channel: &Channel, flow: f64) -> NormalDepthSolution {
        self.solve(
            &TrapezoidalSection::of(channel),
            channel.bed_slope,
            channel.manning_n,
            flow,
        )
    }

    pub fn solve(
        &self,
        section: &TrapezoidalSection,
        slope: f64,
        n: f64,
        flow: f64,
    ) -> NormalDepthSolution {
        if flow == 0.0 {
            return NormalDepthSolution::dry(true, 0.0);
        }
        if !(flow > 0.0) || !(slope > 0.0) || !(n > 0.0) || !section.is_valid() {
            return NormalDepthSolution::dry(false, flow);
        }

        let mut depth = self.initial_guess(section, slope, n, flow);
        let mut best = (depth, f64::INFINITY);
        let mut iterations = 0;

        while iterations < self.max_iterations {
            let q = manning_flow_in(section, depth, slope, n);
            let residual = q - flow;
            if residual.abs() < best.1 {
                best = (depth, residual.abs());
            }
            if residual.abs() < self.tolerance {
                return self.solution(section, slope, n, flow, depth, iterations, true);
            }
            iterations += 1;

            let derivative = manning_flow_derivative(section, depth, slope, n);
            let next = if derivative > 0.0 && derivative.is_finite() {
                depth - residual / derivative
            } else {
                depth * 2.0
            };
            depth = if next <= 0.0 { depth * 0.5 } else { next };
            depth = depth.max(self.depth_floor);
        }

        // Iteration cap reached: one last check on the final iterate
        let q = manning_flow_in(section, depth, slope, n);
        if (q - flow).abs() < best.1 {
            best = (depth, (q - flow).abs());
        }
        let converged = best.1 < self.tolerance;
        self.solution(section, slope, n, flow, best.0, iterations, converged)
    }

    fn initial_guess(&self, section: &TrapezoidalSection, slope: f64, n: f64, flow: f64) -> f64 {
        let k = n * flow / slope.sqrt();
        let guess = if section.bed_width > 0.0 {
            (k / section.bed_width).powf(0.6)
        } else {
            // A = z·y², R ≈ y/2  =>  Q ≈ z·y^(8/3)·2^(-2/3)·√S/n
            (k * 2f64.powf(2.0 / 3.0) / section.side_slope).powf(3.0 / 8.0)
        };
        if guess.is_finite() {
            guess.max(self.depth_floor)
        } else {
            1.0
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn solution(
        &self,
        section: &TrapezoidalSection,
        slope: f64,
        n: f64,
        target: f64,
        depth: f64,
        iterations: usize,
        converged: bool,
    ) -> NormalDepthSolution {
        let flow = manning_flow_in(section, depth, slope, n);
        let area = section.area(depth);
        NormalDepthSolution {
            depth,
            flow,
            area,
            velocity: if area > 0.0 { flow / area } else { 0.0 },
            iterations,
            converged,
            residual: (flow - target).abs(),
        }
    }
}
