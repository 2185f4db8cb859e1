//! Sluice-gate discharge and its inverse.
//!
//! Heads are measured above the gate sill. The free-flow discharge is
//!
//! ```text
//! Q_free = Cd · w · a · √(2·g·h_up)
//! ```
//!
//! and when the tailwater reaches the opening plane the gate is drowned:
//!
//! ```text
//! Q_sub = Q_free · √(1 - s),   s = h_down / h_up  clamped to [0, 1)
//! ```
//!
//! Both values are always computed and the regime is picked from the measured
//! tailwater, so neither formula is evaluated outside the range it describes.
//! The discharge is monotone non-decreasing in the opening but jumps at the
//! regime boundary, which is why the inverse uses bisection rather than
//! Newton.

use serde::{Deserialize, Serialize};

use super::GRAVITY;

/// Largest submergence ratio used in the drowned formula.
const MAX_SUBMERGENCE: f64 = 1.0 - 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowRegime {
    /// Tailwater below the opening plane
    Free,
    /// Tailwater at or above the opening plane
    Submerged,
    /// Zero opening or no water upstream of the sill
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GateFlow {
    pub flow: f64,
    pub regime: FlowRegime,
    /// h_down / h_up, clamped to [0, 1)
    pub submergence: f64,
}

impl GateFlow {
    fn closed() -> Self {
        Self {
            flow: 0.0,
            regime: FlowRegime::Closed,
            submergence: 0.0,
        }
    }
}

/// Discharge through a gate for a given opening and sill-referenced heads.
///
/// Degenerate cases return zero flow: closed gate, dry upstream, or a
/// tailwater at or above the headwater (no driving head).
pub fn gate_discharge(
    opening: f64,
    width: f64,
    discharge_coefficient: f64,
    upstream_head: f64,
    downstream_head: f64,
) -> GateFlow {
    if opening <= 0.0 || upstream_head <= 0.0 || width <= 0.0 || discharge_coefficient <= 0.0 {
        return GateFlow::closed();
    }
    let downstream_head = downstream_head.max(0.0);
    // A leaf raised clear of the water no longer controls the section
    let effective_opening = opening.min(upstream_head);

    if downstream_head >= upstream_head {
        return GateFlow {
            flow: 0.0,
            regime: FlowRegime::Submerged,
            submergence: MAX_SUBMERGENCE,
        };
    }

    let submergence = (downstream_head / upstream_head).clamp(0.0, MAX_SUBMERGENCE);
    let free = discharge_coefficient
        * width
        * effective_opening
        * (2.0 * GRAVITY * upstream_head).sqrt();
    let submerged = free * (1.0 - submergence).sqrt();

    if downstream_head >= effective_opening {
        GateFlow {
            flow: submerged,
            regime: FlowRegime::Submerged,
            submergence,
        }
    } else {
        GateFlow {
            flow: free,
            regime: FlowRegime::Free,
            submergence,
        }
    }
}

/// Result of inverting the discharge relation for one gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpeningSolution {
    pub opening: f64,
    /// Discharge actually passed at `opening`
    pub flow: f64,
    pub regime: FlowRegime,
    pub iterations: usize,
    /// False when the target lies above the gate's capacity or inside the
    /// jump at the regime boundary
    pub converged: bool,
}

/// Opening that passes `target_flow`, found by bisection on
/// `[0, max_opening]`.
///
/// A target above what the fully open gate passes returns `max_opening` with
/// `converged = false`. A target that falls in the regime jump returns the
/// bracket end closest to the target.
#[allow(clippy::too_many_arguments)]
pub fn gate_opening_for_flow(
    target_flow: f64,
    width: f64,
    discharge_coefficient: f64,
    upstream_head: f64,
    downstream_head: f64,
    max_opening: f64,
    tolerance: f64,
    max_iterations: usize,
) -> OpeningSolution {
    let eval = |a: f64| gate_discharge(a, width, discharge_coefficient, upstream_head, downstream_head);

    if target_flow <= 0.0 || max_opening <= 0.0 {
        return OpeningSolution {
            opening: 0.0,
            flow: 0.0,
            regime: FlowRegime::Closed,
            iterations: 0,
            converged: target_flow <= 0.0,
        };
    }

    let full = eval(max_opening);
    if full.flow < target_flow - tolerance {
        return OpeningSolution {
            opening: max_opening,
            flow: full.flow,
            regime: full.regime,
            iterations: 0,
            converged: false,
        };
    }

    let mut lo = 0.0;
    let mut hi = max_opening;
    let mut iterations = 0;
    while iterations < max_iterations {
        iterations += 1;
        let mid = 0.5 * (lo + hi);
        let at_mid = eval(mid);
        if (at_mid.flow - target_flow).abs() < tolerance {
            return OpeningSolution {
                opening: mid,
                flow: at_mid.flow,
                regime: at_mid.regime,
                iterations,
                converged: true,
            };
        }
        if at_mid.flow < target_flow {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }

    let (low, high) = (eval(lo), eval(hi));
    let (opening, best) = if (low.flow - target_flow).abs() <= (high.flow - target_flow).abs() {
        (lo, low)
    } else {
        (hi, high)
    };
    OpeningSolution {
        opening,
        flow: best.flow,
        regime: best.regime,
        iterations,
        converged: (best.flow - target_flow).abs() < tolerance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_flow_formula() {
        let result = gate_discharge(0.5, 2.0, 0.6, 2.0, 0.1);
        let expected = 0.6 * 2.0 * 0.5 * (2.0 * GRAVITY * 2.0_f64).sqrt();
        assert_eq!(result.regime, FlowRegime::Free);
        assert!((result.flow - expected).abs() < 1e-12);
    }

    #[test]
    fn test_submerged_flow_formula() {
        let result = gate_discharge(0.5, 2.0, 0.6, 2.0, 1.0);
        let free = 0.6 * 2.0 * 0.5 * (2.0 * GRAVITY * 2.0_f64).sqrt();
        assert_eq!(result.regime, FlowRegime::Submerged);
        assert!((result.submergence - 0.5).abs() < 1e-12);
        assert!((result.flow - free * 0.5_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_zero_cases() {
        assert_eq!(gate_discharge(0.0, 2.0, 0.6, 2.0, 0.0).flow, 0.0);
        assert_eq!(gate_discharge(0.5, 2.0, 0.6, 0.0, 0.0).regime, FlowRegime::Closed);
        assert_eq!(gate_discharge(0.5, 2.0, 0.6, 1.0, 1.2).flow, 0.0);
    }

    #[test]
    fn test_monotone_in_opening() {
        let mut last = 0.0;
        for i in 1..=100 {
            let a = i as f64 * 0.01;
            let q = gate_discharge(a, 1.5, 0.6, 2.4, 0.4).flow;
            assert!(q >= last);
            last = q;
        }
    }

    #[test]
    fn test_inverse_recovers_opening() {
        let q = gate_discharge(0.3, 1.5, 0.6, 2.4, 0.4).flow;
        let sol = gate_opening_for_flow(q, 1.5, 0.6, 2.4, 0.4, 1.0, 1e-6, 100);
        assert!(sol.converged);
        assert!((sol.opening - 0.3).abs() < 1e-5);
        assert_eq!(sol.regime, FlowRegime::Submerged);
    }

    #[test]
    fn test_inverse_saturates_at_max_opening() {
        let sol = gate_opening_for_flow(50.0, 1.0, 0.6, 1.0, 0.0, 0.5, 1e-6, 100);
        assert!(!sol.converged);
        assert_eq!(sol.opening, 0.5);
        assert!(sol.flow < 50.0);
    }

    #[test]
    fn test_inverse_zero_target() {
        let sol = gate_opening_for_flow(0.0, 1.0, 0.6, 1.0, 0.0, 0.5, 1e-6, 100);
        assert!(sol.converged);
        assert_eq!(sol.opening, 0.0);
    }
}
