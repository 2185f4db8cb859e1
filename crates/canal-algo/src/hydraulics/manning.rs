//! Manning's uniform-flow equation.
//!
//! ```text
//! Q = (1/n) · A · R^(2/3) · S^(1/2)
//! ```
//!
//! Written as `Q = (√S / n) · A^(5/3) · P^(-2/3)` the derivative with respect
//! to depth follows directly, since `dA/dy = T` and `dP/dy = 2√(1+z²)`:
//!
//! ```text
//! dQ/dy = (√S / n) · [ (5/3)·A^(2/3)·P^(-2/3)·T  -  (2/3)·A^(5/3)·P^(-5/3)·2√(1+z²) ]
//! ```
//!
//! For any valid section the bracket is positive, so Q is strictly increasing
//! in depth. The normal-depth solver relies on that.

use super::geometry::TrapezoidalSection;

/// Uniform-flow discharge (m³/s) of a trapezoidal channel.
///
/// Zero for a dry channel, a flat or adverse slope, or a non-positive
/// roughness; none of these are errors.
pub fn manning_flow(depth: f64, bed_width: f64, side_slope: f64, slope: f64, n: f64) -> f64 {
    manning_flow_in(&TrapezoidalSection::new(bed_width, side_slope), depth, slope, n)
}

pub fn manning_flow_in(section: &TrapezoidalSection, depth: f64, slope: f64, n: f64) -> f64 {
    if depth <= 0.0 || slope <= 0.0 || n <= 0.0 || !section.is_valid() {
        return 0.0;
    }
    let area = section.area(depth);
    let radius = section.hydraulic_radius(depth);
    area * radius.powf(2.0 / 3.0) * slope.sqrt() / n
}

/// Analytic dQ/dy.
pub fn manning_flow_derivative(section: &TrapezoidalSection, depth: f64, slope: f64, n: f64) -> f64 {
    if depth <= 0.0 || slope <= 0.0 || n <= 0.0 || !section.is_valid() {
        return 0.0;
    }
    let area = section.area(depth);
    let perimeter = section.wetted_perimeter(depth);
    let top = section.top_width(depth);
    let dp_dy = 2.0 * section.side_factor();
    let k = slope.sqrt() / n;

    let term_area = (5.0 / 3.0) * area.powf(2.0 / 3.0) * perimeter.powf(-2.0 / 3.0) * top;
    let term_perimeter = (2.0 / 3.0) * area.powf(5.0 / 3.0) * perimeter.powf(-5.0 / 3.0) * dp_dy;
    k * (term_area - term_perimeter)
}

/// Friction slope S_f = (n·Q / (A·R^(2/3)))² carried at a given depth.
///
/// Infinite when water must pass through a dry section.
pub fn friction_slope(flow: f64, depth: f64, section: &TrapezoidalSection, n: f64) -> f64 {
    if flow == 0.0 {
        return 0.0;
    }
    let conveyance = section.area(depth) * section.hydraulic_radius(depth).powf(2.0 / 3.0);
    if conveyance <= 0.0 {
        return f64::INFINITY;
    }
    let ratio = n * flow / conveyance;
    ratio * ratio
}
