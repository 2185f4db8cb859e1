//! Trapezoidal cross-section geometry.
//!
//! ```text
//!        |<------- T = b + 2zy ------->|
//!        \                             /
//!         \  z                      z /   y
//!          \__________________________/
//!               |<----- b ----->|
//! ```
//!
//! A rectangular section is the `z = 0` special case and a triangular one is
//! `b = 0`.

use canal_core::{Channel, ChannelShape};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapezoidalSection {
    pub bed_width: f64,
    /// Horizontal run per unit rise
    pub side_slope: f64,
}

impl TrapezoidalSection {
    pub fn new(bed_width: f64, side_slope: f64) -> Self {
        Self {
            bed_width,
            side_slope,
        }
    }

    pub fn from_shape(shape: &ChannelShape) -> Self {
        Self::new(shape.bed_width().value(), shape.side_slope())
    }

    pub fn of(channel: &Channel) -> Self {
        Self::from_shape(&channel.shape)
    }

    /// Non-degenerate section: some width at the bed or sloped sides.
    pub fn is_valid(&self) -> bool {
        self.bed_width >= 0.0
            && self.side_slope >= 0.0
            && (self.bed_width > 0.0 || self.side_slope > 0.0)
    }

    /// Flow area A = (b + z·y)·y
    pub fn area(&self, depth: f64) -> f64 {
        if depth <= 0.0 {
            return 0.0;
        }
        (self.bed_width + self.side_slope * depth) * depth
    }

    /// Wetted perimeter P = b + 2y·√(1 + z²)
    pub fn wetted_perimeter(&self, depth: f64) -> f64 {
        if depth <= 0.0 {
            return self.bed_width.max(0.0);
        }
        self.bed_width + 2.0 * depth * self.side_factor()
    }

    /// Hydraulic radius R = A / P
    pub fn hydraulic_radius(&self, depth: f64) -> f64 {
        let perimeter = self.wetted_perimeter(depth);
        if perimeter <= 0.0 {
            0.0
        } else {
            self.area(depth) / perimeter
        }
    }

    /// Water-surface width T = b + 2z·y (also dA/dy)
    pub fn top_width(&self, depth: f64) -> f64 {
        self.bed_width + 2.0 * self.side_slope * depth.max(0.0)
    }

    /// Hydraulic depth D = A / T, used by the Froude number
    pub fn hydraulic_depth(&self, depth: f64) -> f64 {
        let top = self.top_width(depth);
        if top <= 0.0 {
            0.0
        } else {
            self.area(depth) / top
        }
    }

    /// dP/dy = 2·√(1 + z²)
    pub(crate) fn side_factor(&self) -> f64 {
        (1.0 + self.side_slope * self.side_slope).sqrt()
    }
}
