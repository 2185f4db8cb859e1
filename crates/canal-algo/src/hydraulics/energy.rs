//! Energy head, Froude number and the energy / hydraulic grade lines along a
//! delivery path.

use canal_core::{ChannelId, Meters, NodeId};
use serde::Serialize;

use super::GRAVITY;

/// Velocity head v²/2g (m)
pub fn velocity_head(velocity: f64) -> f64 {
    velocity * velocity / (2.0 * GRAVITY)
}

/// Total energy head H = z + y + v²/2g (m MSL)
pub fn energy_head(elevation: f64, depth: f64, velocity: f64) -> f64 {
    elevation + depth + velocity_head(velocity)
}

/// Fr = v / √(g·D); zero for a dry section.
pub fn froude_number(velocity: f64, hydraulic_depth: f64) -> f64 {
    if hydraulic_depth <= 0.0 {
        return 0.0;
    }
    velocity.abs() / (GRAVITY * hydraulic_depth).sqrt()
}

/// One station on an energy profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfilePoint {
    pub node: NodeId,
    /// Channel arriving at this station (None at the path start)
    pub via: Option<ChannelId>,
    /// Distance from the path start (m)
    pub chainage: Meters,
    pub bed_elevation: Meters,
    /// Hydraulic grade line (water surface)
    pub hydraulic_grade: Meters,
    /// Energy grade line
    pub energy_grade: Meters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergyProfile {
    pub points: Vec<ProfilePoint>,
}

impl EnergyProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        node: NodeId,
        via: Option<ChannelId>,
        chainage: f64,
        bed_elevation: f64,
        water_level: f64,
        velocity: f64,
    ) {
        self.points.push(ProfilePoint {
            node,
            via,
            chainage: Meters(chainage),
            bed_elevation: Meters(bed_elevation),
            hydraulic_grade: Meters(water_level),
            energy_grade: Meters(water_level + velocity_head(velocity)),
        });
    }

    /// Energy lost between the first and last station (m).
    pub fn total_loss(&self) -> Meters {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => first.energy_grade - last.energy_grade,
            _ => Meters::ZERO,
        }
    }

    pub fn length(&self) -> Meters {
        self.points.last().map(|p| p.chainage).unwrap_or(Meters::ZERO)
    }
}
