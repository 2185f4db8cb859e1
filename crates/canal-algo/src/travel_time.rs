//! Travel-time prediction along a delivery path.
//!
//! Each segment runs at its normal depth for the flow it carries; the mean
//! velocity is reduced by the channel's condition factor (sediment, weed):
//!
//! ```text
//! v = Q / A(y_n) · condition_factor        t = L / v
//! ```
//!
//! A channel holding less than `min_wetted_volume` is a dry start: before
//! the front can advance the channel must be filled, which takes
//!
//! ```text
//! t_fill = (A(y_n)·L - V_current) / Q · absorption_factor
//! ```
//!
//! Zero flow on any segment makes the destination unreachable; the estimate
//! says so instead of failing.

use canal_core::{CanalError, CanalResult, ChannelId, CubicMetersPerSecond, Meters, MetersPerSecond, Network, Seconds};
use serde::{Deserialize, Serialize};

use crate::hydraulics::TrapezoidalSection;
use crate::normal_depth::NormalDepthSolver;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelTimeConfig {
    /// Below this stored volume (m³) a channel is treated as dry
    pub min_wetted_volume: f64,
    /// Multiplier on filling time for seepage and bank wetting
    pub absorption_factor: f64,
}

impl Default for TravelTimeConfig {
    fn default() -> Self {
        Self {
            min_wetted_volume: 50.0,
            absorption_factor: 1.3,
        }
    }
}

/// Everything the predictor needs about one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentInput {
    pub channel: ChannelId,
    pub length: f64,
    pub section: TrapezoidalSection,
    pub slope: f64,
    pub manning_n: f64,
    pub condition_factor: f64,
    pub flow: f64,
    /// Depth of water currently standing in the channel
    pub current_depth: f64,
}

impl SegmentInput {
    /// Segment for a network channel carrying `flow`; the current depth is
    /// the upstream node's stage.
    pub fn from_network(network: &Network, channel: ChannelId, flow: f64) -> CanalResult<Self> {
        let ch = network
            .channel(channel)
            .ok_or_else(|| CanalError::Network(format!("unknown {channel} on path")))?;
        let current_depth = network
            .node(ch.upstream)
            .map(|n| n.depth().value())
            .unwrap_or(0.0);
        Ok(Self {
            channel,
            length: ch.length.value(),
            section: TrapezoidalSection::of(ch),
            slope: ch.bed_slope,
            manning_n: ch.manning_n,
            condition_factor: ch.condition_factor,
            flow,
            current_depth,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentTime {
    pub channel: ChannelId,
    pub flow: f64,
    pub depth: f64,
    /// Condition-adjusted velocity
    pub velocity: f64,
    /// None when the segment carries no water
    pub seconds: Option<f64>,
    pub filling_seconds: f64,
    pub dry_start: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TravelTimeEstimate {
    pub segments: Vec<SegmentTime>,
    pub filling_seconds: f64,
    /// Transit plus filling; None when unreachable
    pub total_seconds: Option<f64>,
    pub reachable: bool,
}

impl TravelTimeEstimate {
    pub fn total_hours(&self) -> Option<f64> {
        self.total_seconds.map(|s| Seconds(s).hours())
    }
}

/// Estimate the time for water to reach the end of a path.
pub fn estimate(
    segments: &[SegmentInput],
    solver: &NormalDepthSolver,
    config: &TravelTimeConfig,
) -> TravelTimeEstimate {
    let mut out = Vec::with_capacity(segments.len());
    let mut transit = 0.0;
    let mut filling = 0.0;
    let mut reachable = true;

    for seg in segments {
        if seg.flow <= 0.0 {
            reachable = false;
            out.push(SegmentTime {
                channel: seg.channel,
                flow: 0.0,
                depth: 0.0,
                velocity: 0.0,
                seconds: None,
                filling_seconds: 0.0,
                dry_start: false,
            });
            continue;
        }

        let normal = solver.solve(&seg.section, seg.slope, seg.manning_n, seg.flow);
        let velocity = if normal.area > 0.0 {
            seg.flow / normal.area * seg.condition_factor
        } else {
            0.0
        };
        let crossing = Meters(seg.length).travel_time(MetersPerSecond(velocity));
        let seconds = crossing.is_finite().then_some(crossing.value());
        if seconds.is_none() {
            reachable = false;
        }

        let current_volume = seg.section.area(seg.current_depth) * seg.length;
        let dry_start = current_volume < config.min_wetted_volume;
        let filling_seconds = if dry_start {
            let to_fill = (normal.area * seg.length - current_volume).max(0.0);
            CubicMetersPerSecond(seg.flow).time_to_deliver(to_fill).value() * config.absorption_factor
        } else {
            0.0
        };

        transit += seconds.unwrap_or(0.0);
        filling += filling_seconds;
        out.push(SegmentTime {
            channel: seg.channel,
            flow: seg.flow,
            depth: normal.depth,
            velocity,
            seconds,
            filling_seconds,
            dry_start,
        });
    }

    TravelTimeEstimate {
        segments: out,
        filling_seconds: filling,
        total_seconds: reachable.then_some(transit + filling),
        reachable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(flow: f64, current_depth: f64, condition_factor: f64) -> SegmentInput {
        SegmentInput {
            channel: ChannelId::new(1),
            length: 2000.0,
            section: TrapezoidalSection::new(6.0, 1.5),
            slope: 0.00018,
            manning_n: 0.025,
            condition_factor,
            flow,
            current_depth,
        }
    }

    #[test]
    fn test_wet_channel_transit() {
        let solver = NormalDepthSolver::new().with_tolerance(1e-6);
        let est = estimate(&[segment(20.0, 2.0, 1.0)], &solver, &TravelTimeConfig::default());
        assert!(est.reachable);
        assert_eq!(est.filling_seconds, 0.0);
        // ~0.762 m/s over 2 km
        let total = est.total_seconds.unwrap();
        assert!((total - 2000.0 / 0.762).abs() < 10.0, "total {total}");
        assert!((est.total_hours().unwrap() - total / 3600.0).abs() < 1e-12);
    }

    #[test]
    fn test_condition_factor_slows_water() {
        let solver = NormalDepthSolver::new();
        let clean = estimate(&[segment(20.0, 2.0, 1.0)], &solver, &TravelTimeConfig::default());
        let silted = estimate(&[segment(20.0, 2.0, 0.8)], &solver, &TravelTimeConfig::default());
        let ratio = silted.total_seconds.unwrap() / clean.total_seconds.unwrap();
        assert!((ratio - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_dry_start_adds_filling_time() {
        let solver = NormalDepthSolver::new().with_tolerance(1e-6);
        let est = estimate(&[segment(20.0, 0.0, 1.0)], &solver, &TravelTimeConfig::default());
        let seg = &est.segments[0];
        assert!(seg.dry_start);
        let section = TrapezoidalSection::new(6.0, 1.5);
        let expected = section.area(seg.depth) * 2000.0 / 20.0 * 1.3;
        assert!((est.filling_seconds - expected).abs() < 1e-6);
        assert!(est.total_seconds.unwrap() > est.filling_seconds);
    }

    #[test]
    fn test_zero_flow_is_unreachable() {
        let solver = NormalDepthSolver::new();
        let est = estimate(
            &[segment(5.0, 1.0, 1.0), segment(0.0, 1.0, 1.0)],
            &solver,
            &TravelTimeConfig::default(),
        );
        assert!(!est.reachable);
        assert!(est.total_seconds.is_none());
        assert!(est.segments[1].seconds.is_none());
        assert!(est.segments[0].seconds.is_some());
    }
}
