//! # Delivery Sequencer
//!
//! Orders competing delivery requests that share the same sub-network.
//!
//! ## Scoring
//!
//! ```text
//! score = 0.4·priority/10
//!       + 0.3·zone_elevation/max_elevation
//!       + 0.2·1/(1 + hours_to_deadline/24)
//!       + 0.1·min(volume/100000, 1)
//! ```
//!
//! Hours to deadline are measured from an explicit `now` and clamped at zero,
//! so overdue requests score as urgent as possible rather than above it.
//!
//! ## Ordering
//!
//! 1. Initial order: score descending, ties broken by request id.
//! 2. Greedy construction: start from the best-scored request and repeatedly
//!    append the candidate minimising `switch_weight·movement - score`, where
//!    movement is the total gate travel (m) from the previous delivery's
//!    openings.
//! 3. 2-opt: reverse segments of the sequence, keeping a reversal only when
//!    the total cost drops and no request that met its deadline now misses it.
//!
//! ```text
//! cost = switch_weight·Σ movement + Σ score·completion_hours
//! ```
//!
//! ## Time windows
//!
//! Each slot starts when the previous delivery ends. Gates are reconfigured
//! (`reconfiguration_seconds_per_meter × movement`), the water travels to the
//! zone, then the volume is delivered at the requested flow. A request whose
//! travel plus delivery time exceeds `horizon_hours` is left unscheduled.

use std::collections::BTreeMap;

use canal_core::{CubicMetersPerSecond, GateId, RequestId, Seconds};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use web_time::Instant;

const COST_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Cost per metre of gate travel between consecutive deliveries
    pub switch_weight: f64,
    /// Time to move gates, per metre of total travel
    pub reconfiguration_seconds_per_meter: f64,
    pub max_two_opt_passes: usize,
    /// Longest travel plus delivery window one request may occupy
    pub horizon_hours: f64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            switch_weight: 1.0,
            reconfiguration_seconds_per_meter: 600.0,
            max_two_opt_passes: 50,
            horizon_hours: 8760.0,
        }
    }
}

/// A request as seen by the sequencer, with the gate openings and travel
/// time it would need if served alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryCandidate {
    pub request: RequestId,
    /// 1-10
    pub priority: u8,
    pub zone_elevation: f64,
    pub deadline: DateTime<Utc>,
    /// m³
    pub volume: f64,
    /// m³/s
    pub flow: f64,
    pub feasible: bool,
    pub openings: BTreeMap<GateId, f64>,
    /// None when the zone is unreachable at this flow
    pub travel_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleSlot {
    pub position: usize,
    pub request: RequestId,
    pub score: f64,
    /// Gate travel from the previous slot's openings (m)
    pub movement: f64,
    pub reconfiguration_seconds: f64,
    pub travel_seconds: f64,
    pub duration_seconds: f64,
    pub gates_ready_at: DateTime<Utc>,
    pub delivery_start: DateTime<Utc>,
    pub delivery_end: DateTime<Utc>,
    pub meets_deadline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnscheduledRequest {
    pub request: RequestId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schedule {
    pub slots: Vec<ScheduleSlot>,
    pub unscheduled: Vec<UnscheduledRequest>,
    pub total_cost: f64,
    pub total_movement: f64,
    pub two_opt_passes: usize,
    pub timed_out: bool,
}

impl Schedule {
    pub fn order(&self) -> Vec<RequestId> {
        self.slots.iter().map(|s| s.request).collect()
    }

    pub fn missed_deadlines(&self) -> usize {
        self.slots.iter().filter(|s| !s.meets_deadline).count()
    }
}

/// Multi-criteria score of a request at `now`.
pub fn score(candidate: &DeliveryCandidate, max_elevation: f64, now: DateTime<Utc>) -> f64 {
    let priority = f64::from(candidate.priority.clamp(1, 10)) / 10.0;
    let elevation = if max_elevation > 0.0 {
        (candidate.zone_elevation / max_elevation).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let hours = hours_between(now, candidate.deadline).max(0.0);
    let urgency = 1.0 / (1.0 + hours / 24.0);
    let volume = (candidate.volume / 100_000.0).clamp(0.0, 1.0);
    0.4 * priority + 0.3 * elevation + 0.2 * urgency + 0.1 * volume
}

/// Total gate travel between two opening vectors; a gate missing on one
/// side counts as closed.
pub fn gate_movement(from: &BTreeMap<GateId, f64>, to: &BTreeMap<GateId, f64>) -> f64 {
    let mut total = 0.0;
    for (gate, &b) in to {
        total += (b - from.get(gate).copied().unwrap_or(0.0)).abs();
    }
    for (gate, &a) in from {
        if !to.contains_key(gate) {
            total += a.abs();
        }
    }
    total
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    Seconds((to - from).num_milliseconds() as f64 / 1000.0).hours()
}

/// `start` shifted by `seconds`, saturating at the last representable instant.
fn offset(start: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    Duration::try_milliseconds((seconds * 1000.0).round() as i64)
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct Scored<'a> {
    candidate: &'a DeliveryCandidate,
    score: f64,
    travel: f64,
}

struct Evaluation {
    slots: Vec<ScheduleSlot>,
    cost: f64,
    movement: f64,
}

struct Planner<'a> {
    items: Vec<Scored<'a>>,
    current: &'a BTreeMap<GateId, f64>,
    now: DateTime<Utc>,
    config: &'a SequencerConfig,
}

impl Planner<'_> {
    fn movement_between(&self, prev: Option<usize>, next: usize) -> f64 {
        let from = prev.map_or(self.current, |p| &self.items[p].candidate.openings);
        gate_movement(from, &self.items[next].candidate.openings)
    }

    fn evaluate(&self, order: &[usize]) -> Evaluation {
        let mut cursor = self.now;
        let mut prev = None;
        let mut slots = Vec::with_capacity(order.len());
        let mut cost = 0.0;
        let mut movement_total = 0.0;

        for (position, &i) in order.iter().enumerate() {
            let item = &self.items[i];
            let movement = self.movement_between(prev, i);
            let reconfiguration_seconds = movement * self.config.reconfiguration_seconds_per_meter;
            let duration_seconds = CubicMetersPerSecond(item.candidate.flow)
                .time_to_deliver(item.candidate.volume)
                .value();

            let gates_ready_at = offset(cursor, reconfiguration_seconds);
            let delivery_start = offset(gates_ready_at, item.travel);
            let delivery_end = offset(delivery_start, duration_seconds);
            let completion_hours = hours_between(self.now, delivery_end);

            cost += self.config.switch_weight * movement + item.score * completion_hours;
            movement_total += movement;
            slots.push(ScheduleSlot {
                position,
                request: item.candidate.request,
                score: item.score,
                movement,
                reconfiguration_seconds,
                travel_seconds: item.travel,
                duration_seconds,
                gates_ready_at,
                delivery_start,
                delivery_end,
                meets_deadline: delivery_end <= item.candidate.deadline,
            });
            cursor = delivery_end;
            prev = Some(i);
        }

        Evaluation {
            slots,
            cost,
            movement: movement_total,
        }
    }

    fn greedy(&self) -> Vec<usize> {
        // items are already in initial order, so index 0 is the best score
        let n = self.items.len();
        let mut order = Vec::with_capacity(n);
        let mut used = vec![false; n];
        if n == 0 {
            return order;
        }
        order.push(0);
        used[0] = true;

        while order.len() < n {
            let last = order.last().copied();
            let mut best: Option<(usize, f64)> = None;
            for (i, item) in self.items.iter().enumerate() {
                if used[i] {
                    continue;
                }
                let transition = self.config.switch_weight * self.movement_between(last, i) - item.score;
                if best.map_or(true, |(_, b)| transition < b - COST_EPS) {
                    best = Some((i, transition));
                }
            }
            if let Some((i, _)) = best {
                used[i] = true;
                order.push(i);
            }
        }
        order
    }
}

fn keeps_deadlines(before: &[ScheduleSlot], after: &[ScheduleSlot]) -> bool {
    let met: Vec<RequestId> = before
        .iter()
        .filter(|s| s.meets_deadline)
        .map(|s| s.request)
        .collect();
    after
        .iter()
        .all(|s| s.meets_deadline || !met.contains(&s.request))
}

/// Order `candidates` starting from the `current` gate openings.
///
/// Infeasible or unreachable candidates, those with no flow and those whose
/// window exceeds the horizon are listed as unscheduled. A passed `deadline` stops the local search and marks the
/// schedule `timed_out`; the greedy order is always produced.
pub fn sequence(
    candidates: &[DeliveryCandidate],
    current: &BTreeMap<GateId, f64>,
    max_elevation: f64,
    now: DateTime<Utc>,
    config: &SequencerConfig,
    deadline: Option<Instant>,
) -> Schedule {
    let mut unscheduled = Vec::new();
    let mut items = Vec::new();
    let horizon = Seconds::from_hours(config.horizon_hours);
    for candidate in candidates {
        let window = candidate.travel_seconds.map(|travel| {
            Seconds(travel) + CubicMetersPerSecond(candidate.flow).time_to_deliver(candidate.volume)
        });
        let reason = if !candidate.feasible {
            Some("insufficient head for gravity delivery")
        } else if !(candidate.flow > 0.0) {
            Some("no flow requested")
        } else if candidate.travel_seconds.is_none() {
            Some("zone unreachable at requested flow")
        } else if window.map_or(true, |w| !w.is_finite() || w > horizon) {
            Some("delivery window exceeds the scheduling horizon")
        } else {
            None
        };
        match reason {
            Some(reason) => unscheduled.push(UnscheduledRequest {
                request: candidate.request,
                reason: reason.to_string(),
            }),
            None => items.push(Scored {
                candidate,
                score: score(candidate, max_elevation, now),
                travel: candidate.travel_seconds.unwrap_or(0.0),
            }),
        }
    }
    unscheduled.sort_by_key(|u| u.request);

    items.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.candidate.request.cmp(&b.candidate.request))
    });

    let planner = Planner {
        items,
        current,
        now,
        config,
    };

    let mut order = planner.greedy();
    let mut best = planner.evaluate(&order);
    let mut passes = 0;
    let mut timed_out = false;

    'search: while passes < config.max_two_opt_passes {
        passes += 1;
        let mut improved = false;
        for i in 0..order.len().saturating_sub(1) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                timed_out = true;
                break 'search;
            }
            for j in (i + 1)..order.len() {
                let mut trial = order.clone();
                trial[i..=j].reverse();
                let eval = planner.evaluate(&trial);
                if eval.cost < best.cost - COST_EPS && keeps_deadlines(&best.slots, &eval.slots) {
                    order = trial;
                    best = eval;
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
    }

    debug!(
        scheduled = best.slots.len(),
        unscheduled = unscheduled.len(),
        passes,
        cost = best.cost,
        "delivery sequence built"
    );

    Schedule {
        slots: best.slots,
        unscheduled,
        total_cost: best.cost,
        total_movement: best.movement,
        two_opt_passes: passes,
        timed_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()
    }

    fn candidate(id: usize, priority: u8, hours: i64, opening: f64) -> DeliveryCandidate {
        DeliveryCandidate {
            request: RequestId::new(id),
            priority,
            zone_elevation: 217.0,
            deadline: now() + Duration::hours(hours),
            volume: 3600.0,
            flow: 1.0,
            feasible: true,
            openings: BTreeMap::from([(GateId::new(1), opening)]),
            travel_seconds: Some(600.0),
        }
    }

    #[test]
    fn test_score_components() {
        let mut c = candidate(1, 10, 0, 0.5);
        c.zone_elevation = 100.0;
        c.volume = 200_000.0;
        // every term saturated
        assert!((score(&c, 100.0, now()) - 1.0).abs() < 1e-12);

        c.priority = 5;
        c.zone_elevation = 50.0;
        c.deadline = now() + Duration::hours(24);
        c.volume = 50_000.0;
        let expected = 0.4 * 0.5 + 0.3 * 0.5 + 0.2 * 0.5 + 0.1 * 0.5;
        assert!((score(&c, 100.0, now()) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_overdue_request_is_clamped() {
        let overdue = candidate(1, 5, -48, 0.5);
        let due_now = candidate(2, 5, 0, 0.5);
        assert_eq!(score(&overdue, 220.0, now()), score(&due_now, 220.0, now()));
    }

    #[test]
    fn test_gate_movement() {
        let a = BTreeMap::from([(GateId::new(1), 0.5), (GateId::new(2), 0.2)]);
        let b = BTreeMap::from([(GateId::new(1), 0.3), (GateId::new(3), 0.4)]);
        assert!((gate_movement(&a, &b) - (0.2 + 0.4 + 0.2)).abs() < 1e-12);
    }

    #[test]
    fn test_equal_scores_break_ties_by_id() {
        let candidates = vec![candidate(3, 5, 24, 0.5), candidate(1, 5, 24, 0.5), candidate(2, 5, 24, 0.5)];
        let current = BTreeMap::from([(GateId::new(1), 0.5)]);
        let schedule = sequence(&candidates, &current, 220.0, now(), &SequencerConfig::default(), None);
        assert_eq!(
            schedule.order(),
            vec![RequestId::new(1), RequestId::new(2), RequestId::new(3)]
        );
        assert_eq!(schedule.total_movement, 0.0);
    }

    #[test]
    fn test_greedy_groups_similar_openings() {
        let candidates = vec![
            candidate(1, 9, 24, 0.2),
            candidate(2, 8, 24, 0.9),
            candidate(3, 7, 24, 0.25),
        ];
        let current = BTreeMap::from([(GateId::new(1), 0.2)]);
        let schedule = sequence(&candidates, &current, 220.0, now(), &SequencerConfig::default(), None);
        // 3 shares request 1's opening, so it follows before the big swing to 0.9
        assert_eq!(
            schedule.order(),
            vec![RequestId::new(1), RequestId::new(3), RequestId::new(2)]
        );
    }

    #[test]
    fn test_time_windows_chain() {
        let candidates = vec![candidate(1, 9, 48, 0.2), candidate(2, 5, 48, 0.4)];
        let current = BTreeMap::from([(GateId::new(1), 0.2)]);
        let schedule = sequence(&candidates, &current, 220.0, now(), &SequencerConfig::default(), None);

        let first = &schedule.slots[0];
        assert_eq!(first.gates_ready_at, now());
        assert_eq!(first.delivery_start, now() + Duration::seconds(600));
        assert_eq!(first.delivery_end, now() + Duration::seconds(600 + 3600));

        let second = &schedule.slots[1];
        // 0.2 m of travel at 600 s/m
        assert!((second.reconfiguration_seconds - 120.0).abs() < 1e-9);
        assert_eq!(second.gates_ready_at, first.delivery_end + Duration::seconds(120));
        assert!(schedule.slots.iter().all(|s| s.meets_deadline));
    }

    #[test]
    fn test_infeasible_requests_unscheduled() {
        let mut blocked = candidate(2, 9, 24, 0.5);
        blocked.feasible = false;
        let mut dry = candidate(3, 9, 24, 0.5);
        dry.travel_seconds = None;
        let candidates = vec![candidate(1, 5, 24, 0.5), blocked, dry];
        let schedule = sequence(
            &candidates,
            &BTreeMap::new(),
            220.0,
            now(),
            &SequencerConfig::default(),
            None,
        );
        assert_eq!(schedule.order(), vec![RequestId::new(1)]);
        assert_eq!(schedule.unscheduled.len(), 2);
        assert_eq!(schedule.unscheduled[0].request, RequestId::new(2));
    }

    #[test]
    fn test_window_beyond_horizon_unscheduled() {
        let mut trickle = candidate(2, 9, 24, 0.5);
        trickle.flow = 1e-6;
        trickle.volume = 1e8;
        let candidates = vec![candidate(1, 5, 24, 0.5), trickle];
        let schedule = sequence(
            &candidates,
            &BTreeMap::new(),
            220.0,
            now(),
            &SequencerConfig::default(),
            None,
        );
        assert_eq!(schedule.order(), vec![RequestId::new(1)]);
        assert_eq!(schedule.unscheduled[0].request, RequestId::new(2));
        assert!(schedule.unscheduled[0].reason.contains("horizon"));
    }

    #[test]
    fn test_offset_saturates() {
        assert_eq!(offset(now(), 1e20), DateTime::<Utc>::MAX_UTC);
        assert_eq!(offset(now(), 90.0), now() + Duration::seconds(90));
    }

    #[test]
    fn test_deterministic() {
        let candidates: Vec<_> = (1..=6)
            .map(|i| candidate(i, (i % 3 + 4) as u8, 12 * i as i64, 0.1 * i as f64))
            .collect();
        let current = BTreeMap::from([(GateId::new(1), 0.3)]);
        let a = sequence(&candidates, &current, 220.0, now(), &SequencerConfig::default(), None);
        let b = sequence(&candidates, &current, 220.0, now(), &SequencerConfig::default(), None);
        assert_eq!(a.order(), b.order());
        assert_eq!(a.total_cost, b.total_cost);
    }

    #[test]
    fn test_two_opt_never_increases_cost() {
        let candidates: Vec<_> = (1..=5)
            .map(|i| candidate(i, (11 - 2 * i) as u8, 6 * i as i64, [0.9, 0.1, 0.8, 0.2, 0.7][i - 1]))
            .collect();
        let current = BTreeMap::from([(GateId::new(1), 0.5)]);
        let no_search = SequencerConfig {
            max_two_opt_passes: 0,
            ..SequencerConfig::default()
        };
        let greedy = sequence(&candidates, &current, 220.0, now(), &no_search, None);
        let improved = sequence(&candidates, &current, 220.0, now(), &SequencerConfig::default(), None);
        assert!(improved.total_cost <= greedy.total_cost + 1e-9);
        assert!(improved.missed_deadlines() <= greedy.missed_deadlines());
    }
}
