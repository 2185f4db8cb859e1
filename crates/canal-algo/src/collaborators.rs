//! Contracts with the services around the optimizer.
//!
//! The optimizer never talks to the outside world mid-computation; callers
//! pre-fetch topology, demand and live conditions through these traits and
//! hand over one immutable [`OptimizationRequest`]. What the core requires of
//! the providers is how absence is tolerated:
//!
//! - **Topology**: the last good snapshot is reused when the provider fails;
//!   a snapshot older than `topology_max_age` (1 h) is tagged stale but used.
//! - **Demand**: the last known request set is reused on failure; with no
//!   history the cycle runs with no requests.
//! - **Conditions**: missing or failed observations fall back to the values
//!   already in the topology snapshot.
//!
//! Actuation is one-way: callers forward gate openings from the result and
//! the core assumes nothing about whether they were applied.

use std::collections::HashMap;
use std::sync::Mutex;

use canal_core::{ChannelId, GateId, Meters, NetworkSnapshot, NodeId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::contingency::Blockage;
use crate::request::{DeliveryRequest, OptimizationRequest};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    #[error("{service} returned malformed data: {message}")]
    Malformed { service: String, message: String },

    /// No fresh value and nothing cached to fall back on
    #[error("no {0} data has ever been received")]
    NoData(String),
}

impl ProviderError {
    pub fn unavailable(service: &str, message: impl Into<String>) -> Self {
        ProviderError::Unavailable {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

/// A value with the time it was observed at its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub value: T,
    pub observed_at: DateTime<Utc>,
}

impl<T> Stamped<T> {
    pub fn new(value: T, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.observed_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    /// Served from cache or older than the accepted age
    Stale,
    /// Nothing available; defaults used
    Missing,
}

/// Live measurements layered over the topology snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observations {
    #[serde(default)]
    pub water_levels: HashMap<NodeId, f64>,
    #[serde(default)]
    pub condition_factors: HashMap<ChannelId, f64>,
    #[serde(default)]
    pub gate_openings: HashMap<GateId, f64>,
}

pub trait TopologyProvider: Send + Sync {
    fn topology(&self) -> Result<Stamped<NetworkSnapshot>, ProviderError>;
}

pub trait DemandProvider: Send + Sync {
    fn pending_requests(&self) -> Result<Stamped<Vec<DeliveryRequest>>, ProviderError>;
}

pub trait ConditionProvider: Send + Sync {
    fn observations(&self) -> Result<Stamped<Observations>, ProviderError>;
}

/// Cache of the last good value from a provider.
#[derive(Debug)]
pub struct LastKnown<T> {
    cache: Mutex<Option<Stamped<T>>>,
    max_age: Option<Duration>,
}

impl<T: Clone> LastKnown<T> {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(None),
            max_age: None,
        }
    }

    /// Values older than `max_age` are served but tagged stale.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Pass a fresh result through (remembering it) or fall back to the
    /// cached value when the provider failed.
    pub fn resolve(
        &self,
        fetched: Result<Stamped<T>, ProviderError>,
        now: DateTime<Utc>,
    ) -> Result<(Stamped<T>, Freshness), ProviderError> {
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match fetched {
            Ok(value) => {
                *cache = Some(value.clone());
                let freshness = match self.max_age {
                    Some(max_age) if value.age(now) > max_age => Freshness::Stale,
                    _ => Freshness::Fresh,
                };
                Ok((value, freshness))
            }
            Err(err) => match cache.as_ref() {
                Some(cached) => {
                    warn!("{err}; using value observed at {}", cached.observed_at);
                    Ok((cached.clone(), Freshness::Stale))
                }
                None => Err(err),
            },
        }
    }

    pub fn cached(&self) -> Option<Stamped<T>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl<T: Clone> Default for LastKnown<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Overlay observations on a snapshot. Values outside their physical range
/// are ignored and the snapshot value kept. Returns how many were applied.
pub fn apply_observations(snapshot: &mut NetworkSnapshot, observations: &Observations) -> usize {
    let mut applied = 0;
    for node in &mut snapshot.nodes {
        if let Some(&level) = observations.water_levels.get(&node.id) {
            if level.is_finite() {
                node.water_level = Meters::new(level);
                applied += 1;
            } else {
                warn!(node = %node.id, "ignoring non-finite water level");
            }
        }
    }
    for channel in &mut snapshot.channels {
        if let Some(&factor) = observations.condition_factors.get(&channel.id) {
            if factor > 0.0 && factor <= 1.0 {
                channel.condition_factor = factor;
                applied += 1;
            } else {
                warn!(channel = %channel.id, factor, "ignoring condition factor outside (0, 1]");
            }
        }
    }
    for gate in &mut snapshot.gates {
        if let Some(&opening) = observations.gate_openings.get(&gate.id) {
            if opening >= 0.0 && opening <= gate.max_opening.value() {
                gate.opening = Meters::new(opening);
                applied += 1;
            } else {
                warn!(gate = %gate.id, opening, "ignoring gate opening outside its range");
            }
        }
    }
    applied
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceFreshness {
    pub topology: Freshness,
    pub demand: Freshness,
    pub conditions: Freshness,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledRequest {
    pub request: OptimizationRequest,
    pub freshness: SourceFreshness,
    pub observations_applied: usize,
}

/// Builds optimization requests from the three providers, tolerating
/// failures as described in the module docs.
pub struct SnapshotAssembler {
    topology: Box<dyn TopologyProvider>,
    demand: Box<dyn DemandProvider>,
    conditions: Box<dyn ConditionProvider>,
    topology_cache: LastKnown<NetworkSnapshot>,
    demand_cache: LastKnown<Vec<DeliveryRequest>>,
    condition_cache: LastKnown<Observations>,
}

impl SnapshotAssembler {
    pub fn new(
        topology: Box<dyn TopologyProvider>,
        demand: Box<dyn DemandProvider>,
        conditions: Box<dyn ConditionProvider>,
    ) -> Self {
        Self {
            topology,
            demand,
            conditions,
            topology_cache: LastKnown::new().with_max_age(Duration::hours(1)),
            demand_cache: LastKnown::new(),
            condition_cache: LastKnown::new(),
        }
    }

    pub fn with_topology_max_age(mut self, max_age: Duration) -> Self {
        self.topology_cache = LastKnown::new().with_max_age(max_age);
        self
    }

    /// Assemble a request at `now`. Fails only when no topology has ever
    /// been received.
    pub fn assemble(
        &self,
        now: DateTime<Utc>,
        blockages: Vec<Blockage>,
    ) -> Result<AssembledRequest, ProviderError> {
        let (topology, topology_freshness) = self
            .topology_cache
            .resolve(self.topology.topology(), now)
            .map_err(|err| {
                warn!("{err}");
                ProviderError::NoData("topology".into())
            })?;

        let (requests, demand_freshness) = match self.demand_cache.resolve(self.demand.pending_requests(), now) {
            Ok((stamped, freshness)) => (stamped.value, freshness),
            Err(err) => {
                warn!("{err}; running without delivery requests");
                (Vec::new(), Freshness::Missing)
            }
        };

        let mut snapshot = topology.value;
        let (applied, conditions_freshness) = match self.condition_cache.resolve(self.conditions.observations(), now) {
            Ok((stamped, freshness)) => (apply_observations(&mut snapshot, &stamped.value), freshness),
            Err(err) => {
                warn!("{err}; keeping snapshot levels and conditions");
                (0, Freshness::Missing)
            }
        };

        Ok(AssembledRequest {
            request: OptimizationRequest::new(snapshot, requests)
                .with_blockages(blockages)
                .with_as_of(now),
            freshness: SourceFreshness {
                topology: topology_freshness,
                demand: demand_freshness,
                conditions: conditions_freshness,
            },
            observations_applied: applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canal_core::{Channel, Gate, Node, NodeRole};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()
    }

    fn snapshot() -> NetworkSnapshot {
        NetworkSnapshot {
            nodes: vec![
                Node::new(NodeId::new(1), "S", NodeRole::Source, 220.0, 222.0),
                Node::new(NodeId::new(2), "Z", NodeRole::Zone, 217.0, 218.0),
            ],
            channels: vec![Channel::trapezoidal(
                ChannelId::new(1),
                NodeId::new(1),
                NodeId::new(2),
                500.0,
                2.0,
                1.0,
            )],
            gates: vec![Gate::automated(GateId::new(1), ChannelId::new(1), 0.3, 1.0, 1.5)],
        }
    }

    #[derive(Clone)]
    struct Flaky {
        up: Arc<AtomicBool>,
        observed_at: DateTime<Utc>,
    }

    impl Flaky {
        fn check(&self, service: &str) -> Result<(), ProviderError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProviderError::unavailable(service, "connection refused"))
            }
        }
    }

    impl TopologyProvider for Flaky {
        fn topology(&self) -> Result<Stamped<NetworkSnapshot>, ProviderError> {
            self.check("gis")?;
            Ok(Stamped::new(snapshot(), self.observed_at))
        }
    }

    impl DemandProvider for Flaky {
        fn pending_requests(&self) -> Result<Stamped<Vec<DeliveryRequest>>, ProviderError> {
            self.check("demand")?;
            Ok(Stamped::new(Vec::new(), self.observed_at))
        }
    }

    impl ConditionProvider for Flaky {
        fn observations(&self) -> Result<Stamped<Observations>, ProviderError> {
            self.check("sensors")?;
            let mut obs = Observations::default();
            obs.water_levels.insert(NodeId::new(1), 222.4);
            obs.condition_factors.insert(ChannelId::new(1), 0.8);
            obs.gate_openings.insert(GateId::new(1), 5.0);
            Ok(Stamped::new(obs, self.observed_at))
        }
    }

    fn assembler(up: &Arc<AtomicBool>, observed_at: DateTime<Utc>) -> SnapshotAssembler {
        let flaky = Flaky {
            up: up.clone(),
            observed_at,
        };
        SnapshotAssembler::new(Box::new(flaky.clone()), Box::new(flaky.clone()), Box::new(flaky))
    }

    #[test]
    fn test_last_known_serves_cache_on_failure() {
        let cache = LastKnown::new();
        let (value, freshness) = cache.resolve(Ok(Stamped::new(7, t0())), t0()).unwrap();
        assert_eq!((value.value, freshness), (7, Freshness::Fresh));

        let (value, freshness) = cache
            .resolve(Err(ProviderError::unavailable("gis", "timeout")), t0())
            .unwrap();
        assert_eq!((value.value, freshness), (7, Freshness::Stale));

        let empty: LastKnown<i32> = LastKnown::new();
        assert!(empty.resolve(Err(ProviderError::unavailable("gis", "timeout")), t0()).is_err());
    }

    #[test]
    fn test_old_topology_is_stale_but_used() {
        let cache = LastKnown::new().with_max_age(Duration::hours(1));
        let old = Stamped::new(1, t0() - Duration::hours(2));
        let (_, freshness) = cache.resolve(Ok(old), t0()).unwrap();
        assert_eq!(freshness, Freshness::Stale);
    }

    #[test]
    fn test_observations_merged_with_range_checks() {
        let up = Arc::new(AtomicBool::new(true));
        let assembled = assembler(&up, t0()).assemble(t0(), Vec::new()).unwrap();
        let snap = &assembled.request.network;
        assert_eq!(snap.nodes[0].water_level.value(), 222.4);
        assert_eq!(snap.channels[0].condition_factor, 0.8);
        // 5.0 exceeds the gate's travel and is ignored
        assert_eq!(snap.gates[0].opening.value(), 0.3);
        assert_eq!(assembled.observations_applied, 2);
        assert_eq!(assembled.freshness.topology, Freshness::Fresh);
        assert_eq!(assembled.request.as_of, Some(t0()));
    }

    #[test]
    fn test_outage_falls_back_to_last_known() {
        let up = Arc::new(AtomicBool::new(true));
        let assembler = assembler(&up, t0());
        assembler.assemble(t0(), Vec::new()).unwrap();

        up.store(false, Ordering::SeqCst);
        let assembled = assembler.assemble(t0() + Duration::minutes(30), Vec::new()).unwrap();
        assert_eq!(assembled.freshness.topology, Freshness::Stale);
        assert_eq!(assembled.freshness.demand, Freshness::Stale);
        assert_eq!(assembled.freshness.conditions, Freshness::Stale);
        assert_eq!(assembled.request.network.nodes[0].water_level.value(), 222.4);
    }

    #[test]
    fn test_no_topology_ever_is_error() {
        let up = Arc::new(AtomicBool::new(false));
        let err = assembler(&up, t0()).assemble(t0(), Vec::new()).unwrap_err();
        assert_eq!(err, ProviderError::NoData("topology".into()));
    }
}
