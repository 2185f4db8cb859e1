//! Delivery requests and the optimization request envelope.

use std::collections::HashSet;

use canal_core::{Diagnostics, Network, NetworkSnapshot, NodeId, NodeRole, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contingency::Blockage;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropContext {
    pub crop_type: String,
    pub growth_stage: String,
}

/// Water ordered by one zone for this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub id: RequestId,
    /// Zone node receiving the water
    pub target: NodeId,
    /// m³/s
    pub required_flow: f64,
    /// m³
    pub required_volume: f64,
    /// Water surface elevation needed at the outlet (m MSL)
    pub target_elevation: f64,
    /// 1 (lowest) to 10
    pub priority: u8,
    #[serde(default)]
    pub crop: CropContext,
    pub deadline: DateTime<Utc>,
}

/// Everything one optimization call needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub network: NetworkSnapshot,
    #[serde(default)]
    pub requests: Vec<DeliveryRequest>,
    /// Non-empty switches on contingency routing
    #[serde(default)]
    pub blockages: Vec<Blockage>,
    /// Wall-clock budget for the whole call
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Reference time for deadlines; defaults to the time of the call
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl OptimizationRequest {
    pub fn new(network: NetworkSnapshot, requests: Vec<DeliveryRequest>) -> Self {
        Self {
            network,
            requests,
            blockages: Vec::new(),
            timeout_ms: None,
            as_of: None,
        }
    }

    pub fn with_blockages(mut self, blockages: Vec<Blockage>) -> Self {
        self.blockages = blockages;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }
}

/// Check requests against the network; problems are added as errors under
/// the `request` category.
pub fn validate_requests(network: &Network, requests: &[DeliveryRequest], diag: &mut Diagnostics) {
    let mut ids = HashSet::new();
    for request in requests {
        let entity = request.id.to_string();
        if !ids.insert(request.id) {
            diag.add_error_with_entity("request", "duplicate request id", &entity);
        }
        match network.node(request.target) {
            None => diag.add_error_with_entity(
                "request",
                &format!("target {} is not in the network", request.target),
                &entity,
            ),
            Some(node) if node.role != NodeRole::Zone => diag.add_error_with_entity(
                "request",
                &format!("target {} is not a zone", request.target),
                &entity,
            ),
            Some(_) => {}
        }
        if !(request.required_flow.is_finite() && request.required_flow >= 0.0) {
            diag.add_error_with_entity("request", "required flow must be a non-negative number", &entity);
        }
        if !(request.required_volume.is_finite() && request.required_volume >= 0.0) {
            diag.add_error_with_entity("request", "required volume must be a non-negative number", &entity);
        }
        if !(1..=10).contains(&request.priority) {
            diag.add_error_with_entity("request", "priority must be between 1 and 10", &entity);
        }
        if !request.target_elevation.is_finite() {
            diag.add_error_with_entity("request", "target elevation must be finite", &entity);
        }
    }
}
