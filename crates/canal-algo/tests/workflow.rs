//! End-to-end optimization cycles

use canal_algo::{
    optimize, Blockage, CropContext, DeliveryOptimization, DeliveryRequest, OptimizationRequest,
    OptimizerConfig, SolutionQuality,
};
use canal_core::{
    CanalError, Channel, ChannelId, Gate, GateId, Network, NetworkSnapshot, Node, NodeId, NodeRole,
    RequestId,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()
}

fn snapshot() -> NetworkSnapshot {
    let mut network = Network::new();
    network.add_node(Node::new(NodeId::new(1), "Headworks", NodeRole::Source, 218.0, 221.0));
    network.add_node(Node::new(NodeId::new(2), "Division", NodeRole::Junction, 217.8, 220.2));
    network.add_node(Node::new(NodeId::new(3), "North", NodeRole::Zone, 217.0, 218.2));
    network.add_node(Node::new(NodeId::new(4), "South", NodeRole::Zone, 216.8, 218.0));
    network
        .add_channel(
            Channel::trapezoidal(ChannelId::new(1), NodeId::new(1), NodeId::new(2), 2000.0, 4.0, 1.5)
                .with_capacity(12.0),
        )
        .unwrap();
    network
        .add_channel(
            Channel::trapezoidal(ChannelId::new(2), NodeId::new(2), NodeId::new(3), 1500.0, 1.5, 1.0)
                .with_roughness(0.02)
                .with_slope(0.0005)
                .with_capacity(4.0),
        )
        .unwrap();
    network
        .add_channel(
            Channel::trapezoidal(ChannelId::new(3), NodeId::new(2), NodeId::new(4), 1200.0, 2.0, 1.0)
                .with_roughness(0.02)
                .with_slope(0.0005)
                .with_capacity(5.0),
        )
        .unwrap();
    network
        .add_gate(Gate::automated(GateId::new(1), ChannelId::new(1), 0.5, 1.5, 3.0))
        .unwrap();
    network
        .add_gate(Gate::automated(GateId::new(2), ChannelId::new(2), 0.2, 1.0, 1.5))
        .unwrap();
    network
        .add_gate(Gate::automated(GateId::new(3), ChannelId::new(3), 0.25, 1.0, 2.0))
        .unwrap();
    network.to_snapshot()
}

fn delivery(id: usize, zone: usize, flow: f64, priority: u8) -> DeliveryRequest {
    DeliveryRequest {
        id: RequestId::new(id),
        target: NodeId::new(zone),
        required_flow: flow,
        required_volume: flow * 4.0 * 3600.0,
        target_elevation: 218.2,
        priority,
        crop: CropContext {
            crop_type: "rice".into(),
            growth_stage: "flowering".into(),
        },
        deadline: as_of() + Duration::hours(24),
    }
}

fn request() -> OptimizationRequest {
    OptimizationRequest::new(
        snapshot(),
        vec![delivery(1, 3, 2.0, 8), delivery(2, 4, 3.0, 5)],
    )
    .with_as_of(as_of())
}

#[test]
fn full_cycle_serves_both_zones() {
    let result = optimize(&request(), &OptimizerConfig::default()).unwrap();

    assert!(result.quality.is_actionable(), "quality was {}", result.quality);
    assert!(!result.timed_out);
    assert_eq!(result.as_of, as_of());
    assert_eq!(result.scope, vec![GateId::new(1), GateId::new(2), GateId::new(3)]);
    assert_eq!(result.gate_openings().len(), 3);
    assert!(result.contingency.is_none());
    assert!(!result.diagnostics.has_errors());

    for (id, zone, flow) in [(1, 3, 2.0), (2, 4, 3.0)] {
        let outcome = result.outcome(RequestId::new(id)).unwrap();
        assert_eq!(outcome.target, NodeId::new(zone));
        assert!(outcome.feasible);
        assert!(outcome.shortfall.unwrap() < 0.0);

        let path = outcome.path.as_ref().unwrap();
        assert_eq!(path.source, NodeId::new(1));
        assert_eq!(path.channels.first(), Some(&ChannelId::new(1)));
        assert_eq!(path.nodes.last(), Some(&NodeId::new(zone)));

        let delivered = outcome.delivered_flow.unwrap();
        assert!((delivered - flow).abs() < 0.05, "{} got {delivered}", outcome.request);

        let travel = outcome.travel_time.as_ref().unwrap();
        assert!(travel.reachable);
        assert!(travel.total_seconds.unwrap() > 0.0);
        assert!(outcome.energy_profile.is_some());
    }

    assert_eq!(result.schedule.slots.len(), 2);
    assert!(result.schedule.unscheduled.is_empty());
    assert_eq!(result.schedule.missed_deadlines(), 0);

    assert_eq!(result.junction_splits.len(), 1);
    let division = &result.junction_splits[0];
    assert_eq!(division.node, NodeId::new(2));
    assert_eq!(division.split.allocations.len(), 2);
    // both branches are gated, with heads measured from the division's bed
    assert!(division.split.allocations.iter().all(|a| a.opening.is_some()));
}

#[test]
fn head_shortfall_is_reported_not_raised() {
    let mut request = request();
    // Water surface required within 0.2 m of the headworks level
    request.requests[1].target_elevation = 220.8;

    let result = optimize(&request, &OptimizerConfig::default()).unwrap();
    let short = result.outcome(RequestId::new(2)).unwrap();
    assert!(!short.feasible);
    assert!(short.shortfall.unwrap() > 0.0);
    assert!(short.travel_time.is_none());
    assert!(result
        .diagnostics
        .issues_by_category("delivery")
        .any(|i| i.entity.as_deref() == Some("Request 2")));

    assert_eq!(result.schedule.order(), vec![RequestId::new(1)]);
    assert_eq!(result.schedule.unscheduled.len(), 1);
    assert_eq!(result.schedule.unscheduled[0].request, RequestId::new(2));

    // The infeasible request is not a target, so the south branch closes down
    let south = result.gate_settings.delivered_at(NodeId::new(4)).unwrap();
    assert!(south < 0.1, "south still receives {south}");
}

#[test]
fn trickle_delivery_beyond_horizon_is_unscheduled() {
    let mut request = request();
    request.requests[1].required_flow = 1e-4;
    request.requests[1].required_volume = 1e9;

    let result = optimize(&request, &OptimizerConfig::default()).unwrap();
    assert_eq!(result.schedule.order(), vec![RequestId::new(1)]);
    assert_eq!(result.schedule.unscheduled.len(), 1);
    assert_eq!(result.schedule.unscheduled[0].request, RequestId::new(2));
}

#[test]
fn invalid_request_is_rejected_with_diagnostics() {
    let mut request = request();
    request.requests[0].priority = 0;
    request.requests[1].target = NodeId::new(2);

    let err = optimize(&request, &OptimizerConfig::default()).unwrap_err();
    assert!(matches!(err, CanalError::Validation(_)));
    let diag = err.diagnostics().unwrap();
    assert_eq!(diag.issues_by_category("request").count(), 2);
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = OptimizerConfig::default();
    config.contingency.max_hops = 0;
    let err = optimize(&request(), &config).unwrap_err();
    assert!(matches!(err, CanalError::Config(_)));
}

#[test]
fn blocked_branch_strands_its_zone() {
    let request = request().with_blockages(vec![Blockage::channel(ChannelId::new(2))]);
    let result = optimize(&request, &OptimizerConfig::default()).unwrap();

    let contingency = result.contingency.as_ref().unwrap();
    assert_eq!(contingency.routes.stranded(), vec![NodeId::new(3)]);

    let south = contingency.routes.routes_for(NodeId::new(4)).unwrap();
    assert!(!south.candidates.is_empty());
    assert_eq!(south.candidates[0].channels, vec![ChannelId::new(1), ChannelId::new(3)]);

    let rerouted = &contingency.gate_settings;
    assert_eq!(rerouted.channel(ChannelId::new(2)).unwrap().flow, 0.0);
    assert!(rerouted.delivered_at(NodeId::new(3)).unwrap().abs() < 1e-12);
}

#[test]
fn repeated_runs_agree() {
    let request = request();
    let first = optimize(&request, &OptimizerConfig::default()).unwrap();
    let second = optimize(&request, &OptimizerConfig::default()).unwrap();

    assert_eq!(first.schedule.order(), second.schedule.order());
    assert_eq!(first.gate_openings(), second.gate_openings());
    assert_eq!(first.quality, second.quality);
}

#[test]
fn zero_budget_times_out_with_best_effort() {
    let request = request().with_timeout_ms(0);
    let result = optimize(&request, &OptimizerConfig::default()).unwrap();

    assert!(result.timed_out);
    assert_eq!(result.quality, SolutionQuality::TimedOut);
    // Seed openings come back unchanged
    assert_eq!(result.gate_openings()[&GateId::new(1)], 0.5);
}

#[test]
fn builder_without_solo_runs_uses_joint_openings() {
    let config = OptimizerConfig {
        solo_runs: false,
        ..OptimizerConfig::default()
    };
    let request = request();
    let result = DeliveryOptimization::new(&request)
        .with_config(config)
        .run()
        .unwrap();
    assert_eq!(result.schedule.slots.len(), 2);
    // Both slots target the same joint setting, so only the first moves gates
    assert_eq!(result.schedule.slots[1].movement, 0.0);
}

#[test]
fn request_parses_from_json() {
    let json = serde_json::json!({
        "network": snapshot(),
        "requests": [{
            "id": 7,
            "target": 4,
            "required_flow": 1.5,
            "required_volume": 5400.0,
            "target_elevation": 218.0,
            "priority": 6,
            "deadline": "2024-06-01T18:00:00Z"
        }],
        "blockages": [{"type": "derate", "channel": 3, "factor": 0.5}],
        "as_of": "2024-06-01T06:00:00Z"
    });
    let request: OptimizationRequest = serde_json::from_value(json).unwrap();
    assert_eq!(request.requests[0].crop, CropContext::default());
    assert_eq!(request.blockages, vec![Blockage::derate(ChannelId::new(3), 0.5)]);
    assert!(request.timeout_ms.is_none());

    let result = optimize(&request, &OptimizerConfig::default()).unwrap();
    let text = serde_json::to_string(&result).unwrap();
    assert!(text.contains("\"quality\""));
    assert!(text.contains("\"schedule\""));
}
