use assert_cmd::Command;
use canal_core::{Channel, ChannelId, Gate, GateId, Network, NetworkSnapshot, Node, NodeId, NodeRole};
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

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

fn request_json() -> Value {
    json!({
        "network": snapshot(),
        "requests": [
            {
                "id": 1,
                "target": 3,
                "required_flow": 2.0,
                "required_volume": 28800.0,
                "target_elevation": 218.2,
                "priority": 8,
                "crop": {"crop_type": "rice", "growth_stage": "flowering"},
                "deadline": "2024-06-02T06:00:00Z"
            },
            {
                "id": 2,
                "target": 4,
                "required_flow": 3.0,
                "required_volume": 43200.0,
                "target_elevation": 218.0,
                "priority": 5,
                "deadline": "2024-06-02T06:00:00Z"
            }
        ],
        "as_of": "2024-06-01T06:00:00Z"
    })
}

fn write_json(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn canal() -> Command {
    Command::cargo_bin("canal").unwrap()
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn help_lists_commands() {
    canal()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("optimize"))
        .stdout(predicate::str::contains("normal-depth"))
        .stdout(predicate::str::contains("route"));
}

#[test]
fn normal_depth_main_canal_scenario() {
    let output = canal()
        .args([
            "normal-depth",
            "--flow",
            "20",
            "--bed-width",
            "6",
            "--side-slope",
            "1.5",
            "--slope",
            "0.00018",
            "--manning-n",
            "0.025",
            "--format",
            "json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    let depth = value["depth"].as_f64().unwrap();
    let velocity = value["velocity"].as_f64().unwrap();
    assert!((depth - 2.63).abs() < 0.01, "depth {depth}");
    assert!((velocity - 0.76).abs() < 0.01, "velocity {velocity}");
    assert_eq!(value["converged"], json!(true));
}

#[test]
fn normal_depth_table_output() {
    canal()
        .args([
            "normal-depth",
            "--flow",
            "3",
            "--bed-width",
            "2",
            "--side-slope",
            "1",
            "--slope",
            "0.0005",
            "--manning-n",
            "0.02",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Depth"))
        .stdout(predicate::str::contains("converged"));
}

#[test]
fn optimize_writes_json_result_to_stdout() {
    let dir = tempdir().unwrap();
    let request = write_json(&dir, "request.json", &request_json());

    let output = canal().args(["optimize", arg(&request)]).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    let quality = result["quality"].as_str().unwrap();
    assert!(quality == "optimal" || quality == "feasible", "quality {quality}");
    assert_eq!(result["as_of"], json!("2024-06-01T06:00:00Z"));
    assert_eq!(result["request_outcomes"].as_array().unwrap().len(), 2);
    assert_eq!(result["schedule"]["slots"].as_array().unwrap().len(), 2);
    assert_eq!(result["scope"], json!([1, 2, 3]));
}

#[test]
fn optimize_writes_out_file_and_honours_config() {
    let dir = tempdir().unwrap();
    let request = write_json(&dir, "request.json", &request_json());
    let config = dir.path().join("canal.toml");
    fs::write(&config, "solo_runs = false\n\n[sequencer]\nmax_two_opt_passes = 0\n").unwrap();
    let out = dir.path().join("results/cycle.json");

    canal()
        .args([
            "optimize",
            arg(&request),
            "--out",
            arg(&out),
            "--config",
            arg(&config),
        ])
        .assert()
        .success();

    let result: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(result["schedule"]["two_opt_passes"], json!(0));
}

#[test]
fn optimize_reads_stdin() {
    canal()
        .args(["optimize", "-"])
        .write_stdin(request_json().to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"gate_settings\""));
}

#[test]
fn optimize_rejects_invalid_request() {
    let dir = tempdir().unwrap();
    let mut value = request_json();
    value["requests"][0]["priority"] = json!(11);
    let request = write_json(&dir, "bad.json", &value);

    canal()
        .args(["optimize", arg(&request)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Validation error"));
}

#[test]
fn strict_mode_fails_on_timeout() {
    let dir = tempdir().unwrap();
    let request = write_json(&dir, "request.json", &request_json());

    canal()
        .args(["optimize", arg(&request), "--timeout-ms", "0", "--strict"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"timed_out\": true"))
        .stderr(predicate::str::contains("not safe to apply"));
}

#[test]
fn feasibility_verdicts() {
    let dir = tempdir().unwrap();
    let network = write_json(&dir, "network.json", &json!(snapshot()));

    canal()
        .args([
            "feasibility",
            arg(&network),
            "--zone",
            "3",
            "--flow",
            "2.0",
            "--target-elevation",
            "218.2",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Node 1 -> Node 2 -> Node 3"))
        .stdout(predicate::str::contains("Verdict       : FEASIBLE"));

    canal()
        .args([
            "feasibility",
            arg(&network),
            "--zone",
            "3",
            "--flow",
            "2.0",
            "--target-elevation",
            "220.8",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("INFEASIBLE"));
}

#[test]
fn route_reports_stranded_zone() {
    let dir = tempdir().unwrap();
    let request = write_json(&dir, "request.json", &request_json());

    let output = canal()
        .args([
            "route",
            arg(&request),
            "--zone",
            "3",
            "--zone",
            "4",
            "--flow",
            "2.0",
            "--target-elevation",
            "218.2",
            "--block-channel",
            "2",
            "--format",
            "json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    let destinations = report["destinations"].as_array().unwrap();
    assert_eq!(destinations.len(), 2);
    assert_eq!(destinations[0]["destination"], json!(3));
    assert!(destinations[0]["candidates"].as_array().unwrap().is_empty());
    assert_eq!(destinations[1]["candidates"][0]["channels"], json!([1, 3]));
}

#[test]
fn route_table_marks_stranded() {
    let dir = tempdir().unwrap();
    let network = write_json(&dir, "network.json", &json!(snapshot()));

    canal()
        .args([
            "route",
            arg(&network),
            "--zone",
            "3",
            "--target-elevation",
            "218.2",
            "--block-gate",
            "2",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("stranded"));
}

#[test]
fn graph_export_and_stats() {
    let dir = tempdir().unwrap();
    let network = write_json(&dir, "network.json", &json!(snapshot()));

    canal()
        .args(["graph", "export", arg(&network)])
        .assert()
        .success()
        .stdout(predicate::str::contains("digraph canal_network"))
        .stdout(predicate::str::contains("C1 / G1"));

    canal()
        .args(["graph", "stats", arg(&network)])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nodes         : 4"))
        .stdout(predicate::str::contains("Channels      : 3"));

    canal()
        .args(["graph", "islands", arg(&network), "--emit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Island 0: 4 node(s)"));
}

#[test]
fn config_show_and_check() {
    let dir = tempdir().unwrap();
    let defaults = dir.path().join("defaults.toml");

    let output = canal()
        .args(["config", "show", "--config", arg(&defaults)])
        .output()
        .unwrap();
    // Explicit config that does not exist is an error
    assert!(!output.status.success());

    let shown = canal().args(["config", "show"]).env("XDG_CONFIG_HOME", dir.path()).output().unwrap();
    assert!(shown.status.success());
    let text = String::from_utf8(shown.stdout).unwrap();
    assert!(text.contains("[gate.weights]"));
    fs::write(&defaults, &text).unwrap();

    canal()
        .args(["config", "check", arg(&defaults)])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));

    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "[gate]\nmin_velocity = 3.0\nmax_velocity = 2.0\n").unwrap();
    canal()
        .args(["config", "check", arg(&bad)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("velocity limits"));
}
