//! Common CLI types and utilities shared across commands.

use anyhow::{Context, Result};
use canal_algo::OptimizationRequest;
use canal_core::{Network, NetworkSnapshot};
use clap::ValueEnum;
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

/// Output format for tabular/structured data.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table (default for interactive use)
    #[default]
    Table,
    /// Pretty-printed JSON (pipe-friendly, structured)
    Json,
}

/// Read a whole input file; `-` means stdin.
pub fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("reading stdin")?;
        return Ok(buffer);
    }
    fs::read_to_string(path).with_context(|| format!("reading {path}"))
}

pub fn load_request(path: &str) -> Result<OptimizationRequest> {
    let text = read_input(path)?;
    serde_json::from_str(&text).with_context(|| format!("parsing request {path}"))
}

/// Load a network from either a bare snapshot or a full request file.
pub fn load_network(path: &str) -> Result<Network> {
    let text = read_input(path)?;
    let mut value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {path}"))?;
    if let Some(network) = value.get_mut("network") {
        value = network.take();
    }
    let snapshot: NetworkSnapshot =
        serde_json::from_value(value).with_context(|| format!("{path} does not hold a network"))?;
    Ok(Network::from_snapshot(snapshot)?)
}

/// Write `text` to `out`, or stdout when no path is given.
pub fn write_output(out: Option<&Path>, text: &str) -> Result<()> {
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, text).with_context(|| format!("writing {}", path.display()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                writeln!(stdout)?;
            }
            Ok(())
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output to JSON")?;
    write_output(None, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canal_core::{Channel, ChannelId, Node, NodeId, NodeRole};

    fn snapshot() -> NetworkSnapshot {
        let mut network = Network::new();
        network.add_node(Node::new(NodeId::new(1), "S", NodeRole::Source, 218.0, 221.0));
        network.add_node(Node::new(NodeId::new(2), "Z", NodeRole::Zone, 217.0, 218.0));
        network
            .add_channel(Channel::trapezoidal(
                ChannelId::new(1),
                NodeId::new(1),
                NodeId::new(2),
                1000.0,
                2.0,
                1.0,
            ))
            .unwrap();
        network.to_snapshot()
    }

    #[test]
    fn loads_bare_snapshot_and_request_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("net.json");
        let wrapped = dir.path().join("request.json");
        fs::write(&bare, serde_json::to_string(&snapshot()).unwrap()).unwrap();
        fs::write(
            &wrapped,
            serde_json::json!({ "network": snapshot(), "requests": [] }).to_string(),
        )
        .unwrap();

        for path in [&bare, &wrapped] {
            let network = load_network(path.to_str().unwrap()).unwrap();
            assert_eq!(network.graph.node_count(), 2);
            assert_eq!(network.graph.edge_count(), 1);
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_network("does/not/exist.json").unwrap_err();
        assert!(err.to_string().contains("does/not/exist.json"));
    }

    #[test]
    fn write_output_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/result.json");
        write_output(Some(&out), "{}").unwrap();
        assert_eq!(fs::read_to_string(out).unwrap(), "{}");
    }
}
