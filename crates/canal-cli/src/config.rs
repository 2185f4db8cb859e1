//! Optimizer configuration loading.
//!
//! An explicit `--config` file wins; otherwise `canal/config.toml` under the
//! user's config directory is used when it exists, and built-in defaults
//! when it does not. Every key is optional.

use anyhow::{Context, Result};
use canal_algo::OptimizerConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of the user configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("canal").join("config.toml"))
}

/// Parse and validate configuration text.
pub fn parse_config(contents: &str) -> Result<OptimizerConfig> {
    let config: OptimizerConfig = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config_file(path: &Path) -> Result<OptimizerConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("invalid config {}", path.display()))
}

/// Resolve the configuration for this run.
pub fn load_config(explicit: Option<&Path>) -> Result<OptimizerConfig> {
    if let Some(path) = explicit {
        debug!("loading config from {}", path.display());
        return load_config_file(path);
    }
    match default_config_path() {
        Some(path) if path.exists() => {
            debug!("loading config from {}", path.display());
            load_config_file(&path)
        }
        _ => Ok(OptimizerConfig::default()),
    }
}

/// Render a configuration as TOML.
pub fn render_config(config: &OptimizerConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(parse_config("").unwrap(), OptimizerConfig::default());
    }

    #[test]
    fn partial_sections_override_defaults() {
        let config = parse_config(
            r#"
solo_runs = false

[gate]
max_velocity = 1.5

[gate.weights]
flow_deviation = 2.0

[sequencer]
max_two_opt_passes = 5
"#,
        )
        .unwrap();
        assert!(!config.solo_runs);
        assert_eq!(config.gate.max_velocity, 1.5);
        assert_eq!(config.gate.weights.flow_deviation, 2.0);
        assert_eq!(config.gate.weights.gate_movement, 0.05);
        assert_eq!(config.sequencer.max_two_opt_passes, 5);
        assert_eq!(config.contingency.max_hops, 10);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = parse_config("[feasibility]\nsafety_factor = 0.5\n").unwrap_err();
        assert!(err.to_string().contains("safety factor"));
    }

    #[test]
    fn rendered_defaults_parse_back() {
        let text = render_config(&OptimizerConfig::default()).unwrap();
        assert!(text.contains("[gate.weights]"));
        assert_eq!(parse_config(&text).unwrap(), OptimizerConfig::default());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/canal.toml"))).is_err());
    }
}
