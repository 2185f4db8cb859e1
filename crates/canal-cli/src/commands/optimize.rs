use std::path::Path;

use anyhow::{bail, Context, Result};
use canal_algo::{optimize, OptimizerConfig};
use canal_cli::common::{load_request, write_output};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub fn handle(
    request_path: &str,
    out: Option<&Path>,
    timeout_ms: Option<u64>,
    as_of: Option<DateTime<Utc>>,
    strict: bool,
    config: &OptimizerConfig,
) -> Result<()> {
    let mut request = load_request(request_path)?;
    if timeout_ms.is_some() {
        request.timeout_ms = timeout_ms;
    }
    if as_of.is_some() {
        request.as_of = as_of;
    }
    info!(
        "optimizing {} request(s), {} blockage(s) from {request_path}",
        request.requests.len(),
        request.blockages.len()
    );

    let result = optimize(&request, config)?;
    for issue in result.diagnostics.warnings() {
        warn!("{issue}");
    }
    info!(
        "{}: {} scheduled, {} unscheduled, {} recovery site(s), {} ms",
        result.quality,
        result.schedule.slots.len(),
        result.schedule.unscheduled.len(),
        result.energy_recovery.sites.len(),
        result.solve_time_ms
    );

    let text = serde_json::to_string_pretty(&result).context("serializing result")?;
    write_output(out, &text)?;
    if let Some(path) = out {
        info!("wrote result to {}", path.display());
    }

    if strict && !result.quality.is_actionable() {
        bail!("gate settings are {}; not safe to apply", result.quality);
    }
    Ok(())
}
