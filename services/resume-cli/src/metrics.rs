//! Prometheus metrics exposition
//!
//! The library crates record:
//!
//! - `session_renewals_total` (counter): label `outcome`
//! - `session_replays_total` (counter)
//! - `poll_attempts_total` (counter)
//! - `poll_outcomes_total` (counter): label `outcome`
//!
//! The binary adds `cli_commands_total` (labels `command`, `outcome`) and
//! `cli_command_duration_seconds`. With `--metrics` the snapshot is printed
//! to stderr when the command finishes.

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 180.0];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("cli_command_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record a finished command.
pub fn record_command(command: &'static str, ok: bool, duration_secs: f64) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!("cli_commands_total", "command" => command, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("cli_command_duration_seconds", "command" => command)
        .record(duration_secs);
}
