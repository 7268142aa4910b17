use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);

    metrics::describe_counter!(
        "sandbox_executions_total",
        "Code executions by terminal status, including timeouts and unavailability"
    );
    metrics::describe_histogram!(
        "sandbox_execution_seconds",
        "Wall-clock time from submit to terminal status"
    );
    metrics::describe_counter!("grading_submissions_total", "Graded submissions by letter grade");
    metrics::describe_counter!("placement_attempts_total", "Graded placement attempts");

    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
