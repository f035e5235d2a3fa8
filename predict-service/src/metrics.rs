//! Prometheus metrics for pipeline observability
//!
//! When a scrape address is configured the exporter serves `/metrics` on it.
//! Without a recorder installed every call below is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::pipeline::PipelineState;

/// Metric names
pub const RECORDS_TOTAL: &str = "predict_records_total";
pub const RECORD_LATENCY: &str = "predict_latency_seconds";
pub const DEAD_LETTERS_TOTAL: &str = "predict_dead_letters_total";
pub const PIPELINE_STATE: &str = "predict_pipeline_state";

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()?;

    // Describe metrics for Prometheus
    describe_counter!(RECORDS_TOTAL, "Records processed, labelled by result");
    describe_histogram!(RECORD_LATENCY, "Decode, predict and encode latency in seconds");
    describe_counter!(DEAD_LETTERS_TOTAL, "Failed records routed to the dead-letter topic");
    describe_gauge!(PIPELINE_STATE, "Current pipeline state (0 idle .. 4 failed)");
    describe_counter!(
        inference_engine::registry::ENGINE_LOADS_TOTAL,
        "Engine constructions, labelled by result"
    );
    describe_histogram!(
        inference_engine::registry::ENGINE_LOAD_SECONDS,
        "Engine construction time in seconds"
    );

    tracing::info!(listen = %listen, "Metrics exporter listening");
    Ok(())
}

// ============================================================================
// Record Metrics
// ============================================================================

/// Record a successfully scored record
pub fn record_success(latency: Duration) {
    counter!(RECORDS_TOTAL, "result" => "success").increment(1);
    histogram!(RECORD_LATENCY).record(latency.as_secs_f64());
}

/// Record a failed record, labelled by failure kind
pub fn record_failure(kind: &'static str) {
    counter!(RECORDS_TOTAL, "result" => kind).increment(1);
}

/// Record a message routed to the dead-letter topic
pub fn record_dead_letter() {
    counter!(DEAD_LETTERS_TOTAL).increment(1);
}

// ============================================================================
// Pipeline Metrics
// ============================================================================

pub fn set_pipeline_state(state: PipelineState) {
    gauge!(PIPELINE_STATE).set(f64::from(state.code()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_success(Duration::from_millis(3));
        record_failure("decode");
        record_dead_letter();
        set_pipeline_state(PipelineState::Running);
    }
}
