//! Metrics endpoint handler for Prometheus scraping.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Handler for the /metrics endpoint.
///
/// Exports the processes queried so far. Reading the cache never schedules
/// refreshes; only `/process/{pid}` does.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, MetricsError> {
    let start = Instant::now();
    debug!("Processing /metrics request");

    let samples = state.sampler.cached_samples();

    // Reset metrics before populating with fresh data
    state.metrics.reset();
    for sample in &samples {
        state.metrics.set_for_process(sample);
    }
    state.metrics.set_stats(&state.sampler.stats());

    let scrape_seconds = start.elapsed().as_secs_f64();
    state.scrape_duration.set(scrape_seconds);

    let families = state.registry.gather();
    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        error!("Failed to encode Prometheus metrics");
        return Err(MetricsError::EncodingFailed);
    }

    state.health_stats.record_http_request();
    state
        .health_stats
        .record_scrape(samples.len(), start.elapsed().as_secs_f64());

    debug!(
        "Metrics request completed: {} processes, {} bytes, {:.3}ms",
        samples.len(),
        buffer.len(),
        scrape_seconds * 1000.0
    );

    String::from_utf8(buffer).map_err(|_| MetricsError::EncodingFailed)
}
