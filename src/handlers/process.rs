//! Per-process query endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use herakles_proc_sampler::Sample;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for `/process/{pid}`.
///
/// Answers from the cache and schedules a background refresh when the entry
/// is stale, so the first request for a pid returns a pending zero sample.
#[instrument(skip(state))]
pub async fn process_handler(
    State(state): State<SharedState>,
    Path(pid): Path<u32>,
) -> Json<Sample> {
    let start = Instant::now();
    let sample = state.sampler.sample(pid);

    state.health_stats.record_http_request();
    state
        .health_stats
        .record_query(start.elapsed().as_secs_f64());
    debug!("pid {} answered with status {}", pid, sample.status.as_str());

    Json(sample)
}

/// Handler for `/processes`. Lists cached samples without scheduling refreshes.
#[instrument(skip(state))]
pub async fn processes_handler(State(state): State<SharedState>) -> Json<Vec<Sample>> {
    state.health_stats.record_http_request();
    Json(state.sampler.cached_samples())
}
