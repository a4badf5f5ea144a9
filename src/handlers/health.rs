//! Health check endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str =
    "Project: https://github.com/herakles-io/herakles-proc-sampler - Support: proc-mem@herakles.io";

/// Handler for the /health endpoint.
///
/// 503 once the sampler has been shut down, 200 otherwise.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.health_stats.record_http_request();

    let stats = state.sampler.stats();
    let (status, message) = if state.sampler.is_shut_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "Sampler shut down")
    } else if !stats.privileged {
        (StatusCode::OK, "OK - unprivileged, other users' processes report zeros")
    } else {
        (StatusCode::OK, "OK")
    };

    let table = state.health_stats.render_table();

    let mut sampler_section = String::new();
    writeln!(sampler_section, "SAMPLER").ok();
    writeln!(sampler_section, "=======").ok();
    writeln!(sampler_section).ok();
    let policy = state.sampler.cache_policy();
    let rows: [(&str, String); 11] = [
        ("cached processes", stats.cached_processes.to_string()),
        ("max entries", policy.max_entries.to_string()),
        ("staleness window (ms)", policy.staleness_ms.to_string()),
        ("queries", stats.queries.to_string()),
        ("refreshes enqueued", stats.refreshes_enqueued.to_string()),
        ("refreshes completed", stats.refreshes_completed.to_string()),
        ("refreshes unavailable", stats.refreshes_unavailable.to_string()),
        ("evictions", stats.evictions.to_string()),
        ("workers", stats.pool.workers.to_string()),
        ("queued tasks", stats.pool.queued.to_string()),
        ("panicked tasks", stats.pool.panicked.to_string()),
    ];
    for (label, value) in rows {
        writeln!(sampler_section, "{:25} | {:>12}", label, value).ok();
    }

    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\n{table}\n{sampler_section}\n{FOOTER_TEXT}"),
    )
}
