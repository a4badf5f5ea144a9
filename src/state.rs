//! Application state shared by the HTTP handlers.

use herakles_proc_sampler::Sampler;
use prometheus::{Gauge, Registry};
use std::sync::Arc;

use crate::health_stats::HealthStats;
use crate::metrics::SamplerMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub registry: Registry,
    pub metrics: SamplerMetrics,
    pub scrape_duration: Gauge,
    pub sampler: Arc<Sampler>,
    pub health_stats: Arc<HealthStats>,
}

impl AppState {
    /// Registers the metric set and wraps the sampler for the router.
    pub fn new(sampler: Arc<Sampler>) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let metrics = SamplerMetrics::new(&registry)?;
        let scrape_duration = Gauge::new(
            "herakles_proc_sampler_scrape_duration_seconds",
            "Time spent serving the last /metrics request",
        )?;
        registry.register(Box::new(scrape_duration.clone()))?;

        Ok(Self {
            registry,
            metrics,
            scrape_duration,
            sampler,
            health_stats: Arc::new(HealthStats::new()),
        })
    }
}
