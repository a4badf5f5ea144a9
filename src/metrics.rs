//! Prometheus metrics definitions for herakles-proc-sampler.
//!
//! Per-process gauges mirror the cached snapshots; the remaining gauges expose
//! sampler and worker pool activity.

use herakles_proc_sampler::{Sample, SamplerStats};
use prometheus::{Gauge, GaugeVec, Opts, Registry};

/// Collection of Prometheus metrics for sampled processes and sampler internals.
#[derive(Clone)]
pub struct SamplerMetrics {
    pub cpu_percent: GaugeVec,
    pub memory_bytes: GaugeVec,
    pub disk_read_rate: GaugeVec,
    pub disk_write_rate: GaugeVec,
    pub network_sent_rate: GaugeVec,
    pub network_received_rate: GaugeVec,
    pub sample_age: GaugeVec,

    // Sampler internals
    pub cached_processes: Gauge,
    pub queries: Gauge,
    pub refreshes_enqueued: Gauge,
    pub refreshes_completed: Gauge,
    pub refreshes_unavailable: Gauge,
    pub evictions: Gauge,
    pub pool_queued: Gauge,
    pub pool_panicked: Gauge,
    pub pool_dropped: Gauge,
    pub privileged: Gauge,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge, prometheus::Error> {
    let g = Gauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str) -> Result<GaugeVec, prometheus::Error> {
    let g = GaugeVec::new(Opts::new(name, help), &["pid", "name", "status"])?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

impl SamplerMetrics {
    /// Creates and registers all Prometheus metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            cpu_percent: gauge_vec(
                registry,
                "herakles_proc_sampler_cpu_percent",
                "CPU usage per process in percent of total machine capacity (all cores)",
            )?,
            memory_bytes: gauge_vec(
                registry,
                "herakles_proc_sampler_memory_bytes",
                "Resident working set per process in bytes",
            )?,
            disk_read_rate: gauge_vec(
                registry,
                "herakles_proc_sampler_disk_read_bytes_per_second",
                "Storage read rate per process",
            )?,
            disk_write_rate: gauge_vec(
                registry,
                "herakles_proc_sampler_disk_write_bytes_per_second",
                "Storage write rate per process",
            )?,
            network_sent_rate: gauge_vec(
                registry,
                "herakles_proc_sampler_network_sent_bytes_per_second",
                "Approximated send rate per process (half of non-storage I/O)",
            )?,
            network_received_rate: gauge_vec(
                registry,
                "herakles_proc_sampler_network_received_bytes_per_second",
                "Approximated receive rate per process (half of non-storage I/O)",
            )?,
            sample_age: gauge_vec(
                registry,
                "herakles_proc_sampler_sample_age_seconds",
                "Time since the last successful refresh per process",
            )?,
            cached_processes: gauge(
                registry,
                "herakles_proc_sampler_cached_processes",
                "Number of processes currently held in the cache",
            )?,
            queries: gauge(
                registry,
                "herakles_proc_sampler_queries_total",
                "Process queries served",
            )?,
            refreshes_enqueued: gauge(
                registry,
                "herakles_proc_sampler_refreshes_enqueued_total",
                "Background refreshes scheduled",
            )?,
            refreshes_completed: gauge(
                registry,
                "herakles_proc_sampler_refreshes_completed_total",
                "Background refreshes that read counters successfully",
            )?,
            refreshes_unavailable: gauge(
                registry,
                "herakles_proc_sampler_refreshes_unavailable_total",
                "Background refreshes for processes that were gone or inaccessible",
            )?,
            evictions: gauge(
                registry,
                "herakles_proc_sampler_evictions_total",
                "Cache entries dropped by TTL or capacity eviction",
            )?,
            pool_queued: gauge(
                registry,
                "herakles_proc_sampler_pool_queued_tasks",
                "Refresh tasks waiting for a worker",
            )?,
            pool_panicked: gauge(
                registry,
                "herakles_proc_sampler_pool_panicked_tasks_total",
                "Refresh tasks that panicked and were contained",
            )?,
            pool_dropped: gauge(
                registry,
                "herakles_proc_sampler_pool_dropped_tasks_total",
                "Refresh tasks dropped at shutdown",
            )?,
            privileged: gauge(
                registry,
                "herakles_proc_sampler_privileged",
                "Whether the sampler may inspect other users' processes (1) or not (0)",
            )?,
        })
    }

    /// Resets per-process metrics (used before updating with fresh data).
    pub fn reset(&self) {
        self.cpu_percent.reset();
        self.memory_bytes.reset();
        self.disk_read_rate.reset();
        self.disk_write_rate.reset();
        self.network_sent_rate.reset();
        self.network_received_rate.reset();
        self.sample_age.reset();
    }

    /// Sets metric values for one cached process.
    pub fn set_for_process(&self, sample: &Sample) {
        let pid = sample.pid.to_string();
        let snap = &sample.snapshot;
        let labels = &[pid.as_str(), snap.name.as_str(), sample.status.as_str()];

        self.cpu_percent.with_label_values(labels).set(snap.cpu_usage_percent);
        self.memory_bytes
            .with_label_values(labels)
            .set(snap.memory_bytes as f64);
        self.disk_read_rate
            .with_label_values(labels)
            .set(snap.disk_read_bytes_per_sec);
        self.disk_write_rate
            .with_label_values(labels)
            .set(snap.disk_write_bytes_per_sec);
        self.network_sent_rate
            .with_label_values(labels)
            .set(snap.network_sent_bytes_per_sec);
        self.network_received_rate
            .with_label_values(labels)
            .set(snap.network_received_bytes_per_sec);
        if let Some(age_ms) = sample.age_ms {
            self.sample_age
                .with_label_values(labels)
                .set(age_ms as f64 / 1000.0);
        }
    }

    /// Copies sampler counters into the internal gauges.
    pub fn set_stats(&self, stats: &SamplerStats) {
        self.cached_processes.set(stats.cached_processes as f64);
        self.queries.set(stats.queries as f64);
        self.refreshes_enqueued.set(stats.refreshes_enqueued as f64);
        self.refreshes_completed.set(stats.refreshes_completed as f64);
        self.refreshes_unavailable
            .set(stats.refreshes_unavailable as f64);
        self.evictions.set(stats.evictions as f64);
        self.pool_queued.set(stats.pool.queued as f64);
        self.pool_panicked.set(stats.pool.panicked as f64);
        self.pool_dropped.set(stats.pool.dropped as f64);
        self.privileged.set(if stats.privileged { 1.0 } else { 0.0 });
    }
}
