//! The public sampling facade.
//!
//! `Sampler::query_process` returns whatever the cache holds for a PID right
//! away. If that value is older than the staleness window, a refresh is
//! queued on the worker pool; the OS read happens there, never on the
//! caller's thread. Callers therefore see data that lags by at most one
//! refresh interval, and an inaccessible process simply keeps returning its
//! last good (or default) snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{CachePolicy, ProcessCache, RefreshTicket};
use crate::clock::{Clock, MonotonicClock};
use crate::config::SamplerConfig;
use crate::counters::{CounterAccessor, NoPrivileges, PrivilegeProvider};
use crate::pool::{PoolError, PoolStats, WorkerPool};
use crate::procfs::{self, ProcfsAccessor, ProcfsPrivileges};
use crate::snapshot::{ProcessSnapshot, Sample};

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] PoolError),
}

#[derive(Default)]
struct Counters {
    queries: AtomicU64,
    refreshes_enqueued: AtomicU64,
    refreshes_completed: AtomicU64,
    refreshes_unavailable: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time copy of the sampler's activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub queries: u64,
    pub refreshes_enqueued: u64,
    pub refreshes_completed: u64,
    pub refreshes_unavailable: u64,
    pub evictions: u64,
    pub cached_processes: usize,
    pub privileged: bool,
    pub pool: PoolStats,
}

/// State shared between the facade and refresh tasks.
struct Shared {
    cache: ProcessCache,
    accessor: Arc<dyn CounterAccessor>,
    privileges: Arc<dyn PrivilegeProvider>,
    clock: Arc<dyn Clock>,
    logical_cpus: usize,
    counters: Counters,
}

impl Shared {
    fn refresh(&self, ticket: RefreshTicket) {
        let pid = ticket.pid;
        self.privileges.ensure_capability();

        match self.accessor.read_counters(pid) {
            Ok(counters) => {
                let now = self.clock.now_ms();
                self.cache.apply_refresh(ticket, counters, now, self.logical_cpus);
                self.counters.refreshes_completed.fetch_add(1, Ordering::Relaxed);
                debug!("Refreshed pid {}", pid);
            }
            Err(e) => {
                self.cache.mark_unavailable(ticket);
                self.counters.refreshes_unavailable.fetch_add(1, Ordering::Relaxed);
                debug!("Process {} unavailable: {}", pid, e);
            }
        }
    }
}

/// Clears the in-flight flag unless the refresh it belongs to ran to completion.
struct InFlightGuard {
    shared: Arc<Shared>,
    pid: u32,
    armed: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.cache.release(self.pid);
        }
    }
}

/// Builder for a `Sampler` with custom collaborators.
pub struct SamplerBuilder {
    config: SamplerConfig,
    accessor: Option<Arc<dyn CounterAccessor>>,
    privileges: Option<Arc<dyn PrivilegeProvider>>,
    clock: Option<Arc<dyn Clock>>,
    logical_cpus: Option<usize>,
}

impl SamplerBuilder {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            accessor: None,
            privileges: None,
            clock: None,
            logical_cpus: None,
        }
    }

    pub fn accessor(mut self, accessor: Arc<dyn CounterAccessor>) -> Self {
        self.accessor = Some(accessor);
        self
    }

    pub fn privileges(mut self, privileges: Arc<dyn PrivilegeProvider>) -> Self {
        self.privileges = Some(privileges);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn logical_cpus(mut self, cpus: usize) -> Self {
        self.logical_cpus = Some(cpus.max(1));
        self
    }

    /// Start the worker pool and return the ready sampler.
    ///
    /// Unset collaborators default to /proc readers, a monotonic clock and the
    /// online CPU count. The privilege check runs once here.
    pub fn build(self) -> Result<Sampler, SamplerError> {
        let config = self.config;
        let accessor = self
            .accessor
            .unwrap_or_else(|| Arc::new(ProcfsAccessor::with_root(config.proc_root.clone())));
        let privileges: Arc<dyn PrivilegeProvider> = match self.privileges {
            Some(p) => p,
            None if config.request_privileges => {
                Arc::new(ProcfsPrivileges::with_root(config.proc_root.clone()))
            }
            None => Arc::new(NoPrivileges),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let logical_cpus = self.logical_cpus.unwrap_or_else(procfs::logical_cpu_count);

        let privileged = privileges.ensure_capability();
        let pool = WorkerPool::new(config.workers)?;

        info!(
            "Sampler started: {} workers, {} logical CPUs, staleness {}ms, privileged={}",
            config.workers.max(1),
            logical_cpus,
            config.cache.staleness_ms,
            privileged
        );

        Ok(Sampler {
            shared: Arc::new(Shared {
                cache: ProcessCache::new(config.cache),
                accessor,
                privileges,
                clock,
                logical_cpus,
                counters: Counters::default(),
            }),
            pool,
        })
    }
}

/// Cached per-process telemetry sampler.
///
/// Safe to share between threads (`&Sampler` or `Arc<Sampler>`). Dropping it
/// shuts the pool down and clears the cache.
pub struct Sampler {
    shared: Arc<Shared>,
    pool: WorkerPool,
}

impl Sampler {
    /// Sampler reading /proc with the given settings.
    pub fn new(config: SamplerConfig) -> Result<Self, SamplerError> {
        SamplerBuilder::new(config).build()
    }

    pub fn builder(config: SamplerConfig) -> SamplerBuilder {
        SamplerBuilder::new(config)
    }

    /// Last known snapshot for `pid`. Never blocks on OS reads and never fails.
    pub fn query_process(&self, pid: u32) -> ProcessSnapshot {
        self.sample(pid).snapshot
    }

    /// Like `query_process`, with the freshness status attached.
    pub fn sample(&self, pid: u32) -> Sample {
        let shared = &self.shared;
        shared.counters.queries.fetch_add(1, Ordering::Relaxed);

        let now = shared.clock.now_ms();
        let allow_refresh = !self.pool.is_closed();
        let lookup = shared.cache.lookup(pid, now, allow_refresh);

        if lookup.evicted > 0 {
            shared
                .counters
                .evictions
                .fetch_add(lookup.evicted as u64, Ordering::Relaxed);
            debug!("Evicted {} cache entries", lookup.evicted);
        }

        if let Some(ticket) = lookup.ticket {
            self.schedule(ticket);
        }

        lookup.sample
    }

    fn schedule(&self, ticket: RefreshTicket) {
        let pid = ticket.pid;
        // Moves into the task, so a rejected or discarded task still releases the flag.
        let guard = InFlightGuard {
            shared: Arc::clone(&self.shared),
            pid,
            armed: true,
        };
        let task = move || {
            let mut guard = guard;
            guard.shared.refresh(ticket);
            guard.armed = false;
        };

        match self.pool.enqueue(task) {
            Ok(()) => {
                self.shared
                    .counters
                    .refreshes_enqueued
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!("Refresh for pid {} not scheduled: {}", pid, e);
            }
        }
    }

    /// Samples for every PID currently cached, without scheduling refreshes.
    pub fn cached_samples(&self) -> Vec<Sample> {
        let now = self.shared.clock.now_ms();
        self.shared.cache.samples(now)
    }

    /// Run TTL and capacity eviction now. Returns the number of dropped entries.
    pub fn evict_expired(&self) -> usize {
        let now = self.shared.clock.now_ms();
        let evicted = self.shared.cache.evict(now);
        self.shared
            .counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    pub fn logical_cpus(&self) -> usize {
        self.shared.logical_cpus
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.shared.cache.policy()
    }

    pub fn stats(&self) -> SamplerStats {
        let c = &self.shared.counters;
        SamplerStats {
            queries: c.queries.load(Ordering::Relaxed),
            refreshes_enqueued: c.refreshes_enqueued.load(Ordering::Relaxed),
            refreshes_completed: c.refreshes_completed.load(Ordering::Relaxed),
            refreshes_unavailable: c.refreshes_unavailable.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            cached_processes: self.shared.cache.len(),
            privileged: self.shared.privileges.ensure_capability(),
            pool: self.pool.stats(),
        }
    }

    /// Stop background refreshes. Queued refreshes are dropped; the cache stays
    /// readable and later queries return the last snapshots without scheduling work.
    pub fn shutdown(&self) {
        if self.pool.is_closed() {
            return;
        }
        self.pool.shutdown();
        info!("Sampler shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.pool.is_closed()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.shutdown();
        self.shared.cache.clear();
    }
}
