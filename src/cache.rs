//! Per-process cache of computed snapshots and the counters behind them.
//!
//! Readers always get the current entry back immediately. When an entry is
//! older than the staleness window the lookup hands out a `RefreshTicket`,
//! and the entry is marked in flight so no second ticket is issued for the
//! same PID until the refresh finishes or is released.
//!
//! The map sits behind a single mutex. It is held for map lookups, copies
//! and flag updates only, never while counters are being read from the OS.

use ahash::AHashMap as HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::counters::{CpuTimes, IoCounters, RawCounters};
use crate::rates::{self, Timed};
use crate::snapshot::{ProcessSnapshot, Sample, SampleStatus};

/// Staleness and retention limits for the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Age after which a lookup schedules a refresh.
    pub staleness_ms: u64,
    /// Entries not refreshed for this long are dropped.
    pub entry_ttl_ms: u64,
    /// Upper bound on the number of tracked PIDs.
    pub max_entries: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            staleness_ms: 1000,
            entry_ttl_ms: 300_000,
            max_entries: 4096,
        }
    }
}

/// Cached state for one PID.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub snapshot: ProcessSnapshot,
    /// Monotonic ms of the last refresh attempt (stamped when scheduled).
    pub last_update_ms: Option<u64>,
    /// Monotonic ms of the last refresh that read counters successfully.
    pub last_success_ms: Option<u64>,
    pub refresh_in_flight: bool,
    unavailable: bool,
    start_time: Option<u64>,
    previous_cpu: Option<Timed<CpuTimes>>,
    previous_io: Option<Timed<IoCounters>>,
}

impl CacheEntry {
    fn status(&self, now_ms: u64, staleness_ms: u64) -> SampleStatus {
        if self.unavailable {
            return SampleStatus::Unavailable;
        }
        match self.last_success_ms {
            None => SampleStatus::Pending,
            Some(at) if now_ms.saturating_sub(at) < staleness_ms => SampleStatus::Fresh,
            Some(_) => SampleStatus::Stale,
        }
    }

    fn is_stale(&self, now_ms: u64, staleness_ms: u64) -> bool {
        match self.last_update_ms {
            None => true,
            Some(at) => now_ms.saturating_sub(at) >= staleness_ms,
        }
    }

    /// Forget everything tied to the previous owner of a reused PID.
    fn rebaseline(&mut self) {
        self.snapshot = ProcessSnapshot::default();
        self.previous_cpu = None;
        self.previous_io = None;
        self.last_success_ms = None;
    }
}

/// Permission to refresh one PID, issued by `ProcessCache::lookup`.
///
/// Carries only the PID. The holder must finish with `apply_refresh`,
/// `mark_unavailable` or `release`.
#[derive(Debug, PartialEq, Eq)]
pub struct RefreshTicket {
    pub pid: u32,
}

/// Result of a cache read.
#[derive(Debug)]
pub struct Lookup {
    pub sample: Sample,
    pub ticket: Option<RefreshTicket>,
    /// Entries dropped by eviction during this lookup.
    pub evicted: usize,
}

struct CacheState {
    entries: HashMap<u32, CacheEntry>,
    last_sweep_ms: Option<u64>,
}

/// Shared PID → entry map.
pub struct ProcessCache {
    state: Mutex<CacheState>,
    policy: CachePolicy,
}

impl ProcessCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                last_sweep_ms: None,
            }),
            policy,
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Entry updates are plain field stores, a poisoned map is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read the entry for `pid`, creating it on first use.
    ///
    /// With `allow_refresh` set, a stale entry that has no refresh in flight
    /// is stamped with `now_ms`, marked in flight, and a ticket is returned.
    pub fn lookup(&self, pid: u32, now_ms: u64, allow_refresh: bool) -> Lookup {
        let mut state = self.lock();
        let mut evicted = 0;

        let sweep_due = state
            .last_sweep_ms
            .map_or(true, |at| now_ms.saturating_sub(at) >= self.policy.staleness_ms);
        if sweep_due {
            evicted += evict_expired(&mut state.entries, now_ms, self.policy.entry_ttl_ms);
            state.last_sweep_ms = Some(now_ms);
        }

        if !state.entries.contains_key(&pid) && state.entries.len() >= self.policy.max_entries {
            evicted += evict_oldest(&mut state.entries, self.policy.max_entries.saturating_sub(1));
        }

        let staleness_ms = self.policy.staleness_ms;
        let entry = state.entries.entry(pid).or_default();

        let mut ticket = None;
        if allow_refresh && !entry.refresh_in_flight && entry.is_stale(now_ms, staleness_ms) {
            entry.refresh_in_flight = true;
            entry.last_update_ms = Some(now_ms);
            ticket = Some(RefreshTicket { pid });
        }

        let sample = Sample {
            pid,
            snapshot: entry.snapshot.clone(),
            status: entry.status(now_ms, staleness_ms),
            age_ms: entry.last_success_ms.map(|at| now_ms.saturating_sub(at)),
        };

        Lookup {
            sample,
            ticket,
            evicted,
        }
    }

    /// Fold freshly read counters into the entry and clear its in-flight flag.
    ///
    /// Rates are left untouched when `now_ms` does not advance past the
    /// previous read. A changed start time means the PID was reused, so the
    /// entry starts over from a first sample.
    pub fn apply_refresh(&self, ticket: RefreshTicket, counters: RawCounters, now_ms: u64, logical_cpus: usize) {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(&ticket.pid) else {
            debug!("Dropping refresh for pid {}: entry no longer cached", ticket.pid);
            return;
        };

        if entry.start_time.is_some_and(|t| t != counters.start_time) {
            debug!("PID {} was reused, resetting cached baseline", ticket.pid);
            entry.rebaseline();
        }
        entry.start_time = Some(counters.start_time);

        if entry.snapshot.name.is_empty() {
            if let Some(name) = counters.name {
                entry.snapshot.name = name;
            }
        }
        entry.snapshot.memory_bytes = counters.memory_working_set;

        let cpu_now = Timed::new(counters.cpu, now_ms);
        match entry.previous_cpu {
            Some(prev) => {
                if let Some(pct) = rates::cpu_percent(&prev, &cpu_now, logical_cpus) {
                    entry.snapshot.cpu_usage_percent = pct;
                    entry.previous_cpu = Some(cpu_now);
                }
            }
            None => entry.previous_cpu = Some(cpu_now),
        }

        if let Some(io) = counters.io {
            let io_now = Timed::new(io, now_ms);
            match entry.previous_io {
                Some(prev) => {
                    if let Some(io_rates) = rates::io_rates(&prev, &io_now) {
                        let (sent, received) = io_rates.network_split();
                        entry.snapshot.disk_read_bytes_per_sec = io_rates.disk_read;
                        entry.snapshot.disk_write_bytes_per_sec = io_rates.disk_write;
                        entry.snapshot.network_sent_bytes_per_sec = sent;
                        entry.snapshot.network_received_bytes_per_sec = received;
                        entry.previous_io = Some(io_now);
                    }
                }
                None => entry.previous_io = Some(io_now),
            }
        }

        entry.last_success_ms = Some(now_ms);
        entry.unavailable = false;
        entry.refresh_in_flight = false;
    }

    /// Record a failed read. Last known values stay in place.
    pub fn mark_unavailable(&self, ticket: RefreshTicket) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(&ticket.pid) {
            entry.unavailable = true;
            entry.refresh_in_flight = false;
        }
    }

    /// Clear the in-flight flag without touching anything else.
    pub fn release(&self, pid: u32) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(&pid) {
            entry.refresh_in_flight = false;
        }
    }

    /// Drop entries past their TTL and trim to capacity.
    pub fn evict(&self, now_ms: u64) -> usize {
        let mut state = self.lock();
        let mut evicted = evict_expired(&mut state.entries, now_ms, self.policy.entry_ttl_ms);
        evicted += evict_oldest(&mut state.entries, self.policy.max_entries);
        state.last_sweep_ms = Some(now_ms);
        evicted
    }

    /// Copy of every cached entry with its status, sorted by PID.
    pub fn samples(&self, now_ms: u64) -> Vec<Sample> {
        let state = self.lock();
        let mut out: Vec<Sample> = state
            .entries
            .iter()
            .map(|(pid, entry)| Sample {
                pid: *pid,
                snapshot: entry.snapshot.clone(),
                status: entry.status(now_ms, self.policy.staleness_ms),
                age_ms: entry.last_success_ms.map(|at| now_ms.saturating_sub(at)),
            })
            .collect();
        out.sort_by_key(|s| s.pid);
        out
    }

    /// Copy of the raw entry for `pid`, without creating it.
    pub fn entry(&self, pid: u32) -> Option<CacheEntry> {
        self.lock().entries.get(&pid).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.last_sweep_ms = None;
    }
}

fn evict_expired(entries: &mut HashMap<u32, CacheEntry>, now_ms: u64, ttl_ms: u64) -> usize {
    let before = entries.len();
    entries.retain(|_, e| {
        e.refresh_in_flight || e.last_update_ms.map_or(true, |at| now_ms.saturating_sub(at) < ttl_ms)
    });
    before - entries.len()
}

/// Remove least recently updated entries until at most `keep` remain.
/// Entries with a refresh in flight are never removed.
fn evict_oldest(entries: &mut HashMap<u32, CacheEntry>, keep: usize) -> usize {
    if entries.len() <= keep {
        return 0;
    }
    let mut candidates: Vec<(u64, u32)> = entries
        .iter()
        .filter(|(_, e)| !e.refresh_in_flight)
        .map(|(pid, e)| (e.last_update_ms.unwrap_or(0), *pid))
        .collect();
    candidates.sort_unstable();

    let excess = entries.len() - keep;
    let mut removed = 0;
    for (_, pid) in candidates.into_iter().take(excess) {
        entries.remove(&pid);
        removed += 1;
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn counters(start: u64, user_ms: u64, read: u64, write: u64, other: u64) -> RawCounters {
        RawCounters {
            name: Some("worker".into()),
            start_time: start,
            cpu: CpuTimes {
                kernel: Duration::ZERO,
                user: Duration::from_millis(user_ms),
            },
            memory_working_set: 4096,
            io: Some(IoCounters {
                read_bytes: read,
                write_bytes: write,
                other_bytes: other,
            }),
        }
    }

    fn refresh(cache: &ProcessCache, pid: u32, now: u64, c: RawCounters) {
        let lookup = cache.lookup(pid, now, true);
        let ticket = lookup.ticket.expect("entry should be stale");
        cache.apply_refresh(ticket, c, now, 1);
    }

    #[test]
    fn test_first_lookup_is_pending_and_issues_ticket() {
        let cache = ProcessCache::new(CachePolicy::default());
        let lookup = cache.lookup(42, 0, true);
        assert_eq!(lookup.ticket, Some(RefreshTicket { pid: 42 }));
        assert_eq!(lookup.sample.status, SampleStatus::Pending);
        assert_eq!(lookup.sample.snapshot, ProcessSnapshot::default());
        assert!(cache.entry(42).unwrap().refresh_in_flight);
    }

    #[test]
    fn test_no_second_ticket_while_in_flight() {
        let cache = ProcessCache::new(CachePolicy::default());
        assert!(cache.lookup(1, 0, true).ticket.is_some());
        // Even past the window, the in-flight flag blocks another ticket.
        assert!(cache.lookup(1, 5000, true).ticket.is_none());
    }

    #[test]
    fn test_no_ticket_within_staleness_window() {
        let cache = ProcessCache::new(CachePolicy::default());
        let ticket = cache.lookup(1, 100, true).ticket.unwrap();
        cache.release(ticket.pid);
        assert!(cache.lookup(1, 500, true).ticket.is_none());
        assert!(cache.lookup(1, 1099, true).ticket.is_none());
        assert!(cache.lookup(1, 1100, true).ticket.is_some());
    }

    #[test]
    fn test_lookup_without_refresh_permission() {
        let cache = ProcessCache::new(CachePolicy::default());
        let lookup = cache.lookup(3, 0, false);
        assert!(lookup.ticket.is_none());
        assert!(!cache.entry(3).unwrap().refresh_in_flight);
    }

    #[test]
    fn test_first_refresh_sets_name_and_memory_only() {
        let cache = ProcessCache::new(CachePolicy::default());
        refresh(&cache, 9, 0, counters(1, 500, 1000, 500, 100));
        let snap = cache.lookup(9, 10, true).sample.snapshot;
        assert_eq!(snap.name, "worker");
        assert_eq!(snap.memory_bytes, 4096);
        assert_eq!(snap.cpu_usage_percent, 0.0);
        assert_eq!(snap.disk_read_bytes_per_sec, 0.0);
    }

    #[test]
    fn test_second_refresh_computes_rates() {
        let cache = ProcessCache::new(CachePolicy::default());
        refresh(&cache, 9, 0, counters(1, 0, 1000, 500, 0));
        refresh(&cache, 9, 1000, counters(1, 250, 3000, 1500, 600));

        let sample = cache.lookup(9, 1000, true).sample;
        assert_eq!(sample.status, SampleStatus::Fresh);
        let snap = sample.snapshot;
        assert!((snap.cpu_usage_percent - 25.0).abs() < 1e-9);
        assert_eq!(snap.disk_read_bytes_per_sec, 2000.0);
        assert_eq!(snap.disk_write_bytes_per_sec, 1000.0);
        assert_eq!(snap.network_sent_bytes_per_sec, 300.0);
        assert_eq!(snap.network_received_bytes_per_sec, 300.0);
    }

    #[test]
    fn test_zero_elapsed_keeps_previous_rates() {
        let cache = ProcessCache::new(CachePolicy::default());
        refresh(&cache, 9, 0, counters(1, 0, 0, 0, 0));
        refresh(&cache, 9, 1000, counters(1, 100, 2000, 0, 0));

        // Same timestamp as the last read: nothing is recomputed.
        let ticket = RefreshTicket { pid: 9 };
        cache.apply_refresh(ticket, counters(1, 900, 90_000, 0, 0), 1000, 1);
        let snap = cache.entry(9).unwrap().snapshot;
        assert_eq!(snap.disk_read_bytes_per_sec, 2000.0);
        assert!((snap.cpu_usage_percent - 10.0).abs() < 1e-9);
        assert!(snap.disk_read_bytes_per_sec.is_finite());
    }

    #[test]
    fn test_name_is_immutable_once_set() {
        let cache = ProcessCache::new(CachePolicy::default());
        refresh(&cache, 5, 0, counters(1, 0, 0, 0, 0));
        let mut renamed = counters(1, 0, 0, 0, 0);
        renamed.name = Some("other".into());
        refresh(&cache, 5, 2000, renamed);
        assert_eq!(cache.entry(5).unwrap().snapshot.name, "worker");
    }

    #[test]
    fn test_pid_reuse_resets_baseline() {
        let cache = ProcessCache::new(CachePolicy::default());
        refresh(&cache, 5, 0, counters(1, 0, 0, 0, 0));
        refresh(&cache, 5, 1000, counters(1, 500, 1000, 0, 0));
        assert!(cache.entry(5).unwrap().snapshot.cpu_usage_percent > 0.0);

        let mut reused = counters(77, 10, 10, 0, 0);
        reused.name = Some("newcomer".into());
        refresh(&cache, 5, 2000, reused);
        let snap = cache.entry(5).unwrap().snapshot;
        assert_eq!(snap.name, "newcomer");
        assert_eq!(snap.cpu_usage_percent, 0.0);
        assert_eq!(snap.disk_read_bytes_per_sec, 0.0);
    }

    #[test]
    fn test_missing_io_keeps_io_rates() {
        let cache = ProcessCache::new(CachePolicy::default());
        refresh(&cache, 5, 0, counters(1, 0, 0, 0, 0));
        refresh(&cache, 5, 1000, counters(1, 0, 500, 0, 0));
        let mut no_io = counters(1, 0, 0, 0, 0);
        no_io.io = None;
        refresh(&cache, 5, 2000, no_io);
        assert_eq!(cache.entry(5).unwrap().snapshot.disk_read_bytes_per_sec, 500.0);
    }

    #[test]
    fn test_unavailable_keeps_last_values() {
        let cache = ProcessCache::new(CachePolicy::default());
        refresh(&cache, 5, 0, counters(1, 0, 0, 0, 0));
        let ticket = cache.lookup(5, 1000, true).ticket.unwrap();
        cache.mark_unavailable(ticket);

        let lookup = cache.lookup(5, 1001, true);
        assert_eq!(lookup.sample.status, SampleStatus::Unavailable);
        assert_eq!(lookup.sample.snapshot.name, "worker");
        assert_eq!(lookup.sample.snapshot.memory_bytes, 4096);
        assert!(!cache.entry(5).unwrap().refresh_in_flight);
    }

    #[test]
    fn test_status_goes_stale_after_window() {
        let cache = ProcessCache::new(CachePolicy::default());
        refresh(&cache, 5, 0, counters(1, 0, 0, 0, 0));
        assert_eq!(cache.lookup(5, 999, false).sample.status, SampleStatus::Fresh);
        let sample = cache.lookup(5, 1500, false).sample;
        assert_eq!(sample.status, SampleStatus::Stale);
        assert_eq!(sample.age_ms, Some(1500));
    }

    #[test]
    fn test_ttl_eviction_skips_in_flight() {
        let policy = CachePolicy {
            staleness_ms: 1000,
            entry_ttl_ms: 10_000,
            max_entries: 16,
        };
        let cache = ProcessCache::new(policy);
        refresh(&cache, 1, 0, counters(1, 0, 0, 0, 0));
        let _pending = cache.lookup(2, 0, true).ticket.unwrap();

        assert_eq!(cache.evict(20_000), 1);
        assert!(cache.entry(1).is_none());
        assert!(cache.entry(2).is_some());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let policy = CachePolicy {
            staleness_ms: 1000,
            entry_ttl_ms: 1_000_000,
            max_entries: 2,
        };
        let cache = ProcessCache::new(policy);
        refresh(&cache, 1, 0, counters(1, 0, 0, 0, 0));
        refresh(&cache, 2, 10, counters(1, 0, 0, 0, 0));

        let lookup = cache.lookup(3, 20, true);
        assert_eq!(lookup.evicted, 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.entry(1).is_none());
        assert!(cache.entry(2).is_some());
        assert!(cache.entry(3).is_some());
    }

    #[test]
    fn test_refresh_for_evicted_entry_is_dropped() {
        let cache = ProcessCache::new(CachePolicy::default());
        let ticket = cache.lookup(1, 0, true).ticket.unwrap();
        cache.clear();
        cache.apply_refresh(ticket, counters(1, 0, 0, 0, 0), 10, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_samples_sorted_by_pid() {
        let cache = ProcessCache::new(CachePolicy::default());
        cache.lookup(30, 0, false);
        cache.lookup(10, 0, false);
        cache.lookup(20, 0, false);
        let pids: Vec<u32> = cache.samples(0).iter().map(|s| s.pid).collect();
        assert_eq!(pids, vec![10, 20, 30]);
    }
}
