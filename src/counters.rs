//! Raw OS counter types and the accessor seams the sampler is built on.
//!
//! Everything here is cumulative: CPU times and I/O byte totals only ever
//! grow for the lifetime of one process. Rates are derived elsewhere
//! (see `rates`).

use std::time::Duration;
use thiserror::Error;

/// Cumulative CPU time charged to a process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub kernel: Duration,
    pub user: Duration,
}

impl CpuTimes {
    pub fn total(&self) -> Duration {
        self.kernel + self.user
    }
}

/// Cumulative I/O byte counters.
///
/// `other_bytes` is the single combined counter for transfers that are
/// neither storage reads nor storage writes. The sampler treats it as
/// network traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub other_bytes: u64,
}

/// One read of everything the OS reports for a process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCounters {
    /// Display name, if it could be resolved.
    pub name: Option<String>,
    /// Process start time in clock ticks since boot. Changes when a PID is reused.
    pub start_time: u64,
    pub cpu: CpuTimes,
    /// Resident working set in bytes.
    pub memory_working_set: u64,
    /// `None` when the I/O counters are not readable with the current privileges.
    pub io: Option<IoCounters>,
}

/// Reasons a counter read can fail. All of them mean "unavailable" to the cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("process {0} does not exist")]
    Exited(u32),
    #[error("access to process {0} denied")]
    PermissionDenied(u32),
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
    #[error("malformed {what} for process {pid}")]
    Malformed { pid: u32, what: &'static str },
}

/// Reads raw counters for a process. Implementations may block.
pub trait CounterAccessor: Send + Sync {
    fn read_counters(&self, pid: u32) -> Result<RawCounters, AccessError>;
}

/// Best-effort request for the privileges needed to inspect other processes.
///
/// Must be idempotent and cheap enough to call before every refresh.
pub trait PrivilegeProvider: Send + Sync {
    fn ensure_capability(&self) -> bool;
}

/// Privilege provider for environments where nothing can be elevated.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrivileges;

impl PrivilegeProvider for NoPrivileges {
    fn ensure_capability(&self) -> bool {
        false
    }
}

pub mod fake {
    //! Scripted accessor for tests and demos.

    use super::{AccessError, CounterAccessor, RawCounters};
    use ahash::AHashMap as HashMap;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays queued results per PID. The last queued result repeats once
    /// the queue is down to one element; unknown PIDs report `Exited`.
    #[derive(Default)]
    pub struct FakeAccessor {
        script: Mutex<HashMap<u32, VecDeque<Result<RawCounters, AccessError>>>>,
        reads: AtomicUsize,
    }

    impl FakeAccessor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a result for `pid`.
        pub fn push(&self, pid: u32, result: Result<RawCounters, AccessError>) {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script.entry(pid).or_default().push_back(result);
        }

        /// Number of `read_counters` calls served so far.
        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl CounterAccessor for FakeAccessor {
        fn read_counters(&self, pid: u32) -> Result<RawCounters, AccessError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            match script.get_mut(&pid) {
                Some(queue) if queue.len() > 1 => queue
                    .pop_front()
                    .unwrap_or(Err(AccessError::Exited(pid))),
                Some(queue) => queue
                    .front()
                    .cloned()
                    .unwrap_or(Err(AccessError::Exited(pid))),
                None => Err(AccessError::Exited(pid)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeAccessor;
    use super::*;

    #[test]
    fn test_cpu_times_total() {
        let t = CpuTimes {
            kernel: Duration::from_millis(250),
            user: Duration::from_millis(750),
        };
        assert_eq!(t.total(), Duration::from_secs(1));
    }

    #[test]
    fn test_fake_accessor_replays_then_repeats_last() {
        let fake = FakeAccessor::new();
        let first = RawCounters {
            memory_working_set: 1,
            ..Default::default()
        };
        let second = RawCounters {
            memory_working_set: 2,
            ..Default::default()
        };
        fake.push(7, Ok(first.clone()));
        fake.push(7, Ok(second.clone()));

        assert_eq!(fake.read_counters(7), Ok(first));
        assert_eq!(fake.read_counters(7), Ok(second.clone()));
        assert_eq!(fake.read_counters(7), Ok(second));
        assert_eq!(fake.read_counters(8), Err(AccessError::Exited(8)));
        assert_eq!(fake.reads(), 4);
    }

    #[test]
    fn test_no_privileges_never_elevates() {
        assert!(!NoPrivileges.ensure_capability());
    }
}
