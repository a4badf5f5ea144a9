//! Per-second rates from two timestamped cumulative counter reads.
//!
//! Pure functions only. The caller owns the previous sample and decides what
//! to keep when a function returns `None` (elapsed time of zero or less).

use crate::counters::{CpuTimes, IoCounters, RawCounters};

/// A value read at a monotonic millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timed<T> {
    pub value: T,
    pub at_ms: u64,
}

impl<T> Timed<T> {
    pub fn new(value: T, at_ms: u64) -> Self {
        Self { value, at_ms }
    }
}

/// One combined CPU and I/O read, for callers that take both at once.
///
/// The cache keeps separate CPU and I/O baselines because I/O may be unreadable
/// while CPU is not, so it calls `cpu_percent` and `io_rates` directly.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterSample {
    pub at_ms: u64,
    pub cpu: CpuTimes,
    pub io: IoCounters,
}

impl CounterSample {
    /// Missing I/O counters read as zero.
    pub fn from_counters(counters: &RawCounters, at_ms: u64) -> Self {
        Self {
            at_ms,
            cpu: counters.cpu,
            io: counters.io.unwrap_or_default(),
        }
    }
}

/// Disk and combined "other" I/O rates in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IoRates {
    pub disk_read: f64,
    pub disk_write: f64,
    pub network_combined: f64,
}

impl IoRates {
    /// Split the combined counter evenly into (sent, received).
    ///
    /// The OS reports one undirected counter, so this is an approximation and
    /// both halves are always equal.
    pub fn network_split(&self) -> (f64, f64) {
        let half = self.network_combined * 0.5;
        (half, half)
    }
}

/// CPU and I/O rates between two `CounterSample`s.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rates {
    pub cpu_percent: f64,
    pub io: IoRates,
}

fn elapsed_secs(previous_ms: u64, current_ms: u64) -> Option<f64> {
    if current_ms <= previous_ms {
        return None;
    }
    Some((current_ms - previous_ms) as f64 / 1000.0)
}

/// CPU utilization between two reads as a share of total machine capacity.
///
/// Busy time is divided by elapsed time times `logical_cpus`, so a process
/// using every core reports 100. The result is clamped to
/// `[0, 100 * logical_cpus]`, which only bites when the counters and the
/// clock disagree. Returns `None` when the timestamps do not strictly increase.
pub fn cpu_percent(
    previous: &Timed<CpuTimes>,
    current: &Timed<CpuTimes>,
    logical_cpus: usize,
) -> Option<f64> {
    let elapsed = elapsed_secs(previous.at_ms, current.at_ms)?;
    let cpus = logical_cpus.max(1) as f64;

    // A counter that went backwards contributes nothing.
    let kernel = current.value.kernel.saturating_sub(previous.value.kernel);
    let user = current.value.user.saturating_sub(previous.value.user);
    let busy = (kernel + user).as_secs_f64();

    let percent = 100.0 * busy / (elapsed * cpus);
    Some(percent.clamp(0.0, 100.0 * cpus))
}

/// Disk and network byte rates between two reads.
pub fn io_rates(previous: &Timed<IoCounters>, current: &Timed<IoCounters>) -> Option<IoRates> {
    let elapsed = elapsed_secs(previous.at_ms, current.at_ms)?;
    let prev = &previous.value;
    let cur = &current.value;

    Some(IoRates {
        disk_read: cur.read_bytes.saturating_sub(prev.read_bytes) as f64 / elapsed,
        disk_write: cur.write_bytes.saturating_sub(prev.write_bytes) as f64 / elapsed,
        network_combined: cur.other_bytes.saturating_sub(prev.other_bytes) as f64 / elapsed,
    })
}

/// All rates between two combined reads, or `None` if no time elapsed.
pub fn compute_rates(
    previous: &CounterSample,
    current: &CounterSample,
    logical_cpus: usize,
) -> Option<Rates> {
    let cpu = cpu_percent(
        &Timed::new(previous.cpu, previous.at_ms),
        &Timed::new(current.cpu, current.at_ms),
        logical_cpus,
    )?;
    let io = io_rates(
        &Timed::new(previous.io, previous.at_ms),
        &Timed::new(current.io, current.at_ms),
    )?;
    Some(Rates {
        cpu_percent: cpu,
        io,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(at_ms: u64, kernel_ms: u64, user_ms: u64, read: u64, write: u64, other: u64) -> CounterSample {
        CounterSample {
            at_ms,
            cpu: CpuTimes {
                kernel: Duration::from_millis(kernel_ms),
                user: Duration::from_millis(user_ms),
            },
            io: IoCounters {
                read_bytes: read,
                write_bytes: write,
                other_bytes: other,
            },
        }
    }

    #[test]
    fn test_disk_rates_bytes_per_second() {
        let prev = sample(0, 0, 0, 1000, 500, 0);
        let cur = sample(1000, 0, 0, 3000, 1500, 0);
        let rates = compute_rates(&prev, &cur, 4).unwrap();
        assert_eq!(rates.io.disk_read, 2000.0);
        assert_eq!(rates.io.disk_write, 1000.0);
    }

    #[test]
    fn test_rates_scale_with_elapsed_time() {
        let prev = sample(5_000, 0, 0, 0, 0, 0);
        let cur = sample(7_000, 0, 0, 4096, 0, 1024);
        let rates = compute_rates(&prev, &cur, 1).unwrap();
        assert_eq!(rates.io.disk_read, 2048.0);
        assert_eq!(rates.io.network_combined, 512.0);
    }

    #[test]
    fn test_zero_or_negative_elapsed_yields_none() {
        let prev = sample(2000, 0, 0, 0, 0, 0);
        let same = sample(2000, 100, 100, 10, 10, 10);
        let earlier = sample(1000, 100, 100, 10, 10, 10);
        assert!(compute_rates(&prev, &same, 2).is_none());
        assert!(compute_rates(&prev, &earlier, 2).is_none());
    }

    #[test]
    fn test_cpu_percent_across_cores() {
        // 1s of busy time over 1s on 2 cores = 50% of the total, reported as 50.
        let prev = Timed::new(CpuTimes::default(), 0);
        let cur = Timed::new(
            CpuTimes {
                kernel: Duration::from_millis(400),
                user: Duration::from_millis(600),
            },
            1000,
        );
        let pct = cpu_percent(&prev, &cur, 2).unwrap();
        assert!((pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_percent_clamped_to_core_capacity() {
        let prev = Timed::new(CpuTimes::default(), 0);
        let cur = Timed::new(
            CpuTimes {
                kernel: Duration::from_secs(30),
                user: Duration::from_secs(30),
            },
            1000,
        );
        assert_eq!(cpu_percent(&prev, &cur, 4), Some(400.0));
    }

    #[test]
    fn test_counter_rollback_contributes_zero() {
        let prev = sample(0, 5000, 5000, 10_000, 10_000, 10_000);
        let cur = sample(1000, 1000, 1000, 10, 10, 10);
        let rates = compute_rates(&prev, &cur, 1).unwrap();
        assert_eq!(rates.cpu_percent, 0.0);
        assert_eq!(rates.io.disk_read, 0.0);
        assert_eq!(rates.io.disk_write, 0.0);
        assert_eq!(rates.io.network_combined, 0.0);
    }

    #[test]
    fn test_network_split_is_even() {
        for combined in [0.0, 1.0, 3.0, 12345.678] {
            let rates = IoRates {
                network_combined: combined,
                ..Default::default()
            };
            let (sent, received) = rates.network_split();
            assert_eq!(sent, received);
            assert_eq!(sent + received, combined);
        }
    }

    #[test]
    fn test_sample_from_counters_without_io() {
        let raw = RawCounters {
            name: None,
            start_time: 1,
            cpu: CpuTimes {
                kernel: Duration::from_millis(250),
                user: Duration::from_millis(750),
            },
            memory_working_set: 0,
            io: None,
        };
        let prev = CounterSample::from_counters(&RawCounters { cpu: CpuTimes::default(), ..raw.clone() }, 0);
        let cur = CounterSample::from_counters(&raw, 1000);
        assert_eq!(cur.io, IoCounters::default());

        let rates = compute_rates(&prev, &cur, 4).unwrap();
        assert!((rates.cpu_percent - 25.0).abs() < 1e-9);
        assert_eq!(rates.io, IoRates::default());
    }

    #[test]
    fn test_zero_cpus_treated_as_one() {
        let prev = Timed::new(CpuTimes::default(), 0);
        let cur = Timed::new(
            CpuTimes {
                kernel: Duration::ZERO,
                user: Duration::from_millis(500),
            },
            1000,
        );
        assert_eq!(cpu_percent(&prev, &cur, 0), Some(50.0));
    }
}
