//! Check command implementation.
//!
//! Validates that the sampler can read the counters it needs.

use herakles_proc_sampler::config::validate_effective_config;
use herakles_proc_sampler::procfs::{logical_cpu_count, ProcfsAccessor, ProcfsPrivileges};
use herakles_proc_sampler::{
    compute_rates, AccessError, Config, CounterAccessor, CounterSample, PrivilegeProvider, Rates,
};
use std::time::{Duration, Instant};

/// Gap between the two reads used to show live rates.
const RATE_WINDOW: Duration = Duration::from_millis(250);

/// Reads `pid` a second time after `RATE_WINDOW` and derives rates from both reads.
fn measure_rates(
    accessor: &ProcfsAccessor,
    pid: u32,
    first: &CounterSample,
    started: Instant,
) -> Result<Option<Rates>, AccessError> {
    std::thread::sleep(RATE_WINDOW);
    let counters = accessor.read_counters(pid)?;
    let second = CounterSample::from_counters(&counters, started.elapsed().as_millis() as u64);
    Ok(compute_rates(first, &second, logical_cpu_count()))
}

/// Validates procfs access, privileges and configuration.
///
/// Returns `Ok(false)` when a check failed so the caller can set the exit code.
pub fn command_check(pid: Option<u32>, config: &Config) -> anyhow::Result<bool> {
    println!("🔍 Herakles Process Sampler - System Check");
    println!("==========================================");

    let mut all_ok = true;
    let sampler_config = config.sampler_config();
    let root = sampler_config.proc_root.as_path();

    println!("\n📁 Checking {} ...", root.display());
    if root.join("self").exists() {
        println!("   ✅ procfs accessible");
    } else {
        println!("   ❌ procfs not found at {}", root.display());
        all_ok = false;
    }
    println!("   ℹ️  {} logical CPUs", logical_cpu_count());

    println!("\n🔐 Checking privileges...");
    if sampler_config.request_privileges {
        if ProcfsPrivileges::with_root(root).ensure_capability() {
            println!("   ✅ Can inspect processes of other users");
        } else {
            println!("   ⚠️  Unprivileged: other users' processes will report zeros");
        }
    } else {
        println!("   ⚠️  Privilege check disabled by configuration");
    }

    let pid = pid.unwrap_or_else(std::process::id);
    println!("\n📊 Reading counters for pid {} ...", pid);
    let accessor = ProcfsAccessor::with_root(root);
    let started = Instant::now();
    match accessor.read_counters(pid) {
        Ok(counters) => {
            println!(
                "   ✅ name={} cpu={:.2}s rss={}MB",
                counters.name.as_deref().unwrap_or("<unknown>"),
                counters.cpu.total().as_secs_f64(),
                counters.memory_working_set / 1024 / 1024
            );
            match counters.io {
                Some(io) => println!(
                    "   ✅ I/O counters: read={} write={} other={} bytes",
                    io.read_bytes, io.write_bytes, io.other_bytes
                ),
                None => println!("   ⚠️  I/O counters not readable, disk and network rates stay 0"),
            }

            let first = CounterSample::from_counters(&counters, 0);
            match measure_rates(&accessor, pid, &first, started) {
                Ok(Some(rates)) => {
                    let (sent, received) = rates.io.network_split();
                    println!(
                        "   ✅ Rates over {}ms: cpu={:.1}% read={:.0}B/s write={:.0}B/s sent~{:.0}B/s received~{:.0}B/s",
                        RATE_WINDOW.as_millis(),
                        rates.cpu_percent,
                        rates.io.disk_read,
                        rates.io.disk_write,
                        sent,
                        received
                    );
                }
                Ok(None) => println!("   ⚠️  Clock did not advance between reads"),
                Err(e) => println!("   ⚠️  Second read failed: {}", e),
            }
        }
        Err(AccessError::Exited(_)) => {
            println!("   ❌ Process {} does not exist", pid);
            all_ok = false;
        }
        Err(e) => {
            println!("   ❌ {}", e);
            all_ok = false;
        }
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(()) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
    } else {
        println!("   ❌ Some checks failed - please review warnings");
    }
    Ok(all_ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_rates_on_own_process() {
        let accessor = ProcfsAccessor::new();
        if !accessor.root().join("self").exists() {
            return;
        }
        let pid = std::process::id();
        let started = Instant::now();
        let first = CounterSample::from_counters(&accessor.read_counters(pid).unwrap(), 0);

        let rates = measure_rates(&accessor, pid, &first, started)
            .unwrap()
            .unwrap();
        let cpus = logical_cpu_count() as f64;
        assert!(rates.cpu_percent >= 0.0 && rates.cpu_percent <= 100.0 * cpus);
        assert!(rates.io.disk_read >= 0.0);
    }
}
