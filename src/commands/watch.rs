//! Watch command implementation.
//!
//! Polls a set of PIDs through the cached sampler and prints every round.
//! The first round usually shows pending zeros because the refreshes it
//! schedules have not completed yet.

use chrono::{DateTime, Local};
use herakles_proc_sampler::{Sample, Sampler, SamplerConfig};
use serde::Serialize;
use std::fmt::Write as FmtWrite;
use std::time::Duration;
use tokio::{signal, time::interval};
use tracing::{debug, info};

use crate::cli::OutputFormat;

/// One polling round, as printed in JSON and YAML mode.
#[derive(Debug, Serialize)]
pub struct WatchRound {
    pub timestamp: DateTime<Local>,
    pub samples: Vec<Sample>,
}

/// Polls `pids` every `interval_ms` until `iterations` rounds ran or Ctrl+C.
pub async fn command_watch(
    pids: Vec<u32>,
    interval_ms: u64,
    iterations: Option<usize>,
    format: OutputFormat,
    sampler_config: SamplerConfig,
) -> anyhow::Result<()> {
    let sampler = Sampler::new(sampler_config)?;
    info!(
        "Watching {} process(es) every {}ms on {} logical CPUs",
        pids.len(),
        interval_ms,
        sampler.logical_cpus()
    );

    let mut ticker = interval(Duration::from_millis(interval_ms.max(1)));
    let mut round = 0usize;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping watch");
                break;
            }
        }

        let watch_round = WatchRound {
            timestamp: Local::now(),
            samples: pids.iter().map(|&pid| sampler.sample(pid)).collect(),
        };
        print!("{}", render_round(&watch_round, &format)?);

        round += 1;
        debug!("Watch round {} done", round);
        if iterations.is_some_and(|n| round >= n) {
            break;
        }
    }

    sampler.shutdown();
    Ok(())
}

fn render_round(round: &WatchRound, format: &OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => format!("{}\n", serde_json::to_string(round)?),
        OutputFormat::Yaml => format!("---\n{}", serde_yaml::to_string(round)?),
        OutputFormat::Table => render_table(round),
    })
}

fn render_table(round: &WatchRound) -> String {
    let mut out = String::new();
    writeln!(out, "\n{}", round.timestamp.format("%Y-%m-%d %H:%M:%S")).ok();
    writeln!(
        out,
        "{:>8} {:20} {:>11} {:>8} {:>12} {:>12} {:>12} {:>12}",
        "PID", "NAME", "STATUS", "CPU%", "MEMORY", "DISK R/s", "DISK W/s", "NET/s"
    )
    .ok();
    writeln!(out, "{}", "-".repeat(102)).ok();

    for sample in &round.samples {
        let snap = &sample.snapshot;
        let name: String = snap.name.chars().take(20).collect();
        writeln!(
            out,
            "{:>8} {:20} {:>11} {:>8.1} {:>12} {:>12} {:>12} {:>12}",
            sample.pid,
            name,
            sample.status.as_str(),
            snap.cpu_usage_percent,
            format_bytes(snap.memory_bytes as f64),
            format_bytes(snap.disk_read_bytes_per_sec),
            format_bytes(snap.disk_write_bytes_per_sec),
            format_bytes(snap.network_sent_bytes_per_sec + snap.network_received_bytes_per_sec),
        )
        .ok();
    }
    out
}

/// Human readable byte count with binary prefixes.
fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herakles_proc_sampler::{ProcessSnapshot, SampleStatus};

    fn round() -> WatchRound {
        WatchRound {
            timestamp: Local::now(),
            samples: vec![Sample {
                pid: 42,
                snapshot: ProcessSnapshot {
                    name: "postgres".into(),
                    cpu_usage_percent: 12.5,
                    memory_bytes: 3 * 1024 * 1024,
                    ..Default::default()
                },
                status: SampleStatus::Fresh,
                age_ms: Some(10),
            }],
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512.0), "512 B");
        assert_eq!(format_bytes(2048.0), "2.0 KiB");
        assert_eq!(format_bytes(3.0 * 1024.0 * 1024.0), "3.0 MiB");
    }

    #[test]
    fn test_table_contains_row() {
        let text = render_table(&round());
        assert!(text.contains("postgres"));
        assert!(text.contains("fresh"));
        assert!(text.contains("3.0 MiB"));
    }

    #[test]
    fn test_json_round_is_one_line() {
        let text = render_round(&round(), &OutputFormat::Json).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"status\":\"fresh\""));
    }
}
