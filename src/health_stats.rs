//! Running request statistics rendered by the /health endpoint.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Clone, Copy, Default)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            *self = RunningStat {
                count: 1,
                sum: value,
                min: value,
                max: value,
                last: value,
            };
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

#[derive(Default)]
struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// (current, average, max, min)
    fn snapshot(&self) -> (f64, f64, f64, f64) {
        match self.inner.lock() {
            Ok(s) => (s.last, s.avg(), s.max, s.min),
            Err(_) => (0.0, 0.0, 0.0, 0.0),
        }
    }
}

/// Latency and volume figures for the HTTP surface.
#[derive(Default)]
pub struct HealthStats {
    query_duration_seconds: Stat,
    scrape_duration_seconds: Stat,
    exported_processes: Stat,
    http_requests: AtomicU64,
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration_seconds: f64) {
        self.query_duration_seconds.add_sample(duration_seconds);
    }

    pub fn record_scrape(&self, exported: usize, duration_seconds: f64) {
        self.exported_processes.add_sample(exported as f64);
        self.scrape_duration_seconds.add_sample(duration_seconds);
    }

    pub fn http_requests(&self) -> u64 {
        self.http_requests.load(Ordering::Relaxed)
    }

    pub fn render_table(&self) -> String {
        let left_col = 26usize;
        let col_w = 12usize;
        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

        let rows = [
            ("exported processes", &self.exported_processes, 0usize),
            ("scrape duration (s)", &self.scrape_duration_seconds, 3),
            ("query duration (s)", &self.query_duration_seconds, 6),
        ];
        for (label, stat, precision) in rows {
            let (cur, avg, max, min) = stat.snapshot();
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                label,
                format!("{:.*}", precision, cur),
                format!("{:.*}", precision.max(1), avg),
                format!("{:.*}", precision, max),
                format!("{:.*}", precision, min),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(out, "http requests served: {}", self.http_requests()).ok();
        out
    }
}
