//! herakles-proc-sampler library.
//!
//! Cached per-process telemetry: CPU usage, working set, disk and network
//! byte rates for a PID, refreshed in the background so that frequent
//! callers never wait on /proc.
//!
//! ```no_run
//! use herakles_proc_sampler::{Sampler, SamplerConfig};
//!
//! let sampler = Sampler::new(SamplerConfig::default())?;
//! let snapshot = sampler.query_process(std::process::id());
//! println!("{} uses {} bytes", snapshot.name, snapshot.memory_bytes);
//! # Ok::<(), herakles_proc_sampler::SamplerError>(())
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod counters;
pub mod ffi;
pub mod pool;
pub mod procfs;
pub mod rates;
pub mod sampler;
pub mod snapshot;

pub use cache::{CachePolicy, ProcessCache};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Config, ConfigError, SamplerConfig};
pub use counters::{AccessError, CounterAccessor, CpuTimes, IoCounters, PrivilegeProvider, RawCounters};
pub use pool::{PoolError, PoolStats, WorkerPool};
pub use procfs::{ProcfsAccessor, ProcfsPrivileges};
pub use rates::{compute_rates, CounterSample, Rates};
pub use sampler::{Sampler, SamplerBuilder, SamplerError, SamplerStats};
pub use snapshot::{ProcessSnapshot, Sample, SampleStatus};
