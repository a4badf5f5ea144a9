//! Counter reads from the Linux /proc filesystem.
//!
//! Sources per PID:
//! - `stat`: user/kernel CPU time (clock ticks) and process start time
//! - `statm`: resident pages (working set)
//! - `io`: storage byte counters plus character I/O totals
//! - `comm` / `cmdline`: display name

use once_cell::sync::OnceCell;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::counters::{AccessError, CounterAccessor, CpuTimes, IoCounters, PrivilegeProvider, RawCounters};

/// Default procfs mount point.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Capability bit that allows reading /proc/<pid>/io of other users' processes.
const CAP_SYS_PTRACE: u32 = 19;

/// Fields of /proc/<pid>/stat that the sampler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFields {
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub start_time_ticks: u64,
}

/// Reads `RawCounters` from a procfs tree.
#[derive(Debug, Clone)]
pub struct ProcfsAccessor {
    root: PathBuf,
    clock_ticks: u64,
    page_size: u64,
}

impl ProcfsAccessor {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT)
    }

    /// Accessor for a procfs tree mounted somewhere other than /proc.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clock_ticks: clock_ticks_per_second(),
            page_size: page_size_bytes(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ticks_to_duration(&self, ticks: u64) -> Duration {
        let hz = self.clock_ticks.max(1);
        let secs = ticks / hz;
        let rem = ticks % hz;
        Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / hz)
    }
}

impl Default for ProcfsAccessor {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterAccessor for ProcfsAccessor {
    fn read_counters(&self, pid: u32) -> Result<RawCounters, AccessError> {
        let proc_path = self.root.join(pid.to_string());

        let stat_content = read_proc_file(pid, &proc_path.join("stat"))?;
        let stat = parse_stat(&stat_content).ok_or(AccessError::Malformed { pid, what: "stat" })?;

        let statm_content = read_proc_file(pid, &proc_path.join("statm"))?;
        let resident_pages =
            parse_statm_resident(&statm_content).ok_or(AccessError::Malformed { pid, what: "statm" })?;

        // /proc/<pid>/io needs ptrace read access; without it only I/O rates go missing.
        let io = match fs::read_to_string(proc_path.join("io")) {
            Ok(content) => parse_io(&content),
            Err(e) => {
                debug!("I/O counters unavailable for pid {}: {}", pid, e);
                None
            }
        };

        Ok(RawCounters {
            name: read_process_name(&proc_path),
            start_time: stat.start_time_ticks,
            cpu: CpuTimes {
                kernel: self.ticks_to_duration(stat.stime_ticks),
                user: self.ticks_to_duration(stat.utime_ticks),
            },
            memory_working_set: resident_pages.saturating_mul(self.page_size),
            io,
        })
    }
}

fn read_proc_file(pid: u32, path: &Path) -> Result<String, AccessError> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => AccessError::Exited(pid),
        ErrorKind::PermissionDenied => AccessError::PermissionDenied(pid),
        _ => AccessError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        },
    })
}

/// Parse /proc/<pid>/stat.
///
/// The command name (field 2) is parenthesized and may itself contain spaces
/// or parentheses, so fields are counted from the last ')'.
pub fn parse_stat(content: &str) -> Option<StatFields> {
    let after_comm = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // fields[0] is field 3 (state); utime is field 14, stime 15, starttime 22.
    if fields.len() < 20 {
        return None;
    }
    Some(StatFields {
        utime_ticks: fields[11].parse().ok()?,
        stime_ticks: fields[12].parse().ok()?,
        start_time_ticks: fields[19].parse().ok()?,
    })
}

/// Resident page count from /proc/<pid>/statm.
pub fn parse_statm_resident(content: &str) -> Option<u64> {
    content.split_whitespace().nth(1)?.parse().ok()
}

/// Parse /proc/<pid>/io.
///
/// `read_bytes`/`write_bytes` are storage traffic. Character I/O that never
/// reached storage (`rchar - read_bytes` plus `wchar - write_bytes`) covers
/// sockets and pipes and is reported as the combined "other" counter.
pub fn parse_io(content: &str) -> Option<IoCounters> {
    let mut rchar = None;
    let mut wchar = None;
    let mut read_bytes = None;
    let mut write_bytes = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().parse::<u64>().ok();
        match key.trim() {
            "rchar" => rchar = value,
            "wchar" => wchar = value,
            "read_bytes" => read_bytes = value,
            "write_bytes" => write_bytes = value,
            _ => {}
        }
    }

    let (rchar, wchar, read_bytes, write_bytes) = (rchar?, wchar?, read_bytes?, write_bytes?);
    Some(IoCounters {
        read_bytes,
        write_bytes,
        other_bytes: rchar.saturating_sub(read_bytes) + wchar.saturating_sub(write_bytes),
    })
}

/// Reads process name from comm file or extracts from cmdline
pub fn read_process_name(proc_path: &Path) -> Option<String> {
    if let Ok(s) = fs::read_to_string(proc_path.join("comm")) {
        let t = s.trim();
        if !t.is_empty() {
            return Some(t.into());
        }
    }

    let content = fs::read(proc_path.join("cmdline")).ok()?;
    let argv0 = content.split(|&b| b == 0u8).next()?;
    let argv0 = std::str::from_utf8(argv0).ok()?;
    Path::new(argv0)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

/// Clock ticks per second for /proc CPU times (USER_HZ).
pub fn clock_ticks_per_second() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        // Most Linux systems use 100 jiffies per second
        100
    }
}

fn page_size_bytes() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// Number of online logical processors.
///
/// Uses sysconf, falling back to counting "processor" lines in /proc/cpuinfo.
pub fn logical_cpu_count() -> usize {
    // SAFETY: sysconf has no preconditions.
    let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if online > 0 {
        return online as usize;
    }
    match fs::read_to_string("/proc/cpuinfo") {
        Ok(content) => parse_cpu_count(&content).max(1),
        Err(e) => {
            warn!("Failed to read /proc/cpuinfo, assuming one CPU: {}", e);
            1
        }
    }
}

pub fn parse_cpu_count(content: &str) -> usize {
    content
        .lines()
        .filter(|line| line.starts_with("processor"))
        .count()
}

/// Effective capability mask from the `CapEff:` line of /proc/<pid>/status.
pub fn parse_effective_caps(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|hex| u64::from_str_radix(hex.trim(), 16).ok())
}

/// Checks once whether this process may inspect other users' processes.
///
/// Linux grants no privileges on request, so "ensuring" the capability means
/// detecting root or CAP_SYS_PTRACE. The answer is cached; later calls are free.
#[derive(Debug)]
pub struct ProcfsPrivileges {
    root: PathBuf,
    granted: OnceCell<bool>,
}

impl ProcfsPrivileges {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            granted: OnceCell::new(),
        }
    }

    fn detect(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        if unsafe { libc::geteuid() } == 0 {
            return true;
        }
        let status = match fs::read_to_string(self.root.join("self").join("status")) {
            Ok(s) => s,
            Err(e) => {
                debug!("Cannot read own status for capability check: {}", e);
                return false;
            }
        };
        parse_effective_caps(&status).is_some_and(|caps| caps & (1u64 << CAP_SYS_PTRACE) != 0)
    }
}

impl Default for ProcfsPrivileges {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivilegeProvider for ProcfsPrivileges {
    fn ensure_capability(&self) -> bool {
        *self.granted.get_or_init(|| {
            let granted = self.detect();
            if granted {
                info!("Full process inspection privileges available");
            } else {
                warn!("Running without CAP_SYS_PTRACE: other users' processes may report as unavailable");
            }
            granted
        })
    }
}
