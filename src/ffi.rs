//! C ABI for embedding the sampler in non-Rust hosts.
//!
//! The host owns an opaque handle from `herakles_sampler_create` and must pass
//! it to `herakles_sampler_destroy` exactly once. Queries fill a fixed-layout
//! `ProcessInfoRecord`.

use std::ptr;

use crate::config::SamplerConfig;
use crate::sampler::Sampler;
use crate::snapshot::ProcessSnapshot;

/// Capacity of the name buffer, including the terminating NUL.
pub const NAME_CAPACITY: usize = 260;

/// Fixed-layout copy of a `ProcessSnapshot`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ProcessInfoRecord {
    /// UTF-8 display name, NUL-terminated, truncated on a character boundary.
    pub name: [u8; NAME_CAPACITY],
    pub cpu_usage: f64,
    pub memory_usage: u64,
    pub disk_read_rate: f64,
    pub disk_write_rate: f64,
    pub network_sent: f64,
    pub network_received: f64,
}

impl Default for ProcessInfoRecord {
    fn default() -> Self {
        Self {
            name: [0; NAME_CAPACITY],
            cpu_usage: 0.0,
            memory_usage: 0,
            disk_read_rate: 0.0,
            disk_write_rate: 0.0,
            network_sent: 0.0,
            network_received: 0.0,
        }
    }
}

impl ProcessInfoRecord {
    /// Name bytes up to the first NUL.
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_CAPACITY);
        std::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }
}

impl From<&ProcessSnapshot> for ProcessInfoRecord {
    fn from(snap: &ProcessSnapshot) -> Self {
        let mut record = ProcessInfoRecord {
            cpu_usage: snap.cpu_usage_percent,
            memory_usage: snap.memory_bytes,
            disk_read_rate: snap.disk_read_bytes_per_sec,
            disk_write_rate: snap.disk_write_bytes_per_sec,
            network_sent: snap.network_sent_bytes_per_sec,
            network_received: snap.network_received_bytes_per_sec,
            ..Default::default()
        };

        let mut len = snap.name.len().min(NAME_CAPACITY - 1);
        while !snap.name.is_char_boundary(len) {
            len -= 1;
        }
        record.name[..len].copy_from_slice(&snap.name.as_bytes()[..len]);
        record
    }
}

/// Create a sampler with default settings. Returns null if the worker pool
/// cannot be started.
#[no_mangle]
pub extern "C" fn herakles_sampler_create() -> *mut Sampler {
    match Sampler::new(SamplerConfig::default()) {
        Ok(sampler) => Box::into_raw(Box::new(sampler)),
        Err(_) => ptr::null_mut(),
    }
}

/// Fill `out` with the cached snapshot for `pid`. Returns false if either
/// pointer is null.
///
/// # Safety
///
/// `handle` must come from `herakles_sampler_create` and not be destroyed yet.
/// `out` must point to writable memory for one `ProcessInfoRecord`.
#[no_mangle]
pub unsafe extern "C" fn herakles_sampler_query(
    handle: *const Sampler,
    pid: u32,
    out: *mut ProcessInfoRecord,
) -> bool {
    if handle.is_null() || out.is_null() {
        return false;
    }
    let sampler = &*handle;
    let snapshot = sampler.query_process(pid);
    out.write(ProcessInfoRecord::from(&snapshot));
    true
}

/// Shut down and free a sampler. Null is ignored.
///
/// # Safety
///
/// `handle` must come from `herakles_sampler_create` and must not be used again.
#[no_mangle]
pub unsafe extern "C" fn herakles_sampler_destroy(handle: *mut Sampler) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_copies_fields() {
        let snap = ProcessSnapshot {
            name: "nginx".into(),
            cpu_usage_percent: 12.5,
            memory_bytes: 1 << 20,
            disk_read_bytes_per_sec: 1.0,
            disk_write_bytes_per_sec: 2.0,
            network_sent_bytes_per_sec: 3.0,
            network_received_bytes_per_sec: 3.0,
        };
        let record = ProcessInfoRecord::from(&snap);
        assert_eq!(record.name_str(), "nginx");
        assert_eq!(record.cpu_usage, 12.5);
        assert_eq!(record.memory_usage, 1 << 20);
        assert_eq!(record.network_sent, record.network_received);
    }

    #[test]
    fn test_long_name_truncated_on_char_boundary() {
        let snap = ProcessSnapshot {
            name: "é".repeat(200),
            ..Default::default()
        };
        let record = ProcessInfoRecord::from(&snap);
        let name = record.name_str();
        assert!(name.len() < NAME_CAPACITY);
        assert!(name.chars().all(|c| c == 'é'));
        assert_eq!(record.name[NAME_CAPACITY - 1], 0);
    }

    #[test]
    fn test_null_pointers_rejected() {
        let mut record = ProcessInfoRecord::default();
        unsafe {
            assert!(!herakles_sampler_query(ptr::null(), 1, &mut record));
            herakles_sampler_destroy(ptr::null_mut());
        }
    }

    #[test]
    fn test_create_query_destroy() {
        let handle = herakles_sampler_create();
        assert!(!handle.is_null());
        let mut record = ProcessInfoRecord::default();
        unsafe {
            assert!(herakles_sampler_query(handle, std::process::id(), &mut record));
            herakles_sampler_destroy(handle);
        }
        // First query only schedules the refresh.
        assert_eq!(record.cpu_usage, 0.0);
    }
}
