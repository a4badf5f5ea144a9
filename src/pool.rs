//! Fixed-size pool of background worker threads.
//!
//! Tasks are queued FIFO and each runs at most once on whichever worker picks
//! it up first. A panicking task is caught and counted, the worker keeps
//! going. Shutdown drops whatever is still queued.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,
    #[error("failed to spawn worker thread")]
    Spawn,
}

/// Counters describing pool activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub queued: usize,
    pub executed: u64,
    pub panicked: u64,
    pub dropped: u64,
}

struct Queue {
    tasks: VecDeque<Task>,
    stop: bool,
}

struct Inner {
    queue: Mutex<Queue>,
    available: Condvar,
    executed: AtomicU64,
    panicked: AtomicU64,
    dropped: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct WorkerPool {
    inner: Arc<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Start `size` workers (at least one).
    pub fn new(size: usize) -> Result<Self, PoolError> {
        let size = size.max(1);
        let inner = Arc::new(Inner {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                stop: false,
            }),
            available: Condvar::new(),
            executed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            let worker_inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("herakles-sampler-{id}"))
                .spawn(move || worker_loop(id, &worker_inner));
            match handle {
                Ok(h) => handles.push(h),
                Err(e) => {
                    warn!("Failed to spawn sampler worker {}: {}", id, e);
                    let pool = Self {
                        inner,
                        handles: Mutex::new(handles),
                        size,
                    };
                    pool.shutdown();
                    return Err(PoolError::Spawn);
                }
            }
        }
        debug!("Worker pool started with {} threads", size);

        Ok(Self {
            inner,
            handles: Mutex::new(handles),
            size,
        })
    }

    /// Queue a task without blocking on its execution.
    pub fn enqueue<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut queue = self.inner.lock();
            if queue.stop {
                return Err(PoolError::Closed);
            }
            queue.tasks.push_back(Box::new(task));
        }
        self.inner.available.notify_one();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().stop
    }

    /// Stop accepting work, drop queued tasks, wake and join every worker.
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        let discarded = {
            let mut queue = self.inner.lock();
            queue.stop = true;
            std::mem::take(&mut queue.tasks)
        };
        self.inner.available.notify_all();
        // Dropped outside the lock: a task's destructor may do its own cleanup.
        let dropped = discarded.len();
        drop(discarded);
        if dropped > 0 {
            self.inner.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            debug!("Dropped {} queued tasks on shutdown", dropped);
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        let current = thread::current().id();
        for handle in handles {
            // A worker cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Sampler worker exited abnormally");
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let queued = self.inner.lock().tasks.len();
        PoolStats {
            workers: self.size,
            queued,
            executed: self.inner.executed.load(Ordering::Relaxed),
            panicked: self.inner.panicked.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, inner: &Inner) {
    loop {
        let task = {
            let mut queue = inner.lock();
            while !queue.stop && queue.tasks.is_empty() {
                queue = inner
                    .available
                    .wait(queue)
                    .unwrap_or_else(|e| e.into_inner());
            }
            if queue.stop {
                return;
            }
            match queue.tasks.pop_front() {
                Some(task) => task,
                None => continue,
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            inner.panicked.fetch_add(1, Ordering::Relaxed);
            warn!("Task panicked on sampler worker {}, continuing", id);
        }
        inner.executed.fetch_add(1, Ordering::Relaxed);
    }
}
