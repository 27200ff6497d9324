//! Application coordination: the process registry, spawn distribution and
//! worker lifecycle.
//!
//! [`AppShared`] is the only state shared between workers: the frozen
//! module set, the pid allocator, the `DashMap` process registry (pid to
//! mailbox) and the pending-spawn queue. Frames and the rest of a process
//! never cross workers.
//!
//! [`Application`] wraps the threaded arrangement: worker threads run
//! [`Worker::run`](crate::worker::Worker::run) while the calling thread
//! distributes pending spawns round-robin over worker inboxes until the
//! live-process count reaches zero.

use crate::process::{Mailbox, ProcessHandle, SpawnRequest};
use crate::resolve::ModuleSet;
use crate::worker::Worker;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use quill_core::{FunctionValue, Pid, VmError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Pid of the first spawned process; its exit code is the application's.
pub const MAIN_PID: Pid = 1;

// =============================================================================
// Shared state
// =============================================================================

pub struct AppShared {
    modules: ModuleSet,
    registry: DashMap<Pid, ProcessHandle>,
    pending: Mutex<VecDeque<SpawnRequest>>,
    pending_cv: Condvar,
    next_pid: AtomicU64,
    live: AtomicUsize,
    shutdown: AtomicBool,
    exit_code: AtomicI32,
}

impl AppShared {
    pub fn new(modules: ModuleSet) -> Arc<Self> {
        Arc::new(Self {
            modules,
            registry: DashMap::new(),
            pending: Mutex::new(VecDeque::new()),
            pending_cv: Condvar::new(),
            next_pid: AtomicU64::new(MAIN_PID),
            live: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
        })
    }

    #[inline]
    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    /// Allocate a pid and queue the process for adoption. The registry
    /// entry exists before this returns, so a send racing the spawn still
    /// finds the mailbox.
    pub fn spawn(&self, function: FunctionValue) -> Pid {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let mailbox = Mailbox::new();
        self.registry.insert(
            pid,
            ProcessHandle {
                pid,
                mailbox: mailbox.clone(),
            },
        );
        self.live.fetch_add(1, Ordering::SeqCst);
        debug!(pid, function = %function.name(), "process spawned");
        self.pending.lock().push_back(SpawnRequest {
            pid,
            function,
            mailbox,
        });
        self.pending_cv.notify_one();
        pid
    }

    /// Look up a live process's mailbox.
    pub fn mailbox(&self, pid: Pid) -> Option<Mailbox> {
        self.registry.get(&pid).map(|h| h.mailbox.clone())
    }

    /// Record a process exit. The last exit triggers shutdown.
    pub fn process_exited(&self, pid: Pid, exit_code: i64) {
        self.registry.remove(&pid);
        if pid == MAIN_PID {
            self.exit_code.store(exit_code as i32, Ordering::SeqCst);
        }
        debug!(pid, exit_code, "process exited");
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.request_shutdown();
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.pending_cv.notify_all();
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    /// Take one pending spawn without blocking.
    pub fn take_pending(&self) -> Option<SpawnRequest> {
        self.pending.lock().pop_front()
    }

    /// Block until a spawn is pending or shutdown is requested.
    fn wait_pending(&self, timeout: Duration) -> Option<SpawnRequest> {
        let mut pending = self.pending.lock();
        if pending.is_empty() && !self.is_shutdown() {
            self.pending_cv.wait_for(&mut pending, timeout);
        }
        pending.pop_front()
    }
}

// =============================================================================
// Application
// =============================================================================

/// The threaded runtime: workers plus the spawn distributor.
pub struct Application {
    shared: Arc<AppShared>,
    worker_count: usize,
}

impl Application {
    pub fn new(modules: ModuleSet, worker_count: usize) -> Self {
        Self {
            shared: AppShared::new(modules),
            worker_count: worker_count.max(1),
        }
    }

    #[inline]
    pub fn shared(&self) -> &Arc<AppShared> {
        &self.shared
    }

    /// Spawn the main process from a named traditional function.
    pub fn spawn_main(&self, module: &str, function: &str) -> Result<Pid, VmError> {
        let callable = self.shared.modules.resolve_function(module, function)?;
        Ok(self.shared.spawn(FunctionValue::new(callable)))
    }

    /// Run workers until every process has exited. Returns the main
    /// process's exit code.
    pub fn run(self) -> Result<i32, VmError> {
        let mut inboxes = Vec::with_capacity(self.worker_count);
        let mut handles = Vec::with_capacity(self.worker_count);
        for id in 0..self.worker_count {
            let mut worker = Worker::new(id, Arc::clone(&self.shared))?;
            inboxes.push(worker.inbox_handle());
            handles.push(std::thread::spawn(move || worker.run()));
        }

        // Distribute pending spawns round-robin until shutdown.
        let mut next = 0usize;
        while !self.shared.is_shutdown() {
            if let Some(request) = self.shared.wait_pending(Duration::from_millis(50)) {
                debug!(pid = request.pid, worker = next, "process assigned");
                inboxes[next].lock().push_back(request);
                next = (next + 1) % inboxes.len();
            }
        }

        let mut result = Ok(self.shared.exit_code());
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "worker aborted");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
                Err(_) => {
                    if result.is_ok() {
                        result = Err(VmError::Io(std::io::Error::other("worker panicked")));
                    }
                }
            }
        }
        result
    }
}
