//! The worker scheduling loop.
//!
//! A worker owns a frame arena, two run queues and an epoll instance. One
//! scheduling pass does four things, in order: adopt newly assigned
//! processes, collect I/O readiness, re-check peer-waiting frames, then
//! execute exactly one instruction of the next runnable frame. A frame
//! that stays runnable keeps the front of the fresh queue, so the worker
//! stays on it until it blocks or finishes; woken frames land on the
//! stale queue, which swaps in when the fresh queue empties.
//!
//! Frames that reach a terminal state while fork children are still
//! running are parked on the drain list and reclaimed on a later pass,
//! once the whole subtree has settled.
//!
//! [`Worker::tick`] is the deterministic single-pass entry used by tests
//! and embedders; [`Worker::run`] is the thread body used by
//! [`Application`](crate::app::Application).

use crate::app::AppShared;
use crate::frame::{frame_failure, Frame, FrameArena, FrameId, FrameKind, FrameState};
use crate::io::IoPoller;
use crate::ops;
use crate::process::{Mailbox, SpawnRequest};
use crate::resolve::ResolveCache;
use parking_lot::Mutex;
use quill_bytecode::{verify_sizes, Opcode};
use quill_core::{Callable, Failure, Pid, Value, VmError};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct Worker {
    id: usize,
    pub(crate) app: Arc<AppShared>,
    pub(crate) arena: FrameArena,
    pub(crate) fresh: VecDeque<FrameId>,
    stale: VecDeque<FrameId>,
    /// Frames in `PeerWait` on a polled condition (recv, join).
    waiting: Vec<FrameId>,
    /// Terminal frames with unsettled fork children.
    drain: Vec<FrameId>,
    poller: IoPoller,
    pub(crate) cache: ResolveCache,
    /// Mailboxes of processes adopted by this worker.
    pub(crate) mailboxes: FxHashMap<Pid, Mailbox>,
    inbox: Arc<Mutex<VecDeque<SpawnRequest>>>,
}

impl Worker {
    pub fn new(id: usize, app: Arc<AppShared>) -> Result<Self, VmError> {
        // a zero-size table entry is a build defect; refuse to schedule
        verify_sizes()?;
        Ok(Self {
            id,
            app,
            arena: FrameArena::new(),
            fresh: VecDeque::new(),
            stale: VecDeque::new(),
            waiting: Vec::new(),
            drain: Vec::new(),
            poller: IoPoller::new()?,
            cache: ResolveCache::new(),
            mailboxes: FxHashMap::default(),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
        })
    }

    /// The queue the distributor assigns spawns through.
    pub fn inbox_handle(&self) -> Arc<Mutex<VecDeque<SpawnRequest>>> {
        Arc::clone(&self.inbox)
    }

    /// Number of live frames in this worker's arena.
    pub fn frame_count(&self) -> usize {
        self.arena.live()
    }

    // -------------------------------------------------------------------------
    // Process adoption
    // -------------------------------------------------------------------------

    /// Take ownership of a spawned process: build its root frame and make
    /// it runnable.
    pub fn adopt(&mut self, request: SpawnRequest) -> Result<FrameId, VmError> {
        let SpawnRequest {
            pid,
            function,
            mailbox,
        } = request;
        let proto = match function.callable {
            Callable::Bytecode(p) => p,
            Callable::Native(_) => {
                return Err(VmError::TypeMismatch {
                    expected: "bytecode function",
                    found: "native function",
                })
            }
        };
        let mut root = Frame::new(proto, function.registers, pid, FrameKind::ProcessRoot, None);
        root.state = FrameState::Ready;
        let fid = self.arena.alloc(root);
        self.mailboxes.insert(pid, mailbox);
        self.fresh.push_back(fid);
        debug!(worker = self.id, pid, frame = %fid, "process adopted");
        Ok(fid)
    }

    /// Adopt everything on the application's pending queue. This is the
    /// single-threaded driving mode; under [`Application`] the distributor
    /// fills per-worker inboxes instead.
    pub fn adopt_pending(&mut self) -> Result<usize, VmError> {
        let mut adopted = 0;
        while let Some(request) = self.app.take_pending() {
            self.adopt(request)?;
            adopted += 1;
        }
        Ok(adopted)
    }

    // -------------------------------------------------------------------------
    // Scheduling
    // -------------------------------------------------------------------------

    /// One deterministic scheduling pass: adopt, poll, wake, execute one
    /// instruction. Returns whether anything happened.
    pub fn tick(&mut self) -> Result<bool, VmError> {
        self.adopt_pending()?;
        self.pass(0)
    }

    fn pass(&mut self, io_timeout_ms: i32) -> Result<bool, VmError> {
        let mut worked = false;

        loop {
            let request = self.inbox.lock().pop_front();
            match request {
                Some(r) => {
                    self.adopt(r)?;
                    worked = true;
                }
                None => break,
            }
        }

        let mut ready = Vec::new();
        self.poller.poll(io_timeout_ms, &mut ready)?;
        for fid in ready {
            let frame = self.arena.get_mut(fid)?;
            frame.state = FrameState::Ready;
            self.stale.push_back(fid);
            worked = true;
        }

        if self.revisit_waiting()? > 0 {
            worked = true;
        }

        if let Some(fid) = self.find_task() {
            self.step(fid)?;
            worked = true;
        }

        self.sweep_drain()?;
        Ok(worked)
    }

    /// Thread body: loop passes until shutdown and local quiescence.
    pub fn run(&mut self) -> Result<(), VmError> {
        loop {
            let runnable = !self.fresh.is_empty() || !self.stale.is_empty();
            let timeout = if runnable { 0 } else { 10 };
            let worked = match self.pass(timeout) {
                Ok(w) => w,
                Err(e) => {
                    error!(worker = self.id, error = %e, "worker aborting");
                    self.app.request_shutdown();
                    return Err(e);
                }
            };
            if self.app.is_shutdown() && self.idle() {
                debug!(worker = self.id, "worker finished");
                return Ok(());
            }
            if !worked && self.poller.pending() == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn idle(&self) -> bool {
        self.fresh.is_empty()
            && self.stale.is_empty()
            && self.waiting.is_empty()
            && self.drain.is_empty()
            && self.arena.is_empty()
            && self.inbox.lock().is_empty()
    }

    /// Pick the next runnable frame. The stale queue becomes fresh when
    /// the fresh queue empties.
    fn find_task(&mut self) -> Option<FrameId> {
        if self.fresh.is_empty() {
            std::mem::swap(&mut self.fresh, &mut self.stale);
        }
        self.fresh.pop_front()
    }

    /// Re-check frames waiting on a polled condition: a recv waits for its
    /// mailbox, a join waits for its fork children. Call frames blocked on
    /// a child are woken explicitly and never appear here.
    fn revisit_waiting(&mut self) -> Result<usize, VmError> {
        let mut woken = 0;
        let mut i = 0;
        while i < self.waiting.len() {
            let fid = self.waiting[i];
            let Ok(frame) = self.arena.get(fid) else {
                self.waiting.swap_remove(i);
                continue;
            };
            if frame.state != FrameState::PeerWait {
                self.waiting.swap_remove(i);
                continue;
            }
            let wake = match frame.proto.code.get(frame.pc).copied() {
                Some(b) if b == Opcode::Recv as u8 => self
                    .mailboxes
                    .get(&frame.pid)
                    .map(|mb| !mb.is_empty())
                    .unwrap_or(false),
                Some(b) if b == Opcode::Wait as u8 => frame.children_settled(&self.arena)?,
                _ => false,
            };
            if wake {
                self.arena.get_mut(fid)?.state = FrameState::Ready;
                self.fresh.push_back(fid);
                self.waiting.swap_remove(i);
                woken += 1;
            } else {
                i += 1;
            }
        }
        Ok(woken)
    }

    /// Execute one instruction of `fid` and route it by its new state.
    fn step(&mut self, fid: FrameId) -> Result<(), VmError> {
        ops::execute(self, fid)?;
        let state = self.arena.get(fid)?.state;
        match state {
            // still runnable: stay on this frame next pass
            FrameState::Ready => self.fresh.push_front(fid),
            FrameState::PeerWait => {
                // Recv/join park here for polling; call parents wait for
                // an explicit wake from their child.
                let frame = self.arena.get(fid)?;
                if let Some(&b) = frame.proto.code.get(frame.pc) {
                    if b == Opcode::Recv as u8 || b == Opcode::Wait as u8 {
                        self.waiting.push(fid);
                    }
                }
            }
            FrameState::IoWait => {
                let request = self
                    .arena
                    .get_mut(fid)?
                    .io
                    .take()
                    .ok_or(VmError::DeadFrame(fid.raw()))?;
                // descriptor errors fail the frame, not the worker
                if let Err(e) = self.poller.register(request, fid) {
                    warn!(
                        worker = self.id,
                        frame = %fid,
                        error = %e,
                        "descriptor registration failed"
                    );
                    let frame = self.arena.get_mut(fid)?;
                    let failure = {
                        let (module, function, pc) = frame.location();
                        Failure::new("io_error", module, function, pc)
                            .with_debug(&e.to_string())
                    };
                    frame.result = Value::Failure(Box::new(failure));
                    frame.state = FrameState::Failed;
                    self.finish_frame(fid)?;
                }
            }
            FrameState::Failed | FrameState::Complete => self.finish_frame(fid)?,
            FrameState::New => self.stale.push_back(fid),
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Completion and failure delivery
    // -------------------------------------------------------------------------

    /// Whether `fid`'s next instruction captures a delivered failure.
    pub(crate) fn captures(&self, fid: FrameId) -> Result<bool, VmError> {
        let frame = self.arena.get(fid)?;
        Ok(match frame.proto.code.get(frame.pc) {
            Some(&b) => b == Opcode::Brfail as u8 || b == Opcode::Brnfail as u8,
            None => false,
        })
    }

    /// Handle a frame that reached a terminal state: deliver its result or
    /// failure, then reclaim what can be reclaimed.
    fn finish_frame(&mut self, fid: FrameId) -> Result<(), VmError> {
        let frame = self.arena.get(fid)?;
        let kind = frame.kind;
        let state = frame.state;
        let pid = frame.pid;
        match kind {
            FrameKind::Call { result_dst } => {
                let parent = frame.parent.ok_or(VmError::DeadFrame(fid.raw()))?;
                if state == FrameState::Complete {
                    let value = std::mem::take(&mut self.arena.get_mut(fid)?.result);
                    let pf = self.arena.get_mut(parent)?;
                    pf.store(result_dst, value)?;
                    pf.state = FrameState::Ready;
                    self.fresh.push_back(parent);
                    self.reclaim(fid)?;
                } else {
                    let mut failure =
                        match std::mem::take(&mut self.arena.get_mut(fid)?.result) {
                            Value::Failure(f) => f,
                            _ => return Err(VmError::DeadFrame(fid.raw())),
                        };
                    let (module, function, ppc) = {
                        let pf = self.arena.get(parent)?;
                        (
                            Arc::clone(&pf.proto.module),
                            Arc::clone(&pf.proto.name),
                            pf.pc,
                        )
                    };
                    // One trace entry per frame crossing.
                    failure.trace_up(&module, &function, ppc);
                    self.reclaim(fid)?;
                    let captured = self.captures(parent)?;
                    let pf = self.arena.get_mut(parent)?;
                    pf.store(result_dst, Value::Failure(failure.clone()))?;
                    if captured {
                        pf.state = FrameState::Ready;
                        self.fresh.push_back(parent);
                    } else {
                        pf.state = FrameState::Failed;
                        pf.result = Value::Failure(failure);
                        self.finish_frame(parent)?;
                    }
                }
            }
            FrameKind::Fork => {
                // The parent observes this child at its join; nothing to
                // deliver and nothing to free yet.
                if state == FrameState::Failed {
                    debug!(worker = self.id, pid, frame = %fid, "fork path failed");
                }
            }
            FrameKind::ProcessRoot => {
                let exit_code = match frame_failure(self.arena.get(fid)?) {
                    Some(failure) => {
                        error!(
                            worker = self.id,
                            pid,
                            report = %failure,
                            "failure escaped process root"
                        );
                        failure.exit_code
                    }
                    None => 0,
                };
                self.mailboxes.remove(&pid);
                self.reclaim(fid)?;
                self.app.process_exited(pid, exit_code);
            }
        }
        Ok(())
    }

    /// Whether every frame in `fid`'s subtree (excluding `fid` itself) is
    /// terminal.
    fn subtree_settled(&self, fid: FrameId) -> Result<bool, VmError> {
        let frame = self.arena.get(fid)?;
        for &child in &frame.children {
            let c = self.arena.get(child)?;
            if !c.state.is_terminal() || !self.subtree_settled(child)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Free a terminal frame's subtree now, or park it on the drain list
    /// until its fork children settle.
    pub(crate) fn reclaim(&mut self, fid: FrameId) -> Result<(), VmError> {
        if self.subtree_settled(fid)? {
            self.free_tree(fid)?;
        } else {
            debug!(worker = self.id, frame = %fid, "frame parked on drain list");
            self.drain.push(fid);
        }
        Ok(())
    }

    fn free_tree(&mut self, fid: FrameId) -> Result<(), VmError> {
        let frame = self.arena.free(fid)?;
        for child in frame.children {
            if self.arena.get(child).is_ok() {
                self.free_tree(child)?;
            }
        }
        Ok(())
    }

    fn sweep_drain(&mut self) -> Result<(), VmError> {
        let mut i = 0;
        while i < self.drain.len() {
            let fid = self.drain[i];
            if self.arena.get(fid).is_err() {
                self.drain.swap_remove(i);
                continue;
            }
            if self.subtree_settled(fid)? {
                self.drain.swap_remove(i);
                self.free_tree(fid)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }
}
