//! The quill virtual machine: frame trees, cooperative processes and
//! worker scheduling over the bytecode in `quill_bytecode`.
//!
//! Execution model in one paragraph: every process is a tree of frames
//! owned by exactly one worker. Workers interleave frames one instruction
//! at a time through a fresh/stale queue pair, park blocked frames
//! (`IoWait` on the per-worker epoll instance, `PeerWait` on calls, joins
//! and empty mailboxes) and deliver child results and failures up the
//! tree. The only cross-worker surfaces are the frozen module set, the
//! pid-to-mailbox registry and the pending-spawn queue, all held in
//! [`AppShared`].

pub mod app;
pub mod frame;
pub mod io;
mod ops;
pub mod process;
pub mod resolve;
pub mod stdlib;
pub mod worker;

pub use app::{AppShared, Application, MAIN_PID};
pub use frame::{Frame, FrameArena, FrameId, FrameKind, FrameState};
pub use io::IoPoller;
pub use process::{Mailbox, ProcessHandle, SpawnRequest};
pub use resolve::{ModuleSet, ResolveCache};
pub use worker::Worker;
