//! Parallel paths and processes: fork/wait, spawn, send, recv.

use crate::frame::{frame_failure, Frame, FrameId, FrameKind, FrameState};
use crate::worker::Worker;
use quill_bytecode::Instr;
use quill_core::{Failure, Value, VmError};
use std::sync::Arc;

/// Spawn a parallel path. The child snapshots this frame's register
/// window and starts at the instruction after the fork; the parent jumps
/// over the forked path. Both stay runnable.
pub(super) fn fork(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let (proto, registers, pid) = {
        let frame = w.arena.get(fid)?;
        (Arc::clone(&frame.proto), frame.registers.clone(), frame.pid)
    };
    let mut child = Frame::new(proto, registers, pid, FrameKind::Fork, Some(fid));
    child.pc = instr.next_pc();
    child.state = FrameState::Ready;
    let cid = w.arena.alloc(child);

    let frame = w.arena.get_mut(fid)?;
    frame.children.push(cid);
    frame.pc = instr.jump_target();
    w.fresh.push_back(cid);
    Ok(())
}

/// Join every fork child. Results are discarded; the first failed child's
/// failure (in spawn order) is delivered to this frame's result slot with
/// one unwind trace entry.
pub(super) fn wait(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    if !w.arena.get(fid)?.children_settled(&w.arena)? {
        // pc stays on the wait; the worker re-checks each pass
        w.arena.get_mut(fid)?.state = FrameState::PeerWait;
        return Ok(());
    }

    let children = std::mem::take(&mut w.arena.get_mut(fid)?.children);
    let mut failed: Option<Box<Failure>> = None;
    for &cid in &children {
        if failed.is_none() {
            if let Some(f) = frame_failure(w.arena.get(cid)?) {
                failed = Some(Box::new(f.clone()));
            }
        }
    }
    for cid in children {
        w.reclaim(cid)?;
    }

    let frame = w.arena.get_mut(fid)?;
    frame.pc = instr.next_pc();
    match failed {
        None => Ok(()),
        Some(mut failure) => {
            {
                let (module, function, pc) = frame.location();
                failure.trace_up(module, function, pc);
            }
            frame.result = Value::Failure(failure.clone());
            if w.captures(fid)? {
                Ok(())
            } else {
                let frame = w.arena.get_mut(fid)?;
                frame.state = FrameState::Failed;
                frame.result = Value::Failure(failure);
                Ok(())
            }
        }
    }
}

/// Spawn a process from a function value. The pid lands in the
/// destination register; delivery of the process's own result goes
/// nowhere (processes communicate by message).
pub(super) fn newproc(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let fv = match w.arena.get(fid)?.load(instr.u16_at(3))? {
        Value::Function(fv) => *fv,
        other => {
            return Err(VmError::TypeMismatch {
                expected: "function",
                found: other.tag().name(),
            })
        }
    };
    let pid = w.app.spawn(fv);
    let frame = w.arena.get_mut(fid)?;
    frame.store(instr.u16_at(1), Value::Int(pid as i64))?;
    frame.pc = instr.next_pc();
    Ok(())
}

/// Dequeue the oldest mailbox message, blocking (PeerWait) while empty.
pub(super) fn recv(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let pid = w.arena.get(fid)?.pid;
    let mailbox = w
        .mailboxes
        .get(&pid)
        .cloned()
        .ok_or(VmError::MailboxMissing(pid))?;
    match mailbox.pop() {
        Some(message) => {
            let frame = w.arena.get_mut(fid)?;
            frame.store(instr.u16_at(1), message)?;
            frame.pc = instr.next_pc();
        }
        None => {
            w.arena.get_mut(fid)?.state = FrameState::PeerWait;
        }
    }
    Ok(())
}

/// Fire-and-forget delivery. The sender's result slot reports the
/// outcome: void on delivery, a `#no_such_process` failure otherwise.
pub(super) fn send(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let (target, message) = {
        let frame = w.arena.get(fid)?;
        let pid_value = frame.load(instr.u16_at(1))?;
        let target = pid_value.as_int().ok_or(VmError::TypeMismatch {
            expected: "int",
            found: pid_value.tag().name(),
        })?;
        (target, frame.load(instr.u16_at(3))?)
    };
    let delivered = match w.app.mailbox(target as u64) {
        Some(mailbox) => {
            mailbox.push(message);
            true
        }
        None => false,
    };
    let frame = w.arena.get_mut(fid)?;
    frame.pc = instr.next_pc();
    let outcome = if delivered {
        Value::Void
    } else {
        let (module, function, pc) = frame.location();
        let failure = Failure::new("no_such_process", module, function, pc)
            .with_debug(&format!("pid {}", target));
        Value::Failure(Box::new(failure))
    };
    frame.result = outcome;
    Ok(())
}
