//! Control flow: noop, goto and the branch family.
//!
//! Branch operands are signed byte offsets from the start of the branch
//! instruction, so a taken branch is `pc = jump_target()` and a fallthrough
//! is `pc = next_pc()`.

use crate::frame::FrameId;
use crate::worker::Worker;
use quill_bytecode::{Instr, Opcode};
use quill_core::VmError;
use std::cmp::Ordering;

pub(super) fn noop(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    w.arena.get_mut(fid)?.pc = instr.next_pc();
    Ok(())
}

pub(super) fn goto(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    w.arena.get_mut(fid)?.pc = instr.jump_target();
    Ok(())
}

/// brt/brf: branch when the condition register matches `want`.
pub(super) fn br_bool(
    w: &mut Worker,
    fid: FrameId,
    instr: &Instr<'_>,
    want: bool,
) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let cond = frame.load(instr.u16_at(3))?;
    let b = cond.as_bool().ok_or(VmError::TypeMismatch {
        expected: "bool",
        found: cond.tag().name(),
    })?;
    frame.pc = if b == want {
        instr.jump_target()
    } else {
        instr.next_pc()
    };
    Ok(())
}

/// The comparison branches, using the total value ordering.
pub(super) fn br_cmp(
    w: &mut Worker,
    fid: FrameId,
    instr: &Instr<'_>,
    op: Opcode,
) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let a = frame.load(instr.u16_at(3))?;
    let b = frame.load(instr.u16_at(5))?;
    let ord = a.compare(&b);
    let taken = match op {
        Opcode::Breq => ord == Ordering::Equal,
        Opcode::Brne => ord != Ordering::Equal,
        Opcode::Brlt => ord == Ordering::Less,
        Opcode::Brgt => ord == Ordering::Greater,
        _ => unreachable!("br_cmp dispatched with a non-comparison opcode"),
    };
    frame.pc = if taken {
        instr.jump_target()
    } else {
        instr.next_pc()
    };
    Ok(())
}

/// brfail/brnfail: branch on whether the register holds a failure.
pub(super) fn br_fail(
    w: &mut Worker,
    fid: FrameId,
    instr: &Instr<'_>,
    on_failure: bool,
) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let v = frame.load(instr.u16_at(3))?;
    frame.pc = if v.is_failure() == on_failure {
        instr.jump_target()
    } else {
        instr.next_pc()
    };
    Ok(())
}
