//! Value construction and movement.

use crate::frame::FrameId;
use crate::worker::Worker;
use quill_bytecode::Instr;
use quill_core::{Failure, Value, VmError};
use std::sync::Arc;

pub(super) fn consti(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    frame.store(instr.u16_at(1), Value::Int(instr.i32_at(3) as i64))?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn consts(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let s = frame.proto.string(instr.u16_at(3))?.to_string();
    frame.store(instr.u16_at(1), Value::Str(s))?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn consthash(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let tag = Arc::clone(frame.proto.string(instr.u16_at(3))?);
    frame.store(instr.u16_at(1), Value::Hashtag(tag))?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn copy(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let v = frame.load(instr.u16_at(3))?;
    frame.store(instr.u16_at(1), v)?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn mov(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let v = frame.take(instr.u16_at(3))?;
    frame.store(instr.u16_at(1), v)?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn make_ref(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    frame.make_ref(instr.u16_at(1), instr.u16_at(3))?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn ctuple(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let size = instr.u8_at(3) as usize;
    let items = vec![Value::Void; size].into_boxed_slice();
    frame.store(instr.u16_at(1), Value::Tuple(items))?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn stuple(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let v = frame.load(instr.u16_at(4))?;
    frame.store_element(instr.u16_at(1), instr.u8_at(3), v)?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn clist(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    frame.store(instr.u16_at(1), Value::List(Box::new(Vec::new())))?;
    frame.pc = instr.next_pc();
    Ok(())
}

/// Prepend an item: consing onto void starts a fresh list.
pub(super) fn cons(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let list_reg = instr.u16_at(1);
    let item = frame.load(instr.u16_at(3))?;
    let updated = match frame.load(list_reg)? {
        Value::Void => Value::List(Box::new(vec![item])),
        Value::List(mut items) => {
            items.insert(0, item);
            Value::List(items)
        }
        other => {
            return Err(VmError::TypeMismatch {
                expected: "list",
                found: other.tag().name(),
            })
        }
    };
    frame.store(list_reg, updated)?;
    frame.pc = instr.next_pc();
    Ok(())
}

/// Accumulate the printable form of `src` onto the string in `dst`.
pub(super) fn stracc(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let dst = instr.u16_at(1);
    let src = frame.load(instr.u16_at(3))?;
    let updated = match frame.load(dst)? {
        Value::Void => Value::Str(src.to_string()),
        Value::Str(mut s) => {
            s.push_str(&src.to_string());
            Value::Str(s)
        }
        other => {
            return Err(VmError::TypeMismatch {
                expected: "string",
                found: other.tag().name(),
            })
        }
    };
    frame.store(dst, updated)?;
    frame.pc = instr.next_pc();
    Ok(())
}

/// Construct a failure value. Creating one does not fail the frame;
/// returning it does.
pub(super) fn cfailure(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let tag = Arc::clone(frame.proto.string(instr.u16_at(3))?);
    let (module, function, pc) = frame.location();
    let failure = Failure::new(&tag, module, function, pc);
    frame.store(instr.u16_at(1), Value::Failure(Box::new(failure)))?;
    frame.pc = instr.next_pc();
    Ok(())
}
