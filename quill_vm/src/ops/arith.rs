//! Integer arithmetic.
//!
//! Operands must be ints; a mismatch is an invariant violation (corrupt
//! code), but division by zero is a recoverable user condition and fails
//! the frame with `#division_by_zero`.

use crate::frame::{FrameId, FrameState};
use crate::worker::Worker;
use quill_bytecode::{Instr, Opcode};
use quill_core::{Failure, Value, VmError};

pub(super) fn binop(
    w: &mut Worker,
    fid: FrameId,
    instr: &Instr<'_>,
    op: Opcode,
) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let a = int_operand(frame.load(instr.u16_at(3))?)?;
    let b = int_operand(frame.load(instr.u16_at(5))?)?;
    let result = match op {
        Opcode::AddI => a.wrapping_add(b),
        Opcode::ISub => a.wrapping_sub(b),
        Opcode::IMult => a.wrapping_mul(b),
        Opcode::IDiv => {
            if b == 0 {
                let (module, function, pc) = frame.location();
                let failure = Failure::new("division_by_zero", module, function, pc);
                frame.result = Value::Failure(Box::new(failure));
                frame.state = FrameState::Failed;
                return Ok(());
            }
            a.wrapping_div(b)
        }
        _ => unreachable!("binop dispatched with a non-arithmetic opcode"),
    };
    frame.store(instr.u16_at(1), Value::Int(result))?;
    frame.pc = instr.next_pc();
    Ok(())
}

fn int_operand(v: Value) -> Result<i64, VmError> {
    v.as_int().ok_or(VmError::TypeMismatch {
        expected: "int",
        found: v.tag().name(),
    })
}
