//! Instruction execution.
//!
//! Each handler is a free function over the worker, the frame and the
//! decoded instruction. Handlers own pc movement: most advance to the next
//! instruction, branches jump, and suspending instructions (call into a
//! child, recv on an empty mailbox, a native that would block) leave the
//! pc in place so the instruction retries when the frame resumes.

mod arith;
mod control;
mod data;
mod invoke;
mod proc;

use crate::frame::FrameId;
use crate::worker::Worker;
use quill_bytecode::{Instr, Opcode};
use quill_core::VmError;

pub(crate) fn execute(w: &mut Worker, fid: FrameId) -> Result<(), VmError> {
    let (code, pc) = {
        let frame = w.arena.get(fid)?;
        (frame.proto.code.clone(), frame.pc)
    };
    let instr = Instr::decode(&code, pc)?;
    match instr.opcode() {
        Opcode::Noop => control::noop(w, fid, &instr),
        Opcode::Goto => control::goto(w, fid, &instr),
        Opcode::Brf => control::br_bool(w, fid, &instr, false),
        Opcode::Brt => control::br_bool(w, fid, &instr, true),
        Opcode::Breq => control::br_cmp(w, fid, &instr, Opcode::Breq),
        Opcode::Brne => control::br_cmp(w, fid, &instr, Opcode::Brne),
        Opcode::Brlt => control::br_cmp(w, fid, &instr, Opcode::Brlt),
        Opcode::Brgt => control::br_cmp(w, fid, &instr, Opcode::Brgt),
        Opcode::Brfail => control::br_fail(w, fid, &instr, true),
        Opcode::Brnfail => control::br_fail(w, fid, &instr, false),

        Opcode::ConstI => data::consti(w, fid, &instr),
        Opcode::ConstS => data::consts(w, fid, &instr),
        Opcode::ConstHash => data::consthash(w, fid, &instr),
        Opcode::Copy => data::copy(w, fid, &instr),
        Opcode::Move => data::mov(w, fid, &instr),
        Opcode::Ref => data::make_ref(w, fid, &instr),
        Opcode::CTuple => data::ctuple(w, fid, &instr),
        Opcode::STuple => data::stuple(w, fid, &instr),
        Opcode::CList => data::clist(w, fid, &instr),
        Opcode::Cons => data::cons(w, fid, &instr),
        Opcode::StrAcc => data::stracc(w, fid, &instr),
        Opcode::CFailure => data::cfailure(w, fid, &instr),

        Opcode::AddI => arith::binop(w, fid, &instr, Opcode::AddI),
        Opcode::ISub => arith::binop(w, fid, &instr, Opcode::ISub),
        Opcode::IMult => arith::binop(w, fid, &instr, Opcode::IMult),
        Opcode::IDiv => arith::binop(w, fid, &instr, Opcode::IDiv),

        Opcode::LFunc => invoke::lfunc(w, fid, &instr),
        Opcode::LPFunc => invoke::lpfunc(w, fid, &instr),
        Opcode::LoadType => invoke::load_type(w, fid, &instr),
        Opcode::LContext => invoke::lcontext(w, fid, &instr),
        Opcode::Call => invoke::call(w, fid, &instr),
        Opcode::Return => invoke::ret(w, fid, &instr),

        Opcode::Fork => proc::fork(w, fid, &instr),
        Opcode::Wait => proc::wait(w, fid, &instr),
        Opcode::NewProc => proc::newproc(w, fid, &instr),
        Opcode::Recv => proc::recv(w, fid, &instr),
        Opcode::Send => proc::send(w, fid, &instr),
    }
}
