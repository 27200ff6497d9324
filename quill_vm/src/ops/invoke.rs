//! Function loading, dynamic dispatch, calls and returns.
//!
//! A call suspends the caller (`PeerWait`) and runs the callee as a child
//! frame that adopts the function value's register window; natives run
//! inline on the caller's tick. Protocol functions resolve their concrete
//! implementation here, at the call, from the runtime type of the first
//! argument.

use crate::frame::{Frame, FrameId, FrameKind, FrameState};
use crate::worker::Worker;
use quill_bytecode::Instr;
use quill_core::{
    Callable, FnContext, FunctionValue, NativeCtx, NativeOutcome, TypeDesc, TypeTag, Value,
    VmError,
};
use std::sync::Arc;

pub(super) fn lfunc(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let sym = w.arena.get(fid)?.proto.modsym(instr.u16_at(3))?.clone();
    let callable = w.app.modules().resolve_function(&sym.module, &sym.symbol)?;
    let frame = w.arena.get_mut(fid)?;
    frame.store(
        instr.u16_at(1),
        Value::Function(Box::new(FunctionValue::new(callable))),
    )?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn lpfunc(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let (sym, fname) = {
        let frame = w.arena.get(fid)?;
        (
            frame.proto.modsym(instr.u16_at(3))?.clone(),
            Arc::clone(frame.proto.string(instr.u16_at(5))?),
        )
    };
    let callable = w
        .app
        .modules()
        .resolve_protocol_function(&sym.module, &sym.symbol, &fname)?;
    let frame = w.arena.get_mut(fid)?;
    frame.store(
        instr.u16_at(1),
        Value::Function(Box::new(FunctionValue::new(callable))),
    )?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn load_type(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let sym = w.arena.get(fid)?.proto.modsym(instr.u16_at(3))?.clone();
    if !w.app.modules().contains(&sym.module) {
        return Err(VmError::ModuleNotFound(sym.module.to_string()));
    }
    let frame = w.arena.get_mut(fid)?;
    frame.store(
        instr.u16_at(1),
        Value::Kind(TypeDesc::new(&sym.module, &sym.symbol)),
    )?;
    frame.pc = instr.next_pc();
    Ok(())
}

/// Walk the parent chain for a named context slot; absent slots are
/// created (void) at the requesting frame.
pub(super) fn lcontext(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let name = Arc::clone(w.arena.get(fid)?.proto.string(instr.u16_at(3))?);
    let mut cursor = Some(fid);
    let mut found: Option<Value> = None;
    while let Some(cur) = cursor {
        let frame = w.arena.get(cur)?;
        if let Some(v) = frame.context.get(&name) {
            found = Some(v.clone());
            break;
        }
        cursor = frame.parent;
    }
    let frame = w.arena.get_mut(fid)?;
    let value = match found {
        Some(v) => v,
        None => {
            frame.context.insert(name, Value::Void);
            Value::Void
        }
    };
    frame.store(instr.u16_at(1), value)?;
    frame.pc = instr.next_pc();
    Ok(())
}

pub(super) fn call(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let result_dst = instr.u16_at(1);
    let mut fv = match w.arena.get(fid)?.load(instr.u16_at(3))? {
        Value::Function(fv) => *fv,
        other => {
            return Err(VmError::TypeMismatch {
                expected: "function",
                found: other.tag().name(),
            })
        }
    };
    dispatch(w, &mut fv)?;
    let pid = w.arena.get(fid)?.pid;

    match fv.callable.clone() {
        Callable::Native(native) => {
            let argc = native.argc as usize;
            if fv.registers.len() < argc {
                fv.registers.resize(argc, Value::Void);
            }
            let mut ctx = NativeCtx {
                args: &mut fv.registers[..argc],
                pid,
            };
            match (native.run)(&mut ctx) {
                NativeOutcome::Return(v) => {
                    let frame = w.arena.get_mut(fid)?;
                    frame.pc = instr.next_pc();
                    frame.store(result_dst, v)?;
                }
                NativeOutcome::Fail(mut failure) => {
                    let frame = w.arena.get_mut(fid)?;
                    frame.pc = instr.next_pc();
                    {
                        let (module, function, pc) = frame.location();
                        failure.trace_up(module, function, pc);
                    }
                    frame.store(result_dst, Value::Failure(Box::new(failure.clone())))?;
                    if !w.captures(fid)? {
                        let frame = w.arena.get_mut(fid)?;
                        frame.state = FrameState::Failed;
                        frame.result = Value::Failure(Box::new(failure));
                    }
                }
                NativeOutcome::Wait(request) => {
                    // Leave the pc on the call so the native retries once
                    // the descriptor is ready.
                    let frame = w.arena.get_mut(fid)?;
                    frame.io = Some(request);
                    frame.state = FrameState::IoWait;
                }
            }
        }
        Callable::Bytecode(proto) => {
            let frame = w.arena.get_mut(fid)?;
            frame.pc = instr.next_pc();
            frame.state = FrameState::PeerWait;
            let mut child = Frame::new(
                proto,
                fv.registers,
                pid,
                FrameKind::Call { result_dst },
                Some(fid),
            );
            child.state = FrameState::Ready;
            let cid = w.arena.alloc(child);
            w.fresh.push_front(cid);
        }
    }
    Ok(())
}

/// Resolve a protocol function to its concrete implementation from the
/// runtime type of the dispatching (first) argument.
fn dispatch(w: &mut Worker, fv: &mut FunctionValue) -> Result<(), VmError> {
    let (protocol_module, protocol_name, fname) = match fv.callable.fcontext() {
        FnContext::Traditional | FnContext::Override { .. } => return Ok(()),
        FnContext::ProtocolDefault { protocol } | FnContext::ProtocolAbstract { protocol } => (
            Arc::clone(fv.callable.module_name()),
            Arc::clone(protocol),
            Arc::clone(fv.callable.name()),
        ),
    };
    let param_type = fv
        .registers
        .first()
        .map(Value::type_desc)
        .unwrap_or_else(|| TypeDesc::primitive(TypeTag::Void));
    let resolved = w.cache.override_for(
        w.app.modules(),
        &protocol_module,
        &protocol_name,
        &fname,
        &param_type,
    )?;
    match resolved {
        Some(callable) => {
            fv.retarget(callable);
            Ok(())
        }
        None => match fv.callable.fcontext() {
            FnContext::ProtocolAbstract { protocol } => Err(VmError::AbstractCall {
                protocol: protocol.to_string(),
                function: fname.to_string(),
            }),
            _ => Ok(()),
        },
    }
}

/// Returning a failure fails the frame; anything else completes it. The
/// worker delivers the result to the parent either way.
pub(super) fn ret(w: &mut Worker, fid: FrameId, instr: &Instr<'_>) -> Result<(), VmError> {
    let frame = w.arena.get_mut(fid)?;
    let v = frame.load(instr.u16_at(1))?;
    frame.pc = instr.next_pc();
    frame.state = if v.is_failure() {
        FrameState::Failed
    } else {
        FrameState::Complete
    };
    frame.result = v;
    Ok(())
}
