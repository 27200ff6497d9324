//! The frame tree: activation records and their arena.
//!
//! Frames never own each other; the tree is expressed as [`FrameId`]
//! handles into a per-worker [`FrameArena`] (a slab with a free list), so
//! parent/child links cannot dangle and reclamation is an explicit state
//! decision rather than a destructor side effect.
//!
//! A frame's register window is owned by the frame. Register access goes
//! through [`Frame::load`] / [`Frame::store`], which decode the 16-bit id
//! space, follow ref slots and index into value-indexable payloads for
//! secondary ids.

use quill_core::register::{Reg, SpecialReg};
use quill_core::{Failure, FunctionProto, IoRequest, Pid, Value, VmError};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Longest ref chain we will follow before declaring a cycle.
const MAX_REF_DEPTH: u8 = 8;

// =============================================================================
// Identity and state
// =============================================================================

/// Handle to a frame in a worker's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u32);

impl FrameId {
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        FrameId(raw)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Scheduling state of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Created, not yet enqueued.
    New,
    /// Runnable; in (or bound for) a run queue.
    Ready,
    /// Parked on the worker's I/O multiplexer.
    IoWait,
    /// Blocked on another frame or process (call child, join, recv).
    PeerWait,
    /// Terminal: a failure escaped this frame.
    Failed,
    /// Terminal: returned normally.
    Complete,
}

impl FrameState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, FrameState::Failed | FrameState::Complete)
    }
}

/// What kind of activation a frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Root of a process; its result leaves through the process exit.
    ProcessRoot,
    /// Ordinary call; the result is delivered to `result_dst` in the
    /// parent's window.
    Call { result_dst: u16 },
    /// Parallel path created by a fork; its result is discarded at the
    /// join.
    Fork,
}

// =============================================================================
// Frame
// =============================================================================

/// One activation record.
#[derive(Debug)]
pub struct Frame {
    pub kind: FrameKind,
    pub state: FrameState,
    /// The process this frame executes under.
    pub pid: Pid,
    pub parent: Option<FrameId>,
    /// Live fork children. Call children are reached through their own
    /// parent link; they are never listed here.
    pub children: SmallVec<[FrameId; 4]>,
    pub proto: Arc<FunctionProto>,
    pub registers: Vec<Value>,
    /// Byte offset of the next instruction to execute.
    pub pc: usize,
    /// The result special register.
    pub result: Value,
    /// Named context slots visible to this frame and its descendants.
    pub context: FxHashMap<Arc<str>, Value>,
    /// Pending multiplexer registration while in `IoWait`.
    pub io: Option<IoRequest>,
}

impl Frame {
    pub fn new(
        proto: Arc<FunctionProto>,
        registers: Vec<Value>,
        pid: Pid,
        kind: FrameKind,
        parent: Option<FrameId>,
    ) -> Self {
        let mut registers = registers;
        if registers.len() < proto.reg_total() {
            registers.resize(proto.reg_total(), Value::Void);
        }
        Self {
            kind,
            state: FrameState::New,
            pid,
            parent,
            children: SmallVec::new(),
            proto,
            registers,
            pc: 0,
            result: Value::Void,
            context: FxHashMap::default(),
            io: None,
        }
    }

    /// Module, function and pc, as recorded in failure traces.
    #[inline]
    pub fn location(&self) -> (&Arc<str>, &Arc<str>, usize) {
        (&self.proto.module, &self.proto.name, self.pc)
    }

    /// Whether every fork child has reached a terminal state. Takes the
    /// arena because children are ids.
    pub fn children_settled(&self, arena: &FrameArena) -> Result<bool, VmError> {
        for &child in &self.children {
            if !arena.get(child)?.state.is_terminal() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Register access
    // -------------------------------------------------------------------------

    fn primary_slot(&self, r: u8) -> Result<&Value, VmError> {
        self.registers
            .get(r as usize)
            .ok_or(VmError::RegisterOutOfBounds {
                index: r as u16,
                size: self.registers.len(),
            })
    }

    fn primary_slot_mut(&mut self, r: u8) -> Result<&mut Value, VmError> {
        let size = self.registers.len();
        self.registers
            .get_mut(r as usize)
            .ok_or(VmError::RegisterOutOfBounds {
                index: r as u16,
                size,
            })
    }

    /// Follow a chain of ref slots to the value they alias.
    fn follow<'a>(&'a self, mut v: &'a Value, from: u16) -> Result<&'a Value, VmError> {
        let mut depth = 0;
        while let Value::Ref(id) = v {
            depth += 1;
            if depth > MAX_REF_DEPTH {
                return Err(VmError::SelfReference(from));
            }
            v = match Reg::decode(*id)? {
                Reg::Primary(r) => self.primary_slot(r)?,
                Reg::Special(SpecialReg::Result) => &self.result,
                _ => return Err(VmError::InvalidRegister(*id)),
            };
        }
        Ok(v)
    }

    /// Read the value a register id denotes. Refs are followed; constant
    /// and special ids materialize their value.
    pub fn load(&self, raw: u16) -> Result<Value, VmError> {
        match Reg::decode(raw)? {
            Reg::Primary(r) => Ok(self.follow(self.primary_slot(r)?, raw)?.clone()),
            Reg::Secondary(major, minor) => {
                let base = self.follow(self.primary_slot(major)?, raw)?;
                index_get(base, minor, raw)
            }
            Reg::Const(c) => c.value(),
            Reg::Special(SpecialReg::Result) => Ok(self.result.clone()),
            Reg::Special(SpecialReg::Pid) => Ok(Value::Int(self.pid as i64)),
        }
    }

    /// Write through a register id. Writing a constant or the pid register
    /// is an invariant violation; refs in the destination are followed so
    /// the aliased slot is updated.
    pub fn store(&mut self, raw: u16, value: Value) -> Result<(), VmError> {
        self.store_depth(raw, value, 0)
    }

    fn store_depth(&mut self, raw: u16, value: Value, depth: u8) -> Result<(), VmError> {
        if depth > MAX_REF_DEPTH {
            return Err(VmError::SelfReference(raw));
        }
        match Reg::decode(raw)? {
            Reg::Primary(r) => {
                if let Value::Ref(id) = *self.primary_slot(r)? {
                    return self.store_depth(id, value, depth + 1);
                }
                *self.primary_slot_mut(r)? = value;
                Ok(())
            }
            Reg::Secondary(major, minor) => {
                if let Value::Ref(id) = *self.primary_slot(major)? {
                    // The base slot aliases another register; resolve it to
                    // a concrete primary index before indexing.
                    let target = self.resolve_primary(id, depth + 1)?;
                    let base = self.primary_slot_mut(target)?;
                    return index_set(base, minor, value, raw);
                }
                let base = self.primary_slot_mut(major)?;
                index_set(base, minor, value, raw)
            }
            Reg::Special(SpecialReg::Result) => {
                self.result = value;
                Ok(())
            }
            Reg::Const(_) | Reg::Special(SpecialReg::Pid) => Err(VmError::InvalidRegister(raw)),
        }
    }

    fn resolve_primary(&self, mut raw: u16, mut depth: u8) -> Result<u8, VmError> {
        loop {
            if depth > MAX_REF_DEPTH {
                return Err(VmError::SelfReference(raw));
            }
            match Reg::decode(raw)? {
                Reg::Primary(r) => {
                    if let Value::Ref(id) = *self.primary_slot(r)? {
                        raw = id;
                        depth += 1;
                    } else {
                        return Ok(r);
                    }
                }
                _ => return Err(VmError::InvalidRegister(raw)),
            }
        }
    }

    /// Move the value out of a register, leaving void. Constants and the
    /// pid register degrade to a copy.
    pub fn take(&mut self, raw: u16) -> Result<Value, VmError> {
        match Reg::decode(raw)? {
            Reg::Primary(r) => {
                if let Value::Ref(id) = *self.primary_slot(r)? {
                    let target = self.resolve_primary(id, 1)?;
                    return Ok(std::mem::take(self.primary_slot_mut(target)?));
                }
                Ok(std::mem::take(self.primary_slot_mut(r)?))
            }
            Reg::Special(SpecialReg::Result) => Ok(std::mem::take(&mut self.result)),
            _ => self.load(raw),
        }
    }

    /// Create a ref in `dst` aliasing `src`. A slot is never allowed to
    /// alias itself.
    pub fn make_ref(&mut self, dst: u16, src: u16) -> Result<(), VmError> {
        if dst == src {
            return Err(VmError::SelfReference(dst));
        }
        Reg::decode(src)?;
        self.store(dst, Value::Ref(src))
    }

    /// Write element `idx` of the indexable value in the register `base`
    /// denotes (tuple construction).
    pub fn store_element(&mut self, base: u16, idx: u8, value: Value) -> Result<(), VmError> {
        match Reg::decode(base)? {
            Reg::Primary(r) => {
                let target = if let Value::Ref(id) = *self.primary_slot(r)? {
                    self.resolve_primary(id, 1)?
                } else {
                    r
                };
                let slot = self.primary_slot_mut(target)?;
                index_set(slot, idx, value, base)
            }
            _ => Err(VmError::InvalidRegister(base)),
        }
    }
}

/// Read element `minor` of a value-indexable payload: a function value's
/// register file, a tuple, or a failure (type at 0, exit code at 1).
fn index_get(base: &Value, minor: u8, raw: u16) -> Result<Value, VmError> {
    match base {
        Value::Function(fv) => fv
            .registers
            .get(minor as usize)
            .cloned()
            .ok_or(VmError::RegisterOutOfBounds {
                index: minor as u16,
                size: fv.registers.len(),
            }),
        Value::Tuple(items) => items
            .get(minor as usize)
            .cloned()
            .ok_or(VmError::RegisterOutOfBounds {
                index: minor as u16,
                size: items.len(),
            }),
        Value::Failure(fail) => match minor {
            0 => Ok(Value::Hashtag(Arc::clone(&fail.tag))),
            1 => Ok(Value::Int(fail.exit_code)),
            _ => Err(VmError::RegisterOutOfBounds {
                index: minor as u16,
                size: 2,
            }),
        },
        _ => Err(VmError::NotIndexable(raw)),
    }
}

fn index_set(base: &mut Value, minor: u8, value: Value, raw: u16) -> Result<(), VmError> {
    match base {
        Value::Function(fv) => {
            let size = fv.registers.len();
            let slot = fv
                .registers
                .get_mut(minor as usize)
                .ok_or(VmError::RegisterOutOfBounds {
                    index: minor as u16,
                    size,
                })?;
            *slot = value;
            Ok(())
        }
        Value::Tuple(items) => {
            let size = items.len();
            let slot = items
                .get_mut(minor as usize)
                .ok_or(VmError::RegisterOutOfBounds {
                    index: minor as u16,
                    size,
                })?;
            *slot = value;
            Ok(())
        }
        Value::Failure(fail) if minor == 1 => {
            fail.exit_code = value.as_int().ok_or(VmError::TypeMismatch {
                expected: "int",
                found: "non-int exit code",
            })?;
            Ok(())
        }
        _ => Err(VmError::NotIndexable(raw)),
    }
}

/// The failure carried by a terminal frame, if it failed.
pub fn frame_failure(frame: &Frame) -> Option<&Failure> {
    match &frame.result {
        Value::Failure(f) => Some(f),
        _ => None,
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Slab of frames with a free list. Handles are never reused while the
/// slot is live; a stale handle surfaces as [`VmError::DeadFrame`].
#[derive(Debug, Default)]
pub struct FrameArena {
    slots: Vec<Option<Frame>>,
    free: Vec<u32>,
}

impl FrameArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, frame: Frame) -> FrameId {
        match self.free.pop() {
            Some(idx) => {
                debug_assert!(self.slots[idx as usize].is_none());
                self.slots[idx as usize] = Some(frame);
                FrameId(idx)
            }
            None => {
                self.slots.push(Some(frame));
                FrameId((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn get(&self, id: FrameId) -> Result<&Frame, VmError> {
        self.slots
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(VmError::DeadFrame(id.0))
    }

    pub fn get_mut(&mut self, id: FrameId) -> Result<&mut Frame, VmError> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(VmError::DeadFrame(id.0))
    }

    pub fn free(&mut self, id: FrameId) -> Result<Frame, VmError> {
        let slot = self
            .slots
            .get_mut(id.0 as usize)
            .ok_or(VmError::DeadFrame(id.0))?;
        let frame = slot.take().ok_or(VmError::DeadFrame(id.0))?;
        self.free.push(id.0);
        Ok(frame)
    }

    /// Number of live frames.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::register::{cint, creg, reg, reg2, CONST_NEWLINE};
    use quill_core::{Callable, FnContext, FunctionValue, REG_RESULT};

    fn proto(argc: u8, regc: u8) -> Arc<FunctionProto> {
        Arc::new(FunctionProto {
            module: Arc::from("m"),
            name: Arc::from("f"),
            fcontext: FnContext::Traditional,
            argc,
            regc,
            code: Arc::from(Vec::<u8>::new().into_boxed_slice()),
            strings: Arc::from(Vec::new().into_boxed_slice()),
            modsyms: Arc::from(Vec::new().into_boxed_slice()),
        })
    }

    fn frame(regs: usize) -> Frame {
        Frame::new(
            proto(0, regs as u8),
            Vec::new(),
            1,
            FrameKind::ProcessRoot,
            None,
        )
    }

    #[test]
    fn test_primary_load_store() {
        let mut f = frame(4);
        f.store(reg(2), Value::Int(9)).unwrap();
        assert_eq!(f.load(reg(2)).unwrap().as_int(), Some(9));
        assert!(matches!(
            f.store(reg(120), Value::Void),
            Err(VmError::RegisterOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_const_and_special_registers() {
        let mut f = frame(1);
        assert_eq!(f.load(cint(7)).unwrap().as_int(), Some(7));
        assert_eq!(f.load(creg(CONST_NEWLINE)).unwrap().as_str(), Some("\n"));
        f.store(REG_RESULT, Value::Int(3)).unwrap();
        assert_eq!(f.load(REG_RESULT).unwrap().as_int(), Some(3));
        // constants are read-only
        assert!(f.store(cint(0), Value::Void).is_err());
        // pid register reads the owning process id
        assert_eq!(f.load(quill_core::REG_PID).unwrap().as_int(), Some(1));
        assert!(f.store(quill_core::REG_PID, Value::Void).is_err());
    }

    #[test]
    fn test_ref_reads_and_writes_through() {
        let mut f = frame(4);
        f.store(reg(0), Value::Int(5)).unwrap();
        f.make_ref(reg(1), reg(0)).unwrap();
        assert_eq!(f.load(reg(1)).unwrap().as_int(), Some(5));

        f.store(reg(1), Value::Int(6)).unwrap();
        assert_eq!(f.load(reg(0)).unwrap().as_int(), Some(6));
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut f = frame(2);
        assert!(matches!(
            f.make_ref(reg(1), reg(1)),
            Err(VmError::SelfReference(_))
        ));
        // a two-slot cycle is caught by the depth guard on access
        f.registers[0] = Value::Ref(reg(1));
        f.registers[1] = Value::Ref(reg(0));
        assert!(matches!(f.load(reg(0)), Err(VmError::SelfReference(_))));
    }

    #[test]
    fn test_secondary_indexes_function_window() {
        let mut f = frame(2);
        let fv = FunctionValue::new(Callable::Bytecode(proto(2, 1)));
        f.store(reg(0), Value::Function(Box::new(fv))).unwrap();

        f.store(reg2(0, 1), Value::Int(42)).unwrap();
        assert_eq!(f.load(reg2(0, 1)).unwrap().as_int(), Some(42));
        assert!(matches!(
            f.load(reg2(0, 9)),
            Err(VmError::RegisterOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_secondary_indexes_failure_payload() {
        let mut f = frame(1);
        let fail = Failure::new("oops", &Arc::from("m"), &Arc::from("f"), 0);
        f.store(reg(0), Value::Failure(Box::new(fail))).unwrap();

        assert_eq!(f.load(reg2(0, 0)).unwrap().to_string(), "#oops");
        assert_eq!(f.load(reg2(0, 1)).unwrap().as_int(), Some(-1));
        f.store(reg2(0, 1), Value::Int(2)).unwrap();
        assert_eq!(f.load(reg2(0, 1)).unwrap().as_int(), Some(2));
        assert!(f.store(reg2(0, 0), Value::Void).is_err());
    }

    #[test]
    fn test_take_leaves_void() {
        let mut f = frame(2);
        f.store(reg(0), Value::Str("x".into())).unwrap();
        let v = f.take(reg(0)).unwrap();
        assert_eq!(v.as_str(), Some("x"));
        assert!(f.load(reg(0)).unwrap().is_void());
    }

    #[test]
    fn test_arena_reuses_slots() {
        let mut arena = FrameArena::new();
        let a = arena.alloc(frame(1));
        let b = arena.alloc(frame(1));
        assert_ne!(a, b);
        assert_eq!(arena.live(), 2);

        arena.free(a).unwrap();
        assert!(matches!(arena.get(a), Err(VmError::DeadFrame(_))));
        let c = arena.alloc(frame(1));
        assert_eq!(c.raw(), a.raw());
        assert_eq!(arena.live(), 2);
        assert!(arena.get(b).is_ok());
    }
}
