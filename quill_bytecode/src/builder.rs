//! Label-based code assembly.
//!
//! [`CodeBuilder`] emits instructions into a growing byte buffer and
//! resolves jumps in two phases: every jump emits a zero placeholder and
//! records a patch site; [`CodeBuilder::finish`] rewrites each site once
//! all labels are bound, rejecting offsets outside the i16 range. Jump
//! operands are measured in bytes from the start of the jumping
//! instruction, so a patched offset is simply `target - jump_pc`.

use crate::opcode::Opcode;
use thiserror::Error;

/// A code position that jumps can target before it is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("label bound twice")]
    LabelRebound,
    #[error("unbound label at finish")]
    UnboundLabel,
    #[error("jump from pc {from} to {to} exceeds the i16 range")]
    JumpOutOfRange { from: usize, to: usize },
}

struct PatchSite {
    /// Start pc of the jumping instruction.
    instr_pc: usize,
    label: Label,
}

/// Incremental bytecode writer for one function body.
pub struct CodeBuilder {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    patches: Vec<PatchSite>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            labels: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Current write position, i.e. the pc of the next emitted instruction.
    #[inline]
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current pc.
    pub fn bind(&mut self, label: Label) -> Result<(), BuildError> {
        let slot = &mut self.labels[label.0];
        if slot.is_some() {
            return Err(BuildError::LabelRebound);
        }
        *slot = Some(self.code.len());
        Ok(())
    }

    // ---- raw emission ----

    fn op(&mut self, op: Opcode) -> usize {
        let pc = self.code.len();
        self.code.push(op as u8);
        pc
    }

    fn u8(&mut self, v: u8) {
        self.code.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    /// Emit a jump operand placeholder and record its patch site. Offsets
    /// are resolved and range-checked in [`CodeBuilder::finish`] whether
    /// the label is bound yet or not.
    fn jump_operand(&mut self, instr_pc: usize, label: Label) {
        self.patches.push(PatchSite { instr_pc, label });
        self.code.extend_from_slice(&0i16.to_le_bytes());
    }

    // ---- instructions ----

    pub fn noop(&mut self) {
        self.op(Opcode::Noop);
    }

    pub fn call(&mut self, result: u16, func: u16) {
        self.op(Opcode::Call);
        self.u16(result);
        self.u16(func);
    }

    pub fn ret(&mut self, value: u16) {
        self.op(Opcode::Return);
        self.u16(value);
    }

    pub fn ref_reg(&mut self, dst: u16, src: u16) {
        self.op(Opcode::Ref);
        self.u16(dst);
        self.u16(src);
    }

    pub fn copy(&mut self, dst: u16, src: u16) {
        self.op(Opcode::Copy);
        self.u16(dst);
        self.u16(src);
    }

    pub fn mov(&mut self, dst: u16, src: u16) {
        self.op(Opcode::Move);
        self.u16(dst);
        self.u16(src);
    }

    pub fn const_i(&mut self, dst: u16, value: i32) {
        self.op(Opcode::ConstI);
        self.u16(dst);
        self.i32(value);
    }

    pub fn const_s(&mut self, dst: u16, string_idx: u16) {
        self.op(Opcode::ConstS);
        self.u16(dst);
        self.u16(string_idx);
    }

    pub fn lfunc(&mut self, dst: u16, modsym_idx: u16) {
        self.op(Opcode::LFunc);
        self.u16(dst);
        self.u16(modsym_idx);
    }

    pub fn load_type(&mut self, dst: u16, modsym_idx: u16) {
        self.op(Opcode::LoadType);
        self.u16(dst);
        self.u16(modsym_idx);
    }

    pub fn lpfunc(&mut self, dst: u16, protocol_modsym_idx: u16, fname_string_idx: u16) {
        self.op(Opcode::LPFunc);
        self.u16(dst);
        self.u16(protocol_modsym_idx);
        self.u16(fname_string_idx);
    }

    pub fn lcontext(&mut self, dst: u16, name_string_idx: u16) {
        self.op(Opcode::LContext);
        self.u16(dst);
        self.u16(name_string_idx);
    }

    pub fn goto(&mut self, target: Label) {
        let pc = self.op(Opcode::Goto);
        self.jump_operand(pc, target);
    }

    pub fn brf(&mut self, target: Label, cond: u16) {
        let pc = self.op(Opcode::Brf);
        self.jump_operand(pc, target);
        self.u16(cond);
    }

    pub fn brt(&mut self, target: Label, cond: u16) {
        let pc = self.op(Opcode::Brt);
        self.jump_operand(pc, target);
        self.u16(cond);
    }

    pub fn breq(&mut self, target: Label, a: u16, b: u16) {
        let pc = self.op(Opcode::Breq);
        self.jump_operand(pc, target);
        self.u16(a);
        self.u16(b);
    }

    pub fn brne(&mut self, target: Label, a: u16, b: u16) {
        let pc = self.op(Opcode::Brne);
        self.jump_operand(pc, target);
        self.u16(a);
        self.u16(b);
    }

    pub fn brlt(&mut self, target: Label, a: u16, b: u16) {
        let pc = self.op(Opcode::Brlt);
        self.jump_operand(pc, target);
        self.u16(a);
        self.u16(b);
    }

    pub fn brgt(&mut self, target: Label, a: u16, b: u16) {
        let pc = self.op(Opcode::Brgt);
        self.jump_operand(pc, target);
        self.u16(a);
        self.u16(b);
    }

    pub fn brfail(&mut self, target: Label, reg: u16) {
        let pc = self.op(Opcode::Brfail);
        self.jump_operand(pc, target);
        self.u16(reg);
    }

    pub fn brnfail(&mut self, target: Label, reg: u16) {
        let pc = self.op(Opcode::Brnfail);
        self.jump_operand(pc, target);
        self.u16(reg);
    }

    pub fn addi(&mut self, dst: u16, a: u16, b: u16) {
        self.op(Opcode::AddI);
        self.u16(dst);
        self.u16(a);
        self.u16(b);
    }

    pub fn isub(&mut self, dst: u16, a: u16, b: u16) {
        self.op(Opcode::ISub);
        self.u16(dst);
        self.u16(a);
        self.u16(b);
    }

    pub fn imult(&mut self, dst: u16, a: u16, b: u16) {
        self.op(Opcode::IMult);
        self.u16(dst);
        self.u16(a);
        self.u16(b);
    }

    pub fn idiv(&mut self, dst: u16, a: u16, b: u16) {
        self.op(Opcode::IDiv);
        self.u16(dst);
        self.u16(a);
        self.u16(b);
    }

    pub fn ctuple(&mut self, dst: u16, size: u8) {
        self.op(Opcode::CTuple);
        self.u16(dst);
        self.u8(size);
    }

    pub fn stuple(&mut self, tuple: u16, idx: u8, src: u16) {
        self.op(Opcode::STuple);
        self.u16(tuple);
        self.u8(idx);
        self.u16(src);
    }

    pub fn clist(&mut self, dst: u16) {
        self.op(Opcode::CList);
        self.u16(dst);
    }

    pub fn cons(&mut self, list: u16, item: u16) {
        self.op(Opcode::Cons);
        self.u16(list);
        self.u16(item);
    }

    pub fn const_hash(&mut self, dst: u16, string_idx: u16) {
        self.op(Opcode::ConstHash);
        self.u16(dst);
        self.u16(string_idx);
    }

    pub fn stracc(&mut self, dst: u16, src: u16) {
        self.op(Opcode::StrAcc);
        self.u16(dst);
        self.u16(src);
    }

    pub fn cfailure(&mut self, dst: u16, tag_string_idx: u16) {
        self.op(Opcode::CFailure);
        self.u16(dst);
        self.u16(tag_string_idx);
    }

    pub fn fork(&mut self, join_target: Label) {
        let pc = self.op(Opcode::Fork);
        self.jump_operand(pc, join_target);
    }

    pub fn wait(&mut self) {
        self.op(Opcode::Wait);
    }

    pub fn newproc(&mut self, pid_dst: u16, func: u16) {
        self.op(Opcode::NewProc);
        self.u16(pid_dst);
        self.u16(func);
    }

    pub fn recv(&mut self, dst: u16) {
        self.op(Opcode::Recv);
        self.u16(dst);
    }

    pub fn send(&mut self, pid: u16, value: u16) {
        self.op(Opcode::Send);
        self.u16(pid);
        self.u16(value);
    }

    /// Patch all recorded jump sites and hand over the finished code block.
    pub fn finish(mut self) -> Result<Vec<u8>, BuildError> {
        for site in &self.patches {
            let target = self.labels[site.label.0].ok_or(BuildError::UnboundLabel)?;
            let off = target as isize - site.instr_pc as isize;
            let off = i16::try_from(off).map_err(|_| BuildError::JumpOutOfRange {
                from: site.instr_pc,
                to: target,
            })?;
            let operand = site.instr_pc + 1;
            self.code[operand..operand + 2].copy_from_slice(&off.to_le_bytes());
        }
        Ok(self.code)
    }
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
