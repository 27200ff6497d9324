//! Instruction decoding.
//!
//! The program counter is a byte offset into a function's code block. An
//! [`Instr`] borrows the instruction's bytes after a bounds check, so the
//! typed operand accessors are infallible. Multi-byte operands are
//! little-endian; jump operands are signed 16-bit byte offsets relative to
//! the *start* of the jumping instruction.

use crate::opcode::{Opcode, INSTRUCTION_SIZE};
use quill_core::VmError;

/// One decoded instruction: its opcode and a borrow of its bytes.
#[derive(Debug, Clone, Copy)]
pub struct Instr<'a> {
    op: Opcode,
    bytes: &'a [u8],
    pc: usize,
}

impl<'a> Instr<'a> {
    /// Decode the instruction at `pc`.
    ///
    /// Fails on an unknown opcode or when the code block ends mid-operand;
    /// both indicate a corrupt module and abort the worker.
    pub fn decode(code: &'a [u8], pc: usize) -> Result<Instr<'a>, VmError> {
        let byte = *code.get(pc).ok_or(VmError::TruncatedInstruction {
            pc,
            need: 1,
        })?;
        let op = Opcode::from_u8(byte).ok_or(VmError::UnknownOpcode { opcode: byte, pc })?;
        let size = INSTRUCTION_SIZE[byte as usize] as usize;
        debug_assert!(size > 0, "sized table verified at startup");
        let end = pc + size;
        if end > code.len() {
            return Err(VmError::TruncatedInstruction { pc, need: size });
        }
        Ok(Instr {
            op,
            bytes: &code[pc..end],
            pc,
        })
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.op
    }

    /// Byte offset of this instruction in its code block.
    #[inline]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Total length in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Byte offset of the instruction following this one.
    #[inline]
    pub fn next_pc(&self) -> usize {
        self.pc + self.bytes.len()
    }

    // ---- typed operand accessors (offsets are relative to the opcode byte) ----

    #[inline]
    pub fn u8_at(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }

    #[inline]
    pub fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    #[inline]
    pub fn i16_at(&self, offset: usize) -> i16 {
        i16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    #[inline]
    pub fn i32_at(&self, offset: usize) -> i32 {
        i32::from_le_bytes([
            self.bytes[offset],
            self.bytes[offset + 1],
            self.bytes[offset + 2],
            self.bytes[offset + 3],
        ])
    }

    /// The signed jump operand, always stored at byte offset 1.
    #[inline]
    pub fn jump(&self) -> i16 {
        debug_assert!(self.op.is_jump());
        self.i16_at(1)
    }

    /// Absolute target pc of this instruction's jump operand.
    #[inline]
    pub fn jump_target(&self) -> usize {
        (self.pc as isize + self.jump() as isize) as usize
    }
}

/// Walk a code block, yielding the byte offset of every instruction.
///
/// Stops with an error at the first unknown opcode or truncated tail, so it
/// doubles as a structural check for freshly built code.
pub fn instruction_offsets(code: &[u8]) -> Result<Vec<usize>, VmError> {
    let mut offsets = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let instr = Instr::decode(code, pc)?;
        offsets.push(pc);
        pc = instr.next_pc();
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_consti() {
        // consti r1, 300
        let code = [0x08, 0x81, 0x00, 0x2c, 0x01, 0x00, 0x00];
        let instr = Instr::decode(&code, 0).unwrap();
        assert_eq!(instr.opcode(), Opcode::ConstI);
        assert_eq!(instr.u16_at(1), 0x0081);
        assert_eq!(instr.i32_at(3), 300);
        assert_eq!(instr.next_pc(), 7);
    }

    #[test]
    fn test_decode_negative_jump() {
        let mut code = vec![0x00; 8]; // eight noops
        code.extend_from_slice(&[0x11, 0x00, 0x00]); // goto, patched below
        let jmp = (-8i16).to_le_bytes();
        code[9] = jmp[0];
        code[10] = jmp[1];

        let instr = Instr::decode(&code, 8).unwrap();
        assert_eq!(instr.opcode(), Opcode::Goto);
        assert_eq!(instr.jump(), -8);
        assert_eq!(instr.jump_target(), 0);
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let code = [0xfeu8];
        assert!(matches!(
            Instr::decode(&code, 0),
            Err(VmError::UnknownOpcode { opcode: 0xfe, pc: 0 })
        ));
    }

    #[test]
    fn test_truncated_operand_rejected() {
        let code = [0x08u8, 0x81]; // consti missing its payload
        assert!(matches!(
            Instr::decode(&code, 0),
            Err(VmError::TruncatedInstruction { pc: 0, need: 7 })
        ));
    }

    #[test]
    fn test_offset_walk() {
        // noop; return r0; wait
        let code = [0x00, 0x03, 0x80, 0x00, 0x4b];
        assert_eq!(instruction_offsets(&code).unwrap(), vec![0, 1, 4]);
    }
}
