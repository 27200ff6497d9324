//! Opcode set and the instruction-size table.
//!
//! Every instruction is a variable-length record whose first byte is the
//! opcode; [`INSTRUCTION_SIZE`] maps each opcode to its total length in
//! bytes, opcode byte included. The table is built in const context and is
//! immutable for the life of the process; [`verify_sizes`] runs before the
//! scheduler starts and treats a zero-sized known opcode as a fatal
//! configuration error.

use quill_core::VmError;

/// Size of the opcode id space.
pub const NUM_OPCODES: usize = 256;

/// Bytecode operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Noop = 0x00,
    /// call result_reg, func_reg
    Call = 0x01,
    /// return value_reg
    Return = 0x03,
    /// ref dst, src — dst aliases src's slot
    Ref = 0x04,
    /// copy dst, src — deep value copy
    Copy = 0x05,
    /// move dst, src — src becomes void
    Move = 0x06,
    /// consti dst, i32
    ConstI = 0x08,
    /// consts dst, string_idx
    ConstS = 0x09,
    /// lfunc dst, modsym_idx — load a traditional function
    LFunc = 0x0a,
    /// loadtype dst, modsym_idx
    LoadType = 0x0c,
    /// lpfunc dst, protocol_modsym_idx, fname_string_idx
    LPFunc = 0x0d,
    /// lcontext dst, name_string_idx — context-chain lookup
    LContext = 0x0f,
    /// goto jmp
    Goto = 0x11,
    /// brf jmp, reg — branch if false
    Brf = 0x12,
    /// brt jmp, reg — branch if true
    Brt = 0x13,
    /// breq jmp, a, b
    Breq = 0x14,
    /// brne jmp, a, b
    Brne = 0x15,
    /// brlt jmp, a, b
    Brlt = 0x16,
    /// brgt jmp, a, b
    Brgt = 0x17,
    /// brfail jmp, reg — branch if reg holds a failure
    Brfail = 0x1a,
    /// brnfail jmp, reg — branch if reg does not hold a failure
    Brnfail = 0x1b,
    /// addi dst, a, b
    AddI = 0x30,
    /// isub dst, a, b
    ISub = 0x31,
    /// imult dst, a, b
    IMult = 0x32,
    /// idiv dst, a, b
    IDiv = 0x33,
    /// ctuple dst, size
    CTuple = 0x40,
    /// stuple tup, idx, src
    STuple = 0x41,
    /// clist dst — fresh empty list
    CList = 0x42,
    /// cons list, item — prepend item
    Cons = 0x43,
    /// consthash dst, string_idx
    ConstHash = 0x44,
    /// stracc dst, src — append printable form of src to the string in dst
    StrAcc = 0x46,
    /// cfailure dst, tag_string_idx
    CFailure = 0x47,
    /// fork jmp — spawn a parallel path at the next instruction, jump
    Fork = 0x4a,
    /// wait — block until all fork children reach a terminal state
    Wait = 0x4b,
    /// newproc pid_dst, func_reg — spawn a process
    NewProc = 0x4c,
    /// recv dst — dequeue the oldest mailbox message, blocking while empty
    Recv = 0x4d,
    /// send pid_reg, value_reg — result slot gets void or a failure
    Send = 0x4e,
}

/// Every opcode, for table verification and disassembly.
pub const ALL_OPCODES: &[Opcode] = &[
    Opcode::Noop,
    Opcode::Call,
    Opcode::Return,
    Opcode::Ref,
    Opcode::Copy,
    Opcode::Move,
    Opcode::ConstI,
    Opcode::ConstS,
    Opcode::LFunc,
    Opcode::LoadType,
    Opcode::LPFunc,
    Opcode::LContext,
    Opcode::Goto,
    Opcode::Brf,
    Opcode::Brt,
    Opcode::Breq,
    Opcode::Brne,
    Opcode::Brlt,
    Opcode::Brgt,
    Opcode::Brfail,
    Opcode::Brnfail,
    Opcode::AddI,
    Opcode::ISub,
    Opcode::IMult,
    Opcode::IDiv,
    Opcode::CTuple,
    Opcode::STuple,
    Opcode::CList,
    Opcode::Cons,
    Opcode::ConstHash,
    Opcode::StrAcc,
    Opcode::CFailure,
    Opcode::Fork,
    Opcode::Wait,
    Opcode::NewProc,
    Opcode::Recv,
    Opcode::Send,
];

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        let op = match byte {
            0x00 => Opcode::Noop,
            0x01 => Opcode::Call,
            0x03 => Opcode::Return,
            0x04 => Opcode::Ref,
            0x05 => Opcode::Copy,
            0x06 => Opcode::Move,
            0x08 => Opcode::ConstI,
            0x09 => Opcode::ConstS,
            0x0a => Opcode::LFunc,
            0x0c => Opcode::LoadType,
            0x0d => Opcode::LPFunc,
            0x0f => Opcode::LContext,
            0x11 => Opcode::Goto,
            0x12 => Opcode::Brf,
            0x13 => Opcode::Brt,
            0x14 => Opcode::Breq,
            0x15 => Opcode::Brne,
            0x16 => Opcode::Brlt,
            0x17 => Opcode::Brgt,
            0x1a => Opcode::Brfail,
            0x1b => Opcode::Brnfail,
            0x30 => Opcode::AddI,
            0x31 => Opcode::ISub,
            0x32 => Opcode::IMult,
            0x33 => Opcode::IDiv,
            0x40 => Opcode::CTuple,
            0x41 => Opcode::STuple,
            0x42 => Opcode::CList,
            0x43 => Opcode::Cons,
            0x44 => Opcode::ConstHash,
            0x46 => Opcode::StrAcc,
            0x47 => Opcode::CFailure,
            0x4a => Opcode::Fork,
            0x4b => Opcode::Wait,
            0x4c => Opcode::NewProc,
            0x4d => Opcode::Recv,
            0x4e => Opcode::Send,
            _ => return None,
        };
        Some(op)
    }

    /// Total instruction length in bytes, opcode byte included.
    #[inline]
    pub fn size(self) -> usize {
        INSTRUCTION_SIZE[self as usize] as usize
    }

    /// Whether the operand at byte offset 1 is a signed jump offset.
    #[inline]
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Goto
                | Opcode::Brf
                | Opcode::Brt
                | Opcode::Breq
                | Opcode::Brne
                | Opcode::Brlt
                | Opcode::Brgt
                | Opcode::Brfail
                | Opcode::Brnfail
                | Opcode::Fork
        )
    }
}

/// Per-opcode instruction lengths. Zero means "no such opcode".
pub static INSTRUCTION_SIZE: [u8; NUM_OPCODES] = build_size_table();

const fn build_size_table() -> [u8; NUM_OPCODES] {
    let mut t = [0u8; NUM_OPCODES];
    t[Opcode::Noop as usize] = 1;
    t[Opcode::Call as usize] = 5;
    t[Opcode::Return as usize] = 3;
    t[Opcode::Ref as usize] = 5;
    t[Opcode::Copy as usize] = 5;
    t[Opcode::Move as usize] = 5;
    t[Opcode::ConstI as usize] = 7;
    t[Opcode::ConstS as usize] = 5;
    t[Opcode::LFunc as usize] = 5;
    t[Opcode::LoadType as usize] = 5;
    t[Opcode::LPFunc as usize] = 7;
    t[Opcode::LContext as usize] = 5;
    t[Opcode::Goto as usize] = 3;
    t[Opcode::Brf as usize] = 5;
    t[Opcode::Brt as usize] = 5;
    t[Opcode::Breq as usize] = 7;
    t[Opcode::Brne as usize] = 7;
    t[Opcode::Brlt as usize] = 7;
    t[Opcode::Brgt as usize] = 7;
    t[Opcode::Brfail as usize] = 5;
    t[Opcode::Brnfail as usize] = 5;
    t[Opcode::AddI as usize] = 7;
    t[Opcode::ISub as usize] = 7;
    t[Opcode::IMult as usize] = 7;
    t[Opcode::IDiv as usize] = 7;
    t[Opcode::CTuple as usize] = 4;
    t[Opcode::STuple as usize] = 6;
    t[Opcode::CList as usize] = 3;
    t[Opcode::Cons as usize] = 5;
    t[Opcode::ConstHash as usize] = 5;
    t[Opcode::StrAcc as usize] = 5;
    t[Opcode::CFailure as usize] = 5;
    t[Opcode::Fork as usize] = 3;
    t[Opcode::Wait as usize] = 1;
    t[Opcode::NewProc as usize] = 5;
    t[Opcode::Recv as usize] = 3;
    t[Opcode::Send as usize] = 5;
    t
}

/// Startup check: every known opcode must have a nonzero size entry.
pub fn verify_sizes() -> Result<(), VmError> {
    for &op in ALL_OPCODES {
        if INSTRUCTION_SIZE[op as usize] == 0 {
            return Err(VmError::UnsizedOpcode(op as u8));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_table_complete() {
        verify_sizes().unwrap();
    }

    #[test]
    fn test_from_u8_round_trip() {
        for &op in ALL_OPCODES {
            assert_eq!(Opcode::from_u8(op as u8), Some(op));
        }
        assert_eq!(Opcode::from_u8(0xfe), None);
    }

    #[test]
    fn test_unknown_opcodes_have_zero_size() {
        assert_eq!(INSTRUCTION_SIZE[0xfe], 0);
        assert_eq!(INSTRUCTION_SIZE[0x02], 0);
    }
}
