//! 16-bit register addressing.
//!
//! The register id space is partitioned by its high bits:
//!
//! ```text
//! 0b0... .1..  primary user register   (7-bit index)
//! 0b0... .0..  secondary register      (two 7-bit parts, "major.minor")
//! 0b10.. ....  constant register       (pre-defined literal)
//! 0b11.. ....  special register        (result, process identity)
//! ```
//!
//! Decoding is purely bit-pattern based; malformed ids are internal
//! invariant violations, never user-level failures.
//!
//! The constant-register literal set is fixed by the bytecode contract:
//! void, false, true, 0.0, "", "\n", [], empty vector, and the small
//! integers 0–15. The small-int ids live at `0x20..=0x2F`, clear of the
//! void id (see DESIGN.md).

use crate::error::VmError;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

// Constant register ids.
pub const CONST_VOID: u16 = 0x000;
pub const CONST_FALSE: u16 = 0x010;
pub const CONST_TRUE: u16 = 0x011;
pub const CONST_FZERO: u16 = 0x012;
pub const CONST_EMPTYSTR: u16 = 0x013;
pub const CONST_NEWLINE: u16 = 0x014;
pub const CONST_EMPTYLIST: u16 = 0x015;
pub const CONST_EMPTYVECT: u16 = 0x016;
/// Base id of the small integer literals 0–15.
pub const CONST_INT_BASE: u16 = 0x020;

/// Special register ids (the low 14 bits of the encoded form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialReg {
    /// The frame's current result slot.
    Result,
    /// The identity of the owning process, as an int.
    Pid,
}

/// A constant register id, newtyped so lookups stay in-bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstReg(pub u16);

impl ConstReg {
    /// The literal this constant register denotes.
    pub fn value(self) -> Result<Value, VmError> {
        let v = match self.0 {
            CONST_VOID => Value::Void,
            CONST_FALSE => Value::Bool(false),
            CONST_TRUE => Value::Bool(true),
            CONST_FZERO => Value::Float(0.0),
            CONST_EMPTYSTR => Value::Str(String::new()),
            CONST_NEWLINE => Value::Str("\n".to_string()),
            CONST_EMPTYLIST => Value::List(Box::new(Vec::new())),
            CONST_EMPTYVECT => Value::Vector(Box::new(Vec::new())),
            id if (CONST_INT_BASE..CONST_INT_BASE + 16).contains(&id) => {
                Value::Int((id - CONST_INT_BASE) as i64)
            }
            _ => return Err(VmError::InvalidRegister(encode_const(self.0))),
        };
        Ok(v)
    }
}

/// A decoded register id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Primary(u8),
    Secondary(u8, u8),
    Const(ConstReg),
    Special(SpecialReg),
}

impl Reg {
    /// Decode a raw 16-bit register id.
    pub fn decode(raw: u16) -> Result<Reg, VmError> {
        if raw & 0x8000 == 0 {
            // User register space.
            if raw & 0x0080 != 0 {
                Ok(Reg::Primary((raw & 0x007f) as u8))
            } else {
                Ok(Reg::Secondary(((raw >> 8) & 0x7f) as u8, (raw & 0x7f) as u8))
            }
        } else if raw & 0x4000 == 0 {
            Ok(Reg::Const(ConstReg(raw & 0x3fff)))
        } else {
            match raw & 0x3fff {
                0 => Ok(Reg::Special(SpecialReg::Result)),
                1 => Ok(Reg::Special(SpecialReg::Pid)),
                _ => Err(VmError::InvalidRegister(raw)),
            }
        }
    }

    /// Encode back to the raw 16-bit form.
    pub fn encode(self) -> u16 {
        match self {
            Reg::Primary(r) => 0x0080 | (r as u16 & 0x7f),
            Reg::Secondary(major, minor) => ((major as u16 & 0x7f) << 8) | (minor as u16 & 0x7f),
            Reg::Const(c) => encode_const(c.0),
            Reg::Special(SpecialReg::Result) => 0xc000,
            Reg::Special(SpecialReg::Pid) => 0xc001,
        }
    }
}

#[inline]
fn encode_const(id: u16) -> u16 {
    0x8000 | (id & 0x3fff)
}

// Encoding helpers used by the code builder and tests.

/// Primary user register `rN`.
pub fn reg(r: u8) -> u16 {
    Reg::Primary(r).encode()
}

/// Secondary register `rMAJOR.MINOR`.
pub fn reg2(major: u8, minor: u8) -> u16 {
    Reg::Secondary(major, minor).encode()
}

/// Constant register by id.
pub fn creg(id: u16) -> u16 {
    encode_const(id)
}

/// Small integer constant register (0–15).
pub fn cint(i: u8) -> u16 {
    debug_assert!(i < 16);
    encode_const(CONST_INT_BASE + i as u16)
}

/// The result special register.
pub const REG_RESULT: u16 = 0xc000;
/// The process-identity special register.
pub const REG_PID: u16 = 0xc001;

impl fmt::Display for Reg {
    /// Assembly-style rendering, used in traces and disassembly.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Primary(r) => write!(f, "r{}", r),
            Reg::Secondary(a, b) => write!(f, "r{}.{}", a, b),
            Reg::Const(c) => write!(f, "c{:#x}", c.0),
            Reg::Special(SpecialReg::Result) => write!(f, "result"),
            Reg::Special(SpecialReg::Pid) => write!(f, "pid"),
        }
    }
}

/// Hashtag helper for failure tags in const tables.
pub fn hashtag(tag: &str) -> Value {
    Value::Hashtag(Arc::from(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_round_trip() {
        for r in [0u8, 1, 42, 127] {
            let raw = reg(r);
            assert_eq!(Reg::decode(raw).unwrap(), Reg::Primary(r));
        }
    }

    #[test]
    fn test_secondary_round_trip() {
        let raw = reg2(3, 7);
        assert_eq!(Reg::decode(raw).unwrap(), Reg::Secondary(3, 7));
        // secondary space has both marker bits clear
        assert_eq!(raw & 0x8080, 0);
    }

    #[test]
    fn test_special_registers() {
        assert_eq!(Reg::decode(REG_RESULT).unwrap(), Reg::Special(SpecialReg::Result));
        assert_eq!(Reg::decode(REG_PID).unwrap(), Reg::Special(SpecialReg::Pid));
        assert!(Reg::decode(0xc002).is_err());
    }

    #[test]
    fn test_constant_literal_set() {
        let cases = [
            (CONST_VOID, Value::Void),
            (CONST_FALSE, Value::Bool(false)),
            (CONST_TRUE, Value::Bool(true)),
            (CONST_FZERO, Value::Float(0.0)),
            (CONST_EMPTYSTR, Value::Str(String::new())),
            (CONST_NEWLINE, Value::Str("\n".into())),
        ];
        for (id, expected) in cases {
            let got = ConstReg(id).value().unwrap();
            assert_eq!(got.tag(), expected.tag());
            assert_eq!(got.to_string(), expected.to_string());
        }
        for i in 0..16u8 {
            let raw = cint(i);
            match Reg::decode(raw).unwrap() {
                Reg::Const(c) => assert_eq!(c.value().unwrap().as_int(), Some(i as i64)),
                other => panic!("expected const register, got {:?}", other),
            }
        }
        assert!(matches!(
            ConstReg(CONST_EMPTYLIST).value().unwrap(),
            Value::List(items) if items.is_empty()
        ));
        assert!(matches!(
            ConstReg(CONST_EMPTYVECT).value().unwrap(),
            Value::Vector(items) if items.is_empty()
        ));
    }

    #[test]
    fn test_unknown_const_is_invariant_violation() {
        assert!(ConstReg(0x3ff).value().is_err());
    }
}
