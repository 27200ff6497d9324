//! Core data model for the quill virtual machine.
//!
//! This crate provides:
//! - The runtime value model ([`Value`], [`TypeTag`], [`TypeDesc`])
//! - Function metadata and callable values ([`FunctionProto`], [`FunctionValue`])
//! - The native (host) function interface ([`NativeFn`], [`NativeOutcome`])
//! - Structured failure values with unwind traces ([`Failure`])
//! - The 16-bit register addressing scheme and constant-register literals
//! - Shared error types ([`VmError`], [`LoadError`])
//!
//! Everything here is independent of the scheduler; the `quill_vm` crate
//! builds frames, processes and workers on top of these types.

pub mod error;
pub mod failure;
pub mod function;
pub mod register;
pub mod stream;
pub mod value;

pub use error::{LoadError, VmError};
pub use failure::{Direction, Failure, FailureEvent};
pub use function::{
    Callable, FnContext, FunctionProto, FunctionValue, ModSym, NativeCtx, NativeFn, NativeOutcome,
    NativeProto,
};
pub use register::{ConstReg, Reg, SpecialReg, REG_PID, REG_RESULT};
pub use stream::{IoInterest, IoRequest, Stream, TryRead};
pub use value::{Pid, PromiseValue, TypeDesc, TypeTag, Value};
