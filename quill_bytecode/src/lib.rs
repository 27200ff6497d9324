//! Bytecode representation for the quill VM.
//!
//! Key components:
//!
//! - [`Opcode`] - the operation set, one byte per opcode
//! - [`INSTRUCTION_SIZE`] - the per-opcode total-length table, built at
//!   compile time and verified before any worker starts
//! - [`Instr`] - a decoded variable-length instruction with typed operand
//!   accessors (the program counter is a byte offset)
//! - [`CodeBuilder`] - label-based code assembly with two-phase jump
//!   patching
//! - [`Module`] / [`ModuleBuilder`] - immutable module tables (functions,
//!   protocols, overrides, natives, constants) safe for lock-free
//!   concurrent lookup once built
//! - [`ModuleLoader`] - the loading seam, consumed as a black box by the
//!   resolver

pub mod builder;
pub mod instruction;
pub mod loader;
pub mod module;
pub mod opcode;

pub use builder::{BuildError, CodeBuilder, Label};
pub use instruction::{instruction_offsets, Instr};
pub use loader::{MemoryLoader, ModuleLoader};
pub use module::{Module, ModuleBuilder, Protocol};
pub use opcode::{verify_sizes, Opcode, INSTRUCTION_SIZE, NUM_OPCODES};
