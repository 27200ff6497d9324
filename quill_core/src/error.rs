//! Host-level error types.
//!
//! These are the *fatal* conditions from the error taxonomy: load/link
//! errors and internal invariant violations. Recoverable interpreted-code
//! errors are [`Failure`](crate::Failure) values and never surface here.

use thiserror::Error;

/// Module loading errors, reported by a [`ModuleLoader`] implementation.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module not found: {0}")]
    NotFound(String),
    #[error("corrupt module {module}: {detail}")]
    Corrupt { module: String, detail: String },
}

/// Fatal runtime errors: link failures and invariant violations.
///
/// Any of these aborts the affected worker's scheduling loop; they indicate
/// a missing/corrupt module or a bug, not a recoverable user condition.
#[derive(Debug, Error)]
pub enum VmError {
    // ---- load/link errors (fatal at resolution time) ----
    #[error("module not loaded: {0}")]
    ModuleNotFound(String),
    #[error("function not found: {module}/{function}")]
    FunctionNotFound { module: String, function: String },
    #[error("protocol not found: {module}/{protocol}")]
    ProtocolNotFound { module: String, protocol: String },
    #[error("ambiguous override for {protocol}/{function} on type {param_type}: defined in {first} and {second}")]
    AmbiguousOverride {
        protocol: String,
        function: String,
        param_type: String,
        first: String,
        second: String,
    },
    #[error("cannot call abstract protocol function {protocol}/{function}")]
    AbstractCall { protocol: String, function: String },
    #[error(transparent)]
    Load(#[from] LoadError),

    // ---- internal invariant violations (fatal, corrupt module or bug) ----
    #[error("unknown opcode {opcode:#04x} at pc {pc}")]
    UnknownOpcode { opcode: u8, pc: usize },
    #[error("instruction size unset for opcode {0:#04x}")]
    UnsizedOpcode(u8),
    #[error("truncated instruction at pc {pc} (need {need} bytes)")]
    TruncatedInstruction { pc: usize, need: usize },
    #[error("invalid register id {0:#06x}")]
    InvalidRegister(u16),
    #[error("register r{index} out of bounds (window size {size})")]
    RegisterOutOfBounds { index: u16, size: usize },
    #[error("self-referential register {0:#06x}")]
    SelfReference(u16),
    #[error("value in register {0:#06x} is not indexable")]
    NotIndexable(u16),
    #[error("bad resource index {0}")]
    BadResourceIndex(u16),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("frame handle {0} is not live")]
    DeadFrame(u32),
    #[error("process {0} has no mailbox on this worker")]
    MailboxMissing(u64),

    // ---- descriptor errors from the multiplexer ----
    #[error("i/o multiplexer error: {0}")]
    Io(#[from] std::io::Error),
}

impl VmError {
    /// Whether this error is a link-time condition (missing or ambiguous
    /// symbols) as opposed to an internal invariant violation.
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            VmError::ModuleNotFound(_)
                | VmError::FunctionNotFound { .. }
                | VmError::ProtocolNotFound { .. }
                | VmError::AmbiguousOverride { .. }
                | VmError::AbstractCall { .. }
                | VmError::Load(_)
        )
    }
}
