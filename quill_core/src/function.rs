//! Function metadata and callable values.
//!
//! A [`FunctionProto`] is the immutable, shareable description of one
//! compiled function: its bytecode, its register requirements and its
//! dispatch context (traditional, protocol or override). A
//! [`FunctionValue`] pairs a callable with a live register window; the
//! caller stores arguments into the window before the call and the call
//! frame adopts it.
//!
//! Host functions implement [`NativeFn`] and are described by a
//! [`NativeProto`]; they carry a dispatch context too, so they participate
//! in protocol/override resolution exactly like interpreted functions.

use crate::failure::Failure;
use crate::stream::IoRequest;
use crate::value::{Pid, TypeDesc, Value};
use std::fmt;
use std::sync::Arc;

/// A module-qualified symbol, as stored in a module's modsym pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModSym {
    pub module: Arc<str>,
    pub symbol: Arc<str>,
}

impl ModSym {
    pub fn new(module: &str, symbol: &str) -> Self {
        Self {
            module: Arc::from(module),
            symbol: Arc::from(symbol),
        }
    }
}

// =============================================================================
// Dispatch context
// =============================================================================

/// How a function participates in dispatch.
///
/// Replaces the original PFC/FCT bit codes with an exhaustive sum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FnContext {
    /// Plain module-qualified function; resolved by exact name lookup.
    Traditional,
    /// Default implementation of a protocol function, declared in the
    /// protocol's own module. Used when no override matches.
    ProtocolDefault { protocol: Arc<str> },
    /// Abstract protocol member: declares the name, carries no code.
    ProtocolAbstract { protocol: Arc<str> },
    /// Type-specific implementation of a protocol function, selected by
    /// the runtime type of the dispatching argument.
    Override {
        protocol_module: Arc<str>,
        protocol_name: Arc<str>,
        param_type: TypeDesc,
    },
}

impl FnContext {
    /// The protocol this function belongs to, if any.
    pub fn protocol_name(&self) -> Option<&str> {
        match self {
            FnContext::Traditional => None,
            FnContext::ProtocolDefault { protocol } | FnContext::ProtocolAbstract { protocol } => {
                Some(protocol)
            }
            FnContext::Override { protocol_name, .. } => Some(protocol_name),
        }
    }

    #[inline]
    pub fn is_override(&self) -> bool {
        matches!(self, FnContext::Override { .. })
    }

    /// Whether the function carries executable code.
    #[inline]
    pub fn has_code(&self) -> bool {
        !matches!(self, FnContext::ProtocolAbstract { .. })
    }
}

// =============================================================================
// Function prototypes
// =============================================================================

/// Immutable description of one compiled function.
///
/// The string and modsym pools are shared with the owning module so that
/// instruction operands (u16 pool indices) resolve without a module
/// round-trip.
#[derive(Debug)]
pub struct FunctionProto {
    pub module: Arc<str>,
    pub name: Arc<str>,
    pub fcontext: FnContext,
    /// Number of declared parameters.
    pub argc: u8,
    /// Number of additional local registers beyond the parameters.
    pub regc: u8,
    pub code: Arc<[u8]>,
    pub strings: Arc<[Arc<str>]>,
    pub modsyms: Arc<[ModSym]>,
}

impl FunctionProto {
    /// Total register window size for an activation.
    #[inline]
    pub fn reg_total(&self) -> usize {
        self.argc as usize + self.regc as usize
    }

    /// Fetch a string pool entry, or fail as a corrupt-module invariant.
    pub fn string(&self, idx: u16) -> Result<&Arc<str>, crate::VmError> {
        self.strings
            .get(idx as usize)
            .ok_or(crate::VmError::BadResourceIndex(idx))
    }

    /// Fetch a modsym pool entry, or fail as a corrupt-module invariant.
    pub fn modsym(&self, idx: u16) -> Result<&ModSym, crate::VmError> {
        self.modsyms
            .get(idx as usize)
            .ok_or(crate::VmError::BadResourceIndex(idx))
    }
}

// =============================================================================
// Native functions
// =============================================================================

/// Call context handed to a native function: the argument window and the
/// identity of the calling process.
pub struct NativeCtx<'a> {
    pub args: &'a mut [Value],
    pub pid: Pid,
}

/// What a native invocation produced.
///
/// `Wait` lets a native integrate with the worker's I/O multiplexer: the
/// frame parks in IOWAIT and the native is re-invoked once the descriptor
/// is ready.
pub enum NativeOutcome {
    Return(Value),
    Fail(Failure),
    Wait(IoRequest),
}

/// A host-provided function. Writes its result through [`NativeOutcome`].
pub type NativeFn = Arc<dyn Fn(&mut NativeCtx<'_>) -> NativeOutcome + Send + Sync>;

/// Description of a registered native function.
#[derive(Clone)]
pub struct NativeProto {
    pub module: Arc<str>,
    pub name: Arc<str>,
    pub fcontext: FnContext,
    pub argc: u8,
    pub run: NativeFn,
}

impl fmt::Debug for NativeProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeProto")
            .field("module", &self.module)
            .field("name", &self.name)
            .field("fcontext", &self.fcontext)
            .field("argc", &self.argc)
            .finish()
    }
}

// =============================================================================
// Function values
// =============================================================================

/// What a function value points at.
#[derive(Debug, Clone)]
pub enum Callable {
    Bytecode(Arc<FunctionProto>),
    Native(Arc<NativeProto>),
}

impl Callable {
    pub fn name(&self) -> &Arc<str> {
        match self {
            Callable::Bytecode(p) => &p.name,
            Callable::Native(p) => &p.name,
        }
    }

    pub fn module_name(&self) -> &Arc<str> {
        match self {
            Callable::Bytecode(p) => &p.module,
            Callable::Native(p) => &p.module,
        }
    }

    pub fn fcontext(&self) -> &FnContext {
        match self {
            Callable::Bytecode(p) => &p.fcontext,
            Callable::Native(p) => &p.fcontext,
        }
    }

    pub fn argc(&self) -> u8 {
        match self {
            Callable::Bytecode(p) => p.argc,
            Callable::Native(p) => p.argc,
        }
    }

    fn reg_total(&self) -> usize {
        match self {
            Callable::Bytecode(p) => p.reg_total(),
            Callable::Native(p) => p.argc as usize,
        }
    }
}

/// A callable paired with its register window.
///
/// The window is sized to the function's declared register count; it may
/// grow when the value is retargeted to a function with more locals, but
/// it never shrinks.
#[derive(Debug, Clone)]
pub struct FunctionValue {
    pub callable: Callable,
    pub registers: Vec<Value>,
    pub argc: u8,
}

impl FunctionValue {
    pub fn new(callable: Callable) -> Self {
        let argc = callable.argc();
        let registers = vec![Value::Void; callable.reg_total()];
        Self {
            callable,
            registers,
            argc,
        }
    }

    /// Point this value at a different concrete function (override
    /// dispatch). Grows the register window if the new target needs more
    /// locals; never shrinks it, so already-stored arguments survive.
    pub fn retarget(&mut self, callable: Callable) {
        let need = callable.reg_total();
        if self.registers.len() < need {
            self.registers.resize(need, Value::Void);
        }
        self.argc = callable.argc();
        self.callable = callable;
    }

    #[inline]
    pub fn is_native(&self) -> bool {
        matches!(self.callable, Callable::Native(_))
    }

    #[inline]
    pub fn name(&self) -> &Arc<str> {
        self.callable.name()
    }

    #[inline]
    pub fn module_name(&self) -> &Arc<str> {
        self.callable.module_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proto(name: &str, argc: u8, regc: u8) -> Arc<FunctionProto> {
        Arc::new(FunctionProto {
            module: Arc::from("m"),
            name: Arc::from(name),
            fcontext: FnContext::Traditional,
            argc,
            regc,
            code: Arc::from(Vec::<u8>::new().into_boxed_slice()),
            strings: Arc::from(Vec::new().into_boxed_slice()),
            modsyms: Arc::from(Vec::new().into_boxed_slice()),
        })
    }

    #[test]
    fn test_window_sized_to_reg_total() {
        let fv = FunctionValue::new(Callable::Bytecode(proto("f", 2, 3)));
        assert_eq!(fv.registers.len(), 5);
        assert_eq!(fv.argc, 2);
    }

    #[test]
    fn test_retarget_grows_never_shrinks() {
        let mut fv = FunctionValue::new(Callable::Bytecode(proto("small", 1, 1)));
        fv.registers[0] = Value::Int(7);

        fv.retarget(Callable::Bytecode(proto("big", 1, 5)));
        assert_eq!(fv.registers.len(), 6);
        assert_eq!(fv.registers[0].as_int(), Some(7));

        fv.retarget(Callable::Bytecode(proto("small", 1, 1)));
        assert_eq!(fv.registers.len(), 6, "window must never shrink");
    }

    #[test]
    fn test_fcontext_protocol_name() {
        let ctx = FnContext::Override {
            protocol_module: Arc::from("text"),
            protocol_name: Arc::from("Show"),
            param_type: TypeDesc::new("core", "int"),
        };
        assert_eq!(ctx.protocol_name(), Some("Show"));
        assert!(ctx.is_override());
        assert!(ctx.has_code());
        assert!(!FnContext::ProtocolAbstract { protocol: Arc::from("Show") }.has_code());
    }
}
