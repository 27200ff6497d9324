//! Module tables.
//!
//! A [`Module`] is the immutable unit of loading: named functions, protocol
//! declarations, type-specific overrides, registered natives and a constant
//! pool. Once built it is wrapped in an `Arc` and shared across workers;
//! every lookup is a read on a frozen table, so no locking is needed.
//!
//! [`ModuleBuilder`] is the mutable assembly side. It interns the string
//! and modsym pools that instruction operands index, then freezes them into
//! `Arc` slices shared by every function in the module.

use crate::builder::BuildError;
use quill_core::{Callable, FnContext, FunctionProto, ModSym, NativeFn, NativeProto, TypeDesc, Value};
use rustc_hash::FxHashMap;
use std::sync::Arc;

// =============================================================================
// Protocols
// =============================================================================

/// A protocol declaration: a named set of dispatchable function names.
#[derive(Debug, Clone)]
pub struct Protocol {
    pub module: Arc<str>,
    pub name: Arc<str>,
    pub functions: Vec<Arc<str>>,
}

impl Protocol {
    pub fn declares(&self, fname: &str) -> bool {
        self.functions.iter().any(|f| &**f == fname)
    }
}

// =============================================================================
// Module
// =============================================================================

/// One loaded module, frozen for concurrent lookup.
#[derive(Debug)]
pub struct Module {
    name: Arc<str>,
    functions: FxHashMap<Arc<str>, Arc<FunctionProto>>,
    natives: FxHashMap<Arc<str>, Arc<NativeProto>>,
    protocols: FxHashMap<Arc<str>, Protocol>,
    /// Type-specific protocol implementations. Kept out of the by-name
    /// tables: several overrides of one function name may coexist, one per
    /// dispatch type.
    overrides: Vec<Arc<FunctionProto>>,
    native_overrides: Vec<Arc<NativeProto>>,
    constants: Vec<Value>,
    /// Names of every module referenced by the modsym pool, deduplicated.
    imports: Vec<Arc<str>>,
}

impl Module {
    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Exact-name lookup for traditional and protocol-default functions.
    pub fn lookup_function(&self, name: &str) -> Option<&Arc<FunctionProto>> {
        self.functions.get(name)
    }

    pub fn lookup_native(&self, name: &str) -> Option<&Arc<NativeProto>> {
        self.natives.get(name)
    }

    pub fn lookup_protocol(&self, name: &str) -> Option<&Protocol> {
        self.protocols.get(name)
    }

    /// Resolve `fname` within a protocol declared by this module: the
    /// default (or abstract) member, if the protocol declares the name.
    pub fn lookup_protocol_function(&self, protocol: &str, fname: &str) -> Option<Callable> {
        let proto = self.protocols.get(protocol)?;
        if !proto.declares(fname) {
            return None;
        }
        if let Some(f) = self.functions.get(fname) {
            if f.fcontext.protocol_name() == Some(protocol) {
                return Some(Callable::Bytecode(Arc::clone(f)));
            }
        }
        if let Some(n) = self.natives.get(fname) {
            if n.fcontext.protocol_name() == Some(protocol) {
                return Some(Callable::Native(Arc::clone(n)));
            }
        }
        None
    }

    /// Find this module's override of `fname` for `param_type`, if any.
    pub fn lookup_override(
        &self,
        protocol_module: &str,
        protocol_name: &str,
        fname: &str,
        param_type: &TypeDesc,
    ) -> Option<Callable> {
        let matches = |ctx: &FnContext| match ctx {
            FnContext::Override {
                protocol_module: pm,
                protocol_name: pn,
                param_type: pt,
            } => &**pm == protocol_module && &**pn == protocol_name && pt == param_type,
            _ => false,
        };
        for f in &self.overrides {
            if &*f.name == fname && matches(&f.fcontext) {
                return Some(Callable::Bytecode(Arc::clone(f)));
            }
        }
        for n in &self.native_overrides {
            if &*n.name == fname && matches(&n.fcontext) {
                return Some(Callable::Native(Arc::clone(n)));
            }
        }
        None
    }

    /// Fetch a constant pool entry.
    pub fn constant(&self, idx: u16) -> Option<&Value> {
        self.constants.get(idx as usize)
    }

    /// Modules this one references, for transitive preloading.
    pub fn imports(&self) -> &[Arc<str>] {
        &self.imports
    }
}

// =============================================================================
// Builder
// =============================================================================

struct PendingFn {
    name: Arc<str>,
    fcontext: FnContext,
    argc: u8,
    regc: u8,
    code: Vec<u8>,
}

/// Mutable assembly side of a [`Module`].
pub struct ModuleBuilder {
    name: Arc<str>,
    strings: Vec<Arc<str>>,
    string_ids: FxHashMap<Arc<str>, u16>,
    modsyms: Vec<ModSym>,
    modsym_ids: FxHashMap<ModSym, u16>,
    functions: Vec<PendingFn>,
    natives: Vec<NativeProto>,
    protocols: Vec<Protocol>,
    constants: Vec<Value>,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            strings: Vec::new(),
            string_ids: FxHashMap::default(),
            modsyms: Vec::new(),
            modsym_ids: FxHashMap::default(),
            functions: Vec::new(),
            natives: Vec::new(),
            protocols: Vec::new(),
            constants: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Intern a string, returning its pool index for instruction operands.
    pub fn intern_string(&mut self, s: &str) -> u16 {
        if let Some(&id) = self.string_ids.get(s) {
            return id;
        }
        let interned: Arc<str> = Arc::from(s);
        let id = self.strings.len() as u16;
        self.strings.push(Arc::clone(&interned));
        self.string_ids.insert(interned, id);
        id
    }

    /// Intern a module-qualified symbol.
    pub fn intern_modsym(&mut self, module: &str, symbol: &str) -> u16 {
        let sym = ModSym::new(module, symbol);
        if let Some(&id) = self.modsym_ids.get(&sym) {
            return id;
        }
        let id = self.modsyms.len() as u16;
        self.modsyms.push(sym.clone());
        self.modsym_ids.insert(sym, id);
        id
    }

    pub fn add_function(
        &mut self,
        name: &str,
        fcontext: FnContext,
        argc: u8,
        regc: u8,
        code: Vec<u8>,
    ) {
        self.functions.push(PendingFn {
            name: Arc::from(name),
            fcontext,
            argc,
            regc,
            code,
        });
    }

    pub fn add_native(&mut self, name: &str, fcontext: FnContext, argc: u8, run: NativeFn) {
        self.natives.push(NativeProto {
            module: Arc::clone(&self.name),
            name: Arc::from(name),
            fcontext,
            argc,
            run,
        });
    }

    pub fn add_protocol(&mut self, name: &str, functions: &[&str]) {
        self.protocols.push(Protocol {
            module: Arc::clone(&self.name),
            name: Arc::from(name),
            functions: functions.iter().map(|f| Arc::from(*f)).collect(),
        });
    }

    pub fn add_constant(&mut self, value: Value) -> u16 {
        let id = self.constants.len() as u16;
        self.constants.push(value);
        id
    }

    /// Freeze the pools and assemble the module tables.
    pub fn build(self) -> Result<Arc<Module>, BuildError> {
        let strings: Arc<[Arc<str>]> = Arc::from(self.strings.into_boxed_slice());
        let modsyms: Arc<[ModSym]> = Arc::from(self.modsyms.into_boxed_slice());

        let mut imports: Vec<Arc<str>> = Vec::new();
        for sym in modsyms.iter() {
            if sym.module != self.name && !imports.contains(&sym.module) {
                imports.push(Arc::clone(&sym.module));
            }
        }

        let mut functions = FxHashMap::default();
        let mut overrides = Vec::new();
        for f in self.functions {
            let proto = Arc::new(FunctionProto {
                module: Arc::clone(&self.name),
                name: f.name,
                fcontext: f.fcontext,
                argc: f.argc,
                regc: f.regc,
                code: Arc::from(f.code.into_boxed_slice()),
                strings: Arc::clone(&strings),
                modsyms: Arc::clone(&modsyms),
            });
            if proto.fcontext.is_override() {
                overrides.push(proto);
            } else {
                functions.insert(Arc::clone(&proto.name), proto);
            }
        }

        let mut natives = FxHashMap::default();
        let mut native_overrides = Vec::new();
        for n in self.natives {
            let proto = Arc::new(n);
            if proto.fcontext.is_override() {
                native_overrides.push(proto);
            } else {
                natives.insert(Arc::clone(&proto.name), proto);
            }
        }

        let protocols = self
            .protocols
            .into_iter()
            .map(|p| (Arc::clone(&p.name), p))
            .collect();

        Ok(Arc::new(Module {
            name: self.name,
            functions,
            natives,
            protocols,
            overrides,
            native_overrides,
            constants: self.constants,
            imports,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::NativeOutcome;

    #[test]
    fn test_string_interning_dedups() {
        let mut b = ModuleBuilder::new("m");
        let a = b.intern_string("hello");
        let c = b.intern_string("world");
        assert_eq!(b.intern_string("hello"), a);
        assert_ne!(a, c);
    }

    #[test]
    fn test_function_lookup_by_name() {
        let mut b = ModuleBuilder::new("m");
        b.add_function("main", FnContext::Traditional, 0, 2, vec![0x4b]);
        let m = b.build().unwrap();
        let f = m.lookup_function("main").unwrap();
        assert_eq!(&*f.module, "m");
        assert_eq!(f.reg_total(), 2);
        assert!(m.lookup_function("missing").is_none());
    }

    #[test]
    fn test_override_is_not_name_visible() {
        let mut b = ModuleBuilder::new("impls");
        let ctx = FnContext::Override {
            protocol_module: Arc::from("text"),
            protocol_name: Arc::from("Show"),
            param_type: TypeDesc::new("core", "int"),
        };
        b.add_function("show", ctx, 1, 0, vec![0x4b]);
        let m = b.build().unwrap();

        assert!(m.lookup_function("show").is_none());
        let hit = m.lookup_override("text", "Show", "show", &TypeDesc::new("core", "int"));
        assert!(hit.is_some());
        let miss = m.lookup_override("text", "Show", "show", &TypeDesc::new("core", "str"));
        assert!(miss.is_none());
    }

    #[test]
    fn test_protocol_default_resolution() {
        let mut b = ModuleBuilder::new("text");
        b.add_protocol("Show", &["show"]);
        b.add_native(
            "show",
            FnContext::ProtocolDefault {
                protocol: Arc::from("Show"),
            },
            1,
            Arc::new(|ctx| NativeOutcome::Return(Value::Str(ctx.args[0].to_string()))),
        );
        let m = b.build().unwrap();

        assert!(m.lookup_protocol("Show").is_some());
        assert!(m.lookup_protocol_function("Show", "show").is_some());
        assert!(m.lookup_protocol_function("Show", "paint").is_none());
    }
}
