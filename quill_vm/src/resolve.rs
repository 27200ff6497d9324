//! Symbol resolution over the loaded module set.
//!
//! Modules are preloaded (transitively, breadth-first from the roots)
//! before any worker starts, so the set is frozen and resolution never
//! takes a lock. Load order is remembered: it is the deterministic scan
//! order for override resolution.
//!
//! Override dispatch scans *every* module in load order. Exactly one match
//! wins; two matches for the same (protocol, function, type) are an
//! ambiguity and fatal at resolution time. Workers keep a private
//! [`ResolveCache`] so the scan happens once per (call site type) per
//! worker.

use quill_bytecode::{Module, ModuleLoader};
use quill_core::{Callable, TypeDesc, VmError};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

// =============================================================================
// Module set
// =============================================================================

/// The frozen, ordered set of loaded modules.
pub struct ModuleSet {
    ordered: Vec<Arc<Module>>,
    by_name: FxHashMap<Arc<str>, usize>,
}

impl ModuleSet {
    /// Load `roots` and everything they reference, breadth-first. A module
    /// is loaded once; order of first discovery is the load order.
    pub fn preload(loader: &dyn ModuleLoader, roots: &[&str]) -> Result<Self, VmError> {
        let mut set = ModuleSet {
            ordered: Vec::new(),
            by_name: FxHashMap::default(),
        };
        let mut queue: VecDeque<Arc<str>> = roots.iter().map(|r| Arc::from(*r)).collect();
        while let Some(name) = queue.pop_front() {
            if set.by_name.contains_key(&name) {
                continue;
            }
            let module = loader.load(&name)?;
            for import in module.imports() {
                if !set.by_name.contains_key(import) {
                    queue.push_back(Arc::clone(import));
                }
            }
            set.insert(module);
        }
        Ok(set)
    }

    /// Build a set from already-constructed modules, in the given order.
    pub fn from_modules(modules: Vec<Arc<Module>>) -> Self {
        let mut set = ModuleSet {
            ordered: Vec::new(),
            by_name: FxHashMap::default(),
        };
        for m in modules {
            set.insert(m);
        }
        set
    }

    fn insert(&mut self, module: Arc<Module>) {
        if self.by_name.contains_key(module.name()) {
            return;
        }
        self.by_name
            .insert(Arc::clone(module.name()), self.ordered.len());
        self.ordered.push(module);
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Module>, VmError> {
        self.by_name
            .get(name)
            .map(|&i| &self.ordered[i])
            .ok_or_else(|| VmError::ModuleNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Module>> {
        self.ordered.iter()
    }

    /// Exact-name function resolution (traditional dispatch). Bytecode
    /// functions shadow natives of the same name within a module.
    pub fn resolve_function(&self, module: &str, name: &str) -> Result<Callable, VmError> {
        let m = self.get(module)?;
        if let Some(f) = m.lookup_function(name) {
            return Ok(Callable::Bytecode(Arc::clone(f)));
        }
        if let Some(n) = m.lookup_native(name) {
            return Ok(Callable::Native(Arc::clone(n)));
        }
        Err(VmError::FunctionNotFound {
            module: module.to_string(),
            function: name.to_string(),
        })
    }

    /// Resolve a protocol member to its default (or abstract) form. The
    /// concrete implementation is chosen later, at the call, when the
    /// dispatch argument's type is known.
    pub fn resolve_protocol_function(
        &self,
        protocol_module: &str,
        protocol_name: &str,
        fname: &str,
    ) -> Result<Callable, VmError> {
        let m = self.get(protocol_module)?;
        if m.lookup_protocol(protocol_name).is_none() {
            return Err(VmError::ProtocolNotFound {
                module: protocol_module.to_string(),
                protocol: protocol_name.to_string(),
            });
        }
        m.lookup_protocol_function(protocol_name, fname)
            .ok_or_else(|| VmError::FunctionNotFound {
                module: protocol_module.to_string(),
                function: fname.to_string(),
            })
    }

    /// Scan the whole set, in load order, for a type-specific override.
    ///
    /// Returns `Ok(None)` when no module provides one (the caller falls
    /// back to the protocol default). More than one provider is fatal.
    pub fn resolve_override(
        &self,
        protocol_module: &str,
        protocol_name: &str,
        fname: &str,
        param_type: &TypeDesc,
    ) -> Result<Option<Callable>, VmError> {
        let mut found: Option<(Callable, &Arc<Module>)> = None;
        for m in &self.ordered {
            if let Some(hit) = m.lookup_override(protocol_module, protocol_name, fname, param_type)
            {
                if let Some((_, first)) = &found {
                    return Err(VmError::AmbiguousOverride {
                        protocol: protocol_name.to_string(),
                        function: fname.to_string(),
                        param_type: param_type.to_string(),
                        first: first.name().to_string(),
                        second: m.name().to_string(),
                    });
                }
                found = Some((hit, m));
            }
        }
        Ok(found.map(|(c, _)| c))
    }
}

// =============================================================================
// Per-worker cache
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    protocol_module: Arc<str>,
    protocol_name: Arc<str>,
    fname: Arc<str>,
    param_type: TypeDesc,
}

/// Memoized override resolutions. Worker-private, so no synchronization;
/// correctness is unaffected because the module set is frozen.
#[derive(Default)]
pub struct ResolveCache {
    map: FxHashMap<CacheKey, Option<Callable>>,
}

impl ResolveCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached override lookup. The first miss performs the full scan;
    /// every later call for the same key is a hash lookup.
    pub fn override_for(
        &mut self,
        modules: &ModuleSet,
        protocol_module: &Arc<str>,
        protocol_name: &Arc<str>,
        fname: &Arc<str>,
        param_type: &TypeDesc,
    ) -> Result<Option<Callable>, VmError> {
        let key = CacheKey {
            protocol_module: Arc::clone(protocol_module),
            protocol_name: Arc::clone(protocol_name),
            fname: Arc::clone(fname),
            param_type: param_type.clone(),
        };
        if let Some(hit) = self.map.get(&key) {
            return Ok(hit.clone());
        }
        let resolved =
            modules.resolve_override(protocol_module, protocol_name, fname, param_type)?;
        self.map.insert(key, resolved.clone());
        Ok(resolved)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_bytecode::{MemoryLoader, ModuleBuilder};
    use quill_core::FnContext;

    fn override_ctx(ty: &str) -> FnContext {
        FnContext::Override {
            protocol_module: Arc::from("text"),
            protocol_name: Arc::from("Show"),
            param_type: TypeDesc::new("core", ty),
        }
    }

    fn protocol_module() -> Arc<Module> {
        let mut b = ModuleBuilder::new("text");
        b.add_protocol("Show", &["show"]);
        b.add_function(
            "show",
            FnContext::ProtocolDefault {
                protocol: Arc::from("Show"),
            },
            1,
            0,
            vec![0x00],
        );
        b.build().unwrap()
    }

    fn impl_module(name: &str, ty: &str) -> Arc<Module> {
        let mut b = ModuleBuilder::new(name);
        b.add_function("show", override_ctx(ty), 1, 0, vec![0x00]);
        b.build().unwrap()
    }

    #[test]
    fn test_preload_follows_imports() {
        let mut leaf = ModuleBuilder::new("leaf");
        leaf.add_function("f", FnContext::Traditional, 0, 0, vec![0x00]);
        let leaf = leaf.build().unwrap();

        let mut root = ModuleBuilder::new("root");
        root.intern_modsym("leaf", "f");
        root.add_function("main", FnContext::Traditional, 0, 0, vec![0x00]);
        let root = root.build().unwrap();

        let loader = MemoryLoader::new().with(root).with(leaf);
        let set = ModuleSet::preload(&loader, &["root"]).unwrap();
        assert!(set.contains("root"));
        assert!(set.contains("leaf"));
        assert!(set.resolve_function("leaf", "f").is_ok());
    }

    #[test]
    fn test_missing_module_is_link_error() {
        let set = ModuleSet::from_modules(vec![]);
        let err = set.resolve_function("ghost", "f").unwrap_err();
        assert!(err.is_link_error());
    }

    #[test]
    fn test_override_single_match_wins() {
        let set = ModuleSet::from_modules(vec![protocol_module(), impl_module("ints", "int")]);
        let hit = set
            .resolve_override("text", "Show", "show", &TypeDesc::new("core", "int"))
            .unwrap();
        assert!(hit.is_some());
        let miss = set
            .resolve_override("text", "Show", "show", &TypeDesc::new("core", "bool"))
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn test_ambiguous_override_is_fatal() {
        let set = ModuleSet::from_modules(vec![
            protocol_module(),
            impl_module("ints_a", "int"),
            impl_module("ints_b", "int"),
        ]);
        let err = set
            .resolve_override("text", "Show", "show", &TypeDesc::new("core", "int"))
            .unwrap_err();
        assert!(matches!(err, VmError::AmbiguousOverride { .. }));
    }

    #[test]
    fn test_cache_returns_same_resolution() {
        let set = ModuleSet::from_modules(vec![protocol_module(), impl_module("ints", "int")]);
        let mut cache = ResolveCache::new();
        let pm: Arc<str> = Arc::from("text");
        let pn: Arc<str> = Arc::from("Show");
        let fname: Arc<str> = Arc::from("show");
        let ty = TypeDesc::new("core", "int");

        let first = cache
            .override_for(&set, &pm, &pn, &fname, &ty)
            .unwrap()
            .unwrap();
        let second = cache
            .override_for(&set, &pm, &pn, &fname, &ty)
            .unwrap()
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(first.module_name(), second.module_name());
        assert_eq!(first.name(), second.name());
    }
}
