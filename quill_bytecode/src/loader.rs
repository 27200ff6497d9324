//! The module-loading seam.
//!
//! The resolver treats loading as a black box behind [`ModuleLoader`]: it
//! asks for a module by name and gets back a frozen [`Module`] or a
//! [`LoadError`]. [`MemoryLoader`] is the in-process implementation used by
//! embedders and tests; a file-format loader would implement the same
//! trait.

use crate::module::Module;
use quill_core::LoadError;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Loads modules by name. Implementations must be shareable across worker
/// threads.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<Arc<Module>, LoadError>;
}

/// A loader over an in-memory module set.
#[derive(Default)]
pub struct MemoryLoader {
    modules: FxHashMap<Arc<str>, Arc<Module>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module: Arc<Module>) {
        self.modules.insert(Arc::clone(module.name()), module);
    }

    pub fn with(mut self, module: Arc<Module>) -> Self {
        self.insert(module);
        self
    }
}

impl ModuleLoader for MemoryLoader {
    fn load(&self, name: &str) -> Result<Arc<Module>, LoadError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleBuilder;

    #[test]
    fn test_memory_loader_round_trip() {
        let m = ModuleBuilder::new("list").build().unwrap();
        let loader = MemoryLoader::new().with(m);
        assert!(loader.load("list").is_ok());
        assert!(matches!(
            loader.load("absent"),
            Err(LoadError::NotFound(n)) if n == "absent"
        ));
    }
}
