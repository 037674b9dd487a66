//! Run-scoped module loading with caching and a skip list

use crate::metadata::{ModuleImage, ModuleKind, ModuleReader, TypeDef};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratum_core::{NodeId, TypeEntity, short_name};

/// A loaded module. Immutable for the rest of the run.
#[derive(Debug)]
pub struct Module {
    path: PathBuf,
    image: ModuleImage,
}

impl Module {
    pub fn new(path: PathBuf, image: ModuleImage) -> Self {
        Module { path, image }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.image.name
    }

    pub fn kind(&self) -> ModuleKind {
        self.image.kind
    }

    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    /// Handles to every type defined in the module.
    pub fn types(self: &Arc<Self>) -> Vec<TypeHandle> {
        (0..self.image.types.len())
            .map(|index| TypeHandle::new(Arc::clone(self), index))
            .collect()
    }
}

/// A type inside a loaded module.
#[derive(Debug, Clone)]
pub struct TypeHandle {
    module: Arc<Module>,
    index: usize,
    full_name: String,
    id: NodeId,
}

impl TypeHandle {
    fn new(module: Arc<Module>, index: usize) -> Self {
        let full_name = module.image.types[index].full_name();
        let id = NodeId::from_full_name(&full_name);
        TypeHandle {
            module,
            index,
            full_name,
            id,
        }
    }

    pub fn def(&self) -> &TypeDef {
        &self.module.image.types[self.index]
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// Node projection of this type.
    pub fn entity(&self) -> TypeEntity {
        TypeEntity {
            id: self.id,
            name: short_name(&self.full_name).to_string(),
            full_name: self.full_name.clone(),
            module: Some(self.module.name().to_string()),
        }
    }
}

/// A module file that was not loaded, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedModule {
    pub path: PathBuf,
    pub reason: String,
}

/// Loads module files once per run.
///
/// Modules are cached by resolved path and deduplicated by module identity;
/// failures land in the skip list and never abort loading.
pub struct ModuleLoader {
    reader: Arc<dyn ModuleReader>,
    by_path: HashMap<PathBuf, Option<Arc<Module>>>,
    by_identity: HashMap<String, Arc<Module>>,
    skipped: Vec<SkippedModule>,
}

impl ModuleLoader {
    pub fn new(reader: Arc<dyn ModuleReader>) -> Self {
        ModuleLoader {
            reader,
            by_path: HashMap::new(),
            by_identity: HashMap::new(),
            skipped: Vec::new(),
        }
    }

    pub fn reader(&self) -> &Arc<dyn ModuleReader> {
        &self.reader
    }

    /// Load a module file, or `None` if it was skipped.
    pub fn load(&mut self, path: &Path) -> Option<Arc<Module>> {
        let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if let Some(cached) = self.by_path.get(&resolved) {
            return cached.clone();
        }

        let loaded = match self.reader.read(&resolved) {
            Ok(image) => {
                let identity = image.name.to_lowercase();
                let module = match self.by_identity.get(&identity) {
                    Some(existing) => {
                        tracing::debug!(
                            "Module {} at {} already loaded from {}",
                            image.name,
                            resolved.display(),
                            existing.path().display()
                        );
                        Arc::clone(existing)
                    }
                    None => {
                        let module = Arc::new(Module::new(resolved.clone(), image));
                        self.by_identity.insert(identity, Arc::clone(&module));
                        module
                    }
                };
                Some(module)
            }
            Err(e) => {
                tracing::warn!("Skipping module {}: {}", resolved.display(), e);
                self.skipped.push(SkippedModule {
                    path: resolved.clone(),
                    reason: e.to_string(),
                });
                None
            }
        };

        self.by_path.insert(resolved, loaded.clone());
        loaded
    }

    /// Modules that could not be loaded during this run.
    pub fn skipped(&self) -> &[SkippedModule] {
        &self.skipped
    }

    pub fn loaded_count(&self) -> usize {
        self.by_identity.len()
    }

    pub fn into_skipped(self) -> Vec<SkippedModule> {
        self.skipped
    }
}
