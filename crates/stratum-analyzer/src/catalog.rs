//! Type catalog of a single module, used to pick a seed type

use crate::loader::Module;
use crate::metadata::{LoadError, ModuleReader};
use std::path::Path;
use std::sync::Arc;
use stratum_core::TypeEntity;

/// Descriptors of every type defined in the module at `path`, sorted by full
/// name. `filter` keeps names containing it, ignoring case.
pub fn list_types(
    reader: &dyn ModuleReader,
    path: &Path,
    filter: Option<&str>,
) -> Result<Vec<TypeEntity>, LoadError> {
    let image = reader.read(path)?;
    let module = Arc::new(Module::new(path.to_path_buf(), image));
    let needle = filter.map(str::to_lowercase).filter(|f| !f.is_empty());

    let mut types: Vec<TypeEntity> = module
        .types()
        .iter()
        .filter(|ty| {
            needle
                .as_deref()
                .is_none_or(|n| ty.full_name().to_lowercase().contains(n))
        })
        .map(|ty| ty.entity())
        .collect();
    types.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    types.dedup_by(|a, b| a.id == b.id);
    Ok(types)
}
