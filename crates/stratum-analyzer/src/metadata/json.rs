//! Reader for JSON metadata images
//!
//! A metadata image is a JSON description of one compiled module stored under
//! the module's own file name (`Core.dll`, `App.exe`), as exported by other
//! tooling. Binary modules fail the probe of this reader; use
//! [`CilModuleReader`](super::CilModuleReader) for those.

use super::{LoadError, ModuleImage, ModuleReader, Runtime, structural_causes};
use std::path::Path;

/// Format tag every metadata image must carry.
pub const FORMAT_TAG: &str = "stratum-module/1";

#[derive(Debug, Clone)]
pub struct JsonModuleReader {
    extensions: Vec<&'static str>,
}

impl JsonModuleReader {
    pub fn new() -> Self {
        JsonModuleReader {
            extensions: vec!["dll", "exe"],
        }
    }

    fn parse(&self, bytes: &[u8]) -> Result<ModuleImage, LoadError> {
        let image: ModuleImage =
            serde_json::from_slice(bytes).map_err(|e| LoadError::NotAModule(e.to_string()))?;
        if image.format != FORMAT_TAG {
            return Err(LoadError::NotAModule(format!(
                "unsupported metadata format '{}'",
                image.format
            )));
        }
        Ok(image)
    }
}

impl Default for JsonModuleReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleReader for JsonModuleReader {
    fn extensions(&self) -> &[&str] {
        &self.extensions
    }

    fn probe(&self, path: &Path) -> bool {
        if !path.is_file() || !self.has_module_extension(path) {
            return false;
        }
        match std::fs::read(path) {
            Ok(bytes) => self
                .parse(&bytes)
                .is_ok_and(|image| image.runtime == Runtime::Managed),
            Err(_) => false,
        }
    }

    fn read(&self, path: &Path) -> Result<ModuleImage, LoadError> {
        let bytes = std::fs::read(path)?;
        let image = self.parse(&bytes)?;
        if image.runtime == Runtime::Native {
            return Err(LoadError::Native);
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let causes = structural_causes(&image, dir, &self.extensions);
        if !causes.is_empty() {
            return Err(LoadError::TypeLoad(causes));
        }

        tracing::debug!(
            "Read module {} ({} types) from {}",
            image.name,
            image.types.len(),
            path.display()
        );
        Ok(image)
    }
}
