//! Module metadata: the in-memory image of one compiled module and the
//! reader seam that produces it from a file.

pub mod cil;
pub mod json;
pub mod signature;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

pub use cil::{CilModuleReader, MetadataError};
pub use json::JsonModuleReader;
pub use signature::{SignatureError, TypeSignature};

/// Module names resolved by the platform rather than the module directory.
const PLATFORM_MODULES: &[&str] = &[
    "System",
    "Microsoft",
    "mscorlib",
    "netstandard",
    "WindowsBase",
    "PresentationCore",
    "PresentationFramework",
];

/// Why a module could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read module file: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a module: {0}")]
    NotAModule(String),
    #[error("native module without analyzable metadata")]
    Native,
    #[error("malformed metadata: {0}")]
    Malformed(#[from] MetadataError),
    #[error("{}", format_causes(.0))]
    TypeLoad(Vec<LoadCause>),
}

impl LoadError {
    /// Every underlying cause, one per entry.
    pub fn causes(&self) -> Vec<String> {
        match self {
            LoadError::TypeLoad(causes) => causes.iter().map(ToString::to_string).collect(),
            other => vec![other.to_string()],
        }
    }
}

/// One reason a module failed its structural load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadCause {
    #[error("type #{index} has an empty name")]
    EmptyTypeName { index: usize },
    #[error("type {0} is defined more than once")]
    DuplicateType(String),
    #[error("type {type_name}: invalid {role} signature '{signature}': {error}")]
    BadSignature {
        type_name: String,
        role: &'static str,
        signature: String,
        error: SignatureError,
    },
    #[error("could not load referenced module '{0}'")]
    MissingReference(String),
}

/// Every structural problem of a decoded image: unnamed or duplicate types,
/// unparsable base and interface signatures, and referenced modules that are
/// neither platform modules nor present next to the module.
pub(crate) fn structural_causes(
    image: &ModuleImage,
    dir: &Path,
    extensions: &[&str],
) -> Vec<LoadCause> {
    let mut causes = Vec::new();
    let mut seen = HashSet::new();

    for (index, ty) in image.types.iter().enumerate() {
        if ty.name.trim().is_empty() {
            causes.push(LoadCause::EmptyTypeName { index });
            continue;
        }
        let full_name = ty.full_name();
        if !seen.insert(full_name.clone()) {
            causes.push(LoadCause::DuplicateType(full_name.clone()));
        }

        let structural = ty
            .base
            .iter()
            .map(|sig| ("base type", sig))
            .chain(ty.interfaces.iter().map(|sig| ("interface", sig)));
        for (role, signature) in structural {
            if let Err(error) = TypeSignature::parse(signature) {
                causes.push(LoadCause::BadSignature {
                    type_name: full_name.clone(),
                    role,
                    signature: signature.clone(),
                    error,
                });
            }
        }
    }

    for reference in &image.references {
        if is_platform_module(reference) {
            continue;
        }
        let found = extensions
            .iter()
            .any(|ext| dir.join(format!("{reference}.{ext}")).is_file());
        if !found {
            causes.push(LoadCause::MissingReference(reference.clone()));
        }
    }

    causes
}

fn is_platform_module(name: &str) -> bool {
    PLATFORM_MODULES
        .iter()
        .any(|p| name == *p || name.strip_prefix(p).is_some_and(|rest| rest.starts_with('.')))
}

fn format_causes(causes: &[LoadCause]) -> String {
    let mut text = String::from("failed to load module types");
    for cause in causes {
        text.push_str("\n  ");
        text.push_str(&cause.to_string());
    }
    text
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Library,
    Executable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Managed,
    Native,
}

/// Everything the analysis needs to know about one compiled module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleImage {
    pub format: String,
    /// Module identity (assembly name).
    pub name: String,
    pub kind: ModuleKind,
    pub runtime: Runtime,
    /// Names of modules this one depends on.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub types: Vec<TypeDef>,
}

/// A member with a declared type: a field or a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub return_type: Option<String>,
    /// Members invoked from the body, as `Declaring.Type::member`.
    #[serde(default)]
    pub calls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    /// Full name of the enclosing type for nested types.
    #[serde(default)]
    pub declaring_type: Option<String>,
    #[serde(default)]
    pub generic_parameters: Vec<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Type arguments of a closed generic base, e.g. `Repository<Core.User>`.
    #[serde(default)]
    pub generic_arguments: Vec<String>,
    #[serde(default)]
    pub fields: Vec<MemberDef>,
    #[serde(default)]
    pub properties: Vec<MemberDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// `Namespace.Name`, or `Outer+Name` for nested types.
    pub fn full_name(&self) -> String {
        match &self.declaring_type {
            Some(outer) => format!("{}+{}", outer, self.name),
            None if self.namespace.is_empty() => self.name.clone(),
            None => format!("{}.{}", self.namespace, self.name),
        }
    }

    /// True for generic parameters declared by this type (`T`, `TKey`).
    pub fn is_generic_parameter(&self, name: &str) -> bool {
        self.generic_parameters.iter().any(|p| p == name)
    }
}

/// Binary metadata reader: turns a module file into a [`ModuleImage`].
pub trait ModuleReader: Send + Sync {
    /// File extensions (without dot) of module files this reader understands.
    fn extensions(&self) -> &[&str];

    /// Cheap check whether a file is a genuine analyzable module.
    fn probe(&self, path: &Path) -> bool;

    /// Full structural load.
    fn read(&self, path: &Path) -> Result<ModuleImage, LoadError>;

    fn has_module_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.extensions()
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}
