//! Module metadata analysis: package dependencies and inheritance focus

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod inheritance;
pub mod loader;
pub mod metadata;
pub mod packaging;
pub mod patterns;
pub mod reflector;

#[cfg(test)]
pub mod test_utils;

pub use catalog::list_types;
pub use config::{ClusterSpec, ConfigError, Package, PackageSpec, PackagingConfig};
pub use coordinator::{AnalysisHandle, Coordinator};
pub use inheritance::{InheritanceAnalyzer, InheritanceGraphBuilder, InheritanceRequest};
pub use loader::{Module, ModuleLoader, SkippedModule, TypeHandle};
pub use metadata::{
    CilModuleReader, JsonModuleReader, LoadCause, LoadError, MetadataError, ModuleImage,
    ModuleReader,
};
pub use packaging::{AnalysisError, PackageAnalysis, PackageAnalyzer};
pub use patterns::{Cluster, FileSelector, NamePattern, PatternError, PatternSyntax};
pub use reflector::{Dependency, Reflector, ReflectorOptions};
