//! Packaging configuration: which modules form which package

use crate::patterns::{Cluster, FileSelector, PatternError, PatternSyntax};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Namespaces treated as platform types when `ignore_platform_types` is set.
pub const DEFAULT_PLATFORM_NAMESPACES: &[&str] = &["System", "Microsoft"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("module root does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("no packages defined")]
    NoPackages,
    #[error("package '{0}' is defined more than once")]
    DuplicatePackage(String),
    #[error("package '{package}': {source}")]
    Pattern {
        package: String,
        source: PatternError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub syntax: PatternSyntax,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        PackageSpec {
            name: name.into(),
            includes: Vec::new(),
            excludes: Vec::new(),
            clusters: Vec::new(),
        }
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.includes.push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.excludes.push(pattern.to_string());
        self
    }

    pub fn cluster(mut self, name: &str, patterns: &[&str]) -> Self {
        self.clusters.push(ClusterSpec {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            syntax: PatternSyntax::Wildcard,
        });
        self
    }

    /// Compile globs and cluster patterns.
    pub fn compile(&self) -> Result<Package, ConfigError> {
        let pattern_error = |source| ConfigError::Pattern {
            package: self.name.clone(),
            source,
        };
        let selector = FileSelector::new(&self.includes, &self.excludes).map_err(pattern_error)?;
        let clusters = self
            .clusters
            .iter()
            .map(|c| Cluster::new(c.name.clone(), &c.patterns, c.syntax))
            .collect::<Result<Vec<_>, _>>()
            .map_err(pattern_error)?;

        Ok(Package {
            name: self.name.clone(),
            selector,
            clusters,
        })
    }
}

/// A package ready for analysis.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub selector: FileSelector,
    pub clusters: Vec<Cluster>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Directory the include patterns are evaluated against.
    pub assembly_root: PathBuf,
    /// Worker threads for edge extraction; rayon's default when unset.
    #[serde(default)]
    pub threads: Option<usize>,
    /// Drop types that take part in no edge.
    #[serde(default)]
    pub used_types_only: bool,
    #[serde(default)]
    pub ignore_platform_types: bool,
    #[serde(default = "default_platform_namespaces")]
    pub platform_namespaces: Vec<String>,
    #[serde(default)]
    pub packages: Vec<PackageSpec>,
}

fn default_platform_namespaces() -> Vec<String> {
    DEFAULT_PLATFORM_NAMESPACES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl PackagingConfig {
    pub fn new(assembly_root: impl Into<PathBuf>) -> Self {
        PackagingConfig {
            assembly_root: assembly_root.into(),
            threads: None,
            used_types_only: false,
            ignore_platform_types: false,
            platform_namespaces: default_platform_namespaces(),
            packages: Vec::new(),
        }
    }

    pub fn with_package(mut self, package: PackageSpec) -> Self {
        self.packages.push(package);
        self
    }

    /// Parse TOML. A relative `assembly_root` is resolved against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: PackagingConfig = toml::from_str(content)?;
        if config.assembly_root.is_relative() {
            config.assembly_root = base_dir.join(&config.assembly_root);
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let config = Self::from_toml_str(&content, base_dir)?;
        tracing::debug!(
            "Loaded {} package definitions from {}",
            config.packages.len(),
            path.display()
        );
        Ok(config)
    }

    /// Preconditions checked before any analysis begins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.assembly_root.is_dir() {
            return Err(ConfigError::MissingRoot(self.assembly_root.clone()));
        }
        if self.packages.is_empty() {
            return Err(ConfigError::NoPackages);
        }
        let mut names = HashSet::new();
        for package in &self.packages {
            if !names.insert(package.name.to_lowercase()) {
                return Err(ConfigError::DuplicatePackage(package.name.clone()));
            }
        }
        Ok(())
    }

    /// Packages selected by name (case-insensitive), in declaration order.
    /// An empty filter selects every package.
    pub fn select_packages(&self, names: &[String]) -> Vec<&PackageSpec> {
        let wanted: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
        self.packages
            .iter()
            .filter(|p| wanted.is_empty() || wanted.contains(&p.name.to_lowercase()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
assembly_root = "bin"
used_types_only = true

[[packages]]
name = "Core"
includes = ["Core*.dll"]
excludes = ["*.Tests.dll"]

[[packages.clusters]]
name = "Services"
patterns = ["Core.Services.*"]

[[packages.clusters]]
name = "Stores"
patterns = ['\.(Repository|Store)$']
syntax = "regex"

[[packages]]
name = "UI"
includes = ["App.exe"]
"#;

    #[test]
    fn test_parse_config() {
        let config = PackagingConfig::from_toml_str(CONFIG, Path::new("/work")).unwrap();

        assert_eq!(config.assembly_root, Path::new("/work").join("bin"));
        assert!(config.used_types_only);
        assert!(!config.ignore_platform_types);
        assert_eq!(config.platform_namespaces, vec!["System", "Microsoft"]);
        assert_eq!(config.packages.len(), 2);

        let core = &config.packages[0];
        assert_eq!(core.includes, vec!["Core*.dll"]);
        assert_eq!(core.clusters[0].syntax, PatternSyntax::Wildcard);
        assert_eq!(core.clusters[1].syntax, PatternSyntax::Regex);

        let compiled = core.compile().unwrap();
        assert_eq!(compiled.clusters.len(), 2);
    }

    #[test]
    fn test_select_packages_case_insensitive() {
        let config = PackagingConfig::from_toml_str(CONFIG, Path::new("/work")).unwrap();

        let all = config.select_packages(&[]);
        assert_eq!(all.len(), 2);

        let ui = config.select_packages(&["ui".to_string()]);
        assert_eq!(ui.len(), 1);
        assert_eq!(ui[0].name, "UI");

        assert!(config.select_packages(&["Missing".to_string()]).is_empty());
    }

    #[test]
    fn test_select_packages_folds_non_ascii_names() {
        let config = PackagingConfig::new("/work")
            .with_package(PackageSpec::new("Ärger"))
            .with_package(PackageSpec::new("Straße"));

        let selected = config.select_packages(&["ärger".to_string()]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "Ärger");

        // Selection folds case the same way duplicate detection does.
        let dir = tempfile::tempdir().unwrap();
        let duplicate = PackagingConfig::new(dir.path())
            .with_package(PackageSpec::new("Ärger"))
            .with_package(PackageSpec::new("ÄRGER"));
        assert!(matches!(
            duplicate.validate(),
            Err(ConfigError::DuplicatePackage(name)) if name == "ÄRGER"
        ));
        assert_eq!(duplicate.select_packages(&["äRGER".to_string()]).len(), 2);
    }

    #[test]
    fn test_validation() {
        let dir = tempfile::tempdir().unwrap();

        let missing = PackagingConfig::new(dir.path().join("nope")).with_package(PackageSpec::new("Core"));
        assert!(matches!(missing.validate(), Err(ConfigError::MissingRoot(_))));

        let empty = PackagingConfig::new(dir.path());
        assert!(matches!(empty.validate(), Err(ConfigError::NoPackages)));

        let duplicate = PackagingConfig::new(dir.path())
            .with_package(PackageSpec::new("Core"))
            .with_package(PackageSpec::new("core"));
        assert!(matches!(
            duplicate.validate(),
            Err(ConfigError::DuplicatePackage(name)) if name == "core"
        ));

        let ok = PackagingConfig::new(dir.path()).with_package(PackageSpec::new("Core"));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_invalid_cluster_pattern() {
        let mut spec = PackageSpec::new("Core");
        spec.clusters.push(ClusterSpec {
            name: "Broken".to_string(),
            patterns: vec!["(".to_string()],
            syntax: PatternSyntax::Regex,
        });
        assert!(matches!(
            spec.compile(),
            Err(ConfigError::Pattern { package, .. }) if package == "Core"
        ));
    }
}
