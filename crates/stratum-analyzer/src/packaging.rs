//! Package dependency analysis
//!
//! Loads the modules of every selected package, extracts type relationships
//! on a worker pool and assembles a styled [`AnalysisDocument`].
//!
//! With one package the document shows dependencies *within* that package;
//! with several it shows only dependencies *between* them.

use crate::config::{ConfigError, Package, PackagingConfig};
use crate::loader::{ModuleLoader, SkippedModule, TypeHandle};
use crate::metadata::{CilModuleReader, ModuleReader};
use crate::patterns::first_match;
use crate::reflector::{Reflector, ReflectorOptions};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use stratum_core::{
    AnalysisDocument, CancellationToken, GraphEdge, NodeId, Outcome, package_color,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no configured package matches {0:?}")]
    NoPackagesSelected(Vec<String>),
    #[error("module directory does not exist: {0}")]
    MissingModuleDirectory(std::path::PathBuf),
    #[error("no seed type given")]
    MissingSeed,
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result of a completed package analysis.
#[derive(Debug)]
pub struct PackageAnalysis {
    pub document: AnalysisDocument,
    /// Modules that matched a package but could not be loaded.
    pub skipped: Vec<SkippedModule>,
}

/// One selected package with the types of its modules.
struct LoadedPackage {
    package: Package,
    types: Vec<TypeHandle>,
}

/// Which packages every loaded type belongs to, by position.
type Membership = HashMap<NodeId, Vec<usize>>;

pub struct PackageAnalyzer {
    reader: Arc<dyn ModuleReader>,
}

impl PackageAnalyzer {
    /// Reads binary modules; see [`with_reader`](Self::with_reader) for other formats.
    pub fn new() -> Self {
        Self::with_reader(Arc::new(CilModuleReader::new()))
    }

    pub fn with_reader(reader: Arc<dyn ModuleReader>) -> Self {
        PackageAnalyzer { reader }
    }

    /// Analyze the packages named in `package_names` (all when empty).
    ///
    /// Configuration problems are returned as errors before anything is
    /// loaded; cancellation yields [`Outcome::Cancelled`], never a partial
    /// document.
    pub fn analyze(
        &self,
        config: &PackagingConfig,
        package_names: &[String],
        token: &CancellationToken,
    ) -> Result<Outcome<PackageAnalysis>, AnalysisError> {
        config.validate()?;
        let selected = config.select_packages(package_names);
        if selected.is_empty() {
            return Err(AnalysisError::NoPackagesSelected(package_names.to_vec()));
        }
        let packages = selected
            .into_iter()
            .map(|spec| spec.compile())
            .collect::<Result<Vec<_>, _>>()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.unwrap_or(0))
            .build()?;
        let options = ReflectorOptions {
            ignore_platform_types: config.ignore_platform_types,
            platform_namespaces: config.platform_namespaces.clone(),
        };

        let mut loader = ModuleLoader::new(Arc::clone(&self.reader));
        let Some(loaded) = self.load(config, packages, &mut loader, token) else {
            tracing::info!("Package analysis cancelled while loading");
            return Ok(Outcome::Cancelled);
        };

        tracing::info!("Analyzing ...");
        let membership = membership(&loaded);
        let edges = pool.install(|| analyze_edges(&loaded, &membership, &options, token));
        if token.is_cancelled() {
            tracing::info!("Package analysis cancelled while analyzing");
            return Ok(Outcome::Cancelled);
        }

        let skipped = loader.into_skipped();
        if !skipped.is_empty() {
            tracing::warn!("Skipped {} modules", skipped.len());
        }

        tracing::info!("Building graph ...");
        let document = generate_document(&loaded, &edges, config.used_types_only);
        tracing::info!(
            "Built document with {} nodes, {} edges",
            document.nodes().len(),
            document.edges().len()
        );

        Ok(Outcome::Completed(PackageAnalysis { document, skipped }))
    }

    /// Step 1: load the modules of every package. `None` on cancellation.
    fn load(
        &self,
        config: &PackagingConfig,
        packages: Vec<Package>,
        loader: &mut ModuleLoader,
        token: &CancellationToken,
    ) -> Option<Vec<LoadedPackage>> {
        tracing::info!("Assembly root {}", config.assembly_root.display());
        let mut loaded = Vec::with_capacity(packages.len());

        for package in packages {
            token.check().ok()?;
            tracing::info!("Loading package {}", package.name);

            let mut seen = HashSet::new();
            let types: Vec<TypeHandle> = package
                .selector
                .select(&config.assembly_root)
                .iter()
                .filter_map(|file| loader.load(file))
                .flat_map(|module| module.types())
                .filter(|ty| seen.insert(ty.id()))
                .collect();

            if types.is_empty() {
                tracing::debug!("Package {} has no types", package.name);
            }
            loaded.push(LoadedPackage { package, types });
        }

        Some(loaded)
    }
}

impl Default for PackageAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn membership(loaded: &[LoadedPackage]) -> Membership {
    let mut membership: Membership = HashMap::new();
    for (index, package) in loaded.iter().enumerate() {
        for ty in &package.types {
            let owners = membership.entry(ty.id()).or_default();
            if !owners.contains(&index) {
                owners.push(index);
            }
        }
    }
    membership
}

/// Step 2: fork-join over every (package, type) pair, then dedupe.
fn analyze_edges(
    loaded: &[LoadedPackage],
    membership: &Membership,
    options: &ReflectorOptions,
    token: &CancellationToken,
) -> Vec<GraphEdge> {
    let focused = loaded.len() == 1;
    let pairs: Vec<(usize, &TypeHandle)> = loaded
        .iter()
        .enumerate()
        .flat_map(|(index, package)| package.types.iter().map(move |ty| (index, ty)))
        .collect();

    let edges: Vec<GraphEdge> = pairs
        .par_iter()
        .flat_map_iter(|&(package, ty)| {
            if token.is_cancelled() {
                return Vec::new();
            }
            type_edges(package, ty, focused, membership, options)
        })
        .collect();

    let mut seen = HashSet::new();
    edges.into_iter().filter(|e| seen.insert(e.id)).collect()
}

fn type_edges(
    package: usize,
    ty: &TypeHandle,
    focused: bool,
    membership: &Membership,
    options: &ReflectorOptions,
) -> Vec<GraphEdge> {
    tracing::trace!("Analyzing {}", ty.full_name());
    let source = ty.id();

    Reflector::new(ty.def(), options)
        .used_types()
        .filter_map(|dep| {
            let target = dep.target_id();
            if target == source {
                return None;
            }
            let owners = membership.get(&target)?;
            // One package: dependencies within it. Several: only foreign ones.
            let visible = focused || owners.iter().any(|&owner| owner != package);
            visible.then(|| GraphEdge::new(source, target, dep.kind))
        })
        .collect()
}

/// Step 3: nodes, clusters, colors.
fn generate_document(
    loaded: &[LoadedPackage],
    edges: &[GraphEdge],
    used_types_only: bool,
) -> AnalysisDocument {
    let mut doc = AnalysisDocument::new();
    let colored = loaded.len() > 1;

    let touched: HashSet<NodeId> = if used_types_only {
        edges.iter().flat_map(|e| [e.source, e.target]).collect()
    } else {
        HashSet::new()
    };

    for (index, entry) in loaded.iter().enumerate() {
        for ty in &entry.types {
            if used_types_only && !touched.contains(&ty.id()) {
                continue;
            }
            if !doc.add_node(ty.entity()) {
                continue;
            }
            if let Some(cluster) = first_match(&entry.package.clusters, ty.full_name()) {
                doc.add_to_cluster(ty.id(), cluster.name.clone());
            }
            if colored {
                doc.set_node_color(ty.id(), package_color(index));
            }
        }
    }

    for edge in edges {
        match doc.add_edge(*edge) {
            Ok(_) => {
                if let Some(color) = edge.kind.color() {
                    doc.set_edge_color(edge.id, color);
                }
            }
            Err(e) => tracing::warn!("Dropping edge: {}", e),
        }
    }

    doc
}
