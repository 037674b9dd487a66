//! Inheritance focus analysis
//!
//! Scans one module directory, records only derives-from and implements
//! relationships, and extracts the neighborhood of a seed type: everything it
//! inherits from and everything inheriting from it.

use crate::loader::Module;
use crate::metadata::{CilModuleReader, LoadError, ModuleReader};
use crate::packaging::AnalysisError;
use crate::patterns::walk_files;
use crate::reflector::{Reflector, ReflectorOptions};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratum_core::{
    CancellationToken, FailedItem, Graph, GraphEdge, Outcome, TypeEntity,
    TypeRelationshipDocument,
};

/// Accumulates the inheritance graph of every processed module.
#[derive(Debug)]
pub struct InheritanceGraphBuilder {
    graph: Graph,
    options: ReflectorOptions,
}

impl InheritanceGraphBuilder {
    pub fn new(options: ReflectorOptions) -> Self {
        InheritanceGraphBuilder {
            graph: Graph::new(),
            options,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Add every type of the module with its base type and interfaces.
    pub fn process(&mut self, module: &Arc<Module>) {
        for ty in module.types() {
            let source = self.graph.add_node(ty.entity());
            let structural = Reflector::new(ty.def(), &self.options)
                .structural()
                .filter(|dep| dep.kind.is_structural());
            for dep in structural {
                let target = self.graph.add_node(TypeEntity::from_reference(&dep.target));
                self.graph.add_edge(source, target, dep.kind);
            }
        }
    }

    /// Write the seed's neighborhood into `document`. Returns false when the
    /// seed is unknown.
    pub fn write_to(&self, seed: &str, document: &mut TypeRelationshipDocument) -> bool {
        let Some(seed_id) = self.graph.find_node_by_full_name(seed) else {
            tracing::warn!("Type {} not found in any module", seed);
            return false;
        };

        let focus = self.graph.neighborhood(seed_id);
        let mut nodes: Vec<&TypeEntity> = focus
            .iter()
            .filter_map(|&id| self.graph.node(id))
            .collect();
        nodes.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        for node in nodes {
            document.add_node(node.clone());
        }

        let edges: Vec<GraphEdge> = self
            .graph
            .all_edges()
            .filter(|e| focus.contains(&e.source) && focus.contains(&e.target))
            .collect();
        for edge in edges {
            if let Err(e) = document.add_edge(edge) {
                tracing::warn!("Dropping edge: {}", e);
            }
        }
        true
    }
}

/// Parameters of one inheritance run.
#[derive(Debug, Clone)]
pub struct InheritanceRequest {
    pub module_dir: PathBuf,
    /// Full name of the type to focus on.
    pub seed: String,
    pub ignore_platform_types: bool,
    pub platform_namespaces: Vec<String>,
}

impl InheritanceRequest {
    pub fn new(module_dir: impl Into<PathBuf>, seed: impl Into<String>) -> Self {
        let options = ReflectorOptions::default();
        InheritanceRequest {
            module_dir: module_dir.into(),
            seed: seed.into(),
            ignore_platform_types: options.ignore_platform_types,
            platform_namespaces: options.platform_namespaces,
        }
    }

    pub fn ignore_platform_types(mut self, ignore: bool) -> Self {
        self.ignore_platform_types = ignore;
        self
    }

    fn reflector_options(&self) -> ReflectorOptions {
        ReflectorOptions {
            ignore_platform_types: self.ignore_platform_types,
            platform_namespaces: self.platform_namespaces.clone(),
        }
    }
}

pub struct InheritanceAnalyzer {
    reader: Arc<dyn ModuleReader>,
}

impl InheritanceAnalyzer {
    /// Reads binary modules; see [`with_reader`](Self::with_reader) for other formats.
    pub fn new() -> Self {
        Self::with_reader(Arc::new(CilModuleReader::new()))
    }

    pub fn with_reader(reader: Arc<dyn ModuleReader>) -> Self {
        InheritanceAnalyzer { reader }
    }

    /// Run the analysis. `progress` receives values in `0.0..=1.0` after
    /// discovery and after every module.
    pub fn analyze(
        &self,
        request: &InheritanceRequest,
        token: &CancellationToken,
        progress: &mut dyn FnMut(f64),
    ) -> Result<Outcome<TypeRelationshipDocument>, AnalysisError> {
        if request.seed.trim().is_empty() {
            return Err(AnalysisError::MissingSeed);
        }
        if !request.module_dir.is_dir() {
            return Err(AnalysisError::MissingModuleDirectory(
                request.module_dir.clone(),
            ));
        }

        let modules = self.discover(&request.module_dir);
        tracing::info!(
            "Found {} modules in {}",
            modules.len(),
            request.module_dir.display()
        );
        progress(0.0);
        if token.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let mut document = TypeRelationshipDocument::new();
        let mut builder = InheritanceGraphBuilder::new(request.reflector_options());
        let total = modules.len();

        for (done, path) in modules.iter().enumerate() {
            self.process_module(path, &mut builder, &mut document);
            progress((done + 1) as f64 / total as f64);
            if token.is_cancelled() {
                tracing::info!("Inheritance analysis cancelled");
                return Ok(Outcome::Cancelled);
            }
        }
        if total == 0 {
            progress(1.0);
        }

        builder.write_to(&request.seed, &mut document);
        tracing::info!(
            "Inheritance of {}: {} types, {} edges, {} failed modules",
            request.seed,
            document.descriptors().len(),
            document.edges().len(),
            document.failed_items().len()
        );
        Ok(Outcome::Completed(document))
    }

    /// Top-level libraries first, then executables; only genuine modules.
    fn discover(&self, dir: &Path) -> Vec<PathBuf> {
        let files = walk_files(dir, Some(1));
        let mut candidates = Vec::new();
        for ext in self.reader.extensions() {
            candidates.extend(
                files
                    .iter()
                    .filter(|f| f.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext)))
                    .map(|f| dir.join(f)),
            );
        }

        let reader = &self.reader;
        candidates
            .into_par_iter()
            .filter(|path| reader.probe(path))
            .collect()
    }

    fn process_module(
        &self,
        path: &Path,
        builder: &mut InheritanceGraphBuilder,
        document: &mut TypeRelationshipDocument,
    ) {
        match self.reader.read(path) {
            Ok(image) => {
                let module = Arc::new(Module::new(path.to_path_buf(), image));
                builder.process(&module);
            }
            Err(e) => {
                let reason = failure_reason(&e);
                tracing::warn!("Failed to load {}: {}", path.display(), reason);
                document.add_failed_item(FailedItem::new(path.display().to_string(), reason));
            }
        }
    }
}

impl Default for InheritanceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn failure_reason(error: &LoadError) -> String {
    match error {
        LoadError::TypeLoad(causes) => {
            let mut reason = String::from("Failed to load module");
            for cause in causes {
                reason.push_str("\n  ");
                reason.push_str(&cause.to_string());
            }
            reason
        }
        other => format!("Failed to load module: {other}"),
    }
}
