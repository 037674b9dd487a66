//! CLI command implementations

use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use stratum_analyzer::{
    AnalysisHandle, CilModuleReader, Coordinator, InheritanceRequest, JsonModuleReader,
    ModuleReader, PackagingConfig, SkippedModule, list_types,
};
use stratum_core::{FailedItem, Outcome};

/// How module files are decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum MetadataFormat {
    /// Managed PE modules (ECMA-335 metadata)
    #[default]
    Cil,
    /// JSON metadata images
    Json,
}

impl MetadataFormat {
    fn reader(self) -> Arc<dyn ModuleReader> {
        match self {
            MetadataFormat::Cil => Arc::new(CilModuleReader::new()),
            MetadataFormat::Json => Arc::new(JsonModuleReader::new()),
        }
    }
}

pub async fn analyze(
    format: MetadataFormat,
    config_path: PathBuf,
    packages: Vec<String>,
    used_types_only: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = PackagingConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if used_types_only {
        config.used_types_only = true;
    }

    let handle = Coordinator::with_reader(format.reader()).spawn_package_analysis(config, packages);
    match wait_or_cancel(handle).await? {
        Outcome::Cancelled => {
            tracing::warn!("Analysis cancelled");
            Ok(())
        }
        Outcome::Completed(analysis) => {
            report_skipped(&analysis.skipped);
            write_json(&analysis.document, output)
        }
    }
}

pub async fn inherit(
    format: MetadataFormat,
    dir: PathBuf,
    type_name: String,
    ignore_platform_types: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let request = InheritanceRequest::new(dir, type_name).ignore_platform_types(ignore_platform_types);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<f64>();
    let progress = tokio::spawn(async move {
        while let Some(value) = rx.recv().await {
            tracing::info!("Progress {:.0}%", value * 100.0);
        }
    });

    let handle = Coordinator::with_reader(format.reader()).spawn_inheritance(request, tx);
    let outcome = wait_or_cancel(handle).await?;
    let _ = progress.await;

    match outcome {
        Outcome::Cancelled => {
            tracing::warn!("Analysis cancelled");
            Ok(())
        }
        Outcome::Completed(document) => {
            report_failed(document.failed_items());
            if document.is_empty() {
                println!("No nodes found");
                return Ok(());
            }
            write_json(&document, output)
        }
    }
}

pub fn types(
    format: MetadataFormat,
    module: PathBuf,
    filter: Option<String>,
) -> anyhow::Result<()> {
    let types = list_types(format.reader().as_ref(), &module, filter.as_deref())
        .with_context(|| format!("reading {}", module.display()))?;
    for ty in &types {
        println!("{}", ty.full_name);
    }
    tracing::info!("{} types", types.len());
    Ok(())
}

/// Ctrl-C cancels the running analysis; the task then finishes with
/// [`Outcome::Cancelled`].
async fn wait_or_cancel<T>(handle: AnalysisHandle<T>) -> anyhow::Result<Outcome<T>> {
    let token = handle.token().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Cancelling ...");
            token.cancel();
        }
    });

    let outcome = handle.wait().await;
    interrupt.abort();
    outcome
}

fn report_skipped(skipped: &[SkippedModule]) {
    for module in skipped {
        eprintln!("Skipped {}: {}", module.path.display(), module.reason);
    }
}

fn report_failed(failed: &[FailedItem]) {
    if failed.is_empty() {
        return;
    }
    eprintln!("Loading failed");
    for item in failed {
        eprintln!("Item: {}", item.item);
        eprintln!("Reason: {}", item.reason);
    }
}

fn write_json<T: Serialize>(value: &T, output: Option<PathBuf>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
