//! Runs analyses off the caller's thread

use crate::config::PackagingConfig;
use crate::inheritance::{InheritanceAnalyzer, InheritanceRequest};
use crate::metadata::{CilModuleReader, ModuleReader};
use crate::packaging::{PackageAnalysis, PackageAnalyzer};
use anyhow::{Context, Result};
use std::sync::Arc;
use stratum_core::{CancellationToken, Outcome, TypeRelationshipDocument};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// A running analysis. Dropping the handle does not stop the work; call
/// [`AnalysisHandle::cancel`] for that.
pub struct AnalysisHandle<T> {
    token: CancellationToken,
    join: JoinHandle<Result<Outcome<T>>>,
}

impl<T> AnalysisHandle<T> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Wait for completion, cancellation or failure.
    pub async fn wait(self) -> Result<Outcome<T>> {
        self.join.await.context("analysis task panicked")?
    }
}

pub struct Coordinator {
    reader: Arc<dyn ModuleReader>,
}

impl Coordinator {
    /// Reads binary modules; see [`with_reader`](Self::with_reader) for other formats.
    pub fn new() -> Self {
        Self::with_reader(Arc::new(CilModuleReader::new()))
    }

    pub fn with_reader(reader: Arc<dyn ModuleReader>) -> Self {
        Coordinator { reader }
    }

    pub fn spawn_package_analysis(
        &self,
        config: PackagingConfig,
        packages: Vec<String>,
    ) -> AnalysisHandle<PackageAnalysis> {
        let token = CancellationToken::new();
        let analyzer = PackageAnalyzer::with_reader(Arc::clone(&self.reader));
        let task_token = token.clone();

        let join = tokio::task::spawn_blocking(move || {
            analyzer
                .analyze(&config, &packages, &task_token)
                .context("package analysis failed")
        });
        AnalysisHandle { token, join }
    }

    /// Progress values are sent on `progress`; a closed receiver is ignored.
    pub fn spawn_inheritance(
        &self,
        request: InheritanceRequest,
        progress: UnboundedSender<f64>,
    ) -> AnalysisHandle<TypeRelationshipDocument> {
        let token = CancellationToken::new();
        let analyzer = InheritanceAnalyzer::with_reader(Arc::clone(&self.reader));
        let task_token = token.clone();

        let join = tokio::task::spawn_blocking(move || {
            let mut report = |value: f64| {
                let _ = progress.send(value);
            };
            analyzer
                .analyze(&request, &task_token, &mut report)
                .with_context(|| format!("inheritance analysis of {} failed", request.seed))
        });
        AnalysisHandle { token, join }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
