// Deploy module
// Image preparation and job resource reconciliation.

pub mod builder;
pub mod image_cache;
pub mod prompt;
pub mod reconciler;

use std::path::Path;
use std::sync::Arc;

use crate::errors::DeployError;
use crate::models::{DeployConfig, ImageReference, JobSpec};
use crate::platform::Gcloud;
use crate::process::CommandRunner;

pub use builder::{BuildOrchestrator, BuildPath, PreparedImage};
pub use image_cache::{hash_build_context, ImageCache, DESCRIPTOR_FILE_NAME};
pub use prompt::{DaemonRecovery, DecisionProvider, ScriptedDecisions, TerminalPrompt};
pub use reconciler::{ReconcileOutcome, ResourceReconciler};

/// What a deploy did.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployReport {
    pub image: ImageReference,
    pub was_built: bool,
    pub created: bool,
    pub build_logs_url: Option<String>,
}

/// Image preparation followed by reconciliation, for one job.
pub struct Deployer {
    builder: BuildOrchestrator,
    reconciler: ResourceReconciler,
}

impl Deployer {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: Arc<DeployConfig>,
        gcloud: Gcloud,
        decisions: Arc<dyn DecisionProvider>,
    ) -> Self {
        let reconciler = ResourceReconciler::new(
            Arc::clone(&runner),
            gcloud.clone(),
            config.default_service_account.clone(),
        );
        Self {
            builder: BuildOrchestrator::new(runner, config, gcloud, decisions),
            reconciler,
        }
    }

    pub async fn deploy(&self, spec: JobSpec, context: &Path) -> Result<DeployReport, DeployError> {
        let prepared = self.builder.prepare_image(&spec, context).await?;
        let spec = spec.with_image(prepared.image.clone());
        let outcome = self.reconciler.reconcile(&spec).await?;

        Ok(DeployReport {
            image: prepared.image,
            was_built: prepared.was_built,
            created: outcome.created,
            build_logs_url: prepared.build_logs_url,
        })
    }
}
