// CLI deploy commands: hash, deploy

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use super::{resolve_context, Session};
use crate::deploy::{hash_build_context, DeployReport, Deployer, TerminalPrompt};
use crate::errors::EXIT_SUCCESS;
use crate::models::JobSpec;

/// cjr hash
pub fn cmd_hash(context: &Path) -> anyhow::Result<i32> {
    let tag = hash_build_context(context)?;
    println!("{}", tag);
    Ok(EXIT_SUCCESS)
}

/// cjr deploy
pub async fn cmd_deploy(
    session: &Session,
    job: &str,
    context: Option<&Path>,
) -> anyhow::Result<DeployReport> {
    let context = resolve_context(&session.config, job, context);
    let context = context
        .canonicalize()
        .with_context(|| format!("Build context not found: {}", context.display()))?;
    let spec = JobSpec::from_definition(job, &session.config.job(job));

    println!("Deploying {} from {}", job, context.display());
    let deployer = Deployer::new(
        Arc::clone(&session.runner),
        Arc::clone(&session.config),
        session.gcloud.clone(),
        Arc::new(TerminalPrompt),
    );
    let report = deployer.deploy(spec, &context).await?;

    if report.was_built {
        println!("Built and pushed {}", report.image);
    } else {
        println!("Image {} is up to date", report.image);
    }
    if report.created {
        println!("Created job '{}'", job);
    } else {
        println!("Updated job '{}'", job);
    }
    Ok(report)
}
