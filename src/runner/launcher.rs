use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::models::Execution;
use crate::platform::{env_assignment, filter_platform_noise, Gcloud};
use crate::process::CommandRunner;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Overrides the job's configured task count for this execution only.
    pub task_count: Option<u32>,
    pub wait_for_completion: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchedExecution {
    pub execution: Execution,
    pub console_url: String,
}

/// Starts remote executions of a job resource.
#[async_trait]
pub trait ExecutionLauncher: Send + Sync {
    async fn launch(
        &self,
        job_name: &str,
        argv: &[String],
        options: &LaunchOptions,
    ) -> Result<LaunchedExecution, DeployError>;
}

/// Launches through the platform CLI's job-execute command.
pub struct JobExecuteLauncher {
    runner: Arc<dyn CommandRunner>,
    gcloud: Gcloud,
    args_env_var: String,
}

impl JobExecuteLauncher {
    pub fn new(runner: Arc<dyn CommandRunner>, gcloud: Gcloud, args_env_var: &str) -> Self {
        Self {
            runner,
            gcloud,
            args_env_var: args_env_var.to_string(),
        }
    }
}

#[async_trait]
impl ExecutionLauncher for JobExecuteLauncher {
    async fn launch(
        &self,
        job_name: &str,
        argv: &[String],
        options: &LaunchOptions,
    ) -> Result<LaunchedExecution, DeployError> {
        let payload = serde_json::to_string(argv)?;
        let mut cmd = self
            .gcloud
            .regional_command(["run", "jobs", "execute", job_name])
            .args([
                "--async".to_string(),
                "--format=json".to_string(),
                format!(
                    "--update-env-vars={}",
                    env_assignment([(self.args_env_var.as_str(), payload.as_str())])
                ),
            ]);
        if let Some(tasks) = options.task_count {
            cmd = cmd.arg(format!("--tasks={}", tasks));
        }

        let output = self.runner.run(&cmd).await.map_err(|e| DeployError::Launch {
            message: format!("Failed to run {}", self.gcloud.bin),
            response: e.to_string(),
        })?;
        if !output.is_success() {
            return Err(DeployError::Launch {
                message: format!(
                    "execute {} exited with code {}",
                    job_name,
                    output.code_display()
                ),
                response: filter_platform_noise(&output.combined()),
            });
        }

        let execution = Execution::parse(&output.stdout).ok_or_else(|| DeployError::Launch {
            message: "no execution identifier in platform response".to_string(),
            response: output.combined(),
        })?;

        let console_url = execution
            .log_uri
            .clone()
            .unwrap_or_else(|| self.gcloud.console_url(&execution.short_name));
        tracing::info!("Launched execution {}", execution.full_name);

        Ok(LaunchedExecution {
            execution,
            console_url,
        })
    }
}
