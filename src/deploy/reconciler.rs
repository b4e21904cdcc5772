use std::sync::Arc;

use crate::errors::DeployError;
use crate::models::{ImageReference, JobSpec};
use crate::platform::{env_assignment, filter_platform_noise, is_not_found, Gcloud};
use crate::process::CommandRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// True when the resource did not exist and was created.
    pub created: bool,
}

/// Makes the remote job resource match a `JobSpec`.
pub struct ResourceReconciler {
    runner: Arc<dyn CommandRunner>,
    gcloud: Gcloud,
    default_service_account: Option<String>,
}

impl ResourceReconciler {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        gcloud: Gcloud,
        default_service_account: Option<String>,
    ) -> Self {
        Self {
            runner,
            gcloud,
            default_service_account,
        }
    }

    /// Create or update the job resource. Running it twice with the same job definition
    /// leaves the resource unchanged and reports `created = false` the second time.
    pub async fn reconcile(&self, spec: &JobSpec) -> Result<ReconcileOutcome, DeployError> {
        let image = spec.image.as_ref().ok_or_else(|| {
            DeployError::Setup(format!("Job {} has no image to deploy", spec.name))
        })?;
        let exists = self.exists(&spec.name).await?;
        let account = self.service_account(spec, exists).await?;
        let verb = if exists { "update" } else { "create" };
        let cmd = self
            .gcloud
            .regional_command(["run", "jobs", verb, spec.name.as_str()])
            .args(render_flags(spec, image, !exists, account.as_deref()))
            .arg("--quiet");

        let output = self.runner.run(&cmd).await.map_err(|e| DeployError::Reconcile {
            message: format!("Failed to run {}", self.gcloud.bin),
            output: e.to_string(),
        })?;
        if !output.is_success() {
            return Err(DeployError::Reconcile {
                message: format!(
                    "{} job {} exited with code {}",
                    verb,
                    spec.name,
                    output.code_display()
                ),
                output: filter_platform_noise(&output.combined()),
            });
        }

        tracing::info!("Job {} {}d", spec.name, verb);
        Ok(ReconcileOutcome { created: !exists })
    }

    async fn exists(&self, name: &str) -> Result<bool, DeployError> {
        let cmd = self
            .gcloud
            .regional_command(["run", "jobs", "describe", name, "--format=json"]);
        let output = self.runner.run(&cmd).await.map_err(|e| DeployError::Reconcile {
            message: format!("Failed to run {}", self.gcloud.bin),
            output: e.to_string(),
        })?;

        if output.is_success() {
            Ok(true)
        } else if is_not_found(&output) {
            Ok(false)
        } else {
            Err(DeployError::Reconcile {
                message: format!("describe job {} failed", name),
                output: filter_platform_noise(&output.combined()),
            })
        }
    }

    /// Account the job should run as.
    ///
    /// On update an unset account resolves to the project's default compute
    /// account, so a previously assigned account never lingers. On create the
    /// flag is omitted and the platform applies that same default.
    async fn service_account(
        &self,
        spec: &JobSpec,
        updating: bool,
    ) -> Result<Option<String>, DeployError> {
        if let Some(account) = spec
            .service_account
            .as_ref()
            .or(self.default_service_account.as_ref())
        {
            return Ok(Some(account.clone()));
        }
        if !updating {
            return Ok(None);
        }
        self.default_compute_account().await.map(Some)
    }

    async fn default_compute_account(&self) -> Result<String, DeployError> {
        let cmd = self.gcloud.command([
            "projects",
            "describe",
            self.gcloud.project.as_str(),
            "--format=value(projectNumber)",
        ]);
        let output = self.runner.run(&cmd).await.map_err(|e| DeployError::Reconcile {
            message: format!("Failed to run {}", self.gcloud.bin),
            output: e.to_string(),
        })?;
        let number = output.stdout.trim();
        if !output.is_success() || number.is_empty() {
            return Err(DeployError::Reconcile {
                message: format!(
                    "could not resolve the default service account of project {}",
                    self.gcloud.project
                ),
                output: filter_platform_noise(&output.combined()),
            });
        }
        Ok(format!("{}-compute@developer.gserviceaccount.com", number))
    }
}

/// Every mutable field, asserted explicitly.
fn render_flags(
    spec: &JobSpec,
    image: &ImageReference,
    creating: bool,
    service_account: Option<&str>,
) -> Vec<String> {
    let mut flags = vec![
        format!("--image={}", image),
        format!("--memory={}", spec.memory),
        format!("--cpu={}", spec.cpu),
        format!("--task-timeout={}s", spec.timeout_seconds),
        format!("--parallelism={}", spec.parallelism),
        format!("--tasks={}", spec.task_count),
        format!("--max-retries={}", spec.max_retries),
    ];

    if !spec.env_vars.is_empty() {
        let pairs = spec.env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        flags.push(format!("--set-env-vars={}", env_assignment(pairs)));
    } else if !creating {
        flags.push("--clear-env-vars".to_string());
    }

    if !spec.secret_refs.is_empty() {
        flags.push(format!("--set-secrets={}", spec.secret_bindings().join(",")));
    } else if !creating {
        flags.push("--clear-secrets".to_string());
    }

    if let Some(account) = service_account {
        flags.push(format!("--service-account={}", account));
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageReference, ImageTag, SecretBinding};
    use crate::process::MockCommandRunner;

    fn gcloud() -> Gcloud {
        Gcloud {
            bin: "gcloud".to_string(),
            project: "acme".to_string(),
            region: "us-central1".to_string(),
        }
    }

    fn spec() -> JobSpec {
        JobSpec::new("export-users").with_image(ImageReference {
            registry_host: "us-central1-docker.pkg.dev".to_string(),
            project_id: "acme".to_string(),
            repository: "jobs".to_string(),
            resource_name: "export-users".to_string(),
            tag: ImageTag::from_digest("abcdef012345"),
        })
    }

    fn last_call(runner: &MockCommandRunner) -> Vec<String> {
        runner.calls().pop().expect("a call")
    }

    #[tokio::test]
    async fn test_creates_when_absent() {
        let runner = MockCommandRunner::new()
            .fail(
                &["gcloud", "run", "jobs", "describe"],
                1,
                "ERROR: (gcloud.run.jobs.describe) Cannot find job [export-users].",
            )
            .ok(&["gcloud", "run", "jobs", "create"], "");
        let reconciler = ResourceReconciler::new(Arc::new(runner.clone()), gcloud(), None);

        let outcome = reconciler.reconcile(&spec()).await.expect("reconcile");
        assert!(outcome.created);

        let call = last_call(&runner);
        assert_eq!(call[3], "create");
        assert!(call.contains(&"--memory=512Mi".to_string()));
        assert!(call.contains(&"--task-timeout=3600s".to_string()));
        assert!(call.contains(&"--tasks=1".to_string()));
        assert!(!call.contains(&"--clear-env-vars".to_string()));
        assert!(!call.iter().any(|a| a.starts_with("--service-account")));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let runner = MockCommandRunner::new()
            .ok(&["gcloud", "run", "jobs", "describe"], "{}")
            .ok(&["gcloud", "projects", "describe"], "123456789012\n")
            .ok(&["gcloud", "run", "jobs", "update"], "");
        let reconciler = ResourceReconciler::new(Arc::new(runner.clone()), gcloud(), None);

        let first = reconciler.reconcile(&spec()).await.expect("first");
        let second = reconciler.reconcile(&spec()).await.expect("second");
        assert!(!first.created);
        assert!(!second.created);

        let updates: Vec<Vec<String>> = runner
            .calls()
            .into_iter()
            .filter(|c| c.get(3).map(String::as_str) == Some("update"))
            .collect();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0], updates[1]);
    }

    #[tokio::test]
    async fn test_update_clears_empty_env_and_secrets() {
        let runner = MockCommandRunner::new()
            .ok(&["gcloud", "run", "jobs", "describe"], "{}")
            .ok(&["gcloud", "projects", "describe"], "123456789012\n")
            .ok(&["gcloud", "run", "jobs", "update"], "");
        let reconciler = ResourceReconciler::new(Arc::new(runner.clone()), gcloud(), None);

        reconciler.reconcile(&spec()).await.expect("reconcile");
        let call = last_call(&runner);
        assert!(call.contains(&"--clear-env-vars".to_string()));
        assert!(call.contains(&"--clear-secrets".to_string()));
    }

    #[tokio::test]
    async fn test_env_secrets_and_service_account_rendered() {
        let runner = MockCommandRunner::new()
            .ok(&["gcloud", "run", "jobs", "describe"], "{}")
            .ok(&["gcloud", "projects", "describe"], "123456789012\n")
            .ok(&["gcloud", "run", "jobs", "update"], "");
        let reconciler = ResourceReconciler::new(
            Arc::new(runner.clone()),
            gcloud(),
            Some("jobs@acme.iam.gserviceaccount.com".to_string()),
        );

        let mut spec = spec();
        spec.env_vars.insert("MODE".to_string(), "full".to_string());
        spec.env_vars.insert("TABLES".to_string(), "users,orders".to_string());
        spec.secret_refs.push(SecretBinding {
            env: "DB_PASSWORD".to_string(),
            secret: "db-password".to_string(),
        });

        reconciler.reconcile(&spec).await.expect("reconcile");
        let call = last_call(&runner);
        assert!(call.contains(&"--set-env-vars=^@@^MODE=full@@TABLES=users,orders".to_string()));
        assert!(call.contains(&"--set-secrets=DB_PASSWORD=db-password:latest".to_string()));
        assert!(call.contains(&"--service-account=jobs@acme.iam.gserviceaccount.com".to_string()));
        assert!(!call.contains(&"--clear-env-vars".to_string()));
    }

    #[tokio::test]
    async fn test_update_without_account_restores_default() {
        let runner = MockCommandRunner::new()
            .ok(&["gcloud", "run", "jobs", "describe"], "{}")
            .ok(&["gcloud", "projects", "describe"], "123456789012\n")
            .ok(&["gcloud", "run", "jobs", "update"], "");
        let reconciler = ResourceReconciler::new(Arc::new(runner.clone()), gcloud(), None);

        let mut spec = spec();
        spec.service_account = Some("exporter@acme.iam.gserviceaccount.com".to_string());
        reconciler.reconcile(&spec).await.expect("first");
        assert!(last_call(&runner)
            .contains(&"--service-account=exporter@acme.iam.gserviceaccount.com".to_string()));
        assert_eq!(runner.count(&["gcloud", "projects"]), 0);

        spec.service_account = None;
        reconciler.reconcile(&spec).await.expect("second");
        let call = last_call(&runner);
        assert_eq!(call[3], "update");
        assert!(call.contains(
            &"--service-account=123456789012-compute@developer.gserviceaccount.com".to_string()
        ));
        let lookup = runner
            .calls()
            .into_iter()
            .find(|c| c.get(1).map(String::as_str) == Some("projects"))
            .expect("project lookup");
        assert_eq!(lookup[3], "acme");
    }

    #[tokio::test]
    async fn test_default_account_lookup_failure_is_reconcile_error() {
        let runner = MockCommandRunner::new()
            .ok(&["gcloud", "run", "jobs", "describe"], "{}")
            .fail(&["gcloud", "projects", "describe"], 1, "PERMISSION_DENIED")
            .ok(&["gcloud", "run", "jobs", "update"], "");
        let reconciler = ResourceReconciler::new(Arc::new(runner.clone()), gcloud(), None);

        let err = reconciler.reconcile(&spec()).await.unwrap_err();
        assert!(matches!(err, DeployError::Reconcile { .. }));
        assert_eq!(runner.count(&["gcloud", "run", "jobs", "update"]), 0);
    }

    #[tokio::test]
    async fn test_failure_filters_hint_banners() {
        let runner = MockCommandRunner::new()
            .ok(&["gcloud", "run", "jobs", "describe"], "{}")
            .ok(&["gcloud", "projects", "describe"], "123456789012\n")
            .fail(
                &["gcloud", "run", "jobs", "update"],
                1,
                "ERROR: (gcloud.run.jobs.update) PERMISSION_DENIED\n\
                 To take a quick anonymous survey, run:\n  $ gcloud survey\n",
            );
        let reconciler = ResourceReconciler::new(Arc::new(runner), gcloud(), None);

        match reconciler.reconcile(&spec()).await.unwrap_err() {
            DeployError::Reconcile { output, .. } => {
                assert_eq!(output, "ERROR: (gcloud.run.jobs.update) PERMISSION_DENIED");
            }
            other => panic!("Expected Reconcile, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_image_rejected() {
        let runner = MockCommandRunner::new().ok(&["gcloud", "run", "jobs", "describe"], "{}");
        let reconciler = ResourceReconciler::new(Arc::new(runner), gcloud(), None);
        let err = reconciler
            .reconcile(&JobSpec::new("export-users"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Setup(_)));
    }
}
