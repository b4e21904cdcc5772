use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::deploy::image_cache::{hash_build_context, ImageCache, DESCRIPTOR_FILE_NAME};
use crate::deploy::prompt::{DaemonRecovery, DecisionProvider};
use crate::errors::DeployError;
use crate::models::{DeployConfig, ImageReference, ImageTag, JobSpec};
use crate::platform::{filter_platform_noise, Gcloud};
use crate::process::{CommandOutput, CommandRunner, CommandSpec};

/// Where an image gets built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPath {
    Local,
    Remote,
}

/// Result of `prepare_image`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub image: ImageReference,
    /// False when the image already existed and no build tool ran.
    pub was_built: bool,
    pub build_path: Option<BuildPath>,
    /// Remote build log location, when the build service reported one.
    pub build_logs_url: Option<String>,
}

/// Removes build descriptor files when dropped, whatever the build outcome.
struct DescriptorGuard {
    paths: Vec<PathBuf>,
}

impl DescriptorGuard {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    fn write(&mut self, path: PathBuf, content: &str) -> Result<(), DeployError> {
        std::fs::write(&path, content).map_err(|e| {
            DeployError::Storage(format!("Failed to write {}: {}", path.display(), e))
        })?;
        self.paths.push(path);
        Ok(())
    }
}

impl Drop for DescriptorGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Decides where to build, builds and publishes images.
pub struct BuildOrchestrator {
    runner: Arc<dyn CommandRunner>,
    config: Arc<DeployConfig>,
    gcloud: Gcloud,
    cache: ImageCache,
    decisions: Arc<dyn DecisionProvider>,
}

impl BuildOrchestrator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: Arc<DeployConfig>,
        gcloud: Gcloud,
        decisions: Arc<dyn DecisionProvider>,
    ) -> Self {
        let cache = ImageCache::new(Arc::clone(&runner), gcloud.clone());
        Self {
            runner,
            config,
            gcloud,
            cache,
            decisions,
        }
    }

    /// Ensure an image for `context` exists in the registry, building it if needed.
    pub async fn prepare_image(
        &self,
        spec: &JobSpec,
        context: &Path,
    ) -> Result<PreparedImage, DeployError> {
        self.verify_platform_cli().await?;

        let build_path = if self.config.local_build {
            self.choose_local_or_remote().await?
        } else {
            BuildPath::Remote
        };

        let root = context.to_path_buf();
        let tag = tokio::task::spawn_blocking(move || hash_build_context(&root))
            .await
            .map_err(|e| DeployError::Storage(format!("Hashing task failed: {}", e)))??;
        let image = self.image_reference(&spec.name, tag);

        if self.cache.exists(&image, false).await? {
            tracing::info!("Image {} already exists, skipping build", image);
            return Ok(PreparedImage {
                image,
                was_built: false,
                build_path: None,
                build_logs_url: None,
            });
        }

        tracing::info!("Building {} ({:?})", image, build_path);
        let build_logs_url = match build_path {
            BuildPath::Local => {
                self.build_local(&image, context).await?;
                None
            }
            BuildPath::Remote => self.build_remote(&image, context).await?,
        };

        Ok(PreparedImage {
            image,
            was_built: true,
            build_path: Some(build_path),
            build_logs_url,
        })
    }

    fn image_reference(&self, name: &str, tag: ImageTag) -> ImageReference {
        ImageReference {
            registry_host: self.config.registry_host(),
            project_id: self.gcloud.project.clone(),
            repository: self.config.repository.clone(),
            resource_name: name.to_string(),
            tag,
        }
    }

    async fn verify_platform_cli(&self) -> Result<(), DeployError> {
        match self.runner.run(&self.gcloud.command(["--version"])).await {
            Ok(output) if output.is_success() => Ok(()),
            Ok(output) => Err(DeployError::Setup(format!(
                "{} --version exited with code {}: {}",
                self.gcloud.bin,
                output.code_display(),
                output.combined()
            ))),
            Err(e) => Err(DeployError::Setup(format!(
                "{} is not available: {}. Install the Google Cloud CLI and make sure it is on PATH.",
                self.gcloud.bin, e
            ))),
        }
    }

    async fn choose_local_or_remote(&self) -> Result<BuildPath, DeployError> {
        let docker = &self.config.docker_bin;
        if !self.succeeds(CommandSpec::new(docker.clone()).arg("--version")).await {
            tracing::warn!("{} not found, falling back to remote build", docker);
            eprintln!("Warning: {} not found, building remotely instead.", docker);
            return Ok(BuildPath::Remote);
        }

        if self.daemon_ready().await {
            return Ok(BuildPath::Local);
        }

        if !self.decisions.is_interactive() {
            tracing::warn!("Docker daemon not running, falling back to remote build");
            eprintln!("Warning: Docker daemon is not running, building remotely instead.");
            return Ok(BuildPath::Remote);
        }

        match self.decisions.choose_daemon_recovery().await? {
            DaemonRecovery::Cancel => Err(DeployError::Cancelled),
            DaemonRecovery::RemoteBuild => Ok(BuildPath::Remote),
            DaemonRecovery::StartDaemon => {
                if self.start_daemon().await {
                    Ok(BuildPath::Local)
                } else {
                    eprintln!("Warning: Docker did not become ready, building remotely instead.");
                    Ok(BuildPath::Remote)
                }
            }
        }
    }

    async fn daemon_ready(&self) -> bool {
        self.succeeds(CommandSpec::new(self.config.docker_bin.clone()).arg("info"))
            .await
    }

    /// Launch the daemon and wait for it to answer. False on any failure.
    async fn start_daemon(&self) -> bool {
        let argv = self
            .config
            .docker_start_command
            .clone()
            .unwrap_or_else(default_start_command);
        let Some((program, args)) = argv.split_first() else {
            tracing::warn!("Empty docker_start_command");
            return false;
        };

        eprintln!("Starting Docker...");
        let cmd = CommandSpec::new(program.clone()).args(args.iter().cloned());
        match self.runner.run(&cmd).await {
            Ok(output) if output.is_success() => {}
            Ok(output) => {
                tracing::warn!(
                    "{} exited with code {}: {}",
                    cmd,
                    output.code_display(),
                    output.combined()
                );
                return false;
            }
            Err(e) => {
                tracing::warn!("Failed to run {}: {}", cmd, e);
                return false;
            }
        }

        let timeout = self.config.daemon_wait_timeout();
        let interval = self.config.daemon_poll_interval();
        let started = tokio::time::Instant::now();
        let deadline = started + timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            if self.daemon_ready().await {
                tracing::info!("Docker daemon ready after {:?}", started.elapsed());
                return true;
            }
        }
        tracing::warn!("Docker daemon not ready after {:?}", timeout);
        false
    }

    async fn succeeds(&self, cmd: CommandSpec) -> bool {
        matches!(self.runner.run(&cmd).await, Ok(output) if output.is_success())
    }

    async fn build_local(&self, image: &ImageReference, context: &Path) -> Result<(), DeployError> {
        let mut descriptors = DescriptorGuard::new();
        let dockerfile = std::env::temp_dir().join(format!("cjr-{}.Dockerfile", Uuid::now_v7()));
        descriptors.write(dockerfile.clone(), &render_dockerfile(&self.config))?;

        let docker = &self.config.docker_bin;
        let build = CommandSpec::new(docker.clone()).args([
            "build".to_string(),
            "--platform".to_string(),
            "linux/amd64".to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            "-t".to_string(),
            image.to_string(),
            context.display().to_string(),
        ]);
        self.run_build_step(&build, "docker build").await?;

        let push = CommandSpec::new(docker.clone()).args(["push".to_string(), image.to_string()]);
        self.run_build_step(&push, "docker push").await?;
        Ok(())
    }

    async fn build_remote(
        &self,
        image: &ImageReference,
        context: &Path,
    ) -> Result<Option<String>, DeployError> {
        let mut descriptors = DescriptorGuard::new();
        descriptors.write(
            context.join(DESCRIPTOR_FILE_NAME),
            &render_dockerfile(&self.config),
        )?;
        let build_config =
            std::env::temp_dir().join(format!("cjr-{}.cloudbuild.json", Uuid::now_v7()));
        descriptors.write(build_config.clone(), &render_build_config(image))?;

        let submit = self.gcloud.regional_command([
            "builds".to_string(),
            "submit".to_string(),
            context.display().to_string(),
            format!("--config={}", build_config.display()),
        ]);
        let output = self.run_build_step(&submit, "gcloud builds submit").await?;

        let logs_url = extract_build_logs_url(&output.combined());
        if let Some(ref url) = logs_url {
            println!("Build logs: {}", url);
        }
        Ok(logs_url)
    }

    async fn run_build_step(
        &self,
        cmd: &CommandSpec,
        step: &str,
    ) -> Result<CommandOutput, DeployError> {
        let output = self.runner.run(cmd).await.map_err(|e| DeployError::Build {
            message: format!("{} could not be started", step),
            output: e.to_string(),
        })?;
        if !output.is_success() {
            return Err(DeployError::Build {
                message: format!("{} exited with code {}", step, output.code_display()),
                output: filter_platform_noise(&output.combined()),
            });
        }
        Ok(output)
    }
}

fn default_start_command() -> Vec<String> {
    let argv: &[&str] = if cfg!(target_os = "macos") {
        &["open", "-a", "Docker"]
    } else if cfg!(windows) {
        &["powershell", "-Command", "Start-Process 'Docker Desktop'"]
    } else {
        &["systemctl", "start", "docker"]
    };
    argv.iter().map(|s| s.to_string()).collect()
}

/// Build descriptor for a job image.
pub fn render_dockerfile(config: &DeployConfig) -> String {
    let entrypoint =
        serde_json::to_string(&config.entrypoint).unwrap_or_else(|_| "[]".to_string());
    format!(
        "FROM {}\nWORKDIR /app\nCOPY . /app\nENTRYPOINT {}\n",
        config.base_image, entrypoint
    )
}

/// Remote build configuration: one docker build step, publishing `image`.
pub fn render_build_config(image: &ImageReference) -> String {
    let reference = image.to_string();
    json!({
        "steps": [{
            "name": "gcr.io/cloud-builders/docker",
            "args": [
                "build", "--platform", "linux/amd64",
                "-f", DESCRIPTOR_FILE_NAME,
                "-t", reference.clone(),
                "."
            ]
        }],
        "images": [reference]
    })
    .to_string()
}

/// Pull the URL out of a "Logs are available at [URL]." line.
pub fn extract_build_logs_url(output: &str) -> Option<String> {
    const MARKER: &str = "Logs are available at [";
    let start = output.find(MARKER)? + MARKER.len();
    let end = output[start..].find(']')?;
    Some(output[start..start + end].to_string())
}
