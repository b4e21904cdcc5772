pub mod deploy;
pub mod execute;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::models::DeployConfig;
use crate::platform::{resolve_project, Gcloud};
use crate::process::{CommandRunner, ProcessRunner};

/// Cloud Job Runner - build, deploy and run container jobs
#[derive(Parser, Debug)]
#[command(
    name = "cjr",
    version,
    about = "Cloud Job Runner - build, deploy and run container jobs"
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Project to deploy into (overrides config)
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Region to deploy into (overrides config)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the content tag of a build context
    Hash {
        /// Build context directory
        context: PathBuf,
    },

    /// Build the job image if needed and create or update the job
    Deploy {
        /// Job name
        job: String,

        /// Build context directory (defaults to the job's configured context, then .)
        #[arg(long)]
        context: Option<PathBuf>,

        /// Build with the local container engine
        #[arg(long)]
        local: bool,
    },

    /// Start an execution of a deployed job and follow it
    Execute {
        /// Job name
        job: String,

        /// Return as soon as the execution has started
        #[arg(long = "no-wait")]
        no_wait: bool,

        /// Override the number of tasks for this execution
        #[arg(long)]
        tasks: Option<u32>,

        /// Arguments passed to the job
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Deploy, then execute
    Run {
        /// Job name
        job: String,

        /// Build context directory (defaults to the job's configured context, then .)
        #[arg(long)]
        context: Option<PathBuf>,

        /// Build with the local container engine
        #[arg(long)]
        local: bool,

        /// Return as soon as the execution has started
        #[arg(long = "no-wait")]
        no_wait: bool,

        /// Override the number of tasks for this execution
        #[arg(long)]
        tasks: Option<u32>,

        /// Arguments passed to the job
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Show the state of one execution
    Status {
        /// Execution name
        execution: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Resolved configuration plus the collaborators every command needs.
pub struct Session {
    pub config: Arc<DeployConfig>,
    pub runner: Arc<dyn CommandRunner>,
    pub gcloud: Gcloud,
}

impl Session {
    /// Load config, apply flag overrides and settle the project.
    pub async fn open(cli: &Cli, local: bool) -> anyhow::Result<Self> {
        let mut config = load_config(cli.config.as_deref())?;
        apply_overrides(&mut config, cli, local);

        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let project = resolve_project(runner.as_ref(), &config).await?;
        tracing::debug!("Using project {} in {}", project, config.region);
        let gcloud = Gcloud::new(&config, &project);

        Ok(Self {
            config: Arc::new(config),
            runner,
            gcloud,
        })
    }
}

/// Load configuration from the first source that exists.
///
/// Order: explicit path, `CJR_CONFIG_DIR/config.json`, the platform config
/// dir, `./cjr.json`, then built-in defaults.
pub fn load_config(config_path: Option<&Path>) -> anyhow::Result<DeployConfig> {
    // 1. Explicit config path
    if let Some(path) = config_path {
        if path.exists() {
            return read_config(path);
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    // 2. CJR_CONFIG_DIR env var
    if let Ok(config_dir) = std::env::var("CJR_CONFIG_DIR") {
        let path = PathBuf::from(&config_dir).join("config.json");
        if path.exists() {
            return read_config(&path);
        }
    }

    // 3. Platform config dir
    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("cloud-job-runner").join("config.json");
        if path.exists() {
            return read_config(&path);
        }
    }

    // 4. Project-local file
    let path = PathBuf::from("cjr.json");
    if path.exists() {
        return read_config(&path);
    }

    tracing::info!("No config file found, using defaults");
    Ok(DeployConfig::default())
}

fn read_config(path: &Path) -> anyhow::Result<DeployConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: DeployConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config.validate()?;
    tracing::info!("Loaded config from: {}", path.display());
    Ok(config)
}

/// Command-line flags win over file values.
pub fn apply_overrides(config: &mut DeployConfig, cli: &Cli, local: bool) {
    if let Some(ref project) = cli.project {
        config.project_id = Some(project.clone());
    }
    if let Some(ref region) = cli.region {
        config.region = region.clone();
    }
    if local {
        config.local_build = true;
    }
}

/// Build context for `job`: flag, then the job's configured context, then `.`.
pub fn resolve_context(config: &DeployConfig, job: &str, flag: Option<&Path>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| config.job(job).context)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Dispatch the CLI command; returns the process exit code.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Some(Commands::Hash { context }) => deploy::cmd_hash(context),
        Some(Commands::Deploy {
            job,
            context,
            local,
        }) => {
            let session = Session::open(cli, *local).await?;
            deploy::cmd_deploy(&session, job, context.as_deref()).await?;
            Ok(crate::errors::EXIT_SUCCESS)
        }
        Some(Commands::Execute {
            job,
            no_wait,
            tasks,
            args,
        }) => {
            let session = Session::open(cli, false).await?;
            execute::cmd_execute(&session, job, args, !*no_wait, *tasks).await
        }
        Some(Commands::Run {
            job,
            context,
            local,
            no_wait,
            tasks,
            args,
        }) => {
            let session = Session::open(cli, *local).await?;
            deploy::cmd_deploy(&session, job, context.as_deref()).await?;
            execute::cmd_execute(&session, job, args, !*no_wait, *tasks).await
        }
        Some(Commands::Status { execution, json }) => {
            let session = Session::open(cli, false).await?;
            execute::cmd_status(&session, execution, *json).await
        }
        None => {
            // No subcommand provided -- print help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(crate::errors::EXIT_SUCCESS)
        }
    }
}
