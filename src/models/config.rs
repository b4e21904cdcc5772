use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Top-level configuration for deploying and executing jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_repository")]
    pub repository: String,
    /// Registry host; defaults to `{region}-docker.pkg.dev`.
    #[serde(default)]
    pub registry_host: Option<String>,
    #[serde(default)]
    pub local_build: bool,
    #[serde(default = "default_base_image")]
    pub base_image: String,
    #[serde(default = "default_entrypoint")]
    pub entrypoint: Vec<String>,
    #[serde(default = "default_args_env_var")]
    pub args_env_var: String,
    #[serde(default = "default_gcloud_bin")]
    pub gcloud_bin: String,
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    /// Command used to start the container engine daemon; platform default if unset.
    #[serde(default)]
    pub docker_start_command: Option<Vec<String>>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,
    #[serde(default = "default_poll_warning_limit")]
    pub poll_warning_limit: u32,
    #[serde(default = "default_daemon_wait_timeout_secs")]
    pub daemon_wait_timeout_secs: u64,
    #[serde(default = "default_daemon_poll_interval_secs")]
    pub daemon_poll_interval_secs: u64,
    #[serde(default = "default_log_drain_secs")]
    pub log_drain_secs: u64,
    #[serde(default = "default_log_stop_timeout_secs")]
    pub log_stop_timeout_secs: u64,
    #[serde(default = "default_log_reconnect_delay_ms")]
    pub log_reconnect_delay_ms: u64,
    #[serde(default = "default_log_max_reconnect_attempts")]
    pub log_max_reconnect_attempts: u32,
    #[serde(default)]
    pub default_service_account: Option<String>,
    #[serde(default)]
    pub jobs: BTreeMap<String, JobDefinition>,
}

/// Per-job settings as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDefinition {
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_cpu")]
    pub cpu: String,
    #[serde(default = "default_job_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    #[serde(default = "default_task_count")]
    pub task_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Env var name → secret name, in declaration order.
    #[serde(default)]
    pub secrets: Vec<SecretBinding>,
    #[serde(default)]
    pub service_account: Option<String>,
    /// Build context directory used when `--context` is not given.
    #[serde(default)]
    pub context: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretBinding {
    pub env: String,
    pub secret: String,
}

fn default_region() -> String {
    "us-central1".to_string()
}

fn default_repository() -> String {
    "jobs".to_string()
}

fn default_base_image() -> String {
    "debian:bookworm-slim".to_string()
}

fn default_entrypoint() -> Vec<String> {
    vec!["/app/run".to_string()]
}

fn default_args_env_var() -> String {
    "JOB_ARGS".to_string()
}

fn default_gcloud_bin() -> String {
    "gcloud".to_string()
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_poll_errors() -> u32 {
    10
}

fn default_poll_warning_limit() -> u32 {
    3
}

fn default_daemon_wait_timeout_secs() -> u64 {
    30
}

fn default_daemon_poll_interval_secs() -> u64 {
    2
}

fn default_log_drain_secs() -> u64 {
    3
}

fn default_log_stop_timeout_secs() -> u64 {
    3
}

fn default_log_reconnect_delay_ms() -> u64 {
    1000
}

fn default_log_max_reconnect_attempts() -> u32 {
    5
}

fn default_memory() -> String {
    "512Mi".to_string()
}

fn default_cpu() -> String {
    "1".to_string()
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_parallelism() -> u32 {
    1
}

fn default_task_count() -> u32 {
    1
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            region: default_region(),
            repository: default_repository(),
            registry_host: None,
            local_build: false,
            base_image: default_base_image(),
            entrypoint: default_entrypoint(),
            args_env_var: default_args_env_var(),
            gcloud_bin: default_gcloud_bin(),
            docker_bin: default_docker_bin(),
            docker_start_command: None,
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_errors: default_max_poll_errors(),
            poll_warning_limit: default_poll_warning_limit(),
            daemon_wait_timeout_secs: default_daemon_wait_timeout_secs(),
            daemon_poll_interval_secs: default_daemon_poll_interval_secs(),
            log_drain_secs: default_log_drain_secs(),
            log_stop_timeout_secs: default_log_stop_timeout_secs(),
            log_reconnect_delay_ms: default_log_reconnect_delay_ms(),
            log_max_reconnect_attempts: default_log_max_reconnect_attempts(),
            default_service_account: None,
            jobs: BTreeMap::new(),
        }
    }
}

impl Default for JobDefinition {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpu: default_cpu(),
            timeout_secs: default_job_timeout_secs(),
            parallelism: default_parallelism(),
            task_count: default_task_count(),
            max_retries: 0,
            env: BTreeMap::new(),
            secrets: Vec::new(),
            service_account: None,
            context: None,
        }
    }
}

impl DeployConfig {
    pub fn registry_host(&self) -> String {
        self.registry_host
            .clone()
            .unwrap_or_else(|| format!("{}-docker.pkg.dev", self.region))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn daemon_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon_wait_timeout_secs)
    }

    pub fn daemon_poll_interval(&self) -> Duration {
        Duration::from_secs(self.daemon_poll_interval_secs)
    }

    pub fn log_drain(&self) -> Duration {
        Duration::from_secs(self.log_drain_secs)
    }

    pub fn log_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.log_stop_timeout_secs)
    }

    pub fn log_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.log_reconnect_delay_ms)
    }

    /// Reject values that would turn a bounded wait into a busy loop.
    pub fn validate(&self) -> Result<(), DeployError> {
        let positive = [
            ("poll_interval_secs", self.poll_interval_secs),
            ("daemon_wait_timeout_secs", self.daemon_wait_timeout_secs),
            ("daemon_poll_interval_secs", self.daemon_poll_interval_secs),
            ("log_stop_timeout_secs", self.log_stop_timeout_secs),
            ("log_reconnect_delay_ms", self.log_reconnect_delay_ms),
            ("max_poll_errors", u64::from(self.max_poll_errors)),
            ("log_max_reconnect_attempts", u64::from(self.log_max_reconnect_attempts)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(DeployError::Config(format!("{} must be greater than zero", field)));
            }
        }
        Ok(())
    }

    /// Settings for `name`, falling back to defaults for unknown jobs.
    pub fn job(&self, name: &str) -> JobDefinition {
        self.jobs.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(DeployConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let config = DeployConfig {
            daemon_poll_interval_secs: 0,
            ..Default::default()
        };
        match config.validate().unwrap_err() {
            DeployError::Config(msg) => assert!(msg.contains("daemon_poll_interval_secs")),
            other => panic!("Expected Config, got: {:?}", other),
        }

        let config = DeployConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DeployError::Config(_))));
    }

    #[test]
    fn test_deploy_config_defaults() {
        let config = DeployConfig::default();
        assert!(config.project_id.is_none());
        assert_eq!(config.region, "us-central1");
        assert_eq!(config.repository, "jobs");
        assert!(!config.local_build);
        assert_eq!(config.args_env_var, "JOB_ARGS");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_poll_errors, 10);
        assert_eq!(config.poll_warning_limit, 3);
        assert_eq!(config.daemon_wait_timeout_secs, 30);
        assert_eq!(config.daemon_poll_interval_secs, 2);
        assert_eq!(config.log_drain_secs, 3);
        assert_eq!(config.log_stop_timeout_secs, 3);
        assert_eq!(config.log_reconnect_delay_ms, 1000);
        assert_eq!(config.log_max_reconnect_attempts, 5);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn test_partial_deserialization_empty() {
        let config: DeployConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(config.region, "us-central1");
        assert_eq!(config.gcloud_bin, "gcloud");
        assert_eq!(config.docker_bin, "docker");
        assert_eq!(config.entrypoint, vec!["/app/run".to_string()]);
    }

    #[test]
    fn test_partial_deserialization_some_fields() {
        let json = r#"{"region": "europe-west1", "local_build": true, "poll_interval_secs": 1}"#;
        let config: DeployConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.region, "europe-west1");
        assert!(config.local_build);
        assert_eq!(config.poll_interval_secs, 1);
        assert_eq!(config.repository, "jobs"); // default
    }

    #[test]
    fn test_registry_host_defaults_to_region() {
        let config = DeployConfig {
            region: "asia-east1".to_string(),
            ..Default::default()
        };
        assert_eq!(config.registry_host(), "asia-east1-docker.pkg.dev");

        let config = DeployConfig {
            registry_host: Some("registry.example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(config.registry_host(), "registry.example.com");
    }

    #[test]
    fn test_job_definitions_deserialize() {
        let json = r#"{
            "jobs": {
                "export-users": {
                    "memory": "1Gi",
                    "env": {"MODE": "full"},
                    "secrets": [{"env": "DB_PASSWORD", "secret": "db-password"}]
                }
            }
        }"#;
        let config: DeployConfig = serde_json::from_str(json).expect("deserialize");
        let job = config.job("export-users");
        assert_eq!(job.memory, "1Gi");
        assert_eq!(job.cpu, "1");
        assert_eq!(job.parallelism, 1);
        assert_eq!(job.env.get("MODE").map(String::as_str), Some("full"));
        assert_eq!(job.secrets[0].secret, "db-password");
    }

    #[test]
    fn test_unknown_job_uses_defaults() {
        let config = DeployConfig::default();
        assert_eq!(config.job("nope"), JobDefinition::default());
    }
}
