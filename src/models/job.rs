use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::config::{JobDefinition, SecretBinding};
use crate::models::ImageReference;

/// Desired declarative state of a remote job resource.
///
/// Resubmitted in full on every reconcile; the remote resource ends up
/// matching this value field for field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    /// Set once the image has been prepared.
    pub image: Option<ImageReference>,
    pub memory: String,
    pub cpu: String,
    pub timeout_seconds: u64,
    pub parallelism: u32,
    pub task_count: u32,
    pub max_retries: u32,
    pub env_vars: BTreeMap<String, String>,
    pub secret_refs: Vec<SecretBinding>,
    pub service_account: Option<String>,
}

impl JobSpec {
    /// A spec with default resources for `name`.
    pub fn new(name: &str) -> Self {
        Self::from_definition(name, &JobDefinition::default())
    }

    pub fn from_definition(name: &str, def: &JobDefinition) -> Self {
        Self {
            name: name.to_string(),
            image: None,
            memory: def.memory.clone(),
            cpu: def.cpu.clone(),
            timeout_seconds: def.timeout_secs,
            parallelism: def.parallelism,
            task_count: def.task_count,
            max_retries: def.max_retries,
            env_vars: def.env.clone(),
            secret_refs: def.secrets.clone(),
            service_account: def.service_account.clone(),
        }
    }

    pub fn with_image(mut self, image: ImageReference) -> Self {
        self.image = Some(image);
        self
    }

    /// Secrets rendered as `ENV=secret:latest` bindings, in declaration order.
    pub fn secret_bindings(&self) -> Vec<String> {
        self.secret_refs
            .iter()
            .map(|s| format!("{}={}:latest", s.env, s.secret))
            .collect()
    }
}
