pub mod config;
pub mod execution;
pub mod image;
pub mod job;
pub mod log_entry;

pub use config::{DeployConfig, JobDefinition, SecretBinding};
pub use execution::{Condition, ConditionState, Execution, ExecutionOutcome};
pub use image::{ImageReference, ImageTag, TAG_LEN};
pub use job::JobSpec;
pub use log_entry::LogEntry;
