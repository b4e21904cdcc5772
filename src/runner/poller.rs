use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use crate::errors::DeployError;
use crate::models::{DeployConfig, Execution, ExecutionOutcome};
use crate::platform::{filter_platform_noise, Gcloud};
use crate::process::CommandRunner;

/// Reads the current state of one execution.
#[async_trait]
pub trait ExecutionStatusSource: Send + Sync {
    /// `Ok(None)` means the response was empty or unparseable.
    async fn describe(&self, execution_name: &str) -> anyhow::Result<Option<Execution>>;
}

pub struct GcloudExecutionStatus {
    runner: Arc<dyn CommandRunner>,
    gcloud: Gcloud,
}

impl GcloudExecutionStatus {
    pub fn new(runner: Arc<dyn CommandRunner>, gcloud: Gcloud) -> Self {
        Self { runner, gcloud }
    }
}

#[async_trait]
impl ExecutionStatusSource for GcloudExecutionStatus {
    async fn describe(&self, execution_name: &str) -> anyhow::Result<Option<Execution>> {
        let cmd = self.gcloud.regional_command([
            "run",
            "jobs",
            "executions",
            "describe",
            execution_name,
            "--format=json",
        ]);
        let output = self.runner.run(&cmd).await?;
        if !output.is_success() {
            anyhow::bail!(
                "describe exited with code {}: {}",
                output.code_display(),
                filter_platform_noise(&output.combined())
            );
        }
        Ok(Execution::parse(&output.stdout))
    }
}

/// Progress notices emitted while polling.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    ContainerStarting,
    Running { observed_at: DateTime<Utc> },
    TransportWarning { attempt: u32, error: String },
}

/// Everything needed to report on a finished execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub execution: Execution,
    pub poll_started_at: DateTime<Utc>,
    /// Local time the first poll with a start time was seen.
    pub running_observed_at: Option<DateTime<Utc>>,
}

impl TaskReport {
    pub fn time_to_running(&self) -> Option<chrono::Duration> {
        self.running_observed_at.map(|t| t - self.poll_started_at)
    }

    pub fn task_duration(&self) -> Option<chrono::Duration> {
        self.execution.task_duration()
    }

    pub fn message(&self) -> Option<&str> {
        self.execution.completion_message()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded(TaskReport),
    Failed(TaskReport),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_errors: u32,
    pub warning_limit: u32,
}

impl PollSettings {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_errors: config.max_poll_errors,
            warning_limit: config.poll_warning_limit,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&DeployConfig::default())
    }
}

/// State for one poll loop.
#[derive(Debug, Default)]
struct PollState {
    has_started: bool,
    has_reported_starting: bool,
    consecutive_errors: u32,
    running_observed_at: Option<DateTime<Utc>>,
}

/// Polls an execution until it reaches a terminal state.
pub struct ExecutionPoller {
    source: Arc<dyn ExecutionStatusSource>,
    settings: PollSettings,
    events: Option<mpsc::UnboundedSender<PollEvent>>,
}

impl ExecutionPoller {
    pub fn new(source: Arc<dyn ExecutionStatusSource>, settings: PollSettings) -> Self {
        Self {
            source,
            settings,
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<PollEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Poll until Succeeded, Failed or cancelled.
    ///
    /// The cancel flag is checked before every poll; once it is set no further
    /// status request is made. Only `max_errors` consecutive transport failures
    /// end the loop with an error.
    pub async fn run(
        &self,
        execution_name: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PollOutcome, DeployError> {
        let poll_started_at = Utc::now();
        let mut state = PollState::default();

        loop {
            if *cancel.borrow() {
                return Ok(PollOutcome::Cancelled);
            }

            match self.source.describe(execution_name).await {
                Ok(Some(execution)) => {
                    state.consecutive_errors = 0;
                    if let Some(outcome) = self.observe(&mut state, execution, poll_started_at) {
                        return Ok(outcome);
                    }
                }
                Ok(None) => {
                    tracing::debug!("Empty status for {}, polling again", execution_name);
                }
                Err(e) => {
                    state.consecutive_errors += 1;
                    let attempt = state.consecutive_errors;
                    if attempt >= self.settings.max_errors {
                        return Err(DeployError::PollTransport {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    if attempt <= self.settings.warning_limit {
                        tracing::warn!("Status poll failed (attempt {}): {}", attempt, e);
                        self.emit(PollEvent::TransportWarning {
                            attempt,
                            error: e.to_string(),
                        });
                    } else {
                        tracing::debug!("Status poll failed (attempt {}): {}", attempt, e);
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Ok(PollOutcome::Cancelled);
                    }
                }
            }
        }
    }

    fn observe(
        &self,
        state: &mut PollState,
        execution: Execution,
        poll_started_at: DateTime<Utc>,
    ) -> Option<PollOutcome> {
        if !state.has_started {
            if execution.start_time.is_some() {
                state.has_started = true;
                let observed_at = Utc::now();
                state.running_observed_at = Some(observed_at);
                self.emit(PollEvent::Running { observed_at });
            } else if !state.has_reported_starting {
                state.has_reported_starting = true;
                self.emit(PollEvent::ContainerStarting);
            }
        }

        let outcome = execution.outcome()?;
        let report = TaskReport {
            execution,
            poll_started_at,
            running_observed_at: state.running_observed_at,
        };
        Some(match outcome {
            ExecutionOutcome::Succeeded => PollOutcome::Succeeded(report),
            ExecutionOutcome::Failed => PollOutcome::Failed(report),
        })
    }

    fn emit(&self, event: PollEvent) {
        if let Some(ref events) = self.events {
            let _ = events.send(event);
        }
    }
}

// --- Scripted status source for testing ---

/// One scripted poll response.
#[derive(Debug, Clone)]
pub enum MockStatus {
    Execution(Execution),
    Empty,
    Error(String),
}

/// Plays back scripted poll responses; the last one repeats.
pub struct MockStatusSource {
    responses: std::sync::Mutex<std::collections::VecDeque<MockStatus>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockStatusSource {
    pub fn new(responses: Vec<MockStatus>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Number of `describe` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionStatusSource for MockStatusSource {
    async fn describe(&self, _execution_name: &str) -> anyhow::Result<Option<Execution>> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = {
            let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
            if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            }
        };
        match next {
            Some(MockStatus::Execution(execution)) => Ok(Some(execution)),
            Some(MockStatus::Empty) | None => Ok(None),
            Some(MockStatus::Error(message)) => Err(anyhow::anyhow!(message)),
        }
    }
}
