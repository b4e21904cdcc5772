// Runner module
// Launches an execution and follows it to a terminal state while tailing logs.

pub mod interrupt;
pub mod launcher;
pub mod log_stream;
pub mod poller;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::errors::{DeployError, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_SUCCESS};
use crate::models::{DeployConfig, Execution};

pub use interrupt::{CtrlC, InterruptGuard, InterruptSource, ManualInterrupt};
pub use launcher::{ExecutionLauncher, JobExecuteLauncher, LaunchOptions, LaunchedExecution};
pub use log_stream::{
    execution_filter, ConsoleSink, GcloudLogTail, LogSink, LogStreamer, LogTailSource,
    MemorySink, MockConnection, MockLogTail, StopOutcome, StreamSettings,
};
pub use poller::{
    ExecutionPoller, ExecutionStatusSource, GcloudExecutionStatus, MockStatus, MockStatusSource,
    PollEvent, PollOutcome, PollSettings, TaskReport,
};

/// How an execute call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// Launched without waiting.
    Detached {
        execution: Execution,
        console_url: String,
    },
    Finished {
        succeeded: bool,
        report: TaskReport,
        elapsed: Duration,
        console_url: String,
    },
    /// The user stopped watching; the remote execution keeps running.
    Interrupted {
        execution: Execution,
        console_url: String,
    },
}

impl WatchOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            WatchOutcome::Detached { .. } => EXIT_SUCCESS,
            WatchOutcome::Finished { succeeded: true, .. } => EXIT_SUCCESS,
            WatchOutcome::Finished { .. } => EXIT_FAILURE,
            WatchOutcome::Interrupted { .. } => EXIT_INTERRUPTED,
        }
    }

    /// Human-readable summary printed once the run is over.
    pub fn summary_lines(&self) -> Vec<String> {
        match self {
            WatchOutcome::Detached {
                execution,
                console_url,
            } => vec![
                format!("Execution {} started; not waiting for completion.", execution.short_name),
                format!("Follow it at: {}", console_url),
            ],
            WatchOutcome::Interrupted {
                execution,
                console_url,
            } => vec![
                format!(
                    "Stopped watching. Execution {} was NOT cancelled and continues running remotely.",
                    execution.short_name
                ),
                format!("Follow it at: {}", console_url),
            ],
            WatchOutcome::Finished {
                succeeded,
                report,
                elapsed,
                console_url,
            } => {
                let mut lines = Vec::new();
                if *succeeded {
                    lines.push(format!("Execution {} succeeded.", report.execution.short_name));
                } else {
                    lines.push(format!("Execution {} failed.", report.execution.short_name));
                    if let Some(message) = report.message() {
                        lines.push(format!("  {}", message));
                    }
                }
                if let Some(d) = report.time_to_running().and_then(|d| d.to_std().ok()) {
                    lines.push(format!("  Time to running: {}", format_duration(d)));
                }
                if let Some(d) = report.task_duration().and_then(|d| d.to_std().ok()) {
                    lines.push(format!("  Task duration:   {}", format_duration(d)));
                }
                lines.push(format!("  Total elapsed:   {}", format_duration(*elapsed)));
                if !succeeded {
                    lines.push(format!("  Details: {}", console_url));
                }
                lines
            }
        }
    }
}

/// `1h 02m 03s`, `1m 05s`, `12s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Collaborators for launching and following executions.
pub struct ExecutionRunner {
    launcher: Arc<dyn ExecutionLauncher>,
    status: Arc<dyn ExecutionStatusSource>,
    logs: Arc<dyn LogTailSource>,
    sink: Arc<dyn LogSink>,
    interrupts: Arc<dyn InterruptSource>,
    poll: PollSettings,
    stream: StreamSettings,
    drain: Duration,
}

impl ExecutionRunner {
    pub fn new(
        launcher: Arc<dyn ExecutionLauncher>,
        status: Arc<dyn ExecutionStatusSource>,
        logs: Arc<dyn LogTailSource>,
        sink: Arc<dyn LogSink>,
        interrupts: Arc<dyn InterruptSource>,
        config: &DeployConfig,
    ) -> Self {
        Self {
            launcher,
            status,
            logs,
            sink,
            interrupts,
            poll: PollSettings::from_config(config),
            stream: StreamSettings::from_config(config),
            drain: config.log_drain(),
        }
    }

    /// Launch `job_name` with `argv` and, unless told not to wait, follow the
    /// execution until it finishes or the user interrupts.
    pub async fn execute_and_wait(
        &self,
        job_name: &str,
        argv: &[String],
        options: &LaunchOptions,
    ) -> Result<WatchOutcome, DeployError> {
        let started = tokio::time::Instant::now();
        let LaunchedExecution {
            execution,
            console_url,
        } = self.launcher.launch(job_name, argv, options).await?;
        println!("Started execution {}", execution.short_name);
        println!("Logs: {}", console_url);

        if !options.wait_for_completion {
            return Ok(WatchOutcome::Detached {
                execution,
                console_url,
            });
        }

        let mut guard = self.interrupts.install();
        let mut streamer = LogStreamer::new(
            Arc::clone(&self.logs),
            Arc::clone(&self.sink),
            execution_filter(job_name, &execution.short_name),
            self.stream,
        );
        streamer.start();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let poller =
            ExecutionPoller::new(Arc::clone(&self.status), self.poll).with_events(event_tx);
        let name = execution.short_name.clone();
        let mut poll_task = tokio::spawn(async move { poller.run(&name, cancel_rx).await });

        let joined = loop {
            tokio::select! {
                _ = guard.interrupted() => {
                    let _ = cancel_tx.send(true);
                    poll_task.abort();
                    streamer.stop().await;
                    tracing::info!("Interrupted while watching {}", execution.full_name);
                    return Ok(WatchOutcome::Interrupted { execution, console_url });
                }
                Some(event) = event_rx.recv() => report_event(&event),
                joined = &mut poll_task => break joined,
            }
        };
        while let Ok(event) = event_rx.try_recv() {
            report_event(&event);
        }

        let polled = joined
            .map_err(|e| DeployError::Poller(e.to_string()))
            .and_then(|result| result);
        let report = match polled {
            Ok(PollOutcome::Succeeded(report)) => (true, report),
            Ok(PollOutcome::Failed(report)) => (false, report),
            Ok(PollOutcome::Cancelled) => {
                streamer.stop().await;
                return Ok(WatchOutcome::Interrupted {
                    execution,
                    console_url,
                });
            }
            Err(e) => {
                streamer.stop().await;
                return Err(e);
            }
        };

        // Let trailing log lines arrive before closing the tail.
        tokio::select! {
            _ = tokio::time::sleep(self.drain) => {}
            _ = guard.interrupted() => {}
        }
        streamer.stop().await;

        let (succeeded, report) = report;
        Ok(WatchOutcome::Finished {
            succeeded,
            report,
            elapsed: started.elapsed(),
            console_url,
        })
    }
}

fn report_event(event: &PollEvent) {
    match event {
        PollEvent::ContainerStarting => println!("Waiting for container to start..."),
        PollEvent::Running { .. } => println!("Execution is running."),
        PollEvent::TransportWarning { attempt, error } => {
            eprintln!("Warning: status check failed (attempt {}): {}", attempt, error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn execution() -> Execution {
        Execution::parse(
            r#"{"metadata": {"name": "export-users-x7k2p"}, "status": {
                "startTime": "2026-03-01T10:00:00Z",
                "completionTime": "2026-03-01T10:01:05Z",
                "succeededCount": 0,
                "conditions": [{"type": "Completed", "status": "False",
                                "message": "Task failed with exit code 2"}]}}"#,
        )
        .expect("fixture")
    }

    struct PanickingStatus;

    #[async_trait::async_trait]
    impl ExecutionStatusSource for PanickingStatus {
        async fn describe(&self, _execution_name: &str) -> anyhow::Result<Option<Execution>> {
            panic!("status source blew up");
        }
    }

    #[tokio::test]
    async fn test_poll_task_panic_is_poller_error() {
        let commands = crate::process::MockCommandRunner::new().ok(
            &["gcloud", "run", "jobs", "execute"],
            r#"{"metadata": {"name": "export-users-x7k2p"}}"#,
        );
        let gcloud = crate::platform::Gcloud {
            bin: "gcloud".to_string(),
            project: "acme".to_string(),
            region: "us-central1".to_string(),
        };
        let interrupt = ManualInterrupt::new();
        let runner = ExecutionRunner::new(
            Arc::new(JobExecuteLauncher::new(Arc::new(commands), gcloud, "JOB_ARGS")),
            Arc::new(PanickingStatus),
            Arc::new(MockLogTail::new(vec![MockConnection::live(vec![])])),
            Arc::new(MemorySink::new()),
            Arc::new(interrupt.clone()),
            &DeployConfig::default(),
        );
        let options = LaunchOptions {
            task_count: None,
            wait_for_completion: true,
        };

        let err = runner
            .execute_and_wait("export-users", &[], &options)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Poller(_)), "Got: {:?}", err);
        assert_eq!(err.exit_code(), 1);
        assert_eq!(interrupt.active_guards(), 0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(12)), "12s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03s");
        assert_eq!(format_duration(Duration::from_millis(900)), "0s");
    }

    #[test]
    fn test_exit_codes() {
        let detached = WatchOutcome::Detached {
            execution: execution(),
            console_url: String::new(),
        };
        let interrupted = WatchOutcome::Interrupted {
            execution: execution(),
            console_url: String::new(),
        };
        assert_eq!(detached.exit_code(), 0);
        assert_eq!(interrupted.exit_code(), 130);
    }

    #[test]
    fn test_failed_summary_includes_message_and_durations() {
        let started = Utc::now();
        let outcome = WatchOutcome::Finished {
            succeeded: false,
            report: TaskReport {
                execution: execution(),
                poll_started_at: started,
                running_observed_at: Some(started + chrono::Duration::seconds(7)),
            },
            elapsed: Duration::from_secs(80),
            console_url: "https://console/x".to_string(),
        };
        assert_eq!(outcome.exit_code(), 1);

        let text = outcome.summary_lines().join("\n");
        assert!(text.contains("failed"));
        assert!(text.contains("Task failed with exit code 2"));
        assert!(text.contains("Time to running: 7s"));
        assert!(text.contains("Task duration:   1m 05s"));
        assert!(text.contains("Total elapsed:   1m 20s"));
        assert!(text.contains("https://console/x"));
    }

    #[test]
    fn test_interrupted_summary_says_not_cancelled() {
        let outcome = WatchOutcome::Interrupted {
            execution: execution(),
            console_url: "https://console/x".to_string(),
        };
        let text = outcome.summary_lines().join("\n");
        assert!(text.contains("NOT cancelled"));
        assert!(text.contains("https://console/x"));
    }
}
