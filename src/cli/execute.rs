// CLI execution commands: execute, status

use std::sync::Arc;

use super::Session;
use crate::runner::{
    ConsoleSink, CtrlC, ExecutionRunner, ExecutionStatusSource, GcloudExecutionStatus,
    GcloudLogTail, JobExecuteLauncher, LaunchOptions,
};

/// cjr execute
pub async fn cmd_execute(
    session: &Session,
    job: &str,
    args: &[String],
    wait: bool,
    tasks: Option<u32>,
) -> anyhow::Result<i32> {
    let runner = ExecutionRunner::new(
        Arc::new(JobExecuteLauncher::new(
            Arc::clone(&session.runner),
            session.gcloud.clone(),
            &session.config.args_env_var,
        )),
        Arc::new(GcloudExecutionStatus::new(
            Arc::clone(&session.runner),
            session.gcloud.clone(),
        )),
        Arc::new(GcloudLogTail::new(session.gcloud.clone())),
        Arc::new(ConsoleSink),
        Arc::new(CtrlC),
        &session.config,
    );
    let options = LaunchOptions {
        task_count: tasks,
        wait_for_completion: wait,
    };

    let outcome = runner.execute_and_wait(job, args, &options).await?;
    println!();
    for line in outcome.summary_lines() {
        println!("{}", line);
    }
    Ok(outcome.exit_code())
}

/// cjr status
pub async fn cmd_status(session: &Session, execution: &str, json: bool) -> anyhow::Result<i32> {
    let source = GcloudExecutionStatus::new(Arc::clone(&session.runner), session.gcloud.clone());
    let Some(exec) = source.describe(execution).await? else {
        anyhow::bail!("No status returned for execution '{}'", execution);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&exec)?);
        return Ok(crate::errors::EXIT_SUCCESS);
    }

    let state = match exec.outcome() {
        Some(crate::models::ExecutionOutcome::Succeeded) => "Succeeded",
        Some(crate::models::ExecutionOutcome::Failed) => "Failed",
        None if exec.start_time.is_some() => "Running",
        None => "Pending",
    };
    println!("Execution: {}", exec.full_name);
    println!("State:     {}", state);
    if let Some(start) = exec.start_time {
        println!("Started:   {}", start.to_rfc3339());
    }
    if let Some(end) = exec.completion_time {
        println!("Completed: {}", end.to_rfc3339());
    }
    println!(
        "Tasks:     {} succeeded, {} failed",
        exec.succeeded_count, exec.failed_count
    );
    if let Some(message) = exec.completion_message() {
        println!("Message:   {}", message);
    }
    println!(
        "Logs:      {}",
        exec.log_uri
            .clone()
            .unwrap_or_else(|| session.gcloud.console_url(&exec.short_name))
    );
    Ok(crate::errors::EXIT_SUCCESS)
}
