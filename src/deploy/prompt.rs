use std::collections::VecDeque;
use std::io::{BufRead, IsTerminal, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::DeployError;

/// What to do when the local container engine is installed but not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonRecovery {
    StartDaemon,
    RemoteBuild,
    Cancel,
}

/// Source of operator decisions during a deploy.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Whether an operator is present to answer questions.
    fn is_interactive(&self) -> bool;

    async fn choose_daemon_recovery(&self) -> Result<DaemonRecovery, DeployError>;
}

/// Interpret one line of operator input. Empty input takes the default.
pub fn parse_choice(input: &str) -> Option<DaemonRecovery> {
    match input.trim().to_lowercase().as_str() {
        "1" | "s" | "start" => Some(DaemonRecovery::StartDaemon),
        "" | "2" | "r" | "remote" => Some(DaemonRecovery::RemoteBuild),
        "3" | "c" | "cancel" | "q" => Some(DaemonRecovery::Cancel),
        _ => None,
    }
}

/// Asks on the controlling terminal.
pub struct TerminalPrompt;

#[async_trait]
impl DecisionProvider for TerminalPrompt {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
    }

    async fn choose_daemon_recovery(&self) -> Result<DaemonRecovery, DeployError> {
        let choice = tokio::task::spawn_blocking(|| -> std::io::Result<DaemonRecovery> {
            let stdin = std::io::stdin();
            let mut stderr = std::io::stderr();
            loop {
                eprintln!("Docker is installed but the daemon is not running.");
                eprintln!("  [1] Start Docker and build locally");
                eprintln!("  [2] Build remotely with Cloud Build (default)");
                eprintln!("  [3] Cancel");
                eprint!("Choose [1-3]: ");
                stderr.flush()?;

                let mut input = String::new();
                if stdin.lock().read_line(&mut input)? == 0 {
                    return Ok(DaemonRecovery::Cancel);
                }
                match parse_choice(&input) {
                    Some(choice) => return Ok(choice),
                    None => eprintln!("Invalid choice: {}", input.trim()),
                }
            }
        })
        .await
        .map_err(|e| DeployError::Setup(format!("Prompt task failed: {}", e)))??;
        Ok(choice)
    }
}

/// Pre-recorded answers for tests and unattended runs.
pub struct ScriptedDecisions {
    interactive: bool,
    choices: Mutex<VecDeque<DaemonRecovery>>,
    asked: AtomicUsize,
}

impl ScriptedDecisions {
    /// No operator present; every question is skipped.
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            choices: Mutex::new(VecDeque::new()),
            asked: AtomicUsize::new(0),
        }
    }

    /// An operator that answers with `choices` in order.
    pub fn answering(choices: &[DaemonRecovery]) -> Self {
        Self {
            interactive: true,
            choices: Mutex::new(choices.iter().copied().collect()),
            asked: AtomicUsize::new(0),
        }
    }

    /// How many questions were put to the operator.
    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionProvider for ScriptedDecisions {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    async fn choose_daemon_recovery(&self) -> Result<DaemonRecovery, DeployError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .choices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(DaemonRecovery::Cancel))
    }
}
