// Process module
// Subprocess abstraction with a real tokio-backed runner and a scripted mock.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

/// A fully-specified external command: program, arguments, working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: &str) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: &str) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout and stderr joined, for surfacing to the user on failure.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }

    pub fn code_display(&self) -> String {
        match self.code {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        }
    }
}

/// Trait for running external commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cmd: &CommandSpec) -> io::Result<CommandOutput>;
}

// --- Real implementation using tokio::process ---

/// Runs commands as real child processes with piped stdout/stderr.
///
/// Children are spawned with `kill_on_drop` so a cancelled future never leaves
/// a stray process behind.
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: &CommandSpec) -> io::Result<CommandOutput> {
        tracing::debug!("Running: {}", cmd);

        let mut command = tokio::process::Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = cmd.cwd {
            command.current_dir(dir);
        }

        let output = command.output().await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// --- Mock implementation for testing ---

/// A scripted response for the mock runner.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Output(CommandOutput),
    /// The program could not be started at all (e.g. not installed).
    SpawnError(String),
}

struct MockRule {
    prefix: Vec<String>,
    responses: VecDeque<MockResponse>,
}

/// Mock command runner for testing.
///
/// Rules match on an argv prefix; the longest matching prefix wins. A rule
/// with several responses plays them in order and then keeps repeating the
/// last one. Every invocation is recorded.
#[derive(Clone, Default)]
pub struct MockCommandRunner {
    rules: Arc<Mutex<Vec<MockRule>>>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for commands starting with `prefix`.
    pub fn on(self, prefix: &[&str], response: MockResponse) -> Self {
        self.push_rule(prefix, response);
        self
    }

    /// Queue a successful response with the given stdout.
    pub fn ok(self, prefix: &[&str], stdout: &str) -> Self {
        self.on(prefix, MockResponse::Output(CommandOutput::success(stdout)))
    }

    /// Queue a failing response with the given exit code and stderr.
    pub fn fail(self, prefix: &[&str], code: i32, stderr: &str) -> Self {
        self.on(
            prefix,
            MockResponse::Output(CommandOutput::failure(code, stderr)),
        )
    }

    /// Queue a response on a shared runner (for tests that mutate mid-run).
    pub fn push_rule(&self, prefix: &[&str], response: MockResponse) {
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rule) = rules.iter_mut().find(|r| r.prefix == prefix) {
            rule.responses.push_back(response);
        } else {
            rules.push(MockRule {
                prefix,
                responses: VecDeque::from([response]),
            });
        }
    }

    /// Every argv the runner has been asked to execute, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of recorded invocations whose argv starts with `prefix`.
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|argv| starts_with(argv, prefix))
            .count()
    }

    fn next_response(&self, argv: &[String]) -> Option<MockResponse> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let rule = rules
            .iter_mut()
            .filter(|r| {
                let prefix: Vec<&str> = r.prefix.iter().map(String::as_str).collect();
                starts_with(argv, &prefix)
            })
            .max_by_key(|r| r.prefix.len())?;

        if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        }
    }
}

fn starts_with(argv: &[String], prefix: &[&str]) -> bool {
    argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, cmd: &CommandSpec) -> io::Result<CommandOutput> {
        let argv = cmd.argv();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(argv.clone());

        match self.next_response(&argv) {
            Some(MockResponse::Output(output)) => Ok(output),
            Some(MockResponse::SpawnError(message)) => {
                Err(io::Error::new(io::ErrorKind::NotFound, message))
            }
            None => Ok(CommandOutput::failure(
                127,
                &format!("no mock response for: {}", argv.join(" ")),
            )),
        }
    }
}
