use thiserror::Error;

/// Exit code for a clean run (and for an operator-cancelled prompt).
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for a failed execution or any unrecoverable error.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when the user interrupts while watching an execution.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Build failed: {message}\n{output}")]
    Build { message: String, output: String },

    #[error("Reconcile failed: {message}\n{output}")]
    Reconcile { message: String, output: String },

    #[error("Launch failed: {message}\nPlatform response: {response}")]
    Launch { message: String, response: String },

    #[error("Lost contact with execution after {attempts} consecutive poll failures: {last_error}")]
    PollTransport { attempts: u32, last_error: String },

    #[error("Status poller stopped unexpectedly: {0}")]
    Poller(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cancelled by operator")]
    Cancelled,
}

impl DeployError {
    /// Process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::Cancelled => EXIT_SUCCESS,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<std::io::Error> for DeployError {
    fn from(err: std::io::Error) -> Self {
        DeployError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        DeployError::Storage(err.to_string())
    }
}
