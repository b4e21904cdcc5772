use std::collections::VecDeque;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::models::log_entry::{is_platform_diagnostic, sort_batch};
use crate::models::{DeployConfig, LogEntry};
use crate::platform::Gcloud;

/// Raw entry batches as delivered by a tail connection.
pub type LogBatchStream = Pin<Box<dyn Stream<Item = anyhow::Result<Vec<Value>>> + Send>>;

/// Opens live log tail connections.
#[async_trait]
pub trait LogTailSource: Send + Sync {
    async fn open(&self, filter: &str) -> anyhow::Result<LogBatchStream>;
}

/// Where streamed log lines and streaming warnings go.
pub trait LogSink: Send + Sync {
    fn entry(&self, entry: &LogEntry);
    fn warning(&self, message: &str);
}

/// Log filter for one execution of one job.
pub fn execution_filter(job_name: &str, execution_name: &str) -> String {
    format!(
        "resource.type=\"cloud_run_job\" AND resource.labels.job_name=\"{}\" AND labels.\"run.googleapis.com/execution_name\"=\"{}\"",
        job_name, execution_name
    )
}

// --- Real implementation using the platform CLI ---

/// Tails logs through `gcloud alpha logging tail`.
pub struct GcloudLogTail {
    gcloud: Gcloud,
}

impl GcloudLogTail {
    pub fn new(gcloud: Gcloud) -> Self {
        Self { gcloud }
    }
}

#[async_trait]
impl LogTailSource for GcloudLogTail {
    async fn open(&self, filter: &str) -> anyhow::Result<LogBatchStream> {
        let cmd = self
            .gcloud
            .project_command(["alpha", "logging", "tail", filter, "--format=json"]);
        tracing::debug!("Opening log tail: {}", cmd);

        let mut child = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("log tail has no stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("log tail has no stderr"))?;

        let (tx, rx) = mpsc::channel::<anyhow::Result<Vec<Value>>>(64);
        tokio::spawn(async move {
            // stderr is read concurrently so a chatty tail cannot fill the pipe
            let diagnostics = tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            });

            let mut pending = Vec::new();
            let mut buffer = String::new();
            let mut chunk = vec![0u8; 8192];
            loop {
                let read = tokio::select! {
                    read = stdout.read(&mut chunk) => read,
                    _ = tx.closed() => return,
                };
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        pending.extend_from_slice(&chunk[..n]);
                        decode_utf8(&mut pending, &mut buffer);
                        for value in drain_json_values(&mut buffer) {
                            let batch = match value {
                                Value::Array(items) => items,
                                other => vec![other],
                            };
                            if tx.send(Ok(batch)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }

            let diagnostics = diagnostics.await.unwrap_or_default();
            let status = child.wait().await;
            let message = match status {
                Ok(status) if status.success() => "log tail ended".to_string(),
                Ok(status) => format!("log tail exited with {}: {}", status, diagnostics.trim()),
                Err(e) => format!("log tail failed: {}", e),
            };
            let _ = tx.send(Err(anyhow::anyhow!(message))).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Move the decodable prefix of `pending` into `buffer`.
///
/// A multi-byte character split across reads stays in `pending` until the
/// rest of it arrives. Invalid sequences are replaced.
pub fn decode_utf8(pending: &mut Vec<u8>, buffer: &mut String) {
    loop {
        match std::str::from_utf8(&pending[..]) {
            Ok(text) => {
                buffer.push_str(text);
                pending.clear();
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                buffer.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    None => {
                        pending.drain(..valid);
                        return;
                    }
                    Some(bad) => {
                        buffer.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                }
            }
        }
    }
}

/// Remove every complete JSON value from the front of `buffer`.
///
/// The tail prints concatenated values without framing; a trailing partial
/// value stays buffered until more output arrives. Non-JSON lines are dropped.
pub fn drain_json_values(buffer: &mut String) -> Vec<Value> {
    let mut values = Vec::new();
    loop {
        let (consumed, garbage) = {
            let mut values_iter =
                serde_json::Deserializer::from_str(buffer.as_str()).into_iter::<Value>();
            let mut consumed = 0;
            let mut garbage = false;
            loop {
                match values_iter.next() {
                    Some(Ok(value)) => {
                        values.push(value);
                        consumed = values_iter.byte_offset();
                    }
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(_)) => {
                        garbage = true;
                        break;
                    }
                    None => {
                        consumed = buffer.len();
                        break;
                    }
                }
            }
            (consumed, garbage)
        };
        buffer.drain(..consumed);

        if !garbage {
            return values;
        }
        match buffer.find('\n') {
            Some(pos) => {
                buffer.drain(..=pos);
            }
            None => {
                buffer.clear();
                return values;
            }
        }
    }
}

// --- Sinks ---

/// Prints entries to stdout and warnings to stderr.
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn entry(&self, entry: &LogEntry) {
        println!("{}", entry.format_line());
    }

    fn warning(&self, message: &str) {
        eprintln!("Warning: {}", message);
    }
}

/// Collects everything in memory.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
    warnings: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.message).collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LogSink for MemorySink {
    fn entry(&self, entry: &LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
    }

    fn warning(&self, message: &str) {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
    }
}

// --- Streamer ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub reconnect_delay: Duration,
    pub max_failures: u32,
    pub stop_timeout: Duration,
}

impl StreamSettings {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            reconnect_delay: config.log_reconnect_delay(),
            max_failures: config.log_max_reconnect_attempts,
            stop_timeout: config.log_stop_timeout(),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from_config(&DeployConfig::default())
    }
}

/// How `stop()` finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Closed,
    TimedOut,
    NotRunning,
}

/// Live log tail for one execution, reconnecting on failure.
pub struct LogStreamer {
    source: Arc<dyn LogTailSource>,
    sink: Arc<dyn LogSink>,
    filter: String,
    settings: StreamSettings,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl LogStreamer {
    pub fn new(
        source: Arc<dyn LogTailSource>,
        sink: Arc<dyn LogSink>,
        filter: String,
        settings: StreamSettings,
    ) -> Self {
        Self {
            source,
            sink,
            filter,
            settings,
            shutdown: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Open the tail in a background task. No-op if already started.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        self.shutdown = Some(tx);
        self.handle = Some(tokio::spawn(stream_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.sink),
            self.filter.clone(),
            self.settings,
            rx,
        )));
    }

    /// Request shutdown; resolves when the stream has closed or the stop
    /// timeout elapses, whichever comes first. Cancels any pending reconnect.
    pub async fn stop(&mut self) -> StopOutcome {
        let Some(mut handle) = self.handle.take() else {
            return StopOutcome::NotRunning;
        };
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }

        match tokio::time::timeout(self.settings.stop_timeout, &mut handle).await {
            Ok(_) => StopOutcome::Closed,
            Err(_) => {
                tracing::warn!(
                    "Log stream did not close within {:?}, abandoning it",
                    self.settings.stop_timeout
                );
                handle.abort();
                StopOutcome::TimedOut
            }
        }
    }
}

impl Drop for LogStreamer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn stream_loop(
    source: Arc<dyn LogTailSource>,
    sink: Arc<dyn LogSink>,
    filter: String,
    settings: StreamSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures = 0u32;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let opened = tokio::select! {
            opened = source.open(&filter) => opened,
            _ = shutdown.changed() => return,
        };

        let error = match opened {
            Ok(mut stream) => loop {
                tokio::select! {
                    item = stream.next() => match item {
                        Some(Ok(batch)) => {
                            failures = 0;
                            emit_batch(sink.as_ref(), batch);
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "log stream closed".to_string(),
                    },
                    _ = shutdown.changed() => return,
                }
            },
            Err(e) => e.to_string(),
        };

        failures += 1;
        if failures >= settings.max_failures {
            tracing::warn!(
                "Giving up on log streaming after {} failures: {}",
                failures,
                error
            );
            sink.warning(&format!(
                "Log streaming stopped after {} consecutive failures ({}). The execution is still being tracked.",
                failures, error
            ));
            return;
        }
        tracing::debug!(
            "Log stream failed ({}), reconnecting in {:?}",
            error,
            settings.reconnect_delay
        );

        tokio::select! {
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Filter, parse, order and print one delivered batch.
fn emit_batch(sink: &dyn LogSink, batch: Vec<Value>) {
    let mut entries: Vec<LogEntry> = batch
        .iter()
        .filter(|value| !is_platform_diagnostic(value))
        .filter_map(LogEntry::from_json)
        .collect();
    sort_batch(&mut entries);
    for entry in &entries {
        sink.entry(entry);
    }
}

// --- Mock implementation for testing ---

/// Scripted behavior for one `open` call on `MockLogTail`.
#[derive(Debug, Clone)]
pub enum MockConnection {
    /// `open` itself fails.
    Refuse(String),
    /// Deliver the batches, then fail with `error` or end cleanly, or stay
    /// open forever when `hang` is set.
    Deliver {
        batches: Vec<Vec<Value>>,
        error: Option<String>,
        hang: bool,
    },
}

impl MockConnection {
    /// Deliver the batches and then stay open.
    pub fn live(batches: Vec<Vec<Value>>) -> Self {
        MockConnection::Deliver {
            batches,
            error: None,
            hang: true,
        }
    }
}

/// Log tail source that plays back scripted connections. Once the script is
/// exhausted every further `open` is refused.
#[derive(Default)]
pub struct MockLogTail {
    connections: Mutex<VecDeque<MockConnection>>,
    opens: AtomicUsize,
    filters: Mutex<Vec<String>>,
}

impl MockLogTail {
    pub fn new(connections: Vec<MockConnection>) -> Self {
        Self {
            connections: Mutex::new(connections.into()),
            ..Default::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn filters(&self) -> Vec<String> {
        self.filters.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LogTailSource for MockLogTail {
    async fn open(&self, filter: &str) -> anyhow::Result<LogBatchStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.filters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(filter.to_string());

        let next = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            None => Err(anyhow::anyhow!("connection refused")),
            Some(MockConnection::Refuse(message)) => Err(anyhow::anyhow!(message)),
            Some(MockConnection::Deliver {
                batches,
                error,
                hang,
            }) => {
                let mut tail: LogBatchStream = Box::pin(stream::iter(batches.into_iter().map(Ok)));
                if let Some(message) = error {
                    tail = Box::pin(tail.chain(stream::once(async move {
                        Err(anyhow::anyhow!(message))
                    })));
                }
                if hang {
                    tail = Box::pin(tail.chain(stream::pending()));
                }
                Ok(tail)
            }
        }
    }
}
