//! Worker channel: one external process per call.
//!
//! [`ProcessChannel`] spawns the configured worker, writes one request line to
//! its stdin, closes stdin, and collects stdout and stderr until the worker
//! exits or the request deadline elapses. On expiry the worker is killed and
//! reaped before the call returns.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{ContextflowConfig, TransportConfig, WorkerConfig};
use crate::envelope::excerpt;
use crate::error::{TransportFailure, TransportKind};
use crate::request::Request;

/// Environment variable naming the per-call staging directory.
pub const STAGING_DIR_ENV: &str = "CONTEXTFLOW_STAGING_DIR";

/// Everything one worker call produced. Consumed by decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    /// Exit code; `None` if the worker was killed by a signal or never ran.
    pub exit_status: Option<i32>,

    /// Captured stdout (protocol line plus any noise).
    pub stdout: Vec<u8>,

    /// Captured stderr (diagnostics only, never the answer).
    pub stderr: Vec<u8>,

    /// Process-level failure (spawn error, timeout).
    pub process_error: Option<TransportFailure>,
}

impl RawResult {
    /// A call that failed before producing output.
    pub fn failed(failure: TransportFailure) -> Self {
        Self {
            process_error: Some(failure),
            ..Default::default()
        }
    }

    /// A clean exit with the given stdout.
    pub fn exited(exit_status: i32, stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_status: Some(exit_status),
            stdout: stdout.into(),
            ..Default::default()
        }
    }
}

/// Transport to the worker. One call, one request, one raw result.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn call(&self, request: &Request) -> RawResult;
}

/// Channel that spawns a fresh worker process for every call.
#[derive(Debug, Clone)]
pub struct ProcessChannel {
    worker: WorkerConfig,
    max_output_bytes: usize,
    drain_grace: Duration,
}

impl ProcessChannel {
    pub fn new(worker: WorkerConfig, transport: &TransportConfig) -> Self {
        Self {
            worker,
            max_output_bytes: transport.max_output_bytes,
            drain_grace: Duration::from_millis(transport.drain_grace_ms),
        }
    }

    pub fn from_config(config: &ContextflowConfig) -> Self {
        Self::new(config.worker.clone(), &config.transport)
    }

    async fn run(&self, request: &Request) -> RawResult {
        let started = Instant::now();
        let deadline = request.deadline();

        // Scratch space for the worker, removed on every return path when dropped.
        let staging = match tempfile::Builder::new().prefix("contextflow-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return RawResult::failed(TransportFailure::new(
                    TransportKind::SpawnError,
                    format!("failed to create staging directory: {e}"),
                ))
            }
        };

        let mut command = Command::new(&self.worker.program);
        command
            .args(&self.worker.args)
            .envs(&self.worker.env)
            .env(STAGING_DIR_ENV, staging.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.worker.working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.worker.program, error = %e, "Failed to start worker");
                return RawResult::failed(TransportFailure::new(
                    TransportKind::SpawnError,
                    format!("failed to start worker '{}': {e}", self.worker.program),
                ));
            }
        };
        debug!(pid = ?child.id(), "Worker started");

        let line = request.to_rpc_line();
        let stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            let Some(mut stdin) = stdin else { return };
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                // The worker may exit before reading its input.
                debug!(error = %e, "Failed to write request to worker");
            }
            // Dropping stdin closes the pipe and signals end of input.
        });

        let cap = self.max_output_bytes;
        let stdout_buf = SharedBuf::default();
        let stderr_buf = SharedBuf::default();
        let stdout_reader = tokio::spawn(read_capped(
            child.stdout.take(),
            cap,
            stdout_buf.clone(),
            "stdout",
        ));
        let stderr_reader = tokio::spawn(read_capped(
            child.stderr.take(),
            cap,
            stderr_buf.clone(),
            "stderr",
        ));

        let (exit_status, process_error) = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => (status.code(), None),
            Ok(Err(e)) => (
                None,
                Some(TransportFailure::new(
                    TransportKind::ProcessExit,
                    format!("failed to wait for worker: {e}"),
                )),
            ),
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "Worker deadline elapsed, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill worker");
                }
                (
                    None,
                    Some(TransportFailure::new(
                        TransportKind::Timeout,
                        format!("worker did not answer within {deadline:?}"),
                    )),
                )
            }
        };

        writer.abort();
        let stdout = collect(stdout_reader, stdout_buf, self.drain_grace).await;
        let stderr = collect(stderr_reader, stderr_buf, self.drain_grace).await;

        if let Err(e) = staging.close() {
            warn!(error = %e, "Failed to remove staging directory");
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        log_stderr(&stderr, exit_status);
        info!(
            exit_status = ?exit_status,
            elapsed_ms,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Worker call finished"
        );

        RawResult {
            exit_status,
            stdout,
            stderr,
            process_error,
        }
    }
}

#[async_trait]
impl Channel for ProcessChannel {
    async fn call(&self, request: &Request) -> RawResult {
        let span = info_span!(
            "worker_call",
            operation = %request.operation(),
            tool = request.operation().tool_name(),
            deadline_ms = request.deadline().as_millis() as u64,
        );
        self.run(request).instrument(span).await
    }
}

/// Bytes captured from one worker stream. Shared with the reader task so
/// that whatever was read survives the task being abandoned.
type SharedBuf = Arc<Mutex<Vec<u8>>>;

fn lock(buf: &SharedBuf) -> MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read a stream into `buf` up to `cap` bytes, discarding (but still
/// draining) the rest so the worker never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, cap: usize, buf: SharedBuf, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };

    let mut chunk = [0u8; 8 * 1024];
    let mut discarded = 0u64;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut out = lock(&buf);
                let keep = n.min(cap.saturating_sub(out.len()));
                out.extend_from_slice(&chunk[..keep]);
                discarded += (n - keep) as u64;
            }
            Err(e) => {
                warn!(stream, error = %e, "Failed to read worker output");
                break;
            }
        }
    }
    if discarded > 0 {
        warn!(stream, cap, discarded, "Worker output over cap, excess discarded");
    }
}

/// Wait a bounded time for a reader task, then take what it captured. A
/// reader can outlive the worker when a grandchild inherited the pipe.
async fn collect(handle: JoinHandle<()>, buf: SharedBuf, grace: Duration) -> Vec<u8> {
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Output reader task failed"),
        Err(_) => {
            abort.abort();
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Output pipe still open after exit, keeping bytes read so far"
            );
        }
    }
    let mut out = lock(&buf);
    std::mem::take(&mut *out)
}

fn log_stderr(stderr: &[u8], exit_status: Option<i32>) {
    if stderr.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(stderr);
    let text = excerpt(text.trim(), 2_000);
    if exit_status == Some(0) {
        debug!(stderr = %text, "Worker diagnostics");
    } else {
        warn!(stderr = %text, "Worker diagnostics");
    }
}
