//! Tokio-backed process runner
//!
//! Each child runs in its own process group so a timeout or cancellation can
//! take down everything it spawned. stdout and stderr are drained by separate
//! tasks from the moment the child starts, so a chatty process never blocks
//! on a full pipe.

use async_trait::async_trait;
use fleetpkg_errors::PlatformError;
use fleetpkg_events::{AppEvent, EventEmitter, EventSender, ProcessEvent};
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{CommandOutput, PlatformCommand, ProcessRunner};

const READ_CHUNK: usize = 64 * 1024;

/// How long pipe readers may keep going after the child is gone
const PIPE_GRACE: Duration = Duration::from_secs(2);

const BUSY_RETRIES: u32 = 5;

/// Production `ProcessRunner` using `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct SystemProcessRunner {
    event_sender: Option<EventSender>,
}

impl SystemProcessRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }
}

impl EventEmitter for SystemProcessRunner {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

enum Outcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn execute_with_cancel(
        &self,
        cmd: &PlatformCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, PlatformError> {
        let command_str = cmd.program().display().to_string();
        let start = Instant::now();

        self.emit(AppEvent::Process(ProcessEvent::Started {
            command: command_str.clone(),
            args: cmd
                .get_args()
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect(),
            timeout_secs: cmd.get_timeout().map(|t| t.as_secs()),
        }));
        tracing::debug!(command = %cmd.display(), "spawning process");

        let mut child = match spawn(cmd).await {
            Ok(child) => child,
            Err(err) => {
                self.emit(AppEvent::Process(ProcessEvent::Failed {
                    command: command_str,
                    error_message: err.to_string(),
                }));
                tracing::warn!(error = %err, "process launch failed");
                return Err(err);
            }
        };
        let pid = child.id();

        let stdin_task = child.stdin.take().map(|mut stdin| {
            let input = cmd.get_stdin().map(<[u8]>::to_vec).unwrap_or_default();
            tokio::spawn(async move {
                // A child that exits without reading its input closes the pipe
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            })
        });
        let stdout_task = child.stdout.take().map(drain);
        let stderr_task = child.stderr.take().map(drain);

        let deadline = async {
            match cmd.get_timeout() {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Outcome::Exited(status),
                Err(e) => {
                    kill_tree(&mut child, pid).await;
                    abort_all([stdout_task, stderr_task]);
                    let err = PlatformError::ProcessExecutionFailed {
                        command: command_str.clone(),
                        message: e.to_string(),
                    };
                    self.emit(AppEvent::Process(ProcessEvent::Failed {
                        command: command_str,
                        error_message: err.to_string(),
                    }));
                    return Err(err);
                }
            },
            () = deadline => Outcome::TimedOut,
            () = cancel.cancelled() => Outcome::Cancelled,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            kill_tree(&mut child, pid).await;
        }
        if let Some(task) = stdin_task {
            task.abort();
        }

        // Grandchildren that inherited the pipes can keep them open after the
        // child itself exits; bound the wait and kill the group if they do.
        let (stdout, stdout_done) = collect(stdout_task).await;
        let (stderr, stderr_done) = collect(stderr_task).await;
        let truncated = !(stdout_done && stderr_done);
        if truncated {
            tracing::warn!(command = %command_str, "output pipes held open after exit; killing process group");
            kill_group(pid);
        }

        let duration = start.elapsed();
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Outcome::Exited(status) => {
                let output = CommandOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    timed_out: false,
                    truncated,
                    duration,
                };
                self.emit(AppEvent::Process(ProcessEvent::Completed {
                    command: command_str,
                    exit_code: output.exit_code,
                    duration_ms,
                    stdout_bytes: output.stdout.len(),
                    stderr_bytes: output.stderr.len(),
                }));
                Ok(output)
            }
            Outcome::TimedOut => {
                let timeout_secs = cmd.get_timeout().map_or(0, |t| t.as_secs());
                tracing::warn!(command = %command_str, timeout_secs, "process timed out");
                self.emit(AppEvent::Process(ProcessEvent::TimedOut {
                    command: command_str,
                    timeout_secs,
                    duration_ms,
                }));
                Ok(CommandOutput {
                    exit_code: None,
                    stdout,
                    stderr,
                    timed_out: true,
                    truncated,
                    duration,
                })
            }
            Outcome::Cancelled => {
                tracing::debug!(command = %command_str, "process cancelled");
                self.emit(AppEvent::Process(ProcessEvent::Cancelled {
                    command: command_str.clone(),
                    duration_ms,
                }));
                Err(PlatformError::Cancelled {
                    command: command_str,
                })
            }
        }
    }
}

fn build_command(cmd: &PlatformCommand) -> Command {
    let mut command = Command::new(cmd.program());
    command
        .args(cmd.get_args())
        .stdin(if cmd.get_stdin().is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    if let Some(dir) = cmd.get_current_dir() {
        command.current_dir(dir);
    }
    for (key, value) in cmd.get_env() {
        command.env(key, value);
    }
    command
}

/// A script written just before launch reports ETXTBSY while a concurrent
/// fork elsewhere in the process still holds its write descriptor.
fn is_text_busy(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ETXTBSY)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

async fn spawn(cmd: &PlatformCommand) -> Result<Child, PlatformError> {
    let mut attempt = 0;
    loop {
        let spawned = build_command(cmd).spawn();
        match spawned {
            Err(e) if is_text_busy(&e) && attempt < BUSY_RETRIES => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
            }
            result => {
                return result.map_err(|e| {
                    let command = cmd.program().display().to_string();
                    if e.kind() == ErrorKind::NotFound {
                        PlatformError::CommandNotFound { command }
                    } else {
                        PlatformError::LaunchFailed {
                            command,
                            message: e.to_string(),
                        }
                    }
                })
            }
        }
    }
}

/// A pipe being read in the background into a buffer that survives the task
struct PipeReader {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl PipeReader {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

fn drain<R>(mut reader: R) -> PipeReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let task = tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
    });
    PipeReader { buffer, task }
}

/// Wait for a reader, giving up after the grace period.
/// Returns what was read and whether the stream reached EOF.
async fn collect(pipe: Option<PipeReader>) -> (Vec<u8>, bool) {
    let Some(mut pipe) = pipe else {
        return (Vec::new(), true);
    };
    let done = match tokio::time::timeout(PIPE_GRACE, &mut pipe.task).await {
        Ok(_) => true,
        Err(_) => {
            pipe.task.abort();
            false
        }
    };
    (pipe.take(), done)
}

fn abort_all<const N: usize>(pipes: [Option<PipeReader>; N]) {
    for pipe in pipes.into_iter().flatten() {
        pipe.task.abort();
    }
}

async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    // Reaps the direct child so no zombie is left behind
    let _ = child.kill().await;
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group id came from our own child
    // which leads its group, and ESRCH for an already-gone group is harmless.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Run a command to completion from synchronous code
///
/// Builds a single-threaded runtime for the call, so it must not be used from
/// inside an async context.
///
/// # Errors
///
/// Returns the same errors as [`ProcessRunner::execute`], or
/// `ProcessExecutionFailed` if the runtime cannot be created.
pub fn execute_blocking(
    runner: &dyn ProcessRunner,
    cmd: &PlatformCommand,
) -> Result<CommandOutput, PlatformError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| PlatformError::ProcessExecutionFailed {
            command: cmd.program().display().to_string(),
            message: format!("failed to start runtime: {e}"),
        })?;
    runtime.block_on(runner.execute(cmd))
}
