//! Process execution for external tools and check scripts

mod executor;

pub use executor::{execute_blocking, SystemProcessRunner};

use async_trait::async_trait;
use fleetpkg_errors::PlatformError;
use fleetpkg_types::ScriptResult;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Command builder carrying everything one process run needs
#[derive(Debug, Clone)]
pub struct PlatformCommand {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl PlatformCommand {
    /// Create a new platform command
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            stdin: None,
            timeout: None,
        }
    }

    /// Add an argument to the command
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments to the command
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory for the command
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Bytes written to the child's stdin, which is then closed
    #[must_use]
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Wall-clock limit; the process group is killed when it expires
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the program path
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments
    #[must_use]
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    #[must_use]
    pub fn get_env(&self) -> &[(OsString, OsString)] {
        &self.env
    }

    /// Get the current directory
    #[must_use]
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    #[must_use]
    pub fn get_stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    #[must_use]
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Program and arguments joined for logs and error messages
    #[must_use]
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }
}

/// Output from command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// The wall-clock limit expired and the process group was killed
    pub timed_out: bool,
    /// A descendant still held stdout or stderr open after the child exited;
    /// the streams hold what arrived before the wait gave up
    pub truncated: bool,
    pub duration: Duration,
}

impl CommandOutput {
    /// Exited on its own with status 0
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Turn timeouts and non-zero exits into errors, for tools whose output
    /// is only meaningful on success
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Timeout` or `PlatformError::ToolFailed`.
    pub fn ensure_success(self, command: &PlatformCommand) -> Result<Self, PlatformError> {
        if self.timed_out {
            return Err(PlatformError::Timeout {
                command: command.program().display().to_string(),
                timeout_secs: command.get_timeout().map_or(0, |t| t.as_secs()),
            });
        }
        if self.exit_code != Some(0) {
            return Err(PlatformError::ToolFailed {
                tool: command.program().display().to_string(),
                code: self.exit_code.unwrap_or(-1),
                stderr: self.stderr_lossy().trim().to_string(),
            });
        }
        Ok(self)
    }

    /// Decode into the script result used by the install-state rules
    #[must_use]
    pub fn into_script_result(self) -> ScriptResult {
        ScriptResult {
            exit_code: self.exit_code,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            timed_out: self.timed_out,
        }
    }
}

/// Trait for process execution, the seam tests and alternate runners plug into
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a command until it exits, times out, or `cancel` fires
    ///
    /// A timeout is reported as `Ok` with `timed_out` set; cancellation and
    /// launch failures are errors.
    async fn execute_with_cancel(
        &self,
        cmd: &PlatformCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, PlatformError>;

    /// Run a command that cannot be cancelled from outside
    async fn execute(&self, cmd: &PlatformCommand) -> Result<CommandOutput, PlatformError> {
        self.execute_with_cancel(cmd, &CancellationToken::new())
            .await
    }
}
