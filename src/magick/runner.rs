//! Running external tool processes with captured output and a timeout.

use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ToolFailure;

/// How often a running child is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A fully specified tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Program name or path
    pub program: String,
    /// Arguments, in order
    pub args: Vec<OsString>,
}

impl ToolCommand {
    /// Start a command for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a finished tool process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` if terminated by a signal
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ToolOutput {
    /// Whether the process exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Convert a non-zero exit into a [`ToolFailure::ExitStatus`].
    pub fn into_failure(self, program: &str) -> ToolFailure {
        ToolFailure::ExitStatus {
            program: program.to_string(),
            code: self.code,
            detail: self.stderr.trim().to_string(),
        }
    }
}

/// Launches tool processes.
///
/// The pipeline talks to the image toolkit only through this trait, so tests
/// can script the toolkit's behaviour without it being installed.
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion, killing it once `timeout` elapses.
    ///
    /// A non-zero exit is not an error at this level; it is reported through
    /// [`ToolOutput::code`] for the caller to interpret.
    ///
    /// # Errors
    ///
    /// [`ToolFailure::Spawn`] if the process cannot be launched, and
    /// [`ToolFailure::Timeout`] if it runs too long.
    fn run(&self, command: &ToolCommand, timeout: Duration) -> Result<ToolOutput, ToolFailure>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ToolCommand, timeout: Duration) -> Result<ToolOutput, ToolFailure> {
        let spawn_failure = |e: std::io::Error| ToolFailure::Spawn {
            program: command.program.clone(),
            message: e.to_string(),
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_failure)?;

        // Drain both pipes concurrently so a chatty tool cannot block on a full pipe.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || drain(stdout));
        let stderr_reader = thread::spawn(move || drain(stderr));

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    log::warn!("{} timed out after {:?}, killing it", command.program, timeout);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ToolFailure::Timeout {
                        program: command.program.clone(),
                        timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(spawn_failure(e));
                }
            }
        };

        Ok(ToolOutput {
            code: status.code(),
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: stderr_reader.join().unwrap_or_default(),
        })
    }
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
