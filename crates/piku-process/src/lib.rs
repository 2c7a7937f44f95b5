//! Process execution for piku: running `git`, `nginx`, `uwsgi`, `acme.sh`,
//! `ssh-keygen`, and app-declared `preflight`/`release` hooks with proper
//! error context, timeouts, and output capture.
//!
//! # Example
//!
//! ```ignore
//! use piku_process::run_command;
//!
//! let result = run_command("nginx", &["-t"]).expect("run");
//! assert!(result.success);
//! ```

use std::io::{Read, Write as _};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Result of a command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Whether the command succeeded (exit code 0).
    pub success: bool,
    /// Exit code (if available).
    pub exit_code: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Duration of execution.
    pub duration_ms: u64,
}

impl CommandResult {
    /// Turn a failed result into an `Err` carrying its stderr.
    pub fn ok(&self) -> Result<&Self> {
        if self.success {
            Ok(self)
        } else {
            Err(anyhow::anyhow!(
                "command failed with exit code {:?}: {}",
                self.exit_code,
                self.stderr
            ))
        }
    }

    fn from_output(output: &Output, duration: Duration) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Result of a command execution with timeout bookkeeping, used for
/// `preflight`/`release` hooks which carry a configurable deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code (or -1 when not available, e.g. on timeout).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Whether execution exceeded the timeout and was killed.
    pub timed_out: bool,
    /// Total wall-clock duration.
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Run a command and capture its output.
pub fn run_command(program: &str, args: &[&str]) -> Result<CommandResult> {
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run command: {program} {args:?}"))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command in a specific working directory.
pub fn run_command_in_dir(program: &str, args: &[&str], dir: &Path) -> Result<CommandResult> {
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("failed to run command: {program} {args:?} in {}", dir.display()))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command with explicit environment variables, replacing the
/// process's inherited environment entirely (used for `LIVE_ENV`-scoped
/// hook execution).
pub fn run_command_with_env(
    program: &str,
    args: &[&str],
    dir: &Path,
    env: &[(String, String)],
    clear_env: bool,
) -> Result<CommandResult> {
    let start = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(dir);
    if clear_env {
        cmd.env_clear();
    }
    for (key, value) in env {
        cmd.env(key, value);
    }
    let output = cmd
        .output()
        .with_context(|| format!("failed to run command: {program} {args:?}"))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command with an optional timeout, polling via `try_wait` and
/// killing the child if the deadline elapses before exit. Used for
/// `preflight`/`release` hooks, which must not hang a deploy forever.
pub fn run_command_with_timeout(
    program: &str,
    args: &[&str],
    working_dir: &Path,
    env: &[(String, String)],
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let start = Instant::now();

    let Some(timeout_dur) = timeout else {
        let result = run_command_with_env(program, args, working_dir, env, false)?;
        return Ok(CommandOutput {
            exit_code: result.exit_code.unwrap_or(-1),
            stdout: result.stdout,
            stderr: result.stderr,
            timed_out: false,
            duration: Duration::from_millis(result.duration_ms),
        });
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn command: {program}"))?;

    let deadline = Instant::now() + timeout_dur;
    loop {
        match child
            .try_wait()
            .with_context(|| format!("failed to poll command: {program}"))?
        {
            Some(status) => {
                return Ok(CommandOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: read_pipe(child.stdout.take()),
                    stderr: read_pipe(child.stderr.take()),
                    timed_out: false,
                    duration: start.elapsed(),
                });
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();

                    let mut stderr = read_pipe(child.stderr.take());
                    stderr.push_str(&format!(
                        "\n{program} timed out after {}",
                        humantime::format_duration(timeout_dur)
                    ));

                    return Ok(CommandOutput {
                        exit_code: -1,
                        stdout: read_pipe(child.stdout.take()),
                        stderr,
                        timed_out: true,
                        duration: start.elapsed(),
                    });
                }

                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn read_pipe<R: Read>(stream: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).to_string()
}

/// Run a command, feeding `input` on its stdin and capturing stdout/stderr.
/// Used for `ssh-keygen -lf -`, which reads the public key to fingerprint
/// from stdin rather than a file argument.
pub fn run_command_with_stdin(program: &str, args: &[&str], input: &str) -> Result<CommandResult> {
    let start = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn command: {program} {args:?}"))?;

    child
        .stdin
        .take()
        .context("child stdin was not piped")?
        .write_all(input.as_bytes())
        .with_context(|| format!("writing stdin to {program}"))?;

    let output = child.wait_with_output().with_context(|| format!("waiting on {program}"))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command and stream its output to the parent's stdout/stderr,
/// used for `git fetch`/`clone` progress during deploy.
pub fn run_command_streaming(program: &str, args: &[&str], dir: &Path) -> Result<CommandResult> {
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .output()
        .with_context(|| format!("failed to run command: {program} {args:?}"))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command and return success/failure without capturing output.
pub fn run_command_simple(program: &str, args: &[&str]) -> Result<bool> {
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("failed to run command: {program} {args:?}"))?;
    Ok(status.success())
}

/// Spawn a long-lived detached process (used by the uWSGI emperor itself,
/// started once by `setup:system` and never waited on by piku).
pub fn spawn_detached(program: &str, args: &[&str], dir: &Path) -> Result<u32> {
    let child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn detached command: {program}"))?;
    Ok(child.id())
}

/// Check if a command exists in `PATH`.
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Get the full path to a command in `PATH`.
pub fn which(program: &str) -> Option<std::path::PathBuf> {
    which::which(program).ok()
}
