// kegr-core/src/build/process.rs
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
#[cfg(test)]
use std::sync::Mutex;

use kegr_common::error::{KegrError, Result};
use tracing::{debug, error};

/// Lines of stderr kept in a `CommandFailed` error.
const STDERR_TAIL_LINES: usize = 20;

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: BTreeMap<String, String>,
    /// Start from an empty environment instead of inheriting ours.
    pub clear_env: bool,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            envs: BTreeMap::new(),
            clear_env: false,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn envs(mut self, envs: BTreeMap<String, String>, clear: bool) -> Self {
        self.envs = envs;
        self.clear_env = clear;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn status_label(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "termination by signal".to_string(),
        }
    }

    /// Converts a non-zero exit into `CommandFailed`.
    pub fn check(self, invocation: &Invocation) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        let lines: Vec<&str> = self.stderr.trim_end().lines().collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        Err(KegrError::CommandFailed {
            program: invocation.command_line(),
            status: self.status_label(),
            stderr_tail: lines[start..].join("\n"),
        })
    }
}

/// Runs external processes on behalf of recipe steps.
pub trait CommandRunner: Send + Sync {
    /// Spawns the command and waits for it. Only a failure to launch is an
    /// error here; exit status is reported through `CommandOutput`.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Runs commands on the host with captured output and a null stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!(
            "Running command: {} (cwd: {:?}, envs: {:?})",
            invocation,
            invocation.cwd,
            invocation.envs.keys().collect::<Vec<_>>()
        );
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        if invocation.clear_env {
            cmd.env_clear();
        }
        cmd.envs(&invocation.envs);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());

        match cmd.output() {
            Ok(output) => {
                let result = CommandOutput {
                    code: output.status.code(),
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                if !result.success {
                    debug!("Command failed with status: {}", output.status);
                    if !result.stdout.trim().is_empty() {
                        debug!("Stdout:\n{}", result.stdout.trim());
                    }
                    if !result.stderr.trim().is_empty() {
                        debug!("Stderr:\n{}", result.stderr.trim());
                    }
                } else {
                    debug!("Command finished successfully.");
                }
                Ok(result)
            }
            Err(e) => {
                error!("Failed to execute command '{}': {}", invocation.program, e);
                Err(KegrError::CommandExecError(format!(
                    "Failed to execute '{}': {}",
                    invocation.program, e
                )))
            }
        }
    }
}

/// Records every invocation and answers from a scripted queue; an empty
/// queue answers with success and no output.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
}

#[cfg(test)]
impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `output` for the next invocation whose command line contains
    /// `needle`.
    pub fn respond(&self, needle: impl Into<String>, output: CommandOutput) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push((needle.into(), output));
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::command_line).collect()
    }
}

#[cfg(test)]
impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
        let line = invocation.command_line();
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| KegrError::Generic("recording runner lock poisoned".to_string()))?;
        match responses.iter().position(|(needle, _)| line.contains(needle.as_str())) {
            Some(index) => Ok(responses.remove(index).1),
            None => Ok(CommandOutput::ok("")),
        }
    }
}

pub type SharedRunner = Arc<dyn CommandRunner>;
