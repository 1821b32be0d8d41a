//! External command execution
//!
//! Thin wrapper over `tokio::process::Command` for the scripts and CLIs the
//! deployer shells out to. Commands either inherit the caller's stdout and
//! stderr or have their stdout captured.

use std::ffi::OsStr;
use std::fmt;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur running an external command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    Failed { command: String, status: ExitStatus },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command line plus the environment to run it with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Full environment for the child; `None` inherits the caller's
    pub env: Option<Vec<(String, String)>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
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

    /// Replace the child's environment entirely
    pub fn env_clear_and_set(mut self, env: Vec<(String, String)>) -> Self {
        self.env = Some(env);
        self
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(env) = &self.env {
            cmd.env_clear();
            cmd.envs(env.iter().map(|(k, v)| (OsStr::new(k), OsStr::new(v))));
        }
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> CommandError {
        CommandError::Spawn {
            command: self.to_string(),
            source,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Run a command with stdout/stderr inherited from this process
pub async fn run_inherited(spec: &CommandSpec) -> Result<(), CommandError> {
    debug!("Running: {}", spec);
    let status = spec
        .build()
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| spec.spawn_error(e))?;

    if !status.success() {
        return Err(CommandError::Failed {
            command: spec.to_string(),
            status,
        });
    }
    Ok(())
}

/// Run a command and capture its stdout; stderr is inherited
pub async fn run_captured(spec: &CommandSpec) -> Result<String, CommandError> {
    debug!("Running (captured): {}", spec);
    let output = spec
        .build()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .await
        .map_err(|e| spec.spawn_error(e))?;

    if !output.status.success() {
        return Err(CommandError::Failed {
            command: spec.to_string(),
            status: output.status,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
