//! Shell command execution.
//!
//! [`ShellCommand`] is the boundary between the scheduler and the operating
//! system: it hands an opaque script to a shell, waits for it, and captures
//! the exit status together with stdout and stderr.
//!
//! Scripts run under bash by default, the same shell grid scripts select
//! with `#$ -S /bin/bash`. A script is either passed inline with `-c` or
//! read from a file, which has no argument-length limit.
//!
//! ```rust
//! use jobgraph::ShellCommand;
//!
//! let command = ShellCommand::builder("echo $GREETING")
//!     .env("GREETING", "hello")
//!     .build();
//! assert_eq!(command.shell(), "bash");
//! assert_eq!(command.script(), Some("echo $GREETING"));
//! ```
//!
//! A command fails with:
//!
//! - [`CommandError::Spawn`] if the shell cannot be started
//! - [`CommandError::Failed`] if the script exits non-zero or is killed by a
//!   signal; the captured output travels with the error

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;

/// Errors from running a shell command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The shell could not be started.
    #[error("failed to start '{shell}': {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    /// The script exited unsuccessfully.
    #[error("{}", describe_exit(.code))]
    Failed {
        /// Exit code; `None` when terminated by a signal.
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("command exited with code {}", code),
        None => "command terminated by signal".to_string(),
    }
}

impl CommandError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::Failed { code, .. } => *code,
            CommandError::Spawn { .. } => None,
        }
    }
}

/// Output of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Shell used unless a builder picks another.
pub const DEFAULT_SHELL: &str = "bash";

/// Where the shell reads its script from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Script {
    Inline(Arc<str>),
    File(Arc<Path>),
}

/// A script run through a shell.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    shell: String,
    script: Script,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
}

impl ShellCommand {
    /// Create a new builder for an inline script.
    pub fn builder(script: impl Into<String>) -> ShellCommandBuilder {
        ShellCommandBuilder::new(script)
    }

    /// Create a builder for a script stored in a file.
    ///
    /// The path is shared, so many commands can run one script file.
    pub fn from_file(path: Arc<Path>) -> ShellCommandBuilder {
        ShellCommandBuilder::with_script(Script::File(path))
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// The inline script, if the command has one.
    pub fn script(&self) -> Option<&str> {
        match self.script {
            Script::Inline(ref script) => Some(&**script),
            Script::File(_) => None,
        }
    }

    /// The script file, if the command reads one.
    pub fn script_path(&self) -> Option<&Path> {
        match self.script {
            Script::Inline(_) => None,
            Script::File(ref path) => Some(&**path),
        }
    }

    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Run the script to completion.
    ///
    /// There is no timeout: once started, a command runs until it exits.
    pub async fn run(&self) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(&self.shell);
        match self.script {
            Script::Inline(ref script) => cmd.arg("-c").arg(&**script),
            Script::File(ref path) => cmd.arg(&**path),
        };

        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|source| CommandError::Spawn {
            shell: self.shell.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        match output.status.code() {
            Some(0) => Ok(CommandOutput {
                exit_code: 0,
                stdout,
                stderr,
            }),
            code => Err(CommandError::Failed {
                code,
                stdout,
                stderr,
            }),
        }
    }
}

/// Builder for [`ShellCommand`].
#[derive(Debug, Clone)]
pub struct ShellCommandBuilder {
    shell: String,
    script: Script,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
}

impl ShellCommandBuilder {
    /// Create a builder that runs `script` with [`DEFAULT_SHELL`].
    pub fn new(script: impl Into<String>) -> Self {
        Self::with_script(Script::Inline(Arc::from(script.into())))
    }

    fn with_script(script: Script) -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            script,
            env: Vec::new(),
            working_dir: None,
        }
    }

    /// Use a different shell, e.g. `sh` for strictly POSIX scripts.
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> ShellCommand {
        ShellCommand {
            shell: self.shell,
            script: self.script,
            env: self.env,
            working_dir: self.working_dir,
        }
    }
}
