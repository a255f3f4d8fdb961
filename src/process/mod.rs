//! Running external tools.
//!
//! Every tool this crate drives (`git`, `dpkg-*`, `gpg`, `docker`,
//! `cloudsmith`) is invoked through a [`Cmd`] handed to a [`Runner`]. The
//! [`SystemRunner`] spawns real processes; tests swap in a recording runner.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use itertools::Itertools;
use thiserror::Error;
use tracing::*;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("could not run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {}:\n{stderr}", .code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".into()))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// A command line, plus where and with what extra environment to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl Cmd {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            cwd: None,
            envs: vec![],
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
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

    pub fn cwd<P: Into<PathBuf>>(mut self, cwd: P) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Program and arguments separated by single spaces, unquoted.
    pub fn line(&self) -> String {
        std::iter::once(&self.program).chain(&self.args).join(" ")
    }

    fn to_tokio(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command.envs(self.envs.iter().map(|(k, v)| (k, v)));
        command
    }
}

/// Shell-quoted, so it can be pasted into a terminal.
impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str));
        match shlex::try_join(words) {
            Ok(line) => write!(f, "{line}"),
            Err(_) => write!(f, "{}", self.line()),
        }
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    /// Run to completion, capturing stdout and stderr. A non-zero exit is an
    /// error.
    async fn output(&self, cmd: &Cmd) -> Result<Output, CommandError>;

    /// Run to completion with the caller's stdin, stdout and stderr. A
    /// non-zero exit is an error.
    async fn status(&self, cmd: &Cmd) -> Result<(), CommandError>;

    /// Trimmed stdout of a command.
    async fn read(&self, cmd: &Cmd) -> Result<String, CommandError> {
        Ok(self.output(cmd).await?.stdout_str())
    }

    /// Print a command that a dry run would have run. Goes to stderr
    /// regardless of the log filter.
    fn show(&self, cmd: &Cmd) {
        eprintln!("{cmd}");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait::async_trait]
impl Runner for SystemRunner {
    async fn output(&self, cmd: &Cmd) -> Result<Output, CommandError> {
        debug!("running {cmd}");
        let output = cmd
            .to_tokio()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                command: cmd.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(Output {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn status(&self, cmd: &Cmd) -> Result<(), CommandError> {
        debug!("running {cmd} in foreground");
        let status = cmd
            .to_tokio()
            .status()
            .await
            .map_err(|source| CommandError::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        if !status.success() {
            return Err(CommandError::Failed {
                command: cmd.to_string(),
                code: status.code(),
                stderr: String::new(),
            });
        }

        Ok(())
    }
}
