use futures::future::BoxFuture;
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};

use super::builder::CommandLine;
use super::config::CommandConfig;
use super::error::{CommandError, Result};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type ExitFuture = BoxFuture<'static, std::io::Result<ExitStatus>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ExitStatus::Signal(signal) => Some(*signal),
            _ => None,
        }
    }

    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitStatus::from_code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Error(-1)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "exit code 0"),
            ExitStatus::Error(code) => write!(f, "exit code {code}"),
            ExitStatus::Signal(signal) => write!(f, "terminated by signal {signal}"),
        }
    }
}

/// A freshly spawned child: its three streams, pid and exit-status future
pub struct SpawnedProcess {
    pub pid: u32,
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
    pub exit: ExitFuture,
}

impl fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Capability to start a process with all three standard streams piped.
///
/// Spawning is synchronous; implementations that need a reactor must already
/// be running inside one.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, command: &CommandLine, config: &CommandConfig) -> Result<SpawnedProcess>;
}

pub struct TokioProcessSpawner;

impl TokioProcessSpawner {
    /// Log command execution details
    fn log_command_start(command: &CommandLine, config: &CommandConfig) {
        tracing::debug!("Executing subprocess: {}", command);

        if !config.env.is_empty() {
            tracing::debug!(
                "Environment variables count: {}, total size: {} bytes",
                config.env.len(),
                config
                    .env
                    .iter()
                    .map(|(k, v)| k.len() + v.len() + 2)
                    .sum::<usize>()
            );
            tracing::trace!("Environment variables: {:?}", config.env);
        }

        if let Some(ref dir) = config.working_dir {
            tracing::trace!("Working directory: {:?}", dir);
        }
    }

    /// Configure the command with environment, working directory and piped stdio
    fn configure_command(command: &CommandLine, config: &CommandConfig) -> tokio::process::Command {
        let mut cmd = match command {
            CommandLine::Shell(line) => {
                let mut cmd = tokio::process::Command::new("sh");
                cmd.arg("-c").arg(line);
                cmd
            }
            CommandLine::Argv(argv) => {
                let (program, args) = argv.split_first().map_or(("", &[][..]), |(p, a)| (p.as_str(), a));
                let mut cmd = tokio::process::Command::new(program);
                cmd.args(args);
                cmd
            }
        };

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // Keep terminal signals aimed at us away from the child
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    fn missing_pipe(command: &CommandLine, name: &str) -> CommandError {
        CommandError::Spawn {
            command: command.to_string(),
            source: std::io::Error::other(format!("{name} was not captured")),
        }
    }
}

impl ProcessSpawner for TokioProcessSpawner {
    fn spawn(&self, command: &CommandLine, config: &CommandConfig) -> Result<SpawnedProcess> {
        Self::log_command_start(command, config);

        if let CommandLine::Argv(argv) = command {
            if argv.is_empty() {
                return Err(CommandError::Spawn {
                    command: String::new(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "empty argument vector",
                    ),
                });
            }
        }

        let mut child = Self::configure_command(command, config)
            .spawn()
            .map_err(|e| CommandError::spawn(command.to_string(), e))?;

        let pid = child
            .id()
            .ok_or_else(|| Self::missing_pipe(command, "process id"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Self::missing_pipe(command, "stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Self::missing_pipe(command, "stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Self::missing_pipe(command, "stderr"))?;

        tracing::debug!("Spawned process {} for: {}", pid, command);

        Ok(SpawnedProcess {
            pid,
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit: Box::pin(async move { child.wait().await.map(ExitStatus::from) }),
        })
    }
}
