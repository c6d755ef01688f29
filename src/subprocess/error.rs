use nix::errno::Errno;
use nix::sys::signal::Signal;

pub type Result<T, E = CommandError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command is still running: previous execution has open streams")]
    AlreadyRunning,

    #[error("Command has not been executed yet")]
    NotStarted,

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to deliver {signal} to process {pid}: {source}")]
    SignalDelivery {
        pid: u32,
        signal: Signal,
        #[source]
        source: Errno,
    },

    #[error("Exit status unavailable: {0}")]
    ExitStatusUnavailable(String),

    #[error("stdin is closed")]
    StdinClosed,

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommandError {
    /// Classify a spawn failure, separating a missing program from other errors.
    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        let command = command.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            CommandError::CommandNotFound(command)
        } else {
            CommandError::Spawn { command, source }
        }
    }
}
