pub mod builder;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod mock;
pub mod runner;
pub mod streaming;

#[cfg(test)]
mod tests;

pub use builder::{Arg, CommandBuilder, CommandLine};
pub use command::{CommandCallback, ExitCallback, SystemCommand};
pub use config::{parse_signal, CommandConfig};
pub use coordinator::{
    Completion, CompletionCoordinator, CompletionState, ExitResolution, ProcessOutcome,
};
pub use error::{CommandError, Result};
pub use mock::{MockProcess, MockProcessSpawner};
pub use nix::sys::signal::Signal;
pub use runner::{ExitStatus, ProcessSpawner, SpawnedProcess, TokioProcessSpawner};
pub use streaming::{
    MatchOptions, MatchSelect, MatchSource, ObserverRegistry, OutputParser, PatternMatch,
    StreamHandle, StreamName, StreamState,
};
