//! Command lifecycle: spawn, observe, kill and re-execute

use super::builder::{CommandBuilder, CommandLine};
use super::config::CommandConfig;
use super::coordinator::{
    Completion, CompletionCoordinator, CompletionListener, CompletionState, ExitResolution,
    ProcessOutcome,
};
use super::error::{CommandError, Result};
use super::runner::{ExitStatus, ProcessSpawner, TokioProcessSpawner};
use super::streaming::{ObserverRegistry, StreamHandle, StreamName};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

pub type CommandCallback = Arc<dyn Fn(&SystemCommand) + Send + Sync>;
pub type ExitCallback = Arc<dyn Fn(&ExitStatus) + Send + Sync>;

#[derive(Default)]
struct ProcessObservers {
    success: RwLock<Vec<CommandCallback>>,
    failure: RwLock<Vec<CommandCallback>>,
    exit: RwLock<Vec<ExitCallback>>,
}

/// State of one `execute` call
struct Execution {
    pid: u32,
    streams: [Arc<StreamHandle>; 3],
    coordinator: Arc<CompletionCoordinator>,
}

impl Execution {
    fn stream(&self, name: StreamName) -> &Arc<StreamHandle> {
        &self.streams[name.index()]
    }

    fn has_open_streams(&self) -> bool {
        self.streams.iter().any(|stream| stream.is_open())
    }

    fn close_streams(&self) {
        for stream in &self.streams {
            stream.close();
        }
    }
}

struct CommandInner {
    command: CommandLine,
    config: CommandConfig,
    spawner: Arc<dyn ProcessSpawner>,
    streams: [Arc<ObserverRegistry>; 3],
    observers: ProcessObservers,
    current: Mutex<Option<Arc<Execution>>>,
}

/// A child process whose streams are observed as events.
///
/// Observers registered on [`SystemCommand::stdout`] and friends persist
/// across executions; each [`SystemCommand::execute`] gets fresh stream
/// handles, parsers and completion state. Cloning is cheap and every clone
/// refers to the same command.
#[derive(Clone)]
pub struct SystemCommand {
    inner: Arc<CommandInner>,
}

impl SystemCommand {
    pub fn new(command: impl Into<CommandLine>) -> Self {
        Self::with_config(command, CommandConfig::default())
    }

    pub fn with_config(command: impl Into<CommandLine>, config: CommandConfig) -> Self {
        Self::with_spawner(command, config, Arc::new(TokioProcessSpawner))
    }

    pub fn with_spawner(
        command: impl Into<CommandLine>,
        config: CommandConfig,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        Self {
            inner: Arc::new(CommandInner {
                command: command.into(),
                config,
                spawner,
                streams: StreamName::ALL.map(|name| Arc::new(ObserverRegistry::new(name))),
                observers: ProcessObservers::default(),
                current: Mutex::new(None),
            }),
        }
    }

    pub fn from_builder(builder: &CommandBuilder) -> Self {
        Self::new(builder.build())
    }

    /// Create the command, let `setup` register observers, then execute it.
    pub fn run_with<F>(command: impl Into<CommandLine>, setup: F) -> Result<Self>
    where
        F: FnOnce(&SystemCommand),
    {
        let cmd = Self::new(command);
        setup(&cmd);
        cmd.execute()?;
        Ok(cmd)
    }

    pub fn command(&self) -> &CommandLine {
        &self.inner.command
    }

    pub fn config(&self) -> &CommandConfig {
        &self.inner.config
    }

    /// Observer registry for a stream; registrations outlive executions.
    pub fn stream(&self, name: StreamName) -> &Arc<ObserverRegistry> {
        &self.inner.streams[name.index()]
    }

    pub fn stdin(&self) -> &Arc<ObserverRegistry> {
        self.stream(StreamName::Stdin)
    }

    pub fn stdout(&self) -> &Arc<ObserverRegistry> {
        self.stream(StreamName::Stdout)
    }

    pub fn stderr(&self) -> &Arc<ObserverRegistry> {
        self.stream(StreamName::Stderr)
    }

    /// The current execution's handle for a stream.
    pub fn handle(&self, name: StreamName) -> Option<Arc<StreamHandle>> {
        self.current()
            .map(|execution| Arc::clone(execution.stream(name)))
    }

    pub fn on_success<F>(&self, callback: F)
    where
        F: Fn(&SystemCommand) + Send + Sync + 'static,
    {
        push(&self.inner.observers.success, Arc::new(callback));
    }

    pub fn on_failure<F>(&self, callback: F)
    where
        F: Fn(&SystemCommand) + Send + Sync + 'static,
    {
        push(&self.inner.observers.failure, Arc::new(callback));
    }

    pub fn on_exit<F>(&self, callback: F)
    where
        F: Fn(&ExitStatus) + Send + Sync + 'static,
    {
        push(&self.inner.observers.exit, Arc::new(callback));
    }

    /// Spawn the process and start delivering its output.
    ///
    /// Returns immediately; must be called from within a tokio runtime.
    /// Fails with [`CommandError::AlreadyRunning`] while a previous
    /// execution still has an open stream.
    pub fn execute(&self) -> Result<()> {
        let mut current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if current
            .as_ref()
            .is_some_and(|execution| execution.has_open_streams())
        {
            return Err(CommandError::AlreadyRunning);
        }

        let config = &self.inner.config;
        let process = self.inner.spawner.spawn(&self.inner.command, config)?;

        let coordinator = Arc::new(CompletionCoordinator::new(
            config.exit_status_timeout,
            Some(self.completion_listener()),
        ));
        let streams = StreamName::ALL.map(|name| {
            Arc::new(StreamHandle::new(
                name,
                Arc::clone(self.stream(name)),
                config.handlers.parser_for(name),
                Arc::downgrade(&coordinator),
            ))
        });

        streams[StreamName::Stdin.index()].attach_writer(process.stdin);
        streams[StreamName::Stdout.index()].spawn_reader(process.stdout, config.read_buffer_size);
        streams[StreamName::Stderr.index()].spawn_reader(process.stderr, config.read_buffer_size);

        let reaper_coordinator = Arc::clone(&coordinator);
        let stdin = Arc::clone(&streams[StreamName::Stdin.index()]);
        let exit = process.exit;
        let pid = process.pid;
        tokio::spawn(async move {
            let resolution = match exit.await {
                Ok(status) => {
                    tracing::debug!("Process {} exited: {}", pid, status);
                    ExitResolution::Exited(status)
                }
                Err(e) => ExitResolution::Unavailable(format!("failed to wait for {pid}: {e}")),
            };
            reaper_coordinator.exit_resolved(resolution);
            stdin.close();
        });

        *current = Some(Arc::new(Execution {
            pid,
            streams,
            coordinator,
        }));
        Ok(())
    }

    /// Send `signal` (the configured kill signal when `None`) to the process.
    ///
    /// With `wait`, returns the exit status once the process is reaped. All
    /// three streams are closed before returning either way.
    pub async fn kill(
        &self,
        signal: impl Into<Option<Signal>>,
        wait: bool,
    ) -> Result<Option<ExitStatus>> {
        let execution = self.current().ok_or(CommandError::NotStarted)?;
        let signal = signal.into().unwrap_or(self.inner.config.kill_signal);

        tracing::debug!("Sending {} to process {}", signal, execution.pid);
        let pid = i32::try_from(execution.pid).map_err(|_| CommandError::SignalDelivery {
            pid: execution.pid,
            signal,
            source: nix::errno::Errno::ESRCH,
        })?;
        nix::sys::signal::kill(Pid::from_raw(pid), signal).map_err(|source| {
            CommandError::SignalDelivery {
                pid: execution.pid,
                signal,
                source,
            }
        })?;

        let resolution = if wait {
            Some(execution.coordinator.wait_exit().await)
        } else {
            None
        };

        execution.close_streams();
        resolution.map(resolve).transpose()
    }

    /// Close stdin so the child sees end-of-file.
    pub fn close_stdin(&self) -> Result<()> {
        let execution = self.current().ok_or(CommandError::NotStarted)?;
        execution.stream(StreamName::Stdin).close();
        Ok(())
    }

    pub async fn write_stdin(&self, data: &[u8]) -> Result<()> {
        let execution = self.current().ok_or(CommandError::NotStarted)?;
        execution.stream(StreamName::Stdin).write(data).await
    }

    pub fn pid(&self) -> Option<u32> {
        self.current().map(|execution| execution.pid)
    }

    pub fn is_running(&self) -> bool {
        self.current()
            .is_some_and(|execution| execution.coordinator.state() != CompletionState::Completed)
    }

    pub fn outcome(&self) -> ProcessOutcome {
        self.current()
            .map_or(ProcessOutcome::Pending, |execution| {
                execution.coordinator.outcome()
            })
    }

    pub fn completion_state(&self) -> Option<CompletionState> {
        self.current()
            .map(|execution| execution.coordinator.state())
    }

    /// Exit status if the process has already been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.current()
            .and_then(|execution| execution.coordinator.exit_resolution())
            .and_then(|resolution| resolution.status())
    }

    /// Wait for the process to exit, without waiting for its streams.
    pub async fn wait_exit(&self) -> Result<ExitStatus> {
        let execution = self.current().ok_or(CommandError::NotStarted)?;
        resolve(execution.coordinator.wait_exit().await)
    }

    /// Wait for the execution to complete: every stream closed and the exit
    /// status known. Success and failure observers have run by the time this
    /// returns.
    pub async fn wait(&self) -> Result<ExitStatus> {
        let completion = self.wait_completion().await?;
        resolve(completion.resolution)
    }

    pub async fn wait_completion(&self) -> Result<Completion> {
        let execution = self.current().ok_or(CommandError::NotStarted)?;
        Ok(execution.coordinator.wait().await)
    }

    /// Rendered output of a stream for the current execution.
    pub fn output(&self, name: StreamName) -> String {
        self.handle(name)
            .map(|handle| handle.output())
            .unwrap_or_default()
    }

    fn current(&self) -> Option<Arc<Execution>> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn completion_listener(&self) -> CompletionListener {
        let inner: Weak<CommandInner> = Arc::downgrade(&self.inner);
        Box::new(move |completion: &Completion| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let cmd = SystemCommand { inner };
            cmd.notify(completion);
        })
    }

    fn notify(&self, completion: &Completion) {
        let observers = &self.inner.observers;
        let outcome_callbacks = match completion.outcome {
            ProcessOutcome::Succeeded => snapshot(&observers.success),
            _ => snapshot(&observers.failure),
        };
        for callback in outcome_callbacks {
            callback(self);
        }

        if let ExitResolution::Exited(status) = &completion.resolution {
            for callback in snapshot(&observers.exit) {
                callback(status);
            }
        }
    }
}

impl fmt::Debug for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemCommand")
            .field("command", &self.inner.command)
            .field("pid", &self.pid())
            .field("outcome", &self.outcome())
            .finish()
    }
}

fn resolve(resolution: ExitResolution) -> Result<ExitStatus> {
    match resolution {
        ExitResolution::Exited(status) => Ok(status),
        ExitResolution::Unavailable(reason) => Err(CommandError::ExitStatusUnavailable(reason)),
    }
}

fn push<T>(list: &RwLock<Vec<T>>, callback: T) {
    list.write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(callback);
}

fn snapshot<T: Clone>(list: &RwLock<Vec<T>>) -> Vec<T> {
    list.read().unwrap_or_else(PoisonError::into_inner).clone()
}
