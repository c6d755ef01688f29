use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;

use super::builder::CommandLine;
use super::config::CommandConfig;
use super::error::{CommandError, Result};
use super::runner::{ExitStatus, ProcessSpawner, SpawnedProcess};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Above the largest pid Linux hands out, so signals to these fail with `ESRCH`.
const FIRST_MOCK_PID: u32 = 0x40_0000;

/// Spawner handing out in-memory processes that tests drive by hand.
///
/// Each spawn queues a [`MockProcess`]; take it with
/// [`MockProcessSpawner::take_process`] to write output, close streams and
/// report an exit status.
#[derive(Clone)]
pub struct MockProcessSpawner {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    call_history: Vec<CommandLine>,
    processes: VecDeque<MockProcess>,
    fail_next: Option<io::ErrorKind>,
    next_pid: u32,
}

impl MockProcessSpawner {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                call_history: Vec::new(),
                processes: VecDeque::new(),
                fail_next: None,
                next_pid: FIRST_MOCK_PID,
            })),
        }
    }

    /// Make the next spawn fail with an I/O error of `kind`.
    pub fn fail_next_spawn(&self, kind: io::ErrorKind) {
        self.state.lock().unwrap().fail_next = Some(kind);
    }

    /// Oldest spawned process not yet taken.
    pub fn take_process(&self) -> Option<MockProcess> {
        self.state.lock().unwrap().processes.pop_front()
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().unwrap().call_history.len()
    }

    pub fn get_call_history(&self) -> Vec<CommandLine> {
        self.state.lock().unwrap().call_history.clone()
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.call_history.clear();
        state.processes.clear();
        state.fail_next = None;
    }
}

impl Default for MockProcessSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSpawner for MockProcessSpawner {
    fn spawn(&self, command: &CommandLine, _config: &CommandConfig) -> Result<SpawnedProcess> {
        let mut state = self.state.lock().unwrap();
        state.call_history.push(command.clone());

        if let Some(kind) = state.fail_next.take() {
            return Err(CommandError::spawn(
                command.to_string(),
                io::Error::new(kind, "mock spawn failure"),
            ));
        }

        let pid = state.next_pid;
        state.next_pid += 1;

        let (stdin_writer, stdin_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_writer, stdout_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();

        state.processes.push_back(MockProcess {
            pid,
            stdin: stdin_reader,
            stdout: Some(stdout_writer),
            stderr: Some(stderr_writer),
            exit: Some(exit_tx),
        });

        Ok(SpawnedProcess {
            pid,
            stdin: Box::new(stdin_writer),
            stdout: Box::new(stdout_reader),
            stderr: Box::new(stderr_reader),
            exit: Box::pin(async move {
                exit_rx
                    .await
                    .unwrap_or_else(|_| Err(io::Error::other("mock process dropped")))
            }),
        })
    }
}

/// The child side of a mock process
pub struct MockProcess {
    pid: u32,
    stdin: DuplexStream,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    exit: Option<oneshot::Sender<io::Result<ExitStatus>>>,
}

impl MockProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub async fn write_stdout(&mut self, data: &[u8]) -> io::Result<()> {
        Self::write(&mut self.stdout, data).await
    }

    pub async fn write_stderr(&mut self, data: &[u8]) -> io::Result<()> {
        Self::write(&mut self.stderr, data).await
    }

    pub fn close_stdout(&mut self) {
        self.stdout.take();
    }

    pub fn close_stderr(&mut self) {
        self.stderr.take();
    }

    /// Report an exit code. Only the first report is delivered.
    pub fn exit(&mut self, code: i32) {
        self.exit_with(ExitStatus::from_code(code));
    }

    pub fn exit_with(&mut self, status: ExitStatus) {
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(Ok(status));
        }
    }

    /// Make waiting on the process fail.
    pub fn fail_exit(&mut self, message: &str) {
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(Err(io::Error::other(message.to_string())));
        }
    }

    /// Close both output streams and exit with `code`.
    pub fn finish(&mut self, code: i32) {
        self.close_stdout();
        self.close_stderr();
        self.exit(code);
    }

    /// Everything written to stdin until the parent closes it.
    pub async fn read_stdin(&mut self) -> io::Result<String> {
        let mut input = Vec::new();
        self.stdin.read_to_end(&mut input).await?;
        Ok(String::from_utf8_lossy(&input).into_owned())
    }

    async fn write(stream: &mut Option<DuplexStream>, data: &[u8]) -> io::Result<()> {
        let stream = stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stream closed"))?;
        stream.write_all(data).await?;
        stream.flush().await
    }
}
