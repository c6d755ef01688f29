//! Completion tracking across the three streams and the exit-status reaper

use super::runner::ExitStatus;
use super::streaming::StreamName;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// No stream has closed yet
    Running,
    /// At least one stream closed; waiting for the rest or the exit status
    Draining,
    /// Outcome decided
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Pending,
    Succeeded,
    Failed,
}

/// Result of waiting on the child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitResolution {
    Exited(ExitStatus),
    Unavailable(String),
}

impl ExitResolution {
    pub fn status(&self) -> Option<ExitStatus> {
        match self {
            ExitResolution::Exited(status) => Some(*status),
            ExitResolution::Unavailable(_) => None,
        }
    }
}

/// Final record of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub outcome: ProcessOutcome,
    pub resolution: ExitResolution,
}

pub type CompletionListener = Box<dyn Fn(&Completion) + Send + Sync>;

struct Progress {
    closed: [bool; 3],
    exit: Option<ExitResolution>,
    state: CompletionState,
    outcome: ProcessOutcome,
    grace_timer_started: bool,
}

/// Decides the outcome of one execution, exactly once.
///
/// The outcome is settled when all three streams have closed and the exit
/// status has resolved. Both conditions are tracked under one lock, so
/// whichever event completes the set performs the transition; the listener
/// and waiters are notified after the lock is released.
pub struct CompletionCoordinator {
    progress: Mutex<Progress>,
    exit_tx: watch::Sender<Option<ExitResolution>>,
    done_tx: watch::Sender<Option<Completion>>,
    exit_status_timeout: Option<Duration>,
    listener: Option<CompletionListener>,
}

impl CompletionCoordinator {
    pub fn new(exit_status_timeout: Option<Duration>, listener: Option<CompletionListener>) -> Self {
        Self {
            progress: Mutex::new(Progress {
                closed: [false; 3],
                exit: None,
                state: CompletionState::Running,
                outcome: ProcessOutcome::Pending,
                grace_timer_started: false,
            }),
            exit_tx: watch::channel(None).0,
            done_tx: watch::channel(None).0,
            exit_status_timeout,
            listener,
        }
    }

    pub fn state(&self) -> CompletionState {
        self.lock().state
    }

    pub fn outcome(&self) -> ProcessOutcome {
        self.lock().outcome
    }

    pub fn is_closed(&self, stream: StreamName) -> bool {
        self.lock().closed[stream.index()]
    }

    pub fn closed_count(&self) -> usize {
        self.lock().closed.iter().filter(|closed| **closed).count()
    }

    /// Exit resolution, if the reaper has reported one.
    pub fn exit_resolution(&self) -> Option<ExitResolution> {
        self.lock().exit.clone()
    }

    /// Record that a stream closed. Repeated reports are ignored.
    pub fn stream_closed(self: &Arc<Self>, stream: StreamName) {
        let completion = {
            let mut progress = self.lock();
            if progress.closed[stream.index()] {
                tracing::trace!("Ignoring repeated close of {}", stream);
                return;
            }
            progress.closed[stream.index()] = true;
            if progress.state == CompletionState::Running {
                progress.state = CompletionState::Draining;
            }

            let all_closed = progress.closed.iter().all(|closed| *closed);
            if all_closed && progress.exit.is_none() && !progress.grace_timer_started {
                progress.grace_timer_started = true;
                self.start_grace_timer();
            }
            Self::try_complete(&mut progress)
        };

        if let Some(completion) = completion {
            self.publish(completion);
        }
    }

    /// Record the reaper's result. Only the first report counts.
    pub fn exit_resolved(&self, resolution: ExitResolution) {
        let completion = {
            let mut progress = self.lock();
            if progress.exit.is_some() {
                tracing::trace!("Ignoring late exit resolution: {:?}", resolution);
                return;
            }
            if let ExitResolution::Unavailable(ref reason) = resolution {
                tracing::warn!("Exit status unavailable: {}", reason);
            }
            progress.exit = Some(resolution.clone());
            self.exit_tx.send_replace(Some(resolution));
            Self::try_complete(&mut progress)
        };

        if let Some(completion) = completion {
            self.publish(completion);
        }
    }

    /// Wait for the reaper's result.
    pub async fn wait_exit(&self) -> ExitResolution {
        let mut rx = self.exit_tx.subscribe();
        let resolved = rx.wait_for(Option::is_some).await;
        match resolved {
            Ok(value) => value
                .clone()
                .unwrap_or_else(|| ExitResolution::Unavailable("no exit status".to_string())),
            Err(_) => ExitResolution::Unavailable("coordinator dropped".to_string()),
        }
    }

    /// Wait until the outcome is decided.
    pub async fn wait(&self) -> Completion {
        let mut rx = self.done_tx.subscribe();
        let done = rx.wait_for(Option::is_some).await;
        match done {
            Ok(value) => value.clone().unwrap_or_else(Self::dropped),
            Err(_) => Self::dropped(),
        }
    }

    fn dropped() -> Completion {
        Completion {
            outcome: ProcessOutcome::Failed,
            resolution: ExitResolution::Unavailable("coordinator dropped".to_string()),
        }
    }

    fn try_complete(progress: &mut Progress) -> Option<Completion> {
        if progress.state == CompletionState::Completed
            || !progress.closed.iter().all(|closed| *closed)
        {
            return None;
        }
        let resolution = progress.exit.clone()?;

        let outcome = match resolution {
            ExitResolution::Exited(status) if status.code() == Some(0) => ProcessOutcome::Succeeded,
            _ => ProcessOutcome::Failed,
        };
        progress.state = CompletionState::Completed;
        progress.outcome = outcome;
        Some(Completion {
            outcome,
            resolution,
        })
    }

    fn publish(&self, completion: Completion) {
        tracing::debug!(
            "Process completed: {:?} ({:?})",
            completion.outcome,
            completion.resolution
        );
        if let Some(listener) = &self.listener {
            listener(&completion);
        }
        self.done_tx.send_replace(Some(completion));
    }

    fn start_grace_timer(self: &Arc<Self>) {
        let Some(timeout) = self.exit_status_timeout else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime available; exit status wait is unbounded");
            return;
        };

        let coordinator = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.exit_resolved(ExitResolution::Unavailable(format!(
                    "no exit status within {timeout:?} after all streams closed"
                )));
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CompletionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progress = self.lock();
        f.debug_struct("CompletionCoordinator")
            .field("closed", &progress.closed)
            .field("state", &progress.state)
            .field("outcome", &progress.outcome)
            .finish()
    }
}
