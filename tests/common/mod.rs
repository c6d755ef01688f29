//! Common test utilities and helpers

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use syscommand::subprocess::{ExitStatus, ObserverRegistry, Result, SystemCommand};

/// Upper bound for anything a test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared list filled by observer callbacks
#[derive(Clone, Default)]
pub struct Recorder {
    items: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: impl Into<String>) {
        self.items.lock().unwrap().push(item.into());
    }

    pub fn items(&self) -> Vec<String> {
        self.items.lock().unwrap().clone()
    }

    /// Record every line of a stream.
    pub fn lines_of(registry: &ObserverRegistry) -> Self {
        let recorder = Self::new();
        let sink = recorder.clone();
        registry.on_line(move |line| sink.push(line));
        recorder
    }

    /// Record every rendered-output update of a stream.
    pub fn updates_of(registry: &ObserverRegistry) -> Self {
        let recorder = Self::new();
        let sink = recorder.clone();
        registry.on_update(move |output| sink.push(output));
        recorder
    }
}

/// Wait for completion, failing the test instead of hanging.
pub async fn wait_done(cmd: &SystemCommand) -> Result<ExitStatus> {
    tokio::time::timeout(TEST_TIMEOUT, cmd.wait())
        .await
        .expect("command did not complete in time")
}
