//! Per-stream handle: parser, observers and closure reporting

use super::observer::ObserverRegistry;
use super::parser::{LineParser, OutputParser};
use super::types::{MatchOptions, PatternMatch, StreamName, StreamState};
use crate::subprocess::coordinator::CompletionCoordinator;
use crate::subprocess::error::{CommandError, Result};
use crate::subprocess::runner::{BoxedReader, BoxedWriter};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

pub type ParserFactory = Arc<dyn Fn(StreamName) -> Box<dyn OutputParser> + Send + Sync>;

/// Which parser each stream gets. Streams without an entry use [`LineParser`].
#[derive(Clone, Default)]
pub struct StreamHandlers {
    factories: HashMap<StreamName, ParserFactory>,
}

impl StreamHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, stream: StreamName, factory: F) -> Self
    where
        F: Fn(StreamName) -> Box<dyn OutputParser> + Send + Sync + 'static,
    {
        self.factories.insert(stream, Arc::new(factory));
        self
    }

    pub fn parser_for(&self, stream: StreamName) -> Box<dyn OutputParser> {
        match self.factories.get(&stream) {
            Some(factory) => factory(stream),
            None => Box::new(LineParser::new()),
        }
    }
}

impl fmt::Debug for StreamHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut custom: Vec<_> = self.factories.keys().collect();
        custom.sort();
        f.debug_struct("StreamHandlers")
            .field("custom", &custom)
            .finish()
    }
}

/// One standard stream of a running command.
///
/// Chunks delivered through [`StreamHandle::receive`] are dispatched as:
/// chunk observers, then line observers once per completed line, then update
/// observers once with the rendered output.
pub struct StreamHandle {
    name: StreamName,
    observers: Arc<ObserverRegistry>,
    parser: Mutex<Box<dyn OutputParser>>,
    closed: AtomicBool,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    owner: Weak<CompletionCoordinator>,
}

impl StreamHandle {
    pub fn new(
        name: StreamName,
        observers: Arc<ObserverRegistry>,
        parser: Box<dyn OutputParser>,
        owner: Weak<CompletionCoordinator>,
    ) -> Self {
        Self {
            name,
            observers,
            parser: Mutex::new(parser),
            closed: AtomicBool::new(false),
            writer: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
            owner,
        }
    }

    /// A handle with a line parser and no owner to report closure to.
    pub fn detached(name: StreamName) -> Self {
        Self::new(
            name,
            Arc::new(ObserverRegistry::new(name)),
            Box::new(LineParser::new()),
            Weak::new(),
        )
    }

    pub fn name(&self) -> StreamName {
        self.name
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    pub fn on_chunk<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.observers.on_chunk(callback);
    }

    pub fn on_line<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.observers.on_line(callback);
    }

    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.observers.on_update(callback);
    }

    pub fn on_match<F>(&self, pattern: Regex, options: MatchOptions, callback: F)
    where
        F: Fn(&PatternMatch) + Send + Sync + 'static,
    {
        self.observers.on_match(pattern, options, callback);
    }

    pub fn state(&self) -> StreamState {
        if self.closed.load(Ordering::Acquire) {
            StreamState::Closed
        } else {
            StreamState::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == StreamState::Open
    }

    /// Rendered output so far.
    pub fn output(&self) -> String {
        self.parser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .output()
    }

    /// Deliver one chunk read from the stream.
    ///
    /// Chunks arriving after the handle closed are dropped.
    pub fn receive(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        if !self.is_open() {
            tracing::trace!("Dropping {} bytes on closed {}", chunk.len(), self.name);
            return;
        }
        tracing::trace!("Received {} bytes on {}", chunk.len(), self.name);

        self.observers.dispatch_chunk(chunk);

        let (lines, output) = {
            let mut parser = self.parser.lock().unwrap_or_else(PoisonError::into_inner);
            let lines = parser.feed(chunk);
            (lines, parser.output())
        };

        for line in &lines {
            self.observers.dispatch_line(line);
        }
        self.observers.dispatch_update(&output);
    }

    /// Close the stream. Closing twice is a no-op and errors are ignored.
    ///
    /// Stops the reader task, drops the stdin writer and reports the closure
    /// to the owning coordinator.
    pub fn close(&self) {
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
        self.mark_closed();
    }

    /// Transition to `Closed` and notify the owner, once.
    pub(crate) fn mark_closed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        match self.writer.try_lock() {
            Ok(mut writer) => drop(writer.take()),
            Err(_) => tracing::debug!("{} writer busy while closing; dropped after write", self.name),
        }

        let pending = self
            .parser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending_len();
        if pending > 0 {
            tracing::trace!(
                "{} closed with {} unterminated bytes left in the rendered output",
                self.name,
                pending
            );
        }
        tracing::debug!("Stream {} closed", self.name);

        if let Some(owner) = self.owner.upgrade() {
            owner.stream_closed(self.name);
        }
    }

    /// Give a fresh stdin handle its writer.
    pub(crate) fn attach_writer(&self, writer: BoxedWriter) {
        if let Ok(mut slot) = self.writer.try_lock() {
            *slot = Some(writer);
        }
    }

    /// Write to the child's stdin.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut slot = self.writer.lock().await;
        if !self.is_open() {
            slot.take();
            return Err(CommandError::StdinClosed);
        }
        let writer = slot.as_mut().ok_or(CommandError::StdinClosed)?;
        writer.write_all(data).await?;
        writer.flush().await?;

        if !self.is_open() {
            slot.take();
        }
        Ok(())
    }

    /// Start reading `reader` on a tokio task, closing the handle at end-of-stream.
    pub(crate) fn spawn_reader(self: &Arc<Self>, mut reader: BoxedReader, buffer_size: usize) {
        let handle = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut buffer = vec![0u8; buffer_size.max(1)];
            loop {
                match reader.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(count) => handle.receive(&buffer[..count]),
                    Err(e) => {
                        tracing::debug!("Read error on {}: {}", handle.name, e);
                        break;
                    }
                }
            }
            handle.mark_closed();
        });

        let mut slot = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_open() {
            *slot = Some(task);
        } else {
            task.abort();
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::streaming::types::{MatchSelect, MatchSource};

    fn recorder(handle: &StreamHandle) -> Arc<Mutex<Vec<String>>> {
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&events);
        handle.on_chunk(move |chunk| {
            sink.lock()
                .unwrap()
                .push(format!("chunk:{}", String::from_utf8_lossy(chunk)))
        });
        let sink = Arc::clone(&events);
        handle.on_line(move |line| sink.lock().unwrap().push(format!("line:{line}")));
        let sink = Arc::clone(&events);
        handle.on_update(move |output| sink.lock().unwrap().push(format!("update:{output}")));

        events
    }

    #[test]
    fn test_dispatch_order_within_chunk() {
        let handle = StreamHandle::detached(StreamName::Stdout);
        let events = recorder(&handle);

        handle.receive(b"a\nb\nc");

        assert_eq!(
            *events.lock().unwrap(),
            vec!["chunk:a\nb\nc", "line:a", "line:b", "update:a\nb\nc"]
        );
    }

    #[test]
    fn test_chunk_and_update_fire_once_per_chunk() {
        let handle = StreamHandle::detached(StreamName::Stdout);
        let chunks = Arc::new(Mutex::new(0));
        let updates = Arc::new(Mutex::new(0));

        let sink = Arc::clone(&chunks);
        handle.on_chunk(move |_| *sink.lock().unwrap() += 1);
        let sink = Arc::clone(&updates);
        handle.on_update(move |_| *sink.lock().unwrap() += 1);

        handle.receive(b"1\n2\r3\r\n4\n5\n6\n");
        handle.receive(b"7\n");

        assert_eq!(*chunks.lock().unwrap(), 2);
        assert_eq!(*updates.lock().unwrap(), 2);
    }

    #[test]
    fn test_empty_chunk_fires_nothing() {
        let handle = StreamHandle::detached(StreamName::Stdout);
        let events = recorder(&handle);

        handle.receive(b"");
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_match_last_on_output_across_chunks() {
        let handle = StreamHandle::detached(StreamName::Stdout);
        let matches = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&matches);
        handle.on_match(
            Regex::new(r"-(\d+)-").unwrap(),
            MatchOptions::new()
                .source(MatchSource::Output)
                .which(MatchSelect::Last),
            move |m| sink.lock().unwrap().push(m.group(1).unwrap_or("").to_string()),
        );

        handle.receive(b"-123-\r");
        handle.receive(b"-456-\r");

        assert_eq!(*matches.lock().unwrap(), vec!["123", "456"]);
        assert_eq!(handle.output(), "-456-");
    }

    #[test]
    fn test_carriage_return_updates_show_overwrites() {
        let handle = StreamHandle::detached(StreamName::Stdout);
        let events = recorder(&handle);

        handle.receive(b"123\r");
        handle.receive(b"456\r");

        let events = events.lock().unwrap();
        let updates: Vec<_> = events.iter().filter(|e| e.starts_with("update:")).collect();
        assert_eq!(updates, vec!["update:123", "update:456"]);
        assert!(events.contains(&"line:123".to_string()));
    }

    #[test]
    fn test_close_is_idempotent_and_drops_later_chunks() {
        let handle = StreamHandle::detached(StreamName::Stderr);
        let events = recorder(&handle);

        handle.receive(b"partial");
        handle.close();
        handle.close();
        handle.receive(b" more\n");

        assert_eq!(handle.state(), StreamState::Closed);
        assert_eq!(handle.output(), "partial");
        assert!(!events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.starts_with("line:")));
    }

    #[test]
    fn test_custom_parser_from_handlers() {
        struct Upper(String);

        impl OutputParser for Upper {
            fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
                let text = String::from_utf8_lossy(chunk).to_uppercase();
                self.0.push_str(&text);
                vec![text]
            }

            fn output(&self) -> String {
                self.0.clone()
            }
        }

        let handlers =
            StreamHandlers::new().with(StreamName::Stderr, |_| Box::new(Upper(String::new())));
        let handle = StreamHandle::new(
            StreamName::Stderr,
            Arc::new(ObserverRegistry::new(StreamName::Stderr)),
            handlers.parser_for(StreamName::Stderr),
            Weak::new(),
        );
        handle.receive(b"warn");

        assert_eq!(handle.output(), "WARN");
        assert_eq!(handlers.parser_for(StreamName::Stdout).output(), "");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let handle = StreamHandle::detached(StreamName::Stdin);
        let (writer, _reader) = tokio::io::duplex(64);
        handle.attach_writer(Box::new(writer));

        handle.write(b"ping").await.unwrap();
        handle.close();

        assert!(matches!(
            handle.write(b"pong").await,
            Err(CommandError::StdinClosed)
        ));
    }

    #[tokio::test]
    async fn test_reader_task_closes_at_end_of_stream() {
        let handle = Arc::new(StreamHandle::detached(StreamName::Stdout));
        let (mut writer, reader) = tokio::io::duplex(64);

        handle.spawn_reader(Box::new(reader), 16);
        writer.write_all(b"hello\n").await.unwrap();
        drop(writer);

        for _ in 0..100 {
            if !handle.is_open() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(handle.state(), StreamState::Closed);
        assert_eq!(handle.output(), "hello\n");
    }
}
