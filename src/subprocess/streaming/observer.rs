//! Observer registration and dispatch for a single stream

use super::types::{MatchOptions, MatchSelect, MatchSource, PatternMatch, StreamName};
use crate::subprocess::error::Result;
use regex::Regex;
use std::sync::{Arc, PoisonError, RwLock};

pub type ChunkCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type UpdateCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Ordered callback lists for one stream.
///
/// Lists only grow. Dispatch copies the current list before invoking it, so a
/// callback may register further callbacks; those see subsequent events only.
pub struct ObserverRegistry {
    stream: StreamName,
    chunk: RwLock<Vec<ChunkCallback>>,
    line: RwLock<Vec<LineCallback>>,
    update: RwLock<Vec<UpdateCallback>>,
}

impl ObserverRegistry {
    pub fn new(stream: StreamName) -> Self {
        Self {
            stream,
            chunk: RwLock::new(Vec::new()),
            line: RwLock::new(Vec::new()),
            update: RwLock::new(Vec::new()),
        }
    }

    pub fn stream(&self) -> StreamName {
        self.stream
    }

    /// Called once per delivered chunk with the raw bytes.
    pub fn on_chunk<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let callback: ChunkCallback = Arc::new(callback);
        push(&self.chunk, callback);
    }

    /// Called once per completed line, terminator stripped.
    pub fn on_line<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callback: LineCallback = Arc::new(callback);
        push(&self.line, callback);
    }

    /// Called once per delivered chunk with the full rendered output.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callback: UpdateCallback = Arc::new(callback);
        push(&self.update, callback);
    }

    /// Match `pattern` against lines or rendered output.
    ///
    /// The callback runs once per event that contains at least one match,
    /// receiving the first or last occurrence per `options.which`.
    pub fn on_match<F>(&self, pattern: Regex, options: MatchOptions, callback: F)
    where
        F: Fn(&PatternMatch) + Send + Sync + 'static,
    {
        let stream = self.stream;
        let matcher = move |text: &str| {
            let found = match options.which {
                MatchSelect::First => pattern.captures(text),
                MatchSelect::Last => pattern.captures_iter(text).last(),
            };
            if let Some(captures) = found {
                callback(&PatternMatch::from_captures(stream, &captures));
            }
        };

        let matcher: LineCallback = Arc::new(matcher);
        match options.source {
            MatchSource::Line => push(&self.line, matcher),
            MatchSource::Output => push(&self.update, matcher),
        }
    }

    /// Like [`ObserverRegistry::on_match`], compiling `pattern` first.
    pub fn on_match_str<F>(&self, pattern: &str, options: MatchOptions, callback: F) -> Result<()>
    where
        F: Fn(&PatternMatch) + Send + Sync + 'static,
    {
        let pattern = Regex::new(pattern)?;
        self.on_match(pattern, options, callback);
        Ok(())
    }

    pub fn dispatch_chunk(&self, chunk: &[u8]) {
        for callback in snapshot(&self.chunk) {
            callback(chunk);
        }
    }

    pub fn dispatch_line(&self, line: &str) {
        for callback in snapshot(&self.line) {
            callback(line);
        }
    }

    pub fn dispatch_update(&self, output: &str) {
        for callback in snapshot(&self.update) {
            callback(output);
        }
    }

    pub fn chunk_observers(&self) -> usize {
        read_len(&self.chunk)
    }

    pub fn line_observers(&self) -> usize {
        read_len(&self.line)
    }

    pub fn update_observers(&self) -> usize {
        read_len(&self.update)
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("stream", &self.stream)
            .field("chunk", &self.chunk_observers())
            .field("line", &self.line_observers())
            .field("update", &self.update_observers())
            .finish()
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

fn read_len<T>(list: &RwLock<Vec<T>>) -> usize {
    list.read().unwrap_or_else(PoisonError::into_inner).len()
}
