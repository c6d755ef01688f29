//! Stream-level plumbing: output parsing, observer dispatch and stream handles
//!
//! Every chunk read from a child stream flows through a [`StreamHandle`],
//! which feeds its parser and notifies the observers registered for that
//! stream in a fixed order: chunk, then line, then update.

pub mod handle;
pub mod observer;
pub mod parser;
pub mod types;


pub use handle::{ParserFactory, StreamHandle, StreamHandlers};
pub use observer::{ChunkCallback, LineCallback, ObserverRegistry, UpdateCallback};
pub use parser::{LineParser, OutputParser, RenderedBuffer};
pub use types::{MatchOptions, MatchSelect, MatchSource, PatternMatch, StreamName, StreamState};
