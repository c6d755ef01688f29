//! Incremental line parsing with carriage-return overwrite semantics
//!
//! Output arrives as arbitrary byte chunks. [`LineParser`] turns them into
//! completed logical lines (terminated by `\n`, `\r\n` or a lone `\r`) and keeps
//! a [`RenderedBuffer`] holding what a terminal would currently display.

/// Parser driven by one stream's chunk deliveries.
///
/// Implementations must not block; they are called from the reader task of the
/// stream they belong to.
pub trait OutputParser: Send {
    /// Consume one chunk and return the logical lines it completed, in order.
    fn feed(&mut self, chunk: &[u8]) -> Vec<String>;

    /// Rendered output accumulated so far.
    fn output(&self) -> String;

    /// Number of bytes received but not yet terminated.
    fn pending_len(&self) -> usize {
        0
    }
}

/// Byte buffer with a cursor, emulating `\r` and `\n` the way a terminal does.
///
/// Writes overwrite bytes under the cursor and extend the buffer past its end.
/// A carriage return moves the cursor back to the start of the current line;
/// a line feed moves it to the end and starts a new line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenderedBuffer {
    bytes: Vec<u8>,
    cursor: usize,
    line_start: usize,
}

impl RenderedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write bytes at the cursor, advancing it.
    pub fn write(&mut self, data: &[u8]) {
        let overlap = data.len().min(self.bytes.len() - self.cursor);
        self.bytes[self.cursor..self.cursor + overlap].copy_from_slice(&data[..overlap]);
        self.bytes.extend_from_slice(&data[overlap..]);
        self.cursor += data.len();
    }

    /// Return the cursor to the offset following the last line feed.
    pub fn carriage_return(&mut self) {
        self.cursor = self.line_start;
    }

    /// Jump to the end of the buffer and append a line feed.
    pub fn line_feed(&mut self) {
        self.bytes.push(b'\n');
        self.cursor = self.bytes.len();
        self.line_start = self.cursor;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Offset just past the most recent line feed.
    pub fn line_start(&self) -> usize {
        self.line_start
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Carriage-return-aware line parser.
///
/// A `\r` that ends a chunk is held until the next byte is known, so a `\r\n`
/// pair split across two chunks still terminates a single line. Neither that
/// held `\r` nor an unterminated remainder is ever flushed as a line when the
/// stream ends; read [`LineParser::output`] for the final partial line.
#[derive(Debug, Default)]
pub struct LineParser {
    pending: Vec<u8>,
    pending_cr: bool,
    buffer: RenderedBuffer,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &RenderedBuffer {
        &self.buffer
    }

    /// Bytes of the line currently being assembled.
    pub fn pending_line(&self) -> &[u8] {
        &self.pending
    }

    /// Whether a trailing `\r` is waiting for the next byte.
    pub fn has_pending_carriage_return(&self) -> bool {
        self.pending_cr
    }

    /// Consume one chunk and return the completed lines in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        if chunk.is_empty() {
            return lines;
        }

        let mut rest = chunk;
        if self.pending_cr {
            self.pending_cr = false;
            if rest[0] == b'\n' {
                lines.push(self.end_with_line_feed());
                rest = &rest[1..];
            } else {
                lines.push(self.end_with_carriage_return());
            }
        }

        while let Some(ix) = rest.iter().position(|b| matches!(b, b'\n' | b'\r')) {
            let terminator = rest[ix];
            let tail = &rest[ix + 1..];
            self.accept(&rest[..ix]);

            if terminator == b'\n' {
                lines.push(self.end_with_line_feed());
                rest = tail;
            } else if tail.is_empty() {
                self.pending_cr = true;
                rest = tail;
            } else if tail[0] == b'\n' {
                lines.push(self.end_with_line_feed());
                rest = &tail[1..];
            } else {
                lines.push(self.end_with_carriage_return());
                rest = tail;
            }
        }

        self.accept(rest);
        lines
    }

    /// Unterminated bytes become visible immediately.
    fn accept(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.pending.extend_from_slice(data);
        self.buffer.write(data);
    }

    fn end_with_line_feed(&mut self) -> String {
        self.buffer.line_feed();
        self.take_line()
    }

    fn end_with_carriage_return(&mut self) -> String {
        self.buffer.carriage_return();
        self.take_line()
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

impl OutputParser for LineParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        LineParser::feed(self, chunk)
    }

    fn output(&self) -> String {
        self.buffer.to_string_lossy()
    }

    fn pending_len(&self) -> usize {
        self.pending.len() + usize::from(self.pending_cr)
    }
}
