use bytes::BytesMut;
use std::fmt::{self, Display, Formatter};

/// A number of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NumBytes(usize);

impl NumBytes {
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn bytes(&self) -> usize {
        self.0
    }
}

impl Display for NumBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

pub trait NumBytesExt {
    fn bytes(self) -> NumBytes;

    fn kilobytes(self) -> NumBytes;

    fn megabytes(self) -> NumBytes;
}

impl NumBytesExt for usize {
    fn bytes(self) -> NumBytes {
        NumBytes(self)
    }

    fn kilobytes(self) -> NumBytes {
        NumBytes(self * 1024)
    }

    fn megabytes(self) -> NumBytes {
        NumBytes(self * 1024 * 1024)
    }
}

/// Configuration for line parsing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineParsingOptions {
    /// Maximum length of a single line, excluding its line terminator.
    ///
    /// A line growing beyond this length is a fault for the stream it was read from. Bounds the
    /// memory a single unterminated line can consume.
    ///
    /// default: 1 MiB
    pub max_line_length: NumBytes,
}

impl Default for LineParsingOptions {
    fn default() -> Self {
        Self {
            max_line_length: 1.megabytes(),
        }
    }
}

/// A line grew beyond [LineParsingOptions::max_line_length].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineTooLong;

/// Conceptually, this iterator appends the given byte slice to the current line buffer, which may
/// already hold some previously written data.
/// The resulting view of data is split by newlines (`\n`). Every completed line is yielded,
/// without its terminator (a trailing `\r` is dropped as well).
/// The remainder of the chunk, not completed with a newline character, will become the new content
/// of `line_buffer`.
///
/// Bytes are only decoded once a line is complete, so multibyte characters split across chunks
/// survive. Invalid UTF-8 is replaced lossily.
///
/// # Members
/// * `chunk` - New slice of bytes to process.
/// * `line_buffer` - Buffer for reading one line.
///   May hold previously seen, not-yet-closed, line-data.
pub(crate) struct LineReader<'c, 'b> {
    chunk: &'c [u8],
    line_buffer: &'b mut BytesMut,
    options: LineParsingOptions,
}

impl<'c, 'b> LineReader<'c, 'b> {
    pub(crate) fn new(
        chunk: &'c [u8],
        line_buffer: &'b mut BytesMut,
        options: LineParsingOptions,
    ) -> Self {
        Self {
            chunk,
            line_buffer,
            options,
        }
    }

    /// Yields the unterminated remainder once the stream reached its end.
    pub(crate) fn finish(line_buffer: &mut BytesMut) -> Option<String> {
        if line_buffer.is_empty() {
            return None;
        }
        let line = line_buffer.split();
        Some(decode(&line))
    }

    fn exceeds_limit(&self, len: usize) -> bool {
        len > self.options.max_line_length.bytes()
    }
}

impl Iterator for LineReader<'_, '_> {
    type Item = Result<String, LineTooLong>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.chunk.is_empty() {
            return None;
        }

        match self.chunk.iter().position(|b| *b == b'\n') {
            None => {
                // No more line breaks - consume the remaining chunk.
                self.line_buffer.extend_from_slice(self.chunk);
                self.chunk = &[];
                if self.exceeds_limit(content_len(&self.line_buffer[..])) {
                    self.line_buffer.clear();
                    return Some(Err(LineTooLong));
                }
                None
            }
            Some(pos) => {
                let (until_line_break, rest) = self.chunk.split_at(pos);
                self.line_buffer.extend_from_slice(until_line_break);
                // `rest` starts with the line break itself.
                self.chunk = &rest[1..];

                let line = self.line_buffer.split();
                if self.exceeds_limit(content_len(&line)) {
                    return Some(Err(LineTooLong));
                }
                Some(Ok(decode(&line)))
            }
        }
    }
}

/// Length of a line without a trailing `\r`, which may still turn out to precede a `\n`.
fn content_len(line: &[u8]) -> usize {
    match line.last() {
        Some(b'\r') => line.len() - 1,
        _ => line.len(),
    }
}

fn decode(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}
