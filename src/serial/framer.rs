//! Reassembles newline-terminated lines from arbitrarily split text chunks.

use thiserror::Error;

/// Default cap on a single unterminated line before it is thrown away.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("partial line exceeded {limit} bytes; discarded {discarded} bytes")]
    Overflow { discarded: usize, limit: usize },
}

/// Line accumulator owned by a single reader.
///
/// After every [`LineFramer::push`] the buffer holds at most one partial line;
/// complete lines are handed out exactly once, in arrival order. With a cap,
/// any line longer than `max_line_bytes` is dropped whole and reported once,
/// however the input was split.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: String,
    max_line_bytes: Option<usize>,
    /// Inside a line that already overflowed; input is dropped up to its `\n`.
    discarding: bool,
}

impl LineFramer {
    pub fn new(max_line_bytes: Option<usize>) -> Self {
        Self {
            buffer: String::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Appends `chunk` and returns the lines it completed.
    ///
    /// Oversized lines come out as `Err(FramingError::Overflow)` in the
    /// position they occupied. The returned iterator borrows the framer; items
    /// it does not yield are dropped when it goes out of scope.
    pub fn push(&mut self, chunk: &str) -> Lines<'_> {
        let mut chunk = chunk;
        if self.discarding {
            match chunk.find('\n') {
                Some(idx) => {
                    self.discarding = false;
                    chunk = &chunk[idx + 1..];
                }
                None => chunk = "",
            }
        }
        self.buffer.push_str(chunk);

        let tail_start = self.buffer.rfind('\n').map(|idx| idx + 1).unwrap_or(0);
        let partial_len = self.buffer.len() - tail_start;

        let tail_overflow = match self.max_line_bytes {
            Some(limit) if partial_len > limit => {
                self.buffer.truncate(tail_start);
                self.discarding = true;
                Some(FramingError::Overflow {
                    discarded: partial_len,
                    limit,
                })
            }
            _ => None,
        };

        Lines {
            framer: self,
            cursor: 0,
            end: tail_start,
            tail_overflow,
        }
    }

    /// The unterminated text currently held back.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Lazy view over the complete lines produced by one push.
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
    cursor: usize,
    end: usize,
    tail_overflow: Option<FramingError>,
}

impl Iterator for Lines<'_> {
    type Item = Result<String, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return self.tail_overflow.take().map(Err);
        }

        let rest = &self.framer.buffer[self.cursor..self.end];
        let newline = rest.find('\n')?;
        self.cursor += newline + 1;

        match self.framer.max_line_bytes {
            Some(limit) if newline > limit => Some(Err(FramingError::Overflow {
                discarded: newline,
                limit,
            })),
            _ => Some(Ok(rest[..newline].to_string())),
        }
    }
}

impl Drop for Lines<'_> {
    fn drop(&mut self) {
        // Everything up to `end` is consumed whether or not it was iterated.
        self.framer.buffer.drain(..self.end);
    }
}
