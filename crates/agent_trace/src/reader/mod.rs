mod sync;

#[cfg(feature = "tokio")]
mod tokio;

pub use sync::SyncBoundedLineReader;

#[cfg(feature = "tokio")]
pub use self::tokio::AsyncBoundedLineReader;

pub(crate) const CHUNK_SIZE_BYTES: usize = 8192;

#[derive(Debug, PartialEq, Eq)]
pub enum BoundedLine {
    Line {
        line_number: usize,
        bytes: Vec<u8>,
    },
    LineTooLong {
        line_number: usize,
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    IoError {
        line_number: usize,
    },
}

/// Splits a byte stream into lines while holding at most `max_line_bytes` of any one line.
///
/// Oversized lines are discarded as they stream in and reported once, at their terminating
/// newline, so reading can continue with the next line.
#[derive(Debug)]
pub(crate) struct LineAccumulator {
    max_line_bytes: usize,
    current_line: Vec<u8>,
    observed_bytes: usize,
    too_long: bool,
    line_number: usize,
}

impl LineAccumulator {
    pub(crate) fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            current_line: Vec::new(),
            observed_bytes: 0,
            too_long: false,
            line_number: 0,
        }
    }

    /// Consumes bytes up to and including the first newline in `chunk`.
    ///
    /// Returns the number of bytes consumed and the finished line, if a newline was found.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> (usize, Option<BoundedLine>) {
        match chunk.iter().position(|b| *b == b'\n') {
            Some(idx) => {
                self.observe(&chunk[..idx]);
                (idx + 1, Some(self.finish_line()))
            }
            None => {
                self.observe(chunk);
                (chunk.len(), None)
            }
        }
    }

    /// Flushes a trailing line without a newline at end of input.
    pub(crate) fn finish_eof(&mut self) -> Option<BoundedLine> {
        if self.too_long || !self.current_line.is_empty() {
            Some(self.finish_line())
        } else {
            None
        }
    }

    pub(crate) fn io_error(&mut self) -> BoundedLine {
        self.line_number += 1;
        BoundedLine::IoError {
            line_number: self.line_number,
        }
    }

    fn observe(&mut self, segment: &[u8]) {
        self.observed_bytes = self.observed_bytes.saturating_add(segment.len());
        if self.too_long {
            return;
        }
        if self.observed_bytes > self.max_line_bytes {
            self.too_long = true;
            self.current_line.clear();
        } else {
            self.current_line.extend_from_slice(segment);
        }
    }

    fn finish_line(&mut self) -> BoundedLine {
        self.line_number += 1;
        let line_number = self.line_number;
        let line = if self.too_long {
            BoundedLine::LineTooLong {
                line_number,
                observed_bytes: self.observed_bytes,
                max_line_bytes: self.max_line_bytes,
            }
        } else {
            BoundedLine::Line {
                line_number,
                bytes: std::mem::take(&mut self.current_line),
            }
        };
        self.current_line.clear();
        self.observed_bytes = 0;
        self.too_long = false;
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks_are_joined() {
        let mut acc = LineAccumulator::new(64);
        assert_eq!(acc.feed(b"{\"a\":"), (5, None));
        let (used, line) = acc.feed(b"1}\nrest");
        assert_eq!(used, 3);
        assert_eq!(
            line,
            Some(BoundedLine::Line {
                line_number: 1,
                bytes: b"{\"a\":1}".to_vec()
            })
        );
        assert_eq!(acc.feed(b"rest"), (4, None));
        assert_eq!(
            acc.finish_eof(),
            Some(BoundedLine::Line {
                line_number: 2,
                bytes: b"rest".to_vec()
            })
        );
        assert_eq!(acc.finish_eof(), None);
    }
}
