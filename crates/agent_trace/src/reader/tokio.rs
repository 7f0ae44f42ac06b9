use tokio::io::{AsyncRead, AsyncReadExt};

use super::{BoundedLine, LineAccumulator, CHUNK_SIZE_BYTES};

pub struct AsyncBoundedLineReader<R: AsyncRead + Unpin> {
    reader: R,
    accumulator: LineAccumulator,
    buffer: Box<[u8; CHUNK_SIZE_BYTES]>,
    buffer_pos: usize,
    buffer_len: usize,
    done: bool,
}

impl<R: AsyncRead + Unpin> AsyncBoundedLineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            accumulator: LineAccumulator::new(max_line_bytes),
            buffer: Box::new([0u8; CHUNK_SIZE_BYTES]),
            buffer_pos: 0,
            buffer_len: 0,
            done: false,
        }
    }

    /// Next bounded line, or `None` once the stream is exhausted or has failed.
    pub async fn next_line(&mut self) -> Option<BoundedLine> {
        if self.done {
            return None;
        }

        loop {
            if self.buffer_pos >= self.buffer_len {
                self.buffer_pos = 0;
                match self.reader.read(&mut self.buffer[..]).await {
                    Ok(0) => {
                        self.done = true;
                        return self.accumulator.finish_eof();
                    }
                    Ok(n) => self.buffer_len = n,
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => {
                        self.done = true;
                        return Some(self.accumulator.io_error());
                    }
                }
            }

            let (used, line) = self
                .accumulator
                .feed(&self.buffer[self.buffer_pos..self.buffer_len]);
            self.buffer_pos += used;
            if line.is_some() {
                return line;
            }
        }
    }
}
