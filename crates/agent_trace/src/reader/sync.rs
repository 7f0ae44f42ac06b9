use std::io::Read;

use super::{BoundedLine, LineAccumulator, CHUNK_SIZE_BYTES};

pub struct SyncBoundedLineReader<R: Read> {
    reader: R,
    accumulator: LineAccumulator,
    buffer: Box<[u8; CHUNK_SIZE_BYTES]>,
    buffer_pos: usize,
    buffer_len: usize,
    done: bool,
}

impl<R: Read> SyncBoundedLineReader<R> {
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
}

impl<R: Read> Iterator for SyncBoundedLineReader<R> {
    type Item = BoundedLine;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if self.buffer_pos >= self.buffer_len {
                self.buffer_pos = 0;
                match self.reader.read(&mut self.buffer[..]) {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_line_is_discarded_and_iteration_continues() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"ok\n");
        bytes.extend_from_slice(&vec![b'a'; 50]);
        bytes.extend_from_slice(b"\nnext\n");

        let reader = SyncBoundedLineReader::new(std::io::Cursor::new(bytes), 16);
        let lines: Vec<_> = reader.collect();

        assert_eq!(lines.len(), 3);
        assert!(matches!(lines[0], BoundedLine::Line { line_number: 1, .. }));
        assert!(matches!(
            lines[1],
            BoundedLine::LineTooLong {
                line_number: 2,
                observed_bytes: 50,
                max_line_bytes: 16
            }
        ));
        assert!(matches!(lines[2], BoundedLine::Line { line_number: 3, .. }));
    }
}
