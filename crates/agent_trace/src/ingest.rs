use std::io::Read;

use serde_json::Value;

use crate::config::IngestLimits;
use crate::error::{LineRecord, LineRecordError};
use crate::reader::{BoundedLine, SyncBoundedLineReader};

const MAX_SUMMARY_CHARS: usize = 120;

/// Turns one bounded line into a JSON record. Blank lines yield `None`.
pub(crate) fn decode_line(line: BoundedLine) -> Option<LineRecord<Value>> {
    match line {
        BoundedLine::IoError { line_number } => Some(error_record(line_number, LineRecordError::Io)),
        BoundedLine::LineTooLong {
            line_number,
            observed_bytes,
            max_line_bytes,
        } => Some(error_record(
            line_number,
            LineRecordError::LineTooLong {
                observed_bytes,
                max_line_bytes,
            },
        )),
        BoundedLine::Line { line_number, bytes } => {
            let Ok(raw_line) = String::from_utf8(bytes) else {
                return Some(error_record(line_number, LineRecordError::InvalidUtf8));
            };
            let line = raw_line.strip_suffix('\r').unwrap_or(&raw_line);
            if line.chars().all(char::is_whitespace) {
                return None;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(value) => Some(LineRecord {
                    line_number,
                    raw_text: None,
                    outcome: Ok(value),
                }),
                Err(err) => Some(LineRecord {
                    line_number,
                    raw_text: Some(line.to_string()),
                    outcome: Err(LineRecordError::InvalidJson {
                        summary: summarize(&err),
                    }),
                }),
            }
        }
    }
}

/// Parse errors are summarized by position only so raw agent output never leaks into logs.
fn summarize(err: &serde_json::Error) -> String {
    let mut summary = format!("{:?} at line {} column {}", err.classify(), err.line(), err.column());
    summary.truncate(MAX_SUMMARY_CHARS);
    summary
}

fn error_record(line_number: usize, err: LineRecordError) -> LineRecord<Value> {
    LineRecord {
        line_number,
        raw_text: None,
        outcome: Err(err),
    }
}

/// Line-oriented JSON ingestion over a blocking reader.
pub struct LineIngestor<R: Read> {
    reader: SyncBoundedLineReader<R>,
}

impl<R: Read> LineIngestor<R> {
    pub fn new(reader: R, limits: IngestLimits) -> Self {
        Self {
            reader: SyncBoundedLineReader::new(reader, limits.max_line_bytes),
        }
    }
}

impl<R: Read> Iterator for LineIngestor<R> {
    type Item = LineRecord<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.reader.next()?;
            if let Some(record) = decode_line(line) {
                return Some(record);
            }
        }
    }
}

#[cfg(feature = "tokio")]
mod tokio_ingest {
    use serde_json::Value;
    use tokio::io::AsyncRead;

    use super::decode_line;
    use crate::config::IngestLimits;
    use crate::error::LineRecord;
    use crate::reader::AsyncBoundedLineReader;

    /// Line-oriented JSON ingestion over an async reader such as a child's stdout.
    pub struct AsyncLineIngestor<R: AsyncRead + Unpin> {
        reader: AsyncBoundedLineReader<R>,
    }

    impl<R: AsyncRead + Unpin> AsyncLineIngestor<R> {
        pub fn new(reader: R, limits: IngestLimits) -> Self {
            Self {
                reader: AsyncBoundedLineReader::new(reader, limits.max_line_bytes),
            }
        }

        pub async fn next_record(&mut self) -> Option<LineRecord<Value>> {
            loop {
                let line = self.reader.next_line().await?;
                if let Some(record) = decode_line(line) {
                    return Some(record);
                }
            }
        }
    }

}

#[cfg(feature = "tokio")]
pub use tokio_ingest::AsyncLineIngestor;
