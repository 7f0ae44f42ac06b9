use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineRecordError {
    #[error("I/O error while reading agent output")]
    Io,
    #[error("invalid UTF-8 in agent output")]
    InvalidUtf8,
    #[error("line too long (observed_bytes={observed_bytes}, max_line_bytes={max_line_bytes})")]
    LineTooLong {
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    #[error("line is not valid JSON: {summary}")]
    InvalidJson { summary: String },
}

/// One line of agent output after bounded reading and JSON decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRecord<T> {
    /// 1-based line number in the underlying stream.
    pub line_number: usize,
    /// The raw text, kept for non-JSON lines so callers can surface plain-text output.
    pub raw_text: Option<String>,
    pub outcome: Result<T, LineRecordError>,
}
