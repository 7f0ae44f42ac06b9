#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IngestLimits {
    pub max_line_bytes: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 64 * 1024,
        }
    }
}

impl IngestLimits {
    pub fn max_line_bytes(max_line_bytes: usize) -> Self {
        Self { max_line_bytes }
    }
}
