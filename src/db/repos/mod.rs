#[cfg(test)]
pub mod mock;
mod quota_data;

pub use quota_data::*;

/// Inclusive timestamp range for queries (Unix seconds, both ends included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Span of the range in seconds.
    pub fn width(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}
