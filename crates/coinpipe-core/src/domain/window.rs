use serde::Serialize;
use time::Duration;

use crate::{UtcDateTime, ValidationError};

/// Closed time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeWindow {
    start: UtcDateTime,
    end: UtcDateTime,
}

impl TimeWindow {
    pub fn new(start: UtcDateTime, end: UtcDateTime) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedWindow {
                start: start.format_rfc3339(),
                end: end.format_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// The `days` days ending at `end`.
    pub fn trailing_days(days: u32, end: UtcDateTime) -> Result<Self, ValidationError> {
        if days == 0 {
            return Err(ValidationError::EmptyWindow { days });
        }
        let start = end.saturating_sub(Duration::days(i64::from(days)));
        Self::new(start, end)
    }

    pub const fn start(&self) -> UtcDateTime {
        self.start
    }

    pub const fn end(&self) -> UtcDateTime {
        self.end
    }

    pub fn contains(&self, ts: UtcDateTime) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Split into consecutive pages of at most `span`.
    ///
    /// Each page after the first starts exactly where the previous one ends,
    /// so the pages leave no gap at any precision and share only their
    /// boundary instant. A non-positive `span` yields the whole window as a
    /// single page.
    pub fn pages(&self, span: Duration) -> Vec<TimeWindow> {
        if span <= Duration::ZERO {
            return vec![*self];
        }

        let mut pages = Vec::new();
        let mut cursor = self.start;
        loop {
            let page_end = cursor.saturating_add(span).min(self.end);
            pages.push(TimeWindow {
                start: cursor,
                end: page_end,
            });
            if page_end >= self.end {
                break;
            }
            cursor = page_end;
        }
        pages
    }
}
