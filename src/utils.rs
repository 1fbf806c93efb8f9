//! Utility functions for timestamps and formatting

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS.mmm format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!(
        "[day].[month].[year] - [hour]:[minute]:[second].[subsecond digits:3]"
    );
    dt.format(format).unwrap_or_else(|_| dt.to_string())
}

/// Format a timestamp for use in a batch file name (YYYYMMDD_HHMMSS)
pub fn file_stamp(dt: &OffsetDateTime) -> String {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    dt.format(format)
        .unwrap_or_else(|_| dt.unix_timestamp().to_string())
}

/// Wall clock fixed to one UTC offset
///
/// The local offset is resolved once at startup; querying it later from a
/// multi-threaded process is unreliable on Unix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    offset: UtcOffset,
}

impl Clock {
    pub fn new(offset: UtcOffset) -> Self {
        Clock { offset }
    }

    /// Clock using the local offset, or UTC if it cannot be determined
    pub fn local() -> Self {
        Clock::new(UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}
