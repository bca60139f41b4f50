use chrono::{DateTime, Timelike, Utc};
use chrono_tz::US::Eastern;

/// A bot's configured time-of-day trading range, interpreted in Eastern
/// Time. Conversion goes through the tz database, so the window tracks
/// daylight-saving transitions instead of assuming a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingWindow {
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
}

impl TradingWindow {
    /// The regular US equities session, 9:30–16:00 ET.
    #[must_use]
    pub const fn regular_session() -> Self {
        Self {
            start_hour: 9,
            start_minute: 30,
            end_hour: 16,
            end_minute: 0,
        }
    }

    /// Whether `now` falls inside the window (inclusive on both ends).
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let eastern = now.with_timezone(&Eastern);
        let minutes = eastern.hour() * 60 + eastern.minute();
        let start = u32::from(self.start_hour) * 60 + u32::from(self.start_minute);
        let end = u32::from(self.end_hour) * 60 + u32::from(self.end_minute);
        start <= minutes && minutes <= end
    }
}
