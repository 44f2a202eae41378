// Quiet-hours range arithmetic

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// A daily quiet window, possibly spanning midnight (e.g. 22:00-07:00).
///
/// Quiet hours gate suggestion surfaces only; sampling and outage
/// bookkeeping are never suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QuietHours {
    start_minute: u16,
    end_minute: u16,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start_minute: (start.hour() * 60 + start.minute()) as u16,
            end_minute: (end.hour() * 60 + end.minute()) as u16,
        }
    }

    /// Parse a "HH:MM-HH:MM" range
    pub fn parse(range: &str) -> Result<Self, String> {
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| format!("quiet hours must be HH:MM-HH:MM, got {:?}", range))?;
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|e| format!("bad time {:?} in quiet hours: {}", s, e))
        };
        Ok(Self::new(parse(start)?, parse(end)?))
    }

    /// Whether `time` falls inside the window. The end bound is exclusive;
    /// a range whose start equals its end matches nothing.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let minute = (time.hour() * 60 + time.minute()) as u16;
        if self.start_minute <= self.end_minute {
            minute >= self.start_minute && minute < self.end_minute
        } else {
            // Wraps midnight
            minute >= self.start_minute || minute < self.end_minute
        }
    }

    pub fn contains_now(&self) -> bool {
        self.contains(chrono::Local::now().time())
    }
}

impl TryFrom<String> for QuietHours {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        QuietHours::parse(&value)
    }
}

impl From<QuietHours> for String {
    fn from(q: QuietHours) -> Self {
        format!(
            "{:02}:{:02}-{:02}:{:02}",
            q.start_minute / 60,
            q.start_minute % 60,
            q.end_minute / 60,
            q.end_minute % 60
        )
    }
}
