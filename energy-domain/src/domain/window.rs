use serde::{Deserialize, Serialize};
use time::{Date, Duration};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum WindowError {
    #[error("window start {start} is after end {end}")]
    Inverted { start: Date, end: Date },
}

/// Inclusive date range requested from both sources in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    #[serde(with = "crate::domain::iso_date")]
    pub start: Date,
    #[serde(with = "crate::domain::iso_date")]
    pub end: Date,
}

impl DateWindow {
    pub fn new(start: Date, end: Date) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// `days` back from `end`, e.g. a 90-day history ending today.
    pub fn ending(end: Date, days: u32) -> Self {
        let start = end
            .checked_sub(Duration::days(i64::from(days)))
            .unwrap_or(Date::MIN);
        Self { start, end }
    }

    pub fn single(day: Date) -> Self {
        Self { start: day, end: day }
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).whole_days() + 1
    }
}
