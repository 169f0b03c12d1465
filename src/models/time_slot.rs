use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::AppError;

/// Wall-clock time of day, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(ClockTime(hour * 60 + minute))
    }

    /// Parses `"HH:MM"`. Single-digit hours are accepted (`"9:00"`), anything
    /// else that is not two numeric fields in range is rejected.
    pub fn parse(s: &str) -> Result<Self, AppError> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| AppError::InvalidRange(format!("invalid time format: {s:?}")))?;
        if !(1..=2).contains(&h.len()) || !is_digits(h) {
            return Err(AppError::InvalidRange(format!("invalid hour in: {s:?}")));
        }
        if m.len() != 2 || !is_digits(m) {
            return Err(AppError::InvalidRange(format!("invalid minute in: {s:?}")));
        }
        let hour: u16 = h
            .parse()
            .map_err(|_| AppError::InvalidRange(format!("invalid hour in: {s:?}")))?;
        let minute: u16 = m
            .parse()
            .map_err(|_| AppError::InvalidRange(format!("invalid minute in: {s:?}")))?;
        Self::from_hm(hour, minute)
            .ok_or_else(|| AppError::InvalidRange(format!("time out of range: {s:?}")))
    }

    /// Decoding for values that already passed `parse` on the way in. Garbage
    /// reads as midnight rather than failing the whole row.
    pub fn parse_lenient(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|_| {
            tracing::warn!(value = s, "unparseable stored time, treating as 00:00");
            ClockTime(0)
        })
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

fn is_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ClockTime::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Half-open `[start, end)` interval within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeRange {
    pub fn new(start: ClockTime, end: ClockTime) -> Result<Self, AppError> {
        if start >= end {
            return Err(AppError::InvalidRange(format!(
                "start time {start} must be before end time {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, AppError> {
        Self::new(ClockTime::parse(start)?, ClockTime::parse(end)?)
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes().saturating_sub(self.start.minutes())
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
