use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db::queries::{self, DATE_FORMAT};
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, TimeRange};

/// A proposed room/day/time, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    pub classroom_id: String,
    pub date: NaiveDate,
    pub range: TimeRange,
}

impl SlotQuery {
    pub fn parse(classroom_id: &str, date: &str, start: &str, end: &str) -> Result<Self, AppError> {
        let classroom_id = classroom_id.trim();
        if classroom_id.is_empty() {
            return Err(AppError::BadRequest("classroom_id is required".to_string()));
        }
        Ok(Self {
            classroom_id: classroom_id.to_string(),
            date: parse_date(date)?,
            range: TimeRange::parse(start, end)?,
        })
    }

    pub fn of(booking: &Booking) -> Self {
        Self {
            classroom_id: booking.classroom_id.clone(),
            date: booking.date,
            range: booking.time_range(),
        }
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|_| AppError::BadRequest(format!("invalid date (expected YYYY-MM-DD): {s:?}")))
}

/// Confirmed bookings in `bookings` that collide with `slot`. Only the
/// `confirmed` state participates; pending requests may overlap freely.
pub fn find_conflicts<'a>(
    bookings: &'a [Booking],
    slot: &SlotQuery,
    ignore_booking_id: Option<&str>,
) -> Vec<&'a Booking> {
    bookings
        .iter()
        .filter(|b| b.status == BookingStatus::Confirmed)
        .filter(|b| b.classroom_id == slot.classroom_id && b.date == slot.date)
        .filter(|b| ignore_booking_id != Some(b.id.as_str()))
        .filter(|b| b.time_range().overlaps(&slot.range))
        .collect()
}

pub fn has_conflict(bookings: &[Booking], slot: &SlotQuery, ignore_booking_id: Option<&str>) -> bool {
    !find_conflicts(bookings, slot, ignore_booking_id).is_empty()
}

/// Same procedure as `find_conflicts`, against the store's current
/// confirmed set for the room and day.
pub fn conflicting_bookings(
    conn: &Connection,
    slot: &SlotQuery,
    ignore_booking_id: Option<&str>,
) -> anyhow::Result<Vec<Booking>> {
    let confirmed = queries::get_confirmed_bookings(conn, &slot.classroom_id, &slot.date)?;
    Ok(find_conflicts(&confirmed, slot, ignore_booking_id)
        .into_iter()
        .cloned()
        .collect())
}

pub fn check_conflict(
    conn: &Connection,
    slot: &SlotQuery,
    ignore_booking_id: Option<&str>,
) -> anyhow::Result<bool> {
    Ok(!conflicting_bookings(conn, slot, ignore_booking_id)?.is_empty())
}

pub fn ensure_no_conflict(
    conn: &Connection,
    slot: &SlotQuery,
    ignore_booking_id: Option<&str>,
) -> Result<(), AppError> {
    let conflicts = conflicting_bookings(conn, slot, ignore_booking_id)?;
    match conflicts.first() {
        None => Ok(()),
        Some(existing) => Err(AppError::Conflict(format!(
            "{} on {} {} overlaps confirmed booking {} ({})",
            slot.classroom_id,
            slot.date.format(DATE_FORMAT),
            slot.range,
            existing.id,
            existing.time_range(),
        ))),
    }
}
