use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{Booking, BookingAction, BookingEvent, BookingStatus, Caller, NewBooking};
use crate::services::authz::{self, Action};
use crate::services::scheduling::{self, SlotQuery};

/// A committed change together with the event recorded for it.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub booking: Booking,
    pub event: BookingEvent,
}

fn event_kind(action: BookingAction) -> &'static str {
    match action {
        BookingAction::Approve => "approved",
        BookingAction::Reject => "rejected",
        BookingAction::Cancel => "cancelled",
    }
}

fn map_store_error(err: anyhow::Error, slot: &SlotQuery) -> AppError {
    if db::is_booking_conflict(&err) {
        AppError::Conflict(format!(
            "{} on {} {} overlaps a confirmed booking",
            slot.classroom_id,
            slot.date.format(queries::DATE_FORMAT),
            slot.range
        ))
    } else {
        AppError::Internal(err)
    }
}

/// Creates a `pending` booking. Rejected up front if it already collides
/// with a confirmed booking; other pending requests for the slot are allowed.
pub fn request_booking(
    conn: &mut Connection,
    caller: &Caller,
    new: &NewBooking,
) -> Result<Outcome, AppError> {
    authz::authorize(caller, Action::RequestBooking)?;
    let slot = SlotQuery::parse(&new.classroom_id, &new.date, &new.start_time, &new.end_time)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if queries::get_classroom(&tx, &slot.classroom_id)?.is_none() {
        return Err(AppError::NotFound(format!("classroom {}", slot.classroom_id)));
    }
    scheduling::ensure_no_conflict(&tx, &slot, None)?;

    let now = Utc::now().naive_utc();
    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        classroom_id: slot.classroom_id.clone(),
        date: slot.date,
        start_time: slot.range.start,
        end_time: slot.range.end,
        status: BookingStatus::Pending,
        requested_by: caller.user_id.clone(),
        purpose: new.purpose.trim().to_string(),
        reviewed_by: None,
        review_note: None,
        created_at: now,
        updated_at: now,
    };
    queries::create_booking(&tx, &booking)?;
    let event = queries::insert_booking_event(&tx, &booking, "requested", &caller.user_id)?;
    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        classroom_id = %booking.classroom_id,
        date = %booking.date,
        range = %booking.time_range(),
        requested_by = %booking.requested_by,
        "booking requested"
    );

    Ok(Outcome { booking, event })
}

/// Applies `action` to a booking under an immediate (write-locked)
/// transaction. The status update is conditional on the status read at the
/// start, and the storage triggers reject any confirm that would overlap.
pub fn transition(
    conn: &mut Connection,
    id: &str,
    action: BookingAction,
    caller: &Caller,
    note: Option<&str>,
) -> Result<Outcome, AppError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let booking = queries::get_booking_by_id(&tx, id)?
        .filter(|b| authz::can_view(caller, b))
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;

    authz::authorize_booking(caller, action, &booking)?;
    let next = booking.status.apply(action)?;

    let slot = SlotQuery::of(&booking);
    if next == BookingStatus::Confirmed {
        scheduling::ensure_no_conflict(&tx, &slot, Some(&booking.id))?;
    }

    let reviewer = (action != BookingAction::Cancel).then_some(caller.user_id.as_str());
    let note = note.map(str::trim).filter(|n| !n.is_empty());
    let changed = queries::update_booking_status_if(&tx, id, booking.status, next, reviewer, note)
        .map_err(|e| map_store_error(e, &slot))?;
    if !changed {
        let current = queries::get_booking_by_id(&tx, id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;
        return Err(AppError::InvalidTransition {
            from: current.status,
            action,
        });
    }

    let updated = queries::get_booking_by_id(&tx, id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;
    let event = queries::insert_booking_event(&tx, &updated, event_kind(action), &caller.user_id)?;
    tx.commit()?;

    tracing::info!(
        booking_id = %updated.id,
        classroom_id = %updated.classroom_id,
        from = %booking.status,
        status = %updated.status,
        actor = %caller.user_id,
        "booking {}",
        event_kind(action)
    );

    Ok(Outcome {
        booking: updated,
        event,
    })
}

pub fn approve(
    conn: &mut Connection,
    id: &str,
    reviewer: &Caller,
    note: Option<&str>,
) -> Result<Outcome, AppError> {
    transition(conn, id, BookingAction::Approve, reviewer, note)
}

pub fn reject(
    conn: &mut Connection,
    id: &str,
    reviewer: &Caller,
    note: Option<&str>,
) -> Result<Outcome, AppError> {
    transition(conn, id, BookingAction::Reject, reviewer, note)
}

pub fn cancel(conn: &mut Connection, id: &str, requester: &Caller) -> Result<Outcome, AppError> {
    transition(conn, id, BookingAction::Cancel, requester, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classroom, Role};

    fn setup_db() -> Connection {
        let conn = db::init_db(":memory:").unwrap();
        queries::create_classroom(
            &conn,
            &Classroom {
                id: "CR-101".to_string(),
                name: "Room 101".to_string(),
                building: Some("Science".to_string()),
                capacity: Some(40),
                created_at: Utc::now().naive_utc(),
            },
        )
        .unwrap();
        conn
    }

    fn student(id: &str) -> Caller {
        Caller {
            user_id: id.to_string(),
            role: Role::Student,
        }
    }

    fn admin() -> Caller {
        Caller {
            user_id: "admin-1".to_string(),
            role: Role::Admin,
        }
    }

    fn new_booking(date: &str, start: &str, end: &str) -> NewBooking {
        NewBooking {
            classroom_id: "CR-101".to_string(),
            date: date.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            purpose: "Study group".to_string(),
        }
    }

    #[test]
    fn test_request_creates_pending_booking() {
        let mut conn = setup_db();
        let outcome =
            request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "09:00", "10:00"))
                .unwrap();

        assert_eq!(outcome.booking.status, BookingStatus::Pending);
        assert_eq!(outcome.booking.requested_by, "s-1");
        assert_eq!(outcome.event.kind, "requested");

        let stored = queries::get_booking_by_id(&conn, &outcome.booking.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.purpose, "Study group");
    }

    #[test]
    fn test_request_validates_input() {
        let mut conn = setup_db();
        let err = request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "10:00", "09:00"))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRange(_)));

        let mut unknown_room = new_booking("2025-03-10", "09:00", "10:00");
        unknown_room.classroom_id = "CR-999".to_string();
        let err = request_booking(&mut conn, &student("s-1"), &unknown_room).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_pending_requests_may_overlap() {
        let mut conn = setup_db();
        request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "09:00", "10:00")).unwrap();
        request_booking(&mut conn, &student("s-2"), &new_booking("2025-03-10", "09:00", "10:00")).unwrap();
    }

    #[test]
    fn test_request_against_confirmed_slot_is_conflict() {
        let mut conn = setup_db();
        let first =
            request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "09:00", "10:00"))
                .unwrap();
        approve(&mut conn, &first.booking.id, &admin(), None).unwrap();

        let err = request_booking(&mut conn, &student("s-2"), &new_booking("2025-03-10", "09:30", "10:30"))
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Touching the end of the confirmed booking is fine.
        request_booking(&mut conn, &student("s-2"), &new_booking("2025-03-10", "10:00", "11:00")).unwrap();
    }

    #[test]
    fn test_approve_then_approve_again_is_invalid() {
        let mut conn = setup_db();
        let b1 = request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "09:00", "10:00"))
            .unwrap()
            .booking;

        let approved = approve(&mut conn, &b1.id, &admin(), Some("ok")).unwrap();
        assert_eq!(approved.booking.status, BookingStatus::Confirmed);
        assert_eq!(approved.booking.reviewed_by.as_deref(), Some("admin-1"));
        assert_eq!(approved.booking.review_note.as_deref(), Some("ok"));
        assert_eq!(approved.event.kind, "approved");

        let err = approve(&mut conn, &b1.id, &admin(), None).unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: BookingStatus::Confirmed,
                action: BookingAction::Approve
            }
        ));
    }

    #[test]
    fn test_cancel_then_approve_is_invalid() {
        let mut conn = setup_db();
        let b1 = request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "09:00", "10:00"))
            .unwrap()
            .booking;

        let cancelled = cancel(&mut conn, &b1.id, &student("s-1")).unwrap();
        assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
        assert!(cancelled.booking.reviewed_by.is_none());

        let err = approve(&mut conn, &b1.id, &admin(), None).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let mut conn = setup_db();
        let rejected = request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "09:00", "10:00"))
            .unwrap()
            .booking;
        reject(&mut conn, &rejected.id, &admin(), Some("room closed")).unwrap();

        for result in [
            approve(&mut conn, &rejected.id, &admin(), None),
            reject(&mut conn, &rejected.id, &admin(), None),
            cancel(&mut conn, &rejected.id, &student("s-1")),
        ] {
            assert!(matches!(result, Err(AppError::InvalidTransition { .. })));
        }
    }

    #[test]
    fn test_approve_rechecks_overlap_with_interim_confirmation() {
        let mut conn = setup_db();
        let first = request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "09:00", "10:00"))
            .unwrap()
            .booking;
        let second = request_booking(&mut conn, &student("s-2"), &new_booking("2025-03-10", "09:30", "10:30"))
            .unwrap()
            .booking;

        approve(&mut conn, &first.id, &admin(), None).unwrap();
        let err = approve(&mut conn, &second.id, &admin(), None).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let still_pending = queries::get_booking_by_id(&conn, &second.id).unwrap().unwrap();
        assert_eq!(still_pending.status, BookingStatus::Pending);

        // The loser can still be rejected cleanly.
        reject(&mut conn, &second.id, &admin(), None).unwrap();
    }

    #[test]
    fn test_cancel_by_other_user_reports_not_found() {
        let mut conn = setup_db();
        let b1 = request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "09:00", "10:00"))
            .unwrap()
            .booking;

        let err = cancel(&mut conn, &b1.id, &student("s-2")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = approve(&mut conn, &b1.id, &student("s-2"), None).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // Admins can see the booking, so they get the real reason.
        let err = cancel(&mut conn, &b1.id, &admin()).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let unchanged = queries::get_booking_by_id(&conn, &b1.id).unwrap().unwrap();
        assert_eq!(unchanged.status, BookingStatus::Pending);
    }

    #[test]
    fn test_student_cannot_approve() {
        let mut conn = setup_db();
        let b1 = request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "09:00", "10:00"))
            .unwrap()
            .booking;

        let err = approve(&mut conn, &b1.id, &student("s-1"), None).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_unknown_booking_is_not_found() {
        let mut conn = setup_db();
        let err = approve(&mut conn, "nope", &admin(), None).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_transitions_are_recorded_in_history() {
        let mut conn = setup_db();
        let b1 = request_booking(&mut conn, &student("s-1"), &new_booking("2025-03-10", "09:00", "10:00"))
            .unwrap()
            .booking;
        approve(&mut conn, &b1.id, &admin(), None).unwrap();

        let history = queries::get_booking_history(&conn, &b1.id).unwrap();
        let kinds: Vec<&str> = history.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["requested", "approved"]);
        assert_eq!(history[1].actor, "admin-1");
        assert_eq!(history[1].status, BookingStatus::Confirmed);
    }
}
