use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::auth::check_auth;
use crate::db::queries::{self, BookingFilter};
use crate::errors::AppError;
use crate::models::{Booking, BookingEvent, BookingStatus, NewBooking};
use crate::services::authz::{self, Action};
use crate::services::bookings::{self, Outcome};
use crate::services::calendar::generate_ics;
use crate::services::scheduling::{self, SlotQuery};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

// GET /api/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub classroom_id: Option<String>,
    pub date: Option<String>,
    pub status: Option<String>,
    pub requested_by: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let caller = check_auth(&headers, &state.config.api_token)?;

    let status = match query.status.as_deref() {
        Some(s) => Some(
            BookingStatus::parse(s).ok_or_else(|| AppError::BadRequest(format!("unknown status: {s}")))?,
        ),
        None => None,
    };
    let date = query.date.as_deref().map(scheduling::parse_date).transpose()?;

    // Without the view-all capability callers only ever see their own requests.
    let requested_by = if authz::permits(caller.role, Action::ViewAllBookings) {
        query.requested_by
    } else {
        Some(caller.user_id.clone())
    };

    let filter = BookingFilter {
        classroom_id: query.classroom_id,
        date,
        status,
        requested_by,
        limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
    };

    let bookings = {
        let db = state.conn()?;
        queries::list_bookings(&db, &filter)?
    };
    Ok(Json(bookings))
}

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewBooking>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let caller = check_auth(&headers, &state.config.api_token)?;

    let Outcome { booking, event } = {
        let mut db = state.conn()?;
        bookings::request_booking(&mut db, &caller, &body)?
    };
    state.publish(event);

    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let caller = check_auth(&headers, &state.config.api_token)?;
    let booking = load_visible_booking(&state, &caller, &id)?;
    Ok(Json(booking))
}

// GET /api/bookings/:id/history
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<BookingEvent>>, AppError> {
    let caller = check_auth(&headers, &state.config.api_token)?;
    load_visible_booking(&state, &caller, &id)?;

    let history = {
        let db = state.conn()?;
        queries::get_booking_history(&db, &id)?
    };
    Ok(Json(history))
}

fn load_visible_booking(
    state: &AppState,
    caller: &crate::models::Caller,
    id: &str,
) -> Result<Booking, AppError> {
    let booking = {
        let db = state.conn()?;
        queries::get_booking_by_id(&db, id)?
    };
    // Other people's bookings are reported as missing rather than forbidden.
    booking
        .filter(|b| authz::can_view(caller, b))
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

// POST /api/bookings/check
#[derive(Deserialize)]
pub struct CheckRequest {
    pub classroom_id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub ignore_booking_id: Option<String>,
}

#[derive(Serialize)]
pub struct CheckResponse {
    conflict: bool,
    conflicting_ids: Vec<String>,
}

/// Advisory only: the answer can be stale by the time a reviewer acts.
pub async fn check_conflict(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    check_auth(&headers, &state.config.api_token)?;
    let slot = SlotQuery::parse(&body.classroom_id, &body.date, &body.start_time, &body.end_time)?;

    let conflicts = {
        let db = state.conn()?;
        scheduling::conflicting_bookings(&db, &slot, body.ignore_booking_id.as_deref())?
    };

    Ok(Json(CheckResponse {
        conflict: !conflicts.is_empty(),
        conflicting_ids: conflicts.into_iter().map(|b| b.id).collect(),
    }))
}

// POST /api/bookings/:id/approve, /reject
#[derive(Deserialize, Default)]
pub struct ReviewRequest {
    pub note: Option<String>,
}

/// The body is optional, but one that is present has to be valid.
fn parse_review(body: &Bytes) -> Result<ReviewRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ReviewRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("invalid review body: {e}")))
}

pub async fn approve_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Booking>, AppError> {
    let caller = check_auth(&headers, &state.config.api_token)?;
    let note = parse_review(&body)?.note;

    let Outcome { booking, event } = {
        let mut db = state.conn()?;
        bookings::approve(&mut db, &id, &caller, note.as_deref())?
    };
    state.publish(event);

    Ok(Json(booking))
}

pub async fn reject_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Booking>, AppError> {
    let caller = check_auth(&headers, &state.config.api_token)?;
    let note = parse_review(&body)?.note;

    let Outcome { booking, event } = {
        let mut db = state.conn()?;
        bookings::reject(&mut db, &id, &caller, note.as_deref())?
    };
    state.publish(event);

    Ok(Json(booking))
}

// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let caller = check_auth(&headers, &state.config.api_token)?;

    let Outcome { booking, event } = {
        let mut db = state.conn()?;
        bookings::cancel(&mut db, &id, &caller)?
    };
    state.publish(event);

    Ok(Json(booking))
}

// GET /api/bookings/:id/calendar.ics
pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let caller = check_auth(&headers, &state.config.api_token)?;
    let booking = load_visible_booking(&state, &caller, &id)?;
    if booking.status != BookingStatus::Confirmed {
        return Err(AppError::NotFound(format!("no confirmed booking {id}")));
    }

    let classroom = {
        let db = state.conn()?;
        queries::get_classroom(&db, &booking.classroom_id)?
    }
    .ok_or_else(|| AppError::NotFound(format!("classroom {}", booking.classroom_id)))?;

    let ics = generate_ics(&booking, &classroom);
    let filename = format!("booking-{id}.ics");

    Ok((
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        ics,
    )
        .into_response())
}
