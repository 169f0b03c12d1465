pub mod auth;
pub mod bookings;
pub mod classrooms;
pub mod events;
pub mod health;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/api/classrooms",
            get(classrooms::list_classrooms).post(classrooms::create_classroom),
        )
        .route("/api/classrooms/:id/schedule", get(classrooms::get_schedule))
        .route(
            "/api/bookings",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route("/api/bookings/check", post(bookings::check_conflict))
        .route("/api/bookings/events", get(events::events_stream))
        .route("/api/bookings/:id", get(bookings::get_booking))
        .route("/api/bookings/:id/history", get(bookings::get_history))
        .route("/api/bookings/:id/approve", post(bookings::approve_booking))
        .route("/api/bookings/:id/reject", post(bookings::reject_booking))
        .route("/api/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/api/bookings/:id/calendar.ics", get(bookings::download_ics))
        .with_state(state)
}
