use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::auth::check_query_auth;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::BookingEvent;
use crate::services::authz::{self, Action};
use crate::state::AppState;

// GET /api/bookings/events — SSE stream of every booking change, for reviewers
#[derive(Deserialize)]
pub struct SseQuery {
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub last_id: Option<i64>,
    pub classroom_id: Option<String>,
}

fn to_sse(event: &BookingEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default()
        .id(event.id.to_string())
        .event("booking_event")
        .data(data)
}

pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Auth via query params (EventSource can't set headers)
    let caller = check_query_auth(
        query.token.as_deref(),
        query.user_id.as_deref(),
        query.role.as_deref(),
        &state.config.api_token,
    )?;
    // Events cover all requesters, so the feed needs the view-all capability.
    authz::authorize(&caller, Action::ViewAllBookings)?;

    let last_id = query.last_id.unwrap_or(0);
    let room = query.classroom_id;

    // Subscribe before reading the backlog so nothing committed in between is lost.
    let rx = state.events_tx.subscribe();
    let catchup_events = {
        let db = state.conn()?;
        queries::get_booking_events_since(&db, last_id)?
    };
    let newest_catchup = catchup_events.last().map(|e| e.id).unwrap_or(last_id);

    let catchup_room = room.clone();
    let catchup_stream = tokio_stream::iter(
        catchup_events
            .into_iter()
            .filter(move |e| catchup_room.as_deref().map_or(true, |r| r == e.classroom_id))
            .map(|event| Ok::<_, Infallible>(to_sse(&event))),
    );

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.id > newest_catchup => {
            if room.as_deref().map_or(true, |r| r == event.classroom_id) {
                Some(Ok(to_sse(&event)))
            } else {
                None
            }
        }
        Ok(_) => None,
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "booking event subscriber lagged");
            None
        }
    });

    let keepalive_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    let combined = catchup_stream.chain(live_stream);
    let merged = StreamExt::merge(combined, keepalive_stream);

    Ok(Sse::new(merged))
}
