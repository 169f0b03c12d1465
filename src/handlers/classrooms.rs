use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::auth::check_auth;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, Classroom};
use crate::services::authz::{self, Action};
use crate::services::scheduling;
use crate::state::AppState;

// GET /api/classrooms
pub async fn list_classrooms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Classroom>>, AppError> {
    check_auth(&headers, &state.config.api_token)?;

    let classrooms = {
        let db = state.conn()?;
        queries::list_classrooms(&db)?
    };
    Ok(Json(classrooms))
}

// POST /api/classrooms
#[derive(Deserialize)]
pub struct CreateClassroomRequest {
    pub id: String,
    pub name: String,
    pub building: Option<String>,
    pub capacity: Option<i64>,
}

pub async fn create_classroom(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateClassroomRequest>,
) -> Result<(StatusCode, Json<Classroom>), AppError> {
    let caller = check_auth(&headers, &state.config.api_token)?;
    authz::authorize(&caller, Action::ManageClassrooms)?;

    let id = body.id.trim().to_string();
    let name = body.name.trim().to_string();
    if id.is_empty() || name.is_empty() {
        return Err(AppError::BadRequest("id and name are required".to_string()));
    }
    if body.capacity.is_some_and(|c| c <= 0) {
        return Err(AppError::BadRequest("capacity must be positive".to_string()));
    }

    let classroom = Classroom {
        id,
        name,
        building: body.building.map(|b| b.trim().to_string()).filter(|b| !b.is_empty()),
        capacity: body.capacity,
        created_at: chrono::Utc::now().naive_utc(),
    };

    {
        let db = state.conn()?;
        if queries::get_classroom(&db, &classroom.id)?.is_some() {
            return Err(AppError::Conflict(format!("classroom {} already exists", classroom.id)));
        }
        queries::create_classroom(&db, &classroom)?;
    }

    tracing::info!(classroom_id = %classroom.id, "classroom created");
    Ok((StatusCode::CREATED, Json(classroom)))
}

// GET /api/classrooms/:id/schedule?date=YYYY-MM-DD
#[derive(Deserialize)]
pub struct ScheduleQuery {
    pub date: String,
}

#[derive(Serialize)]
pub struct ScheduleResponse {
    classroom: Classroom,
    date: String,
    bookings: Vec<Booking>,
}

pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<ScheduleResponse>, AppError> {
    check_auth(&headers, &state.config.api_token)?;
    let date = scheduling::parse_date(&query.date)?;

    let (classroom, bookings) = {
        let db = state.conn()?;
        let classroom = queries::get_classroom(&db, &id)?
            .ok_or_else(|| AppError::NotFound(format!("classroom {id}")))?;
        let bookings = queries::get_confirmed_bookings(&db, &id, &date)?;
        (classroom, bookings)
    };

    Ok(Json(ScheduleResponse {
        classroom,
        date: date.format(queries::DATE_FORMAT).to_string(),
        bookings,
    }))
}
