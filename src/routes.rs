use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::repository;
use crate::error::AppError;
use crate::models::*;
use crate::services::{ClaimOutcome, SyncStats};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/instructors", get(list_instructors).post(create_instructor))
        .route("/instructors/{id}", patch(update_instructor))
        .route("/courses", get(list_courses).post(create_course))
        .route("/lessons", get(list_lessons).post(create_lesson))
        .route(
            "/lessons/{id}",
            patch(update_lesson).delete(delete_lesson),
        )
        .route("/lessons/{id}/instructors", post(assign_instructor))
        .route(
            "/lessons/{id}/instructors/{instructor_id}",
            axum::routing::delete(unassign_instructor),
        )
        .route("/requests", get(list_requests).post(create_request))
        .route("/requests/{id}/claim", post(claim_request))
        .route("/requests/{id}/fill", post(fill_request))
        .route("/board/refresh", post(refresh_board))
        .route("/calendar/sync", post(sync_calendar))
        .route("/config/{key}", get(get_config).put(put_config))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// Instructors

async fn list_instructors(
    State(state): State<AppState>,
) -> Result<Json<Vec<Instructor>>, AppError> {
    let instructors = repository::fetch_instructors(&state.db).await?;
    Ok(Json(instructors))
}

async fn create_instructor(
    State(state): State<AppState>,
    Json(req): Json<NewInstructorRequest>,
) -> Result<Json<Instructor>, AppError> {
    if repository::find_instructor_by_discord_id(&state.db, &req.discord_id)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(
            "An instructor with this discord id already exists".to_string(),
        ));
    }
    let instructor = repository::insert_instructor(&state.db, req).await?;
    Ok(Json(instructor))
}

async fn update_instructor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateInstructorRequest>,
) -> Result<Json<Instructor>, AppError> {
    let instructor = repository::update_instructor(&state.db, id, req)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(instructor))
}

// ---------------------------------------------------------------------------
// Courses

async fn list_courses(State(state): State<AppState>) -> Result<Json<Vec<Course>>, AppError> {
    let courses = repository::fetch_courses(&state.db).await?;
    Ok(Json(courses))
}

async fn create_course(
    State(state): State<AppState>,
    Json(req): Json<NewCourseRequest>,
) -> Result<Json<Course>, AppError> {
    let flags = CourseFlags {
        no_calendar: req.no_calendar,
    };
    let course =
        repository::insert_course(&state.db, req.module, req.duration_minutes, flags.bits())
            .await?;
    for instructor_id in req.instructor_ids {
        if repository::find_instructor(&state.db, instructor_id)
            .await?
            .is_none()
        {
            return Err(AppError::BadRequest(format!(
                "Instructor {} is not registered",
                instructor_id
            )));
        }
        repository::add_course_instructor(&state.db, course.id, instructor_id).await?;
    }
    Ok(Json(course))
}

// ---------------------------------------------------------------------------
// Lessons

async fn list_lessons(State(state): State<AppState>) -> Result<Json<Vec<Lesson>>, AppError> {
    let lessons = repository::fetch_lessons(&state.db).await?;
    Ok(Json(lessons))
}

async fn create_lesson(
    State(state): State<AppState>,
    Json(req): Json<NewLessonRequest>,
) -> Result<Json<Lesson>, AppError> {
    if repository::find_course(&state.db, req.course_id)
        .await?
        .is_none()
    {
        return Err(AppError::BadRequest("Course does not exist".to_string()));
    }

    let course_id = req.course_id;
    let lesson = repository::insert_lesson(&state.db, req).await?;

    // New lessons start with the course's default staffing, capped at two.
    let defaults = repository::fetch_course_instructors(&state.db, course_id).await?;
    for instructor in defaults.into_iter().take(2) {
        state
            .subs
            .assign_instructor(lesson.id, instructor.id, AssignmentFlags::default())
            .await?;
    }

    state.calendar_sync.trigger();
    Ok(Json(lesson))
}

async fn update_lesson(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateLessonRequest>,
) -> Result<Json<Lesson>, AppError> {
    let lesson = repository::update_lesson(&state.db, id, req)
        .await?
        .ok_or(AppError::NotFound)?;
    state.calendar_sync.trigger();
    Ok(Json(lesson))
}

async fn delete_lesson(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let deleted = repository::delete_lesson(&state.db, id).await?;
    if !deleted {
        return Err(AppError::NotFound);
    }
    state.calendar_sync.trigger_delete(id);
    state.board.trigger();
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct AssignRequest {
    instructor_id: i64,
    #[serde(default)]
    is_sub: bool,
    #[serde(default)]
    is_free_will: bool,
}

async fn assign_instructor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AssignRequest>,
) -> Result<StatusCode, AppError> {
    if repository::find_instructor(&state.db, req.instructor_id)
        .await?
        .is_none()
    {
        return Err(AppError::BadRequest(
            "Not a registered instructor".to_string(),
        ));
    }
    state
        .subs
        .assign_instructor(
            id,
            req.instructor_id,
            AssignmentFlags {
                is_sub: req.is_sub,
                is_free_will: req.is_free_will,
            },
        )
        .await?;
    state.calendar_sync.trigger();
    Ok(StatusCode::NO_CONTENT)
}

async fn unassign_instructor(
    State(state): State<AppState>,
    Path((id, instructor_id)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    state.subs.unassign_instructor(id, instructor_id).await?;
    state.calendar_sync.trigger();
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Sub requests

#[derive(Deserialize)]
struct RequestQueryParams {
    #[serde(default)]
    include_closed: bool,
}

async fn list_requests(
    State(state): State<AppState>,
    Query(params): Query<RequestQueryParams>,
) -> Result<Json<Vec<SubRequest>>, AppError> {
    let requests = if params.include_closed {
        repository::fetch_sub_requests(&state.db).await?
    } else {
        repository::fetch_open_sub_requests(&state.db).await?
    };
    Ok(Json(requests))
}

#[derive(Serialize)]
struct CreatedRequestResponse {
    id: i64,
    /// True when the instructor already had an open request for the lesson.
    /// Duplicates are allowed; this is the caller's cue to warn.
    duplicate: bool,
}

async fn create_request(
    State(state): State<AppState>,
    Json(req): Json<NewSubRequest>,
) -> Result<Json<CreatedRequestResponse>, AppError> {
    let (id, duplicate) = state
        .subs
        .request_sub(req.lesson_id, req.instructor_id, req.reason)
        .await?;
    Ok(Json(CreatedRequestResponse { id, duplicate }))
}

#[derive(Deserialize)]
struct FillRequest {
    instructor_id: i64,
    #[serde(default)]
    free_will: bool,
}

#[derive(Serialize)]
struct ClaimResponse {
    outcome: ClaimOutcome,
}

fn claim_response(outcome: ClaimOutcome) -> Response {
    let status = match outcome {
        ClaimOutcome::Filled => StatusCode::OK,
        ClaimOutcome::AlreadyFilled => StatusCode::CONFLICT,
        ClaimOutcome::NotFound => StatusCode::NOT_FOUND,
        ClaimOutcome::SelfClaim => StatusCode::BAD_REQUEST,
    };
    (status, Json(ClaimResponse { outcome })).into_response()
}

async fn claim_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<FillRequest>,
) -> Result<Response, AppError> {
    let outcome = state
        .subs
        .claim_sub(id, req.instructor_id, req.free_will)
        .await?;
    Ok(claim_response(outcome))
}

async fn fill_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<FillRequest>,
) -> Result<Response, AppError> {
    let outcome = state
        .subs
        .admin_fill(id, req.instructor_id, req.free_will)
        .await?;
    Ok(claim_response(outcome))
}

// ---------------------------------------------------------------------------
// Sync triggers

async fn refresh_board(State(state): State<AppState>) -> StatusCode {
    state.board.trigger();
    StatusCode::ACCEPTED
}

async fn sync_calendar(State(state): State<AppState>) -> Result<Json<SyncStats>, AppError> {
    let stats = state.calendar_sync.sync(None).await?;
    Ok(Json(stats))
}

// ---------------------------------------------------------------------------
// Config

#[derive(Serialize, Deserialize)]
struct ConfigValue {
    value: String,
}

async fn get_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ConfigValue>, AppError> {
    let value = repository::get_config(&state.db, &key)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(ConfigValue { value }))
}

async fn put_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<ConfigValue>,
) -> Result<StatusCode, AppError> {
    repository::set_config(&state.db, &key, &req.value).await?;
    Ok(StatusCode::NO_CONTENT)
}
