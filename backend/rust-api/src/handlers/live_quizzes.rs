use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::Result,
    extractors::AppJson,
    models::live_quiz::{CreateLiveQuizRequest, ListLiveQuizzesQuery, ScheduleRequest},
    services::AppState,
};

/// POST /api/v1/live-quizzes
pub async fn create_live_quiz(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateLiveQuizRequest>,
) -> Result<impl IntoResponse> {
    let snapshot = state.live_quizzes.create(req).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/v1/live-quizzes?departmentId=
pub async fn list_live_quizzes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListLiveQuizzesQuery>,
) -> impl IntoResponse {
    Json(state.live_quizzes.list(query.department_id.as_deref()).await)
}

/// GET /api/v1/live-quizzes/{id}
pub async fn get_live_quiz(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.live_quizzes.get(&quiz_id).await?))
}

/// GET /api/v1/live-quizzes/{id}/roster
pub async fn get_roster(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse> {
    let participants = state.live_quizzes.roster(&quiz_id).await?;
    Ok(Json(json!({
        "quizId": quiz_id,
        "participants": participants,
    })))
}

pub async fn start_live_quiz(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.live_quizzes.start(&quiz_id).await?))
}

pub async fn end_live_quiz(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.live_quizzes.end(&quiz_id).await?))
}

/// POST /api/v1/live-quizzes/{id}/schedule
///
/// Both instants must be RFC 3339 with an explicit offset.
pub async fn schedule_live_quiz(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
    AppJson(req): AppJson<ScheduleRequest>,
) -> Result<impl IntoResponse> {
    let window = req.window()?;
    Ok(Json(state.live_quizzes.schedule(&quiz_id, window).await?))
}

pub async fn cancel_schedule(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.live_quizzes.cancel_schedule(&quiz_id).await?))
}

/// GET /api/v1/live-quizzes/{id}/submissions
pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.answers.submissions(&quiz_id).await?))
}
