use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use std::sync::Arc;

use crate::{
    error::Result,
    extractors::ValidatedJson,
    middlewares::auth::JwtClaims,
    models::answer::{SubmitAnswersRequest, SubmitGuestAnswersRequest},
    services::{answer_service::Submitter, AppState},
};

/// POST /api/v1/live-quiz-answers/submit-multiple
pub async fn submit_answers(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<SubmitAnswersRequest>,
) -> Result<impl IntoResponse> {
    let is_admin = claims.is_admin();
    let submitter = Submitter::Registered {
        user_id: claims.sub,
        department_ids: claims.department_ids,
        is_admin,
    };

    let response = state
        .answers
        .submit(submitter, &req.quiz_id, req.answers)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/live-quiz-answers/submit-multiple-guest
pub async fn submit_guest_answers(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<SubmitGuestAnswersRequest>,
) -> Result<impl IntoResponse> {
    let response = state
        .answers
        .submit(Submitter::Guest(req.guest), &req.quiz_id, req.answers)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}
