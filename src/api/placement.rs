use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use rand::rngs::StdRng;
use rand::SeedableRng;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::state::AppState;
use crate::schemas::placement::{
    StartPlacementRequest, StartPlacementResponse, SubmitPlacementRequest,
    SubmitPlacementResponse,
};
use crate::services::placement::{self, StartPlacement};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/attempts", post(start_attempt))
        .route("/attempts/:attempt_id/submit", post(submit_attempt))
}

async fn start_attempt(
    user: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<StartPlacementRequest>,
) -> Result<(StatusCode, Json<StartPlacementResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::UnprocessableEntity(e.to_string()))?;

    let request = StartPlacement {
        year: payload.year,
        semester: payload.semester,
        subject: payload.subject,
        course_id: payload.course_id,
    };
    let mut rng = StdRng::from_entropy();
    let started = placement::start_placement(&state, &user.id, request, &mut rng).await?;

    Ok((StatusCode::CREATED, Json(started.into())))
}

async fn submit_attempt(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<SubmitPlacementRequest>,
) -> Result<Json<SubmitPlacementResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::UnprocessableEntity(e.to_string()))?;

    let (answers, course_id) = payload.into_parts();
    let submitted =
        placement::submit_placement(&state, &user.id, &attempt_id, answers, course_id).await?;

    Ok(Json(submitted.into()))
}
