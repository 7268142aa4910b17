use axum::extract::{Path, State};
use axum::{routing::get, routing::post, Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::state::AppState;
use crate::db::types::AssessmentKind;
use crate::schemas::assessment::{
    AssessmentCheckResponse, AssessmentView, FinalProjectSubmissionRequest,
    FinalTestSubmissionRequest, GradeResponse,
};
use crate::schemas::placement::CourseUnlocksResponse;
use crate::services::assessment::{self, AnswerSet, SubmissionMeta};
use crate::services::placement;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:course_id/final-project", get(get_final_project))
        .route("/:course_id/final-project/check", get(check_final_project))
        .route("/:course_id/final-project/submissions", post(submit_final_project))
        .route("/:course_id/final-test", get(get_final_test))
        .route("/:course_id/final-test/submissions", post(submit_final_test))
        .route("/:course_id/unlocks", get(list_course_unlocks))
}

async fn get_final_project(
    _user: CurrentUser,
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<AssessmentView>, ApiError> {
    assessment_view(&state, course_id, AssessmentKind::FinalProject).await
}

async fn check_final_project(
    _user: CurrentUser,
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<AssessmentCheckResponse>, ApiError> {
    let exists =
        assessment::assessment_exists(&state, &course_id, AssessmentKind::FinalProject).await?;

    Ok(Json(AssessmentCheckResponse {
        course_id,
        assessment: AssessmentKind::FinalProject,
        exists,
    }))
}

async fn submit_final_project(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    Json(payload): Json<FinalProjectSubmissionRequest>,
) -> Result<Json<GradeResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::UnprocessableEntity(e.to_string()))?;

    let meta = SubmissionMeta {
        user_id: user.id,
        course_id,
        rating: payload.rating,
        feedback: payload.feedback,
    };
    let graded = assessment::grade_final_submission(
        &state,
        meta,
        payload.code_solution,
        payload.mcq_answers,
        payload.tf_answers,
    )
    .await?;

    Ok(Json(graded.into()))
}

async fn get_final_test(
    _user: CurrentUser,
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<AssessmentView>, ApiError> {
    assessment_view(&state, course_id, AssessmentKind::FinalTest).await
}

async fn assessment_view(
    state: &AppState,
    course_id: String,
    kind: AssessmentKind,
) -> Result<Json<AssessmentView>, ApiError> {
    let questions = assessment::published_questions(state, &course_id, kind).await?;

    Ok(Json(AssessmentView {
        course_id,
        assessment: kind,
        questions: questions.into_iter().map(Into::into).collect(),
    }))
}

async fn submit_final_test(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    Json(payload): Json<FinalTestSubmissionRequest>,
) -> Result<Json<GradeResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::UnprocessableEntity(e.to_string()))?;

    let questions =
        assessment::published_questions(&state, &course_id, AssessmentKind::FinalTest).await?;
    let meta = SubmissionMeta {
        user_id: user.id,
        course_id,
        rating: payload.rating,
        feedback: payload.feedback,
    };
    let answers = AnswerSet {
        mcq: payload.mcq_answers,
        true_false: payload.tf_answers,
        code: payload.code_solutions,
    };

    let graded = assessment::grade_final_test(&state, meta, &questions, answers).await?;
    Ok(Json(graded.into()))
}

async fn list_course_unlocks(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<CourseUnlocksResponse>, ApiError> {
    let grants = placement::list_unlocks(&state, &user.id, &course_id).await?;

    Ok(Json(CourseUnlocksResponse {
        unlocked: !grants.is_empty(),
        grants: grants.into_iter().map(Into::into).collect(),
        course_id,
    }))
}
