use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{QuestionResult, UnlockGrant};
use crate::db::types::QuestionSource;
use crate::services::placement::{
    PlacementAnswer, PlacementLevel, PlacementSubmission, PresentedQuestion, StartedAttempt,
    UnlockOutcome, UnlockStatus,
};
use crate::services::sections::QuestionId;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct StartPlacementRequest {
    #[validate(range(min = 1, max = 6, message = "year must be between 1 and 6"))]
    pub(crate) year: i16,
    #[validate(range(min = 1, max = 3, message = "semester must be between 1 and 3"))]
    pub(crate) semester: i16,
    #[validate(length(min = 1, max = 100, message = "subject must be 1-100 characters"))]
    pub(crate) subject: Option<String>,
    #[validate(length(min = 1, message = "course_id must not be empty"))]
    pub(crate) course_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StartPlacementResponse {
    pub(crate) attempt_id: String,
    pub(crate) source: QuestionSource,
    pub(crate) taken_at: String,
    pub(crate) questions: Vec<PresentedQuestion>,
}

impl From<StartedAttempt> for StartPlacementResponse {
    fn from(started: StartedAttempt) -> Self {
        Self {
            attempt_id: started.attempt.id,
            source: started.attempt.source,
            taken_at: format_primitive(started.attempt.taken_at),
            questions: started.questions,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PlacementAnswerPayload {
    pub(crate) question_id: QuestionId,
    #[serde(default)]
    pub(crate) answer: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmitPlacementRequest {
    #[validate(length(max = 100, message = "too many answers"))]
    pub(crate) answers: Vec<PlacementAnswerPayload>,
    #[validate(length(min = 1, message = "course_id must not be empty"))]
    pub(crate) course_id: Option<String>,
}

impl SubmitPlacementRequest {
    pub(crate) fn into_parts(self) -> (Vec<PlacementAnswer>, Option<String>) {
        let answers = self
            .answers
            .into_iter()
            .map(|payload| PlacementAnswer {
                question_id: payload.question_id,
                answer: payload.answer,
            })
            .collect();
        (answers, self.course_id)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UnlockResponse {
    pub(crate) course_id: String,
    pub(crate) status: UnlockStatus,
    pub(crate) detail: Option<String>,
}

impl From<UnlockOutcome> for UnlockResponse {
    fn from(outcome: UnlockOutcome) -> Self {
        Self { course_id: outcome.course_id, status: outcome.status, detail: outcome.error }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitPlacementResponse {
    pub(crate) attempt_id: String,
    pub(crate) score: u32,
    pub(crate) total: u32,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
    pub(crate) level: PlacementLevel,
    pub(crate) results: Vec<QuestionResult>,
    pub(crate) unlock: Option<UnlockResponse>,
}

impl From<PlacementSubmission> for SubmitPlacementResponse {
    fn from(submission: PlacementSubmission) -> Self {
        Self {
            attempt_id: submission.attempt_id,
            score: submission.score.score,
            total: submission.score.total,
            percentage: submission.score.percentage,
            passed: submission.score.passed,
            level: submission.level,
            results: submission.score.results,
            unlock: submission.unlock.map(UnlockResponse::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UnlockGrantResponse {
    pub(crate) id: String,
    pub(crate) reason: String,
    pub(crate) placement_score: Option<f64>,
    pub(crate) unlocked_at: String,
}

impl From<UnlockGrant> for UnlockGrantResponse {
    fn from(grant: UnlockGrant) -> Self {
        Self {
            id: grant.id,
            reason: grant.reason,
            placement_score: grant.placement_score,
            unlocked_at: format_primitive(grant.unlocked_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CourseUnlocksResponse {
    pub(crate) course_id: String,
    pub(crate) unlocked: bool,
    pub(crate) grants: Vec<UnlockGrantResponse>,
}
