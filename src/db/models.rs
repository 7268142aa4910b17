use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{
    AssessmentKind, AttemptStatus, DifficultyLevel, PlacementQuestionKind, QuestionSource,
};
use crate::services::sections::TestCase;

/// One question of a course's final project or final test. `question_type` is
/// kept as free text so that rows with an unsupported type are rejected at
/// grading time instead of failing to decode.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct AssessmentQuestion {
    pub(crate) id: i64,
    pub(crate) course_id: String,
    pub(crate) assessment: AssessmentKind,
    pub(crate) question_type: String,
    pub(crate) prompt: String,
    pub(crate) options: Json<Vec<String>>,
    pub(crate) correct_answer: Option<String>,
    pub(crate) code_template: Option<String>,
    pub(crate) test_cases: Json<Vec<TestCase>>,
    pub(crate) position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct PlacementQuestion {
    pub(crate) id: i64,
    pub(crate) year: i16,
    pub(crate) semester: i16,
    pub(crate) subject: String,
    pub(crate) kind: PlacementQuestionKind,
    pub(crate) prompt: String,
    pub(crate) options: Json<Vec<String>>,
    /// Absent for coding questions.
    pub(crate) correct_answer: Option<String>,
    pub(crate) difficulty: DifficultyLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct PlacementAttempt {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) course_id: Option<String>,
    pub(crate) year: i16,
    pub(crate) semester: i16,
    pub(crate) subject: Option<String>,
    pub(crate) question_ids: Json<Vec<i64>>,
    pub(crate) source: QuestionSource,
    pub(crate) status: AttemptStatus,
    pub(crate) score: Option<i32>,
    pub(crate) total_questions: i32,
    pub(crate) percentage: Option<f64>,
    pub(crate) passed: Option<bool>,
    pub(crate) results: Option<Json<Vec<QuestionResult>>>,
    pub(crate) taken_at: PrimitiveDateTime,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct QuestionResult {
    pub(crate) question_id: i64,
    pub(crate) is_correct: bool,
    /// False when no answer key was found and the leniency flag decided the result.
    pub(crate) resolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct UnlockGrant {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) course_id: String,
    pub(crate) reason: String,
    pub(crate) placement_score: Option<f64>,
    pub(crate) unlocked_at: PrimitiveDateTime,
}
