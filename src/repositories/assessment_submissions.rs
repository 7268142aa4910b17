use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::types::AssessmentKind;
use crate::services::sections::{AnswerMap, Diagnostic};

/// A graded submission. Rows are insert-only; a re-attempt is a new row.
#[derive(Debug, Clone)]
pub(crate) struct NewSubmission {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) course_id: String,
    pub(crate) assessment: AssessmentKind,
    pub(crate) code_solutions: AnswerMap,
    pub(crate) mcq_answers: AnswerMap,
    pub(crate) tf_answers: AnswerMap,
    pub(crate) mcq_marks: f64,
    pub(crate) tf_marks: f64,
    pub(crate) coding_marks: f64,
    pub(crate) final_mark: f64,
    pub(crate) grade: String,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) rating: Option<i16>,
    pub(crate) feedback: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, submission: &NewSubmission) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO assessment_submissions (
            id, user_id, course_id, assessment, code_solutions, mcq_answers, tf_answers,
            mcq_marks, tf_marks, coding_marks, final_mark, grade, diagnostics, rating, feedback,
            created_at
         ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)",
    )
    .bind(&submission.id)
    .bind(&submission.user_id)
    .bind(&submission.course_id)
    .bind(submission.assessment)
    .bind(Json(&submission.code_solutions))
    .bind(Json(&submission.mcq_answers))
    .bind(Json(&submission.tf_answers))
    .bind(submission.mcq_marks)
    .bind(submission.tf_marks)
    .bind(submission.coding_marks)
    .bind(submission.final_mark)
    .bind(&submission.grade)
    .bind(Json(&submission.diagnostics))
    .bind(submission.rating)
    .bind(submission.feedback.as_deref())
    .bind(submission.created_at)
    .execute(pool)
    .await?;
    Ok(())
}
