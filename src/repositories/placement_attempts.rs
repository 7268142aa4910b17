use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{PlacementAttempt, QuestionResult};
use crate::db::types::{AttemptStatus, QuestionSource};

pub(crate) const COLUMNS: &str = "\
    id, user_id, course_id, year, semester, subject, question_ids, source, status, score, \
    total_questions, percentage, passed, results, taken_at, graded_at";

#[derive(Debug, Clone)]
pub(crate) struct NewAttempt {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) course_id: Option<String>,
    pub(crate) year: i16,
    pub(crate) semester: i16,
    pub(crate) subject: Option<String>,
    pub(crate) question_ids: Vec<i64>,
    pub(crate) source: QuestionSource,
    pub(crate) taken_at: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub(crate) struct AttemptOutcome {
    pub(crate) score: i32,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
    pub(crate) results: Vec<QuestionResult>,
    pub(crate) graded_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, attempt: &NewAttempt) -> Result<PlacementAttempt, sqlx::Error> {
    let total_questions = i32::try_from(attempt.question_ids.len()).unwrap_or(i32::MAX);

    sqlx::query_as::<_, PlacementAttempt>(&format!(
        "INSERT INTO placement_attempts (
            id, user_id, course_id, year, semester, subject, question_ids, source, status,
            total_questions, taken_at
         ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
         RETURNING {COLUMNS}"
    ))
    .bind(&attempt.id)
    .bind(&attempt.user_id)
    .bind(attempt.course_id.as_deref())
    .bind(attempt.year)
    .bind(attempt.semester)
    .bind(attempt.subject.as_deref())
    .bind(Json(&attempt.question_ids))
    .bind(attempt.source)
    .bind(AttemptStatus::InProgress)
    .bind(total_questions)
    .bind(attempt.taken_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    attempt_id: &str,
) -> Result<Option<PlacementAttempt>, sqlx::Error> {
    sqlx::query_as::<_, PlacementAttempt>(&format!(
        "SELECT {COLUMNS} FROM placement_attempts WHERE id = $1"
    ))
    .bind(attempt_id)
    .fetch_optional(pool)
    .await
}

/// Moves an in-progress attempt to graded. Returns false when the attempt was
/// already graded by a concurrent submit.
pub(crate) async fn record_result(
    pool: &PgPool,
    attempt_id: &str,
    outcome: &AttemptOutcome,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE placement_attempts
         SET status = $1, score = $2, percentage = $3, passed = $4, results = $5, graded_at = $6
         WHERE id = $7 AND status = $8",
    )
    .bind(AttemptStatus::Graded)
    .bind(outcome.score)
    .bind(outcome.percentage)
    .bind(outcome.passed)
    .bind(Json(&outcome.results))
    .bind(outcome.graded_at)
    .bind(attempt_id)
    .bind(AttemptStatus::InProgress)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
