use sqlx::PgPool;

use crate::db::models::AssessmentQuestion;
use crate::db::types::AssessmentKind;

pub(crate) const COLUMNS: &str = "\
    id, course_id, assessment, question_type, prompt, options, correct_answer, code_template, \
    test_cases, position";

pub(crate) async fn list_for_course(
    pool: &PgPool,
    course_id: &str,
    assessment: AssessmentKind,
) -> Result<Vec<AssessmentQuestion>, sqlx::Error> {
    sqlx::query_as::<_, AssessmentQuestion>(&format!(
        "SELECT {COLUMNS} FROM assessment_questions
         WHERE course_id = $1 AND assessment = $2
         ORDER BY position, id"
    ))
    .bind(course_id)
    .bind(assessment)
    .fetch_all(pool)
    .await
}
