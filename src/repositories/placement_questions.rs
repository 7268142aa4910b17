use sqlx::PgPool;

use crate::db::models::PlacementQuestion;

pub(crate) const COLUMNS: &str =
    "id, year, semester, subject, kind, prompt, options, correct_answer, difficulty";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CandidateFilter {
    pub(crate) year: i16,
    pub(crate) semester: i16,
    pub(crate) subject: Option<String>,
}

pub(crate) async fn list_candidates(
    pool: &PgPool,
    filter: &CandidateFilter,
) -> Result<Vec<PlacementQuestion>, sqlx::Error> {
    sqlx::query_as::<_, PlacementQuestion>(&format!(
        "SELECT {COLUMNS} FROM placement_questions
         WHERE year = $1 AND semester = $2 AND ($3::text IS NULL OR subject = $3)
         ORDER BY id"
    ))
    .bind(filter.year)
    .bind(filter.semester)
    .bind(filter.subject.as_deref())
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_by_ids(
    pool: &PgPool,
    ids: &[i64],
) -> Result<Vec<PlacementQuestion>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, PlacementQuestion>(&format!(
        "SELECT {COLUMNS} FROM placement_questions WHERE id = ANY($1)"
    ))
    .bind(ids)
    .fetch_all(pool)
    .await
}
