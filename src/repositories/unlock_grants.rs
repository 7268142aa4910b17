use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::UnlockGrant;

pub(crate) const COLUMNS: &str = "id, user_id, course_id, reason, placement_score, unlocked_at";

#[derive(Debug, Clone)]
pub(crate) struct NewGrant {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) course_id: String,
    pub(crate) reason: String,
    pub(crate) placement_score: Option<f64>,
    pub(crate) unlocked_at: PrimitiveDateTime,
}

/// Returns true when a grant was created, false when one already existed for
/// the same user, course and reason.
pub(crate) async fn insert_if_absent(pool: &PgPool, grant: &NewGrant) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO unlock_grants (id, user_id, course_id, reason, placement_score, unlocked_at)
         VALUES ($1,$2,$3,$4,$5,$6)
         ON CONFLICT (user_id, course_id, reason) DO NOTHING",
    )
    .bind(&grant.id)
    .bind(&grant.user_id)
    .bind(&grant.course_id)
    .bind(&grant.reason)
    .bind(grant.placement_score)
    .bind(grant.unlocked_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn list_for_user_course(
    pool: &PgPool,
    user_id: &str,
    course_id: &str,
) -> Result<Vec<UnlockGrant>, sqlx::Error> {
    sqlx::query_as::<_, UnlockGrant>(&format!(
        "SELECT {COLUMNS} FROM unlock_grants
         WHERE user_id = $1 AND course_id = $2
         ORDER BY unlocked_at"
    ))
    .bind(user_id)
    .bind(course_id)
    .fetch_all(pool)
    .await
}
