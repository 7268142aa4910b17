use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::models::{AssessmentQuestion, PlacementAttempt, PlacementQuestion, UnlockGrant};
use crate::db::types::AssessmentKind;
use crate::repositories::{
    self,
    assessment_submissions::NewSubmission,
    placement_attempts::{AttemptOutcome, NewAttempt},
    placement_questions::CandidateFilter,
    unlock_grants::NewGrant,
};

/// Persistence used by the grading and placement services.
#[async_trait]
pub(crate) trait GradingStore: Send + Sync {
    async fn assessment_questions(
        &self,
        course_id: &str,
        assessment: AssessmentKind,
    ) -> Result<Vec<AssessmentQuestion>, sqlx::Error>;

    async fn insert_submission(&self, submission: &NewSubmission) -> Result<(), sqlx::Error>;

    async fn placement_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<PlacementQuestion>, sqlx::Error>;

    async fn placement_questions_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<Vec<PlacementQuestion>, sqlx::Error>;

    async fn create_attempt(&self, attempt: &NewAttempt) -> Result<PlacementAttempt, sqlx::Error>;

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<PlacementAttempt>, sqlx::Error>;

    /// False when the attempt is no longer in progress.
    async fn record_attempt_result(
        &self,
        attempt_id: &str,
        outcome: &AttemptOutcome,
    ) -> Result<bool, sqlx::Error>;

    /// True when a new grant was written.
    async fn grant_unlock(&self, grant: &NewGrant) -> Result<bool, sqlx::Error>;

    async fn list_unlocks(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<Vec<UnlockGrant>, sqlx::Error>;

    async fn ping(&self) -> Result<(), sqlx::Error>;
}

#[derive(Debug, Clone)]
pub(crate) struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradingStore for PgStore {
    async fn assessment_questions(
        &self,
        course_id: &str,
        assessment: AssessmentKind,
    ) -> Result<Vec<AssessmentQuestion>, sqlx::Error> {
        repositories::assessment_questions::list_for_course(&self.pool, course_id, assessment).await
    }

    async fn insert_submission(&self, submission: &NewSubmission) -> Result<(), sqlx::Error> {
        repositories::assessment_submissions::create(&self.pool, submission).await
    }

    async fn placement_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<PlacementQuestion>, sqlx::Error> {
        repositories::placement_questions::list_candidates(&self.pool, filter).await
    }

    async fn placement_questions_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<Vec<PlacementQuestion>, sqlx::Error> {
        repositories::placement_questions::list_by_ids(&self.pool, ids).await
    }

    async fn create_attempt(&self, attempt: &NewAttempt) -> Result<PlacementAttempt, sqlx::Error> {
        repositories::placement_attempts::create(&self.pool, attempt).await
    }

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<PlacementAttempt>, sqlx::Error> {
        repositories::placement_attempts::find_by_id(&self.pool, attempt_id).await
    }

    async fn record_attempt_result(
        &self,
        attempt_id: &str,
        outcome: &AttemptOutcome,
    ) -> Result<bool, sqlx::Error> {
        repositories::placement_attempts::record_result(&self.pool, attempt_id, outcome).await
    }

    async fn grant_unlock(&self, grant: &NewGrant) -> Result<bool, sqlx::Error> {
        repositories::unlock_grants::insert_if_absent(&self.pool, grant).await
    }

    async fn list_unlocks(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<Vec<UnlockGrant>, sqlx::Error> {
        repositories::unlock_grants::list_for_user_course(&self.pool, user_id, course_id).await
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        repositories::health::ping(&self.pool).await
    }
}
