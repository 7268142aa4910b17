pub(crate) mod assessment_questions;
pub(crate) mod assessment_submissions;
pub(crate) mod health;
pub(crate) mod placement_attempts;
pub(crate) mod placement_questions;
pub(crate) mod unlock_grants;
