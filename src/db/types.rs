use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "assessmentkind", rename_all = "snake_case")]
pub(crate) enum AssessmentKind {
    FinalProject,
    FinalTest,
}

impl AssessmentKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::FinalProject => "final_project",
            Self::FinalTest => "final_test",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "difficultylevel", rename_all = "lowercase")]
pub(crate) enum DifficultyLevel {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "placementquestionkind", rename_all = "snake_case")]
pub(crate) enum PlacementQuestionKind {
    Mcq,
    TrueFalse,
    Coding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attemptstatus", rename_all = "snake_case")]
pub(crate) enum AttemptStatus {
    InProgress,
    Graded,
}

/// Where the questions of a placement attempt were drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "questionsource", rename_all = "lowercase")]
pub(crate) enum QuestionSource {
    Database,
    Builtin,
}
