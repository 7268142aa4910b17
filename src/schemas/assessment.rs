use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::models::AssessmentQuestion;
use crate::db::types::AssessmentKind;
use crate::services::aggregation::{round2, LetterGrade};
use crate::services::assessment::GradedSubmission;
use crate::services::sections::{AnswerMap, Diagnostic, QuestionId, Section};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct FinalProjectSubmissionRequest {
    #[serde(default)]
    pub(crate) code_solution: String,
    pub(crate) mcq_answers: Option<AnswerMap>,
    pub(crate) tf_answers: Option<AnswerMap>,
    #[validate(range(min = 0, max = 5, message = "rating must be between 0 and 5"))]
    pub(crate) rating: Option<i16>,
    #[validate(length(max = 2000, message = "feedback must be at most 2000 characters"))]
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct FinalTestSubmissionRequest {
    pub(crate) mcq_answers: Option<AnswerMap>,
    pub(crate) tf_answers: Option<AnswerMap>,
    pub(crate) code_solutions: Option<AnswerMap>,
    #[validate(range(min = 0, max = 5, message = "rating must be between 0 and 5"))]
    pub(crate) rating: Option<i16>,
    #[validate(length(max = 2000, message = "feedback must be at most 2000 characters"))]
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionCounts {
    pub(crate) mcq: usize,
    pub(crate) tf: usize,
    pub(crate) coding: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct CorrectAnswers {
    pub(crate) mcq: BTreeMap<QuestionId, String>,
    pub(crate) tf: BTreeMap<QuestionId, String>,
}

/// Marks are rounded to two decimals for display; stored values are not.
#[derive(Debug, Serialize)]
pub(crate) struct GradeResponse {
    pub(crate) submission_id: String,
    pub(crate) assessment: AssessmentKind,
    pub(crate) final_mark: f64,
    pub(crate) grade: LetterGrade,
    pub(crate) mcq_marks: f64,
    pub(crate) tf_marks: f64,
    pub(crate) coding_marks: f64,
    pub(crate) total_questions: QuestionCounts,
    pub(crate) correct_answers: CorrectAnswers,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) persisted: bool,
    pub(crate) persistence_error: Option<String>,
}

impl From<GradedSubmission> for GradeResponse {
    fn from(graded: GradedSubmission) -> Self {
        let count = |section| graded.score(section).map_or(0, |score| score.question_count());
        let total_questions = QuestionCounts {
            mcq: count(Section::Mcq),
            tf: count(Section::TrueFalse),
            coding: count(Section::Code),
        };
        let diagnostics = graded.diagnostics().cloned().collect();

        Self {
            submission_id: graded.submission_id,
            assessment: graded.assessment,
            final_mark: round2(graded.result.composite),
            grade: graded.result.grade,
            mcq_marks: round2(graded.result.mark(Section::Mcq)),
            tf_marks: round2(graded.result.mark(Section::TrueFalse)),
            coding_marks: round2(graded.result.mark(Section::Code)),
            total_questions,
            correct_answers: CorrectAnswers { mcq: graded.key.mcq, tf: graded.key.true_false },
            diagnostics,
            persisted: graded.persisted,
            persistence_error: graded.persistence_error,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AssessmentQuestionView {
    pub(crate) id: QuestionId,
    pub(crate) question_type: String,
    pub(crate) prompt: String,
    pub(crate) options: Vec<String>,
    pub(crate) code_template: Option<String>,
    pub(crate) test_case_count: usize,
}

impl From<AssessmentQuestion> for AssessmentQuestionView {
    fn from(question: AssessmentQuestion) -> Self {
        Self {
            id: question.id,
            question_type: question.question_type,
            prompt: question.prompt,
            options: question.options.0,
            code_template: question.code_template,
            test_case_count: question.test_cases.0.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AssessmentView {
    pub(crate) course_id: String,
    pub(crate) assessment: AssessmentKind,
    pub(crate) questions: Vec<AssessmentQuestionView>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AssessmentCheckResponse {
    pub(crate) course_id: String,
    pub(crate) assessment: AssessmentKind,
    pub(crate) exists: bool,
}
