use std::collections::BTreeMap;

use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::AssessmentQuestion;
use crate::db::types::AssessmentKind;
use crate::repositories::assessment_submissions::NewSubmission;
use crate::services::aggregation::{self, GradeResult, GradingPolicy};
use crate::services::errors::GradingError;
use crate::services::sandbox::PollPolicy;
use crate::services::sections::{
    self, AnswerMap, CodeGrader, CodeQuestion, Diagnostic, QuestionId, Section, SectionScore,
};

/// Question id under which the single holistic code answer of a final
/// project is graded and stored.
pub(crate) const FINAL_PROJECT_CODE_QUESTION_ID: QuestionId = 0;

pub(crate) const MAX_RATING: i16 = 5;

/// Answer keys of one assessment, split by section.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct AssessmentKey {
    pub(crate) mcq: BTreeMap<QuestionId, String>,
    pub(crate) true_false: BTreeMap<QuestionId, String>,
    pub(crate) code: Vec<CodeQuestion>,
}

impl AssessmentKey {
    pub(crate) fn from_questions(questions: &[AssessmentQuestion]) -> Result<Self, GradingError> {
        let mut key = Self::default();

        for question in questions {
            match question.question_type.as_str() {
                "mcq" => {
                    key.mcq.insert(question.id, required_answer(question)?);
                }
                "true_false" => {
                    key.true_false.insert(question.id, required_answer(question)?);
                }
                "code" => key.code.push(CodeQuestion {
                    id: question.id,
                    test_cases: question.test_cases.0.clone(),
                }),
                other => {
                    return Err(GradingError::Validation(format!(
                        "question {} has unsupported type '{other}'",
                        question.id
                    )));
                }
            }
        }

        Ok(key)
    }

    /// Final projects grade one holistic code answer regardless of the code
    /// questions stored for the course.
    pub(crate) fn for_final_project(questions: &[AssessmentQuestion]) -> Result<Self, GradingError> {
        let mut key = Self::from_questions(questions)?;
        key.code = vec![CodeQuestion { id: FINAL_PROJECT_CODE_QUESTION_ID, test_cases: Vec::new() }];
        Ok(key)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.mcq.is_empty() && self.true_false.is_empty() && self.code.is_empty()
    }
}

fn required_answer(question: &AssessmentQuestion) -> Result<String, GradingError> {
    question
        .correct_answer
        .as_deref()
        .map(str::trim)
        .filter(|answer| !answer.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            GradingError::Validation(format!("question {} has no answer key", question.id))
        })
}

/// Answers submitted for each section. A section the assessment contains must
/// have its answer set present, even if empty.
#[derive(Debug, Clone, Default)]
pub(crate) struct AnswerSet {
    pub(crate) mcq: Option<AnswerMap>,
    pub(crate) true_false: Option<AnswerMap>,
    pub(crate) code: Option<AnswerMap>,
}

#[derive(Debug, Clone)]
pub(crate) struct SubmissionMeta {
    pub(crate) user_id: String,
    pub(crate) course_id: String,
    pub(crate) rating: Option<i16>,
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct GradedSubmission {
    pub(crate) submission_id: String,
    pub(crate) assessment: AssessmentKind,
    pub(crate) result: GradeResult,
    pub(crate) scores: Vec<SectionScore>,
    pub(crate) key: AssessmentKey,
    pub(crate) persisted: bool,
    pub(crate) persistence_error: Option<String>,
}

impl GradedSubmission {
    pub(crate) fn score(&self, section: Section) -> Option<&SectionScore> {
        self.scores.iter().find(|score| score.section == section)
    }

    pub(crate) fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.scores.iter().flat_map(|score| score.diagnostics.iter())
    }
}

pub(crate) fn validate_answers(
    key: &AssessmentKey,
    answers: &AnswerSet,
    meta: &SubmissionMeta,
) -> Result<(), GradingError> {
    let required = [
        ("mcq_answers", !key.mcq.is_empty(), answers.mcq.is_some()),
        ("tf_answers", !key.true_false.is_empty(), answers.true_false.is_some()),
        ("code_solutions", !key.code.is_empty(), answers.code.is_some()),
    ];
    if let Some((field, _, _)) =
        required.iter().find(|(_, needed, present)| *needed && !*present)
    {
        return Err(GradingError::Validation(format!("{field} is required")));
    }

    if let Some(rating) = meta.rating {
        if !(0..=MAX_RATING).contains(&rating) {
            return Err(GradingError::Validation(format!(
                "rating must be between 0 and {MAX_RATING}"
            )));
        }
    }

    Ok(())
}

/// `GradeFinalSubmission`: grades a course's final project from one code text
/// plus the multiple-choice and true/false answers.
pub(crate) async fn grade_final_submission(
    state: &AppState,
    meta: SubmissionMeta,
    code_text: String,
    mcq_answers: Option<AnswerMap>,
    tf_answers: Option<AnswerMap>,
) -> Result<GradedSubmission, GradingError> {
    let questions = state
        .store()
        .assessment_questions(&meta.course_id, AssessmentKind::FinalProject)
        .await
        .map_err(GradingError::persistence("Failed to load final project questions"))?;

    let key = AssessmentKey::for_final_project(&questions)?;
    let answers = AnswerSet {
        mcq: mcq_answers,
        true_false: tf_answers,
        code: Some(BTreeMap::from([(FINAL_PROJECT_CODE_QUESTION_ID, code_text)])),
    };

    grade_and_record(state, AssessmentKind::FinalProject, key, answers, meta).await
}

/// `GradeFinalTest`: grades answers against the given final-test questions.
pub(crate) async fn grade_final_test(
    state: &AppState,
    meta: SubmissionMeta,
    questions: &[AssessmentQuestion],
    answers: AnswerSet,
) -> Result<GradedSubmission, GradingError> {
    let key = AssessmentKey::from_questions(questions)?;
    if key.is_empty() {
        return Err(GradingError::NotFound("Final test has no questions".to_string()));
    }

    grade_and_record(state, AssessmentKind::FinalTest, key, answers, meta).await
}

/// Loads the final-test questions of a course, failing when there are none.
/// Questions published for one assessment of a course, in display order.
/// A course without rows for `assessment` has no such assessment.
pub(crate) async fn published_questions(
    state: &AppState,
    course_id: &str,
    assessment: AssessmentKind,
) -> Result<Vec<AssessmentQuestion>, GradingError> {
    let (load_context, missing) = match assessment {
        AssessmentKind::FinalProject => {
            ("Failed to load final project questions", "Final project not found for this course")
        }
        AssessmentKind::FinalTest => {
            ("Failed to load final test questions", "Final test not found for this course")
        }
    };

    let questions = state
        .store()
        .assessment_questions(course_id, assessment)
        .await
        .map_err(GradingError::persistence(load_context))?;

    if questions.is_empty() {
        return Err(GradingError::NotFound(missing.to_string()));
    }
    Ok(questions)
}

pub(crate) async fn assessment_exists(
    state: &AppState,
    course_id: &str,
    assessment: AssessmentKind,
) -> Result<bool, GradingError> {
    match published_questions(state, course_id, assessment).await {
        Ok(_) => Ok(true),
        Err(GradingError::NotFound(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

async fn grade_and_record(
    state: &AppState,
    assessment: AssessmentKind,
    key: AssessmentKey,
    answers: AnswerSet,
    meta: SubmissionMeta,
) -> Result<GradedSubmission, GradingError> {
    validate_answers(&key, &answers, &meta)?;

    let settings = state.settings();
    let code_grader = CodeGrader::new(
        state.sandbox(),
        PollPolicy::from_settings(settings.sandbox()),
        settings.sandbox().language_id,
        settings.sandbox().max_concurrent_runs,
    );

    let empty = AnswerMap::new();
    let mcq_answers = answers.mcq.as_ref().unwrap_or(&empty);
    let tf_answers = answers.true_false.as_ref().unwrap_or(&empty);
    let code_answers = answers.code.as_ref().unwrap_or(&empty);

    let (mcq, true_false, code) = tokio::join!(
        async { sections::grade_choices(Section::Mcq, mcq_answers, &key.mcq) },
        async { sections::grade_choices(Section::TrueFalse, tf_answers, &key.true_false) },
        code_grader.grade(&key.code, code_answers),
    );
    let scores = vec![mcq, true_false, code];

    let result = aggregation::aggregate(&scores, &GradingPolicy::from_settings(settings.grading()));

    let submission = NewSubmission {
        id: Uuid::new_v4().to_string(),
        user_id: meta.user_id,
        course_id: meta.course_id,
        assessment,
        code_solutions: answers.code.unwrap_or_default(),
        mcq_answers: answers.mcq.unwrap_or_default(),
        tf_answers: answers.true_false.unwrap_or_default(),
        mcq_marks: result.mark(Section::Mcq),
        tf_marks: result.mark(Section::TrueFalse),
        coding_marks: result.mark(Section::Code),
        final_mark: result.composite,
        grade: result.grade.as_str().to_string(),
        diagnostics: scores.iter().flat_map(|score| score.diagnostics.clone()).collect(),
        rating: meta.rating,
        feedback: meta.feedback,
        created_at: primitive_now_utc(),
    };

    let (persisted, persistence_error) = match state.store().insert_submission(&submission).await {
        Ok(()) => (true, None),
        Err(err) => {
            tracing::error!(
                error = %err,
                submission_id = %submission.id,
                user_id = %submission.user_id,
                assessment = assessment.as_str(),
                "Failed to store graded submission"
            );
            (false, Some("Failed to store graded submission".to_string()))
        }
    };

    metrics::counter!(
        "grading_submissions_total",
        "assessment" => assessment.as_str(),
        "grade" => result.grade.as_str()
    )
    .increment(1);

    tracing::info!(
        submission_id = %submission.id,
        user_id = %submission.user_id,
        course_id = %submission.course_id,
        assessment = assessment.as_str(),
        final_mark = result.composite,
        grade = result.grade.as_str(),
        persisted,
        "Graded submission"
    );

    Ok(GradedSubmission {
        submission_id: submission.id,
        assessment,
        result,
        scores,
        key,
        persisted,
        persistence_error,
    })
}
