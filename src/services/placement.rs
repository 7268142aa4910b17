use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::core::config::PlacementSettings;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{PlacementAttempt, PlacementQuestion, QuestionResult, UnlockGrant};
use crate::db::types::{AttemptStatus, DifficultyLevel, PlacementQuestionKind, QuestionSource};
use crate::repositories::placement_attempts::{AttemptOutcome, NewAttempt};
use crate::repositories::placement_questions::CandidateFilter;
use crate::repositories::unlock_grants::NewGrant;
use crate::services::aggregation::round2;
use crate::services::errors::GradingError;
use crate::services::sections::{answers_match, QuestionId};

pub(crate) const UNLOCK_REASON: &str = "placement-pass";

/// Upper bound for `PLACEMENT_QUESTION_COUNT`.
pub(crate) const MAX_PLACEMENT_QUESTIONS: usize = 50;

const PASS_EPSILON: f64 = 1e-9;

/// Fixed question set used when no stored question matches the requested
/// year and semester. Attempts built from it are marked as built-in and
/// graded against this inline key only.
#[derive(Debug)]
pub(crate) struct BuiltinQuestion {
    pub(crate) id: QuestionId,
    pub(crate) kind: PlacementQuestionKind,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) prompt: &'static str,
    pub(crate) options: &'static [&'static str],
    pub(crate) correct_answer: &'static str,
}

pub(crate) static BUILTIN_QUESTIONS: [BuiltinQuestion; 5] = [
    BuiltinQuestion {
        id: 1,
        kind: PlacementQuestionKind::Mcq,
        difficulty: DifficultyLevel::Easy,
        prompt: "Which of the following is a valid C++ variable name?",
        options: &["1var", "var_1", "var-1", "var 1"],
        correct_answer: "var_1",
    },
    BuiltinQuestion {
        id: 2,
        kind: PlacementQuestionKind::TrueFalse,
        difficulty: DifficultyLevel::Easy,
        prompt: "The statement cout << \"Hello\"; prints Hello to the screen.",
        options: &["True", "False"],
        correct_answer: "True",
    },
    BuiltinQuestion {
        id: 3,
        kind: PlacementQuestionKind::Mcq,
        difficulty: DifficultyLevel::Medium,
        prompt: "Which standard container keeps its elements ordered by key?",
        options: &["std::vector", "std::map", "std::queue", "std::stack"],
        correct_answer: "std::map",
    },
    BuiltinQuestion {
        id: 4,
        kind: PlacementQuestionKind::TrueFalse,
        difficulty: DifficultyLevel::Medium,
        prompt: "A C++ reference can be reseated to another object after initialization.",
        options: &["True", "False"],
        correct_answer: "False",
    },
    BuiltinQuestion {
        id: 5,
        kind: PlacementQuestionKind::Mcq,
        difficulty: DifficultyLevel::Hard,
        prompt: "Which specifier stops a virtual function from being overridden further?",
        options: &["static", "const", "final", "sealed"],
        correct_answer: "final",
    },
];

/// A question as shown to the learner, without its answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct PresentedQuestion {
    pub(crate) id: QuestionId,
    pub(crate) kind: PlacementQuestionKind,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) prompt: String,
    pub(crate) options: Vec<String>,
}

impl From<&BuiltinQuestion> for PresentedQuestion {
    fn from(question: &BuiltinQuestion) -> Self {
        Self {
            id: question.id,
            kind: question.kind,
            difficulty: question.difficulty,
            prompt: question.prompt.to_string(),
            options: question.options.iter().map(|option| option.to_string()).collect(),
        }
    }
}

impl From<&PlacementQuestion> for PresentedQuestion {
    fn from(question: &PlacementQuestion) -> Self {
        Self {
            id: question.id,
            kind: question.kind,
            difficulty: question.difficulty,
            prompt: question.prompt.clone(),
            options: question.options.0.clone(),
        }
    }
}

/// Picks up to `count` questions, drawing from the difficulty buckets in turn
/// so every level is represented when the pool allows it. The result is
/// ordered from easy to hard.
pub(crate) fn select_questions<R: Rng>(
    pool: Vec<PlacementQuestion>,
    count: usize,
    rng: &mut R,
) -> Vec<PlacementQuestion> {
    let count = count.min(pool.len());
    let mut buckets: BTreeMap<DifficultyLevel, Vec<PlacementQuestion>> = BTreeMap::new();
    for question in pool {
        buckets.entry(question.difficulty).or_default().push(question);
    }
    for bucket in buckets.values_mut() {
        bucket.shuffle(rng);
    }

    let mut levels: Vec<DifficultyLevel> = buckets.keys().copied().collect();
    if !levels.is_empty() {
        let start = rng.gen_range(0..levels.len());
        levels.rotate_left(start);
    }

    let mut selected = Vec::with_capacity(count);
    while selected.len() < count {
        let mut drew = false;
        for level in &levels {
            if selected.len() == count {
                break;
            }
            if let Some(question) = buckets.get_mut(level).and_then(Vec::pop) {
                selected.push(question);
                drew = true;
            }
        }
        if !drew {
            break;
        }
    }

    selected.sort_by_key(|question| question.difficulty);
    selected
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedKey {
    pub(crate) kind: PlacementQuestionKind,
    pub(crate) correct_answer: Option<String>,
}

/// Where the answer key of a placement attempt lives.
#[derive(Debug, Clone)]
pub(crate) enum AnswerSource {
    Inline(&'static [BuiltinQuestion]),
    Database(HashMap<QuestionId, PlacementQuestion>),
}

impl AnswerSource {
    pub(crate) fn resolve(&self, question_id: QuestionId) -> Option<ResolvedKey> {
        match self {
            Self::Inline(questions) => {
                questions.iter().find(|question| question.id == question_id).map(|question| {
                    ResolvedKey {
                        kind: question.kind,
                        correct_answer: Some(question.correct_answer.to_string()),
                    }
                })
            }
            Self::Database(questions) => questions.get(&question_id).map(|question| ResolvedKey {
                kind: question.kind,
                correct_answer: question.correct_answer.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlacementAnswer {
    pub(crate) question_id: QuestionId,
    pub(crate) answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlacementScore {
    pub(crate) score: u32,
    pub(crate) total: u32,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
    pub(crate) results: Vec<QuestionResult>,
}

/// `score ≥ ratio × total`; an attempt without questions never passes.
pub(crate) fn passes(score: u32, total: u32, pass_ratio: f64) -> bool {
    total > 0 && f64::from(score) + PASS_EPSILON >= pass_ratio * f64::from(total)
}

fn judge_answer(key: &ResolvedKey, answer: &str, assume_correct_on_unknown: bool) -> (bool, bool) {
    match (key.kind, key.correct_answer.as_deref()) {
        (PlacementQuestionKind::Coding, _) => (!answer.trim().is_empty(), true),
        (_, Some(expected)) => (answers_match(answer, expected), true),
        (_, None) => (assume_correct_on_unknown, false),
    }
}

/// Grades the answers of one attempt. Every selected question counts toward
/// the total; unanswered ones are incorrect. A submitted answer without an
/// answer key follows `assume_correct_on_unknown_question`.
pub(crate) fn grade_answers(
    question_ids: &[QuestionId],
    answers: &[PlacementAnswer],
    source: &AnswerSource,
    settings: &PlacementSettings,
) -> Result<PlacementScore, GradingError> {
    let selected: BTreeSet<QuestionId> = question_ids.iter().copied().collect();
    let mut submitted: HashMap<QuestionId, &str> = HashMap::with_capacity(answers.len());
    for answer in answers {
        if !selected.contains(&answer.question_id) {
            return Err(GradingError::Validation(format!(
                "question {} is not part of this attempt",
                answer.question_id
            )));
        }
        if submitted.insert(answer.question_id, answer.answer.as_str()).is_some() {
            return Err(GradingError::Validation(format!(
                "question {} was answered more than once",
                answer.question_id
            )));
        }
    }

    let results: Vec<QuestionResult> = question_ids
        .iter()
        .map(|&question_id| {
            let (is_correct, resolved) = match (submitted.get(&question_id), source.resolve(question_id)) {
                (None, key) => (false, key.is_some()),
                (Some(answer), Some(key)) => {
                    judge_answer(&key, answer, settings.assume_correct_on_unknown_question)
                }
                (Some(_), None) => (settings.assume_correct_on_unknown_question, false),
            };
            if !resolved {
                tracing::warn!(
                    question_id,
                    assumed_correct = is_correct,
                    "No answer key for placement question"
                );
            }
            QuestionResult { question_id, is_correct, resolved }
        })
        .collect();

    let score = u32::try_from(results.iter().filter(|result| result.is_correct).count())
        .unwrap_or(u32::MAX);
    let total = u32::try_from(results.len()).unwrap_or(u32::MAX);
    let percentage =
        if total > 0 { round2(f64::from(score) / f64::from(total) * 100.0) } else { 0.0 };

    Ok(PlacementScore {
        score,
        total,
        percentage,
        passed: passes(score, total, settings.pass_ratio),
        results,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum PlacementLevel {
    Advanced,
    Beginner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum UnlockStatus {
    Granted,
    AlreadyGranted,
    NotEligible,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnlockOutcome {
    pub(crate) course_id: String,
    pub(crate) status: UnlockStatus,
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct StartPlacement {
    pub(crate) year: i16,
    pub(crate) semester: i16,
    pub(crate) subject: Option<String>,
    pub(crate) course_id: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct StartedAttempt {
    pub(crate) attempt: PlacementAttempt,
    pub(crate) questions: Vec<PresentedQuestion>,
}

#[derive(Debug, Clone)]
pub(crate) struct PlacementSubmission {
    pub(crate) attempt_id: String,
    pub(crate) score: PlacementScore,
    pub(crate) level: PlacementLevel,
    /// None when the attempt has no target course.
    pub(crate) unlock: Option<UnlockOutcome>,
}

/// `StartPlacement`: draws the attempt's questions and stores the attempt.
pub(crate) async fn start_placement<R: Rng>(
    state: &AppState,
    user_id: &str,
    request: StartPlacement,
    rng: &mut R,
) -> Result<StartedAttempt, GradingError> {
    let settings = state.settings().placement();
    let filter = CandidateFilter {
        year: request.year,
        semester: request.semester,
        subject: request.subject.clone(),
    };

    let candidates = state
        .store()
        .placement_candidates(&filter)
        .await
        .map_err(GradingError::persistence("Failed to load placement questions"))?;

    let (source, questions) = if candidates.is_empty() {
        tracing::warn!(
            year = request.year,
            semester = request.semester,
            subject = request.subject.as_deref().unwrap_or("-"),
            "No placement questions match; using the built-in question set"
        );
        let questions: Vec<PresentedQuestion> = BUILTIN_QUESTIONS
            .iter()
            .take(settings.question_count)
            .map(PresentedQuestion::from)
            .collect();
        (QuestionSource::Builtin, questions)
    } else {
        let selected = select_questions(candidates, settings.question_count, rng);
        (QuestionSource::Database, selected.iter().map(PresentedQuestion::from).collect())
    };

    let attempt = state
        .store()
        .create_attempt(&NewAttempt {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            course_id: request.course_id,
            year: request.year,
            semester: request.semester,
            subject: request.subject,
            question_ids: questions.iter().map(|question| question.id).collect(),
            source,
            taken_at: primitive_now_utc(),
        })
        .await
        .map_err(GradingError::persistence("Failed to create placement attempt"))?;

    tracing::info!(
        attempt_id = %attempt.id,
        user_id,
        questions = questions.len(),
        source = ?source,
        "Started placement attempt"
    );

    Ok(StartedAttempt { attempt, questions })
}

/// `SubmitPlacement`: grades an in-progress attempt once, then grants the
/// target course when the attempt passed. An unlock failure is reported in
/// the outcome and leaves the stored score in place.
pub(crate) async fn submit_placement(
    state: &AppState,
    user_id: &str,
    attempt_id: &str,
    answers: Vec<PlacementAnswer>,
    course_id: Option<String>,
) -> Result<PlacementSubmission, GradingError> {
    let attempt = state
        .store()
        .find_attempt(attempt_id)
        .await
        .map_err(GradingError::persistence("Failed to load placement attempt"))?
        .ok_or_else(|| GradingError::NotFound("Placement attempt not found".to_string()))?;

    if attempt.user_id != user_id {
        return Err(GradingError::Forbidden("Placement attempt belongs to another user".to_string()));
    }
    if attempt.status == AttemptStatus::Graded {
        return Err(GradingError::Conflict("Placement attempt was already submitted".to_string()));
    }

    let target_course = match (attempt.course_id.clone(), course_id) {
        (Some(stored), Some(requested)) if stored != requested => {
            return Err(GradingError::Validation(
                "course_id does not match the placement attempt".to_string(),
            ));
        }
        (stored, requested) => stored.or(requested),
    };

    let question_ids = &attempt.question_ids.0;
    let source = match attempt.source {
        QuestionSource::Builtin => AnswerSource::Inline(&BUILTIN_QUESTIONS),
        QuestionSource::Database => {
            let rows = state
                .store()
                .placement_questions_by_ids(question_ids)
                .await
                .map_err(GradingError::persistence("Failed to load placement answer keys"))?;
            AnswerSource::Database(rows.into_iter().map(|row| (row.id, row)).collect())
        }
    };

    let score = grade_answers(question_ids, &answers, &source, state.settings().placement())?;

    let outcome = AttemptOutcome {
        score: i32::try_from(score.score).unwrap_or(i32::MAX),
        percentage: score.percentage,
        passed: score.passed,
        results: score.results.clone(),
        graded_at: primitive_now_utc(),
    };
    let recorded = state
        .store()
        .record_attempt_result(&attempt.id, &outcome)
        .await
        .map_err(GradingError::persistence("Failed to store placement result"))?;
    if !recorded {
        return Err(GradingError::Conflict("Placement attempt was already submitted".to_string()));
    }

    metrics::counter!("placement_attempts_total", "passed" => score.passed.to_string()).increment(1);
    tracing::info!(
        attempt_id = %attempt.id,
        user_id,
        score = score.score,
        total = score.total,
        passed = score.passed,
        "Graded placement attempt"
    );

    let unlock = match target_course {
        Some(course_id) => Some(unlock_course(state, user_id, course_id, &score).await),
        None => None,
    };

    let level = if score.passed { PlacementLevel::Advanced } else { PlacementLevel::Beginner };
    Ok(PlacementSubmission { attempt_id: attempt.id, score, level, unlock })
}

async fn unlock_course(
    state: &AppState,
    user_id: &str,
    course_id: String,
    score: &PlacementScore,
) -> UnlockOutcome {
    if !score.passed {
        return UnlockOutcome { course_id, status: UnlockStatus::NotEligible, error: None };
    }

    let grant = NewGrant {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        course_id,
        reason: UNLOCK_REASON.to_string(),
        placement_score: Some(score.percentage),
        unlocked_at: primitive_now_utc(),
    };

    match state.store().grant_unlock(&grant).await {
        Ok(true) => {
            tracing::info!(user_id, course_id = %grant.course_id, "Unlocked course after placement");
            UnlockOutcome { course_id: grant.course_id, status: UnlockStatus::Granted, error: None }
        }
        Ok(false) => UnlockOutcome {
            course_id: grant.course_id,
            status: UnlockStatus::AlreadyGranted,
            error: None,
        },
        Err(err) => {
            tracing::error!(
                error = %err,
                user_id,
                course_id = %grant.course_id,
                "Failed to unlock course after passing placement"
            );
            UnlockOutcome {
                course_id: grant.course_id,
                status: UnlockStatus::Failed,
                error: Some("Failed to record course unlock".to_string()),
            }
        }
    }
}

pub(crate) async fn list_unlocks(
    state: &AppState,
    user_id: &str,
    course_id: &str,
) -> Result<Vec<UnlockGrant>, GradingError> {
    state
        .store()
        .list_unlocks(user_id, course_id)
        .await
        .map_err(GradingError::persistence("Failed to load course unlocks"))
}
