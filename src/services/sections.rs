use std::collections::BTreeMap;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::services::heuristics;
use crate::services::sandbox::{
    self, ExecutionRequest, ExecutionResult, ExecutionStatus, PollPolicy, Sandbox, SandboxError,
};

pub(crate) type QuestionId = i64;
pub(crate) type AnswerMap = BTreeMap<QuestionId, String>;

/// Points a holistic code question earns when the program runs successfully.
pub(crate) const JUDGE_POINTS: f64 = 2.0;
/// Raw point ceiling of a single code question.
pub(crate) const CODE_QUESTION_POINTS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Section {
    Mcq,
    TrueFalse,
    Code,
}

impl Section {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Mcq => "mcq",
            Self::TrueFalse => "true_false",
            Self::Code => "code",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum DiagnosticKind {
    NoSource,
    WrongOutput,
    CompileError,
    RuntimeError,
    ExecutionTimedOut,
    SandboxUnavailable,
    UnknownStatus,
}

/// Why a question lost credit. Compiler and runtime text is passed through
/// verbatim for learner feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Diagnostic {
    pub(crate) question_id: QuestionId,
    pub(crate) kind: DiagnosticKind,
    pub(crate) detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SectionScore {
    pub(crate) section: Section,
    pub(crate) raw: f64,
    pub(crate) total: f64,
    pub(crate) correct: BTreeMap<QuestionId, bool>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl SectionScore {
    pub(crate) fn empty(section: Section) -> Self {
        Self { section, raw: 0.0, total: 0.0, correct: BTreeMap::new(), diagnostics: Vec::new() }
    }

    pub(crate) fn question_count(&self) -> usize {
        self.correct.len()
    }
}

/// Trimmed, case-insensitive comparison. A blank answer never matches.
pub(crate) fn answers_match(submitted: &str, expected: &str) -> bool {
    let submitted = submitted.trim();
    !submitted.is_empty() && submitted.to_lowercase() == expected.trim().to_lowercase()
}

/// Grades a multiple-choice or true/false section. Unanswered questions are
/// incorrect; answers to questions outside `key` are ignored.
pub(crate) fn grade_choices(
    section: Section,
    answers: &AnswerMap,
    key: &BTreeMap<QuestionId, String>,
) -> SectionScore {
    let correct: BTreeMap<QuestionId, bool> = key
        .iter()
        .map(|(id, expected)| {
            let is_correct =
                answers.get(id).is_some_and(|submitted| answers_match(submitted, expected));
            (*id, is_correct)
        })
        .collect();

    let raw = correct.values().filter(|is_correct| **is_correct).count() as f64;

    SectionScore { section, raw, total: key.len() as f64, correct, diagnostics: Vec::new() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TestCase {
    #[serde(default)]
    pub(crate) input: String,
    pub(crate) expected_output: String,
}

/// A code question. Without test cases it is graded holistically from the
/// run verdict plus the static heuristic score.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CodeQuestion {
    pub(crate) id: QuestionId,
    pub(crate) test_cases: Vec<TestCase>,
}

/// Compares program output line by line, ignoring trailing whitespace on each
/// line and trailing blank lines.
pub(crate) fn outputs_match(actual: &str, expected: &str) -> bool {
    normalized_lines(actual) == normalized_lines(expected)
}

fn normalized_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Holistic points: the judge share on a successful run plus the heuristic
/// score, capped at [`CODE_QUESTION_POINTS`].
pub(crate) fn holistic_points(status: Option<ExecutionStatus>, heuristic: u8) -> f64 {
    let judge = if status == Some(ExecutionStatus::Succeeded) { JUDGE_POINTS } else { 0.0 };
    (judge + f64::from(heuristic)).min(CODE_QUESTION_POINTS)
}

struct QuestionOutcome {
    id: QuestionId,
    points: f64,
    diagnostics: Vec<Diagnostic>,
}

pub(crate) struct CodeGrader<'a> {
    sandbox: &'a dyn Sandbox,
    policy: PollPolicy,
    language_id: u32,
    runs: Semaphore,
}

impl<'a> CodeGrader<'a> {
    /// At most `max_concurrent_runs` sandbox executions of one grading pass
    /// are in flight at a time.
    pub(crate) fn new(
        sandbox: &'a dyn Sandbox,
        policy: PollPolicy,
        language_id: u32,
        max_concurrent_runs: usize,
    ) -> Self {
        Self { sandbox, policy, language_id, runs: Semaphore::new(max_concurrent_runs.max(1)) }
    }

    /// Runs every question concurrently. Execution failures cost the affected
    /// question its correctness credit and never fail the section.
    pub(crate) async fn grade(&self, questions: &[CodeQuestion], answers: &AnswerMap) -> SectionScore {
        if questions.is_empty() {
            return SectionScore::empty(Section::Code);
        }

        let outcomes = join_all(
            questions
                .iter()
                .map(|question| self.grade_question(question, answers.get(&question.id))),
        )
        .await;

        let mut score = SectionScore::empty(Section::Code);
        for outcome in outcomes {
            score.raw += outcome.points;
            score.total += CODE_QUESTION_POINTS;
            score.correct.insert(outcome.id, outcome.points >= CODE_QUESTION_POINTS);
            score.diagnostics.extend(outcome.diagnostics);
        }
        score
    }

    async fn grade_question(&self, question: &CodeQuestion, source: Option<&String>) -> QuestionOutcome {
        let source = source.map(String::as_str).unwrap_or_default();
        if source.trim().is_empty() {
            return QuestionOutcome {
                id: question.id,
                points: 0.0,
                diagnostics: vec![Diagnostic {
                    question_id: question.id,
                    kind: DiagnosticKind::NoSource,
                    detail: None,
                }],
            };
        }

        if question.test_cases.is_empty() {
            self.grade_holistic(question.id, source).await
        } else {
            self.grade_test_cases(question, source).await
        }
    }

    async fn grade_holistic(&self, id: QuestionId, source: &str) -> QuestionOutcome {
        let heuristic = heuristics::score(source);
        let run = self.run(source, "").await;

        let mut diagnostics = Vec::new();
        let status = match &run {
            Ok(result) => {
                diagnostics.extend(diagnose(id, result));
                Some(result.status)
            }
            Err(err) => {
                diagnostics.push(diagnose_failure(id, err));
                None
            }
        };

        tracing::debug!(question_id = id, heuristic, status = ?status, "Graded holistic code question");
        QuestionOutcome { id, points: holistic_points(status, heuristic), diagnostics }
    }

    async fn grade_test_cases(&self, question: &CodeQuestion, source: &str) -> QuestionOutcome {
        let runs = join_all(question.test_cases.iter().map(|case| self.run(source, &case.input))).await;

        let case_count = question.test_cases.len();
        let mut passed = 0usize;
        let mut diagnostics = Vec::new();

        for (index, (case, run)) in question.test_cases.iter().zip(runs).enumerate() {
            match run {
                Ok(result) if result.status == ExecutionStatus::Succeeded => {
                    if outputs_match(&result.stdout, &case.expected_output) {
                        passed += 1;
                    } else {
                        diagnostics.push(Diagnostic {
                            question_id: question.id,
                            kind: DiagnosticKind::WrongOutput,
                            detail: Some(format!("test case {} of {case_count}", index + 1)),
                        });
                    }
                }
                Ok(result) => diagnostics.extend(diagnose(question.id, &result)),
                Err(err) => diagnostics.push(diagnose_failure(question.id, &err)),
            }
        }

        let points = CODE_QUESTION_POINTS * passed as f64 / case_count as f64;
        QuestionOutcome { id: question.id, points, diagnostics }
    }

    async fn run(&self, source: &str, stdin: &str) -> Result<ExecutionResult, SandboxError> {
        let _permit = self
            .runs
            .acquire()
            .await
            .map_err(|err| SandboxError::Unavailable(format!("execution limiter closed: {err}")))?;
        let request = ExecutionRequest { source_code: source, language_id: self.language_id, stdin };
        sandbox::execute(self.sandbox, &request, &self.policy).await
    }
}

fn diagnose(question_id: QuestionId, result: &ExecutionResult) -> Option<Diagnostic> {
    let (kind, detail) = match result.status {
        ExecutionStatus::Succeeded => return None,
        ExecutionStatus::CompileError => (DiagnosticKind::CompileError, result.compile_output.clone()),
        ExecutionStatus::RuntimeError => (DiagnosticKind::RuntimeError, result.stderr.clone()),
        ExecutionStatus::Queued | ExecutionStatus::Running | ExecutionStatus::Unknown => {
            (DiagnosticKind::UnknownStatus, result.stderr.clone())
        }
    };
    Some(Diagnostic { question_id, kind, detail })
}

fn diagnose_failure(question_id: QuestionId, err: &SandboxError) -> Diagnostic {
    tracing::warn!(question_id, error = %err, "Code execution failed");
    let kind = match err {
        SandboxError::Unavailable(_) => DiagnosticKind::SandboxUnavailable,
        SandboxError::TimedOut { .. } => DiagnosticKind::ExecutionTimedOut,
    };
    Diagnostic { question_id, kind, detail: Some(err.to_string()) }
}
