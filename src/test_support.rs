use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::api;
use crate::core::{config::Settings, security, state::AppState};
use crate::db::models::{AssessmentQuestion, PlacementAttempt, PlacementQuestion, UnlockGrant};
use crate::db::types::{AssessmentKind, AttemptStatus};
use crate::repositories::{
    assessment_submissions::NewSubmission,
    placement_attempts::{AttemptOutcome, NewAttempt},
    placement_questions::CandidateFilter,
    unlock_grants::NewGrant,
};
use crate::services::sandbox::{
    ExecutionRequest, ExecutionResult, ExecutionStatus, Sandbox, SandboxError, SubmissionToken,
};
use crate::services::store::GradingStore;

const TEST_SECRET_KEY: &str = "test-secret";

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<AsyncMutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(AsyncMutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("EDU_ENV", "test");
    std::env::set_var("EDU_STRICT_CONFIG", "0");
    std::env::set_var("SECRET_KEY", TEST_SECRET_KEY);
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("ENVIRONMENT");
    std::env::remove_var("DATABASE_URL");
    std::env::remove_var("SANDBOX_API_KEY");
    std::env::remove_var("PROJECT_NAME");
    for name in [
        "API_V1_STR",
        "ALGORITHM",
        "BACKEND_CORS_ORIGINS",
        "SANDBOX_LANGUAGE_ID",
        "GRADING_MCQ_WEIGHT",
        "GRADING_TF_WEIGHT",
        "GRADING_CODE_WEIGHT",
        "GRADE_A_MIN",
        "GRADE_B_MIN",
        "GRADE_C_MIN",
        "PLACEMENT_QUESTION_COUNT",
        "PLACEMENT_PASS_RATIO",
        "PLACEMENT_ASSUME_CORRECT_ON_UNKNOWN",
        "SANDBOX_INITIAL_WAIT_MS",
        "SANDBOX_POLL_INTERVAL_MS",
        "SANDBOX_MAX_POLLS",
        "SANDBOX_BUDGET_MS",
        "SANDBOX_MAX_CONCURRENCY",
    ] {
        std::env::remove_var(name);
    }
}

/// Router and state over an in-memory store and a sandbox that runs every
/// program successfully with empty output.
pub(crate) async fn setup_test_context() -> TestContext {
    setup_test_context_with(MemoryStore::default(), ScriptedSandbox::responding(|_, _| succeeded("")))
        .await
}

pub(crate) async fn setup_test_context_with(store: MemoryStore, sandbox: ScriptedSandbox) -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let state = AppState::new(settings, Arc::new(store), Arc::new(sandbox));
    let app = api::router::router(state.clone());

    TestContext { state, app, _guard: guard }
}

pub(crate) fn bearer_token(user_id: &str, settings: &Settings) -> String {
    security::create_access_token(user_id, settings, None).expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}

fn injected_failure(operation: &str) -> sqlx::Error {
    sqlx::Error::Protocol(format!("injected failure: {operation}"))
}

#[derive(Default)]
struct MemoryInner {
    assessment_questions: Vec<AssessmentQuestion>,
    placement_questions: Vec<PlacementQuestion>,
    attempts: HashMap<String, PlacementAttempt>,
    submissions: Vec<NewSubmission>,
    grants: Vec<UnlockGrant>,
    fail_reads: bool,
    fail_submission_saves: bool,
    fail_attempt_writes: bool,
    fail_unlocks: bool,
}

/// `GradingStore` kept in memory, with switches that make chosen operations fail.
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("memory store lock")
    }

    pub(crate) fn insert_assessment_question(&self, question: AssessmentQuestion) {
        self.lock().assessment_questions.push(question);
    }

    pub(crate) fn insert_placement_question(&self, question: PlacementQuestion) {
        self.lock().placement_questions.push(question);
    }

    pub(crate) fn submissions(&self) -> Vec<NewSubmission> {
        self.lock().submissions.clone()
    }

    pub(crate) fn grants(&self) -> Vec<UnlockGrant> {
        self.lock().grants.clone()
    }

    pub(crate) fn attempt(&self, attempt_id: &str) -> Option<PlacementAttempt> {
        self.lock().attempts.get(attempt_id).cloned()
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub(crate) fn fail_submission_saves(&self, fail: bool) {
        self.lock().fail_submission_saves = fail;
    }

    pub(crate) fn fail_attempt_writes(&self, fail: bool) {
        self.lock().fail_attempt_writes = fail;
    }

    pub(crate) fn fail_unlocks(&self, fail: bool) {
        self.lock().fail_unlocks = fail;
    }
}

#[async_trait]
impl GradingStore for MemoryStore {
    async fn assessment_questions(
        &self,
        course_id: &str,
        assessment: AssessmentKind,
    ) -> Result<Vec<AssessmentQuestion>, sqlx::Error> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(injected_failure("assessment_questions"));
        }
        let mut questions: Vec<AssessmentQuestion> = inner
            .assessment_questions
            .iter()
            .filter(|question| question.course_id == course_id && question.assessment == assessment)
            .cloned()
            .collect();
        questions.sort_by_key(|question| (question.position, question.id));
        Ok(questions)
    }

    async fn insert_submission(&self, submission: &NewSubmission) -> Result<(), sqlx::Error> {
        let mut inner = self.lock();
        if inner.fail_submission_saves {
            return Err(injected_failure("insert_submission"));
        }
        inner.submissions.push(submission.clone());
        Ok(())
    }

    async fn placement_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<PlacementQuestion>, sqlx::Error> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(injected_failure("placement_candidates"));
        }
        Ok(inner
            .placement_questions
            .iter()
            .filter(|question| {
                question.year == filter.year
                    && question.semester == filter.semester
                    && filter.subject.as_deref().map_or(true, |subject| question.subject == subject)
            })
            .cloned()
            .collect())
    }

    async fn placement_questions_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<Vec<PlacementQuestion>, sqlx::Error> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(injected_failure("placement_questions_by_ids"));
        }
        Ok(inner
            .placement_questions
            .iter()
            .filter(|question| ids.contains(&question.id))
            .cloned()
            .collect())
    }

    async fn create_attempt(&self, attempt: &NewAttempt) -> Result<PlacementAttempt, sqlx::Error> {
        if self.lock().fail_attempt_writes {
            return Err(injected_failure("create_attempt"));
        }
        let created = PlacementAttempt {
            id: attempt.id.clone(),
            user_id: attempt.user_id.clone(),
            course_id: attempt.course_id.clone(),
            year: attempt.year,
            semester: attempt.semester,
            subject: attempt.subject.clone(),
            question_ids: sqlx::types::Json(attempt.question_ids.clone()),
            source: attempt.source,
            status: AttemptStatus::InProgress,
            score: None,
            total_questions: attempt.question_ids.len() as i32,
            percentage: None,
            passed: None,
            results: None,
            taken_at: attempt.taken_at,
            graded_at: None,
        };
        self.lock().attempts.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<PlacementAttempt>, sqlx::Error> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(injected_failure("find_attempt"));
        }
        Ok(inner.attempts.get(attempt_id).cloned())
    }

    async fn record_attempt_result(
        &self,
        attempt_id: &str,
        outcome: &AttemptOutcome,
    ) -> Result<bool, sqlx::Error> {
        let mut inner = self.lock();
        if inner.fail_attempt_writes {
            return Err(injected_failure("record_attempt_result"));
        }
        let Some(attempt) = inner.attempts.get_mut(attempt_id) else {
            return Ok(false);
        };
        if attempt.status != AttemptStatus::InProgress {
            return Ok(false);
        }

        attempt.status = AttemptStatus::Graded;
        attempt.score = Some(outcome.score);
        attempt.percentage = Some(outcome.percentage);
        attempt.passed = Some(outcome.passed);
        attempt.results = Some(sqlx::types::Json(outcome.results.clone()));
        attempt.graded_at = Some(outcome.graded_at);
        Ok(true)
    }

    async fn grant_unlock(&self, grant: &NewGrant) -> Result<bool, sqlx::Error> {
        let mut inner = self.lock();
        if inner.fail_unlocks {
            return Err(injected_failure("grant_unlock"));
        }
        let exists = inner.grants.iter().any(|existing| {
            existing.user_id == grant.user_id
                && existing.course_id == grant.course_id
                && existing.reason == grant.reason
        });
        if exists {
            return Ok(false);
        }

        inner.grants.push(UnlockGrant {
            id: grant.id.clone(),
            user_id: grant.user_id.clone(),
            course_id: grant.course_id.clone(),
            reason: grant.reason.clone(),
            placement_score: grant.placement_score,
            unlocked_at: grant.unlocked_at,
        });
        Ok(true)
    }

    async fn list_unlocks(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<Vec<UnlockGrant>, sqlx::Error> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(injected_failure("list_unlocks"));
        }
        Ok(inner
            .grants
            .iter()
            .filter(|grant| grant.user_id == user_id && grant.course_id == course_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        if self.lock().fail_reads {
            return Err(injected_failure("ping"));
        }
        Ok(())
    }
}

pub(crate) fn succeeded(stdout: &str) -> ExecutionResult {
    ExecutionResult {
        status: ExecutionStatus::Succeeded,
        stdout: stdout.trim_end().to_string(),
        stderr: None,
        compile_output: None,
    }
}

pub(crate) fn compile_error(diagnostic: &str) -> ExecutionResult {
    ExecutionResult {
        status: ExecutionStatus::CompileError,
        stdout: String::new(),
        stderr: None,
        compile_output: Some(diagnostic.to_string()),
    }
}

type Responder = dyn Fn(&str, &str) -> ExecutionResult + Send + Sync;

enum Behavior {
    Respond(Box<Responder>),
    AlwaysPending,
    Unavailable,
    Hang,
}

struct Submitted {
    source: String,
    stdin: String,
    polls: u32,
}

/// Sandbox stub driven by a closure over `(source, stdin)`.
pub(crate) struct ScriptedSandbox {
    behavior: Behavior,
    pending_polls: u32,
    submitted: Mutex<HashMap<String, Submitted>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSandbox {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            pending_polls: 0,
            submitted: Mutex::new(HashMap::new()),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn responding(
        respond: impl Fn(&str, &str) -> ExecutionResult + Send + Sync + 'static,
    ) -> Self {
        Self::with_behavior(Behavior::Respond(Box::new(respond)))
    }

    pub(crate) fn always_pending() -> Self {
        Self::with_behavior(Behavior::AlwaysPending)
    }

    pub(crate) fn unavailable() -> Self {
        Self::with_behavior(Behavior::Unavailable)
    }

    /// Accepts nothing and never answers the submit call.
    pub(crate) fn hanging() -> Self {
        Self::with_behavior(Behavior::Hang)
    }

    /// Reports each submission as queued for the first `polls` polls.
    pub(crate) fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    pub(crate) fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub(crate) fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Highest number of submissions accepted but not yet finished at once.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn pending() -> ExecutionResult {
    ExecutionResult {
        status: ExecutionStatus::Running,
        stdout: String::new(),
        stderr: None,
        compile_output: None,
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn submit(&self, request: &ExecutionRequest<'_>) -> Result<SubmissionToken, SandboxError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Unavailable => {
                return Err(SandboxError::Unavailable("connection refused".to_string()));
            }
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Respond(_) | Behavior::AlwaysPending => {}
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let token = Uuid::new_v4().to_string();
        self.submitted.lock().expect("sandbox lock").insert(
            token.clone(),
            Submitted {
                source: request.source_code.to_string(),
                stdin: request.stdin.to_string(),
                polls: 0,
            },
        );
        Ok(SubmissionToken(token))
    }

    async fn poll(&self, token: &SubmissionToken) -> Result<ExecutionResult, SandboxError> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let mut submitted = self.submitted.lock().expect("sandbox lock");
        let entry = submitted
            .get_mut(&token.0)
            .ok_or_else(|| SandboxError::Unavailable(format!("unknown token {}", token.0)))?;
        entry.polls += 1;

        match &self.behavior {
            Behavior::Respond(respond) if entry.polls > self.pending_polls => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(respond(&entry.source, &entry.stdin))
            }
            _ => Ok(pending()),
        }
    }
}
