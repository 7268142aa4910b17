use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::Instant;

use crate::core::config::SandboxSettings;

/// Terminal and non-terminal states reported by the execution service.
///
/// Status ids on the wire: 1 and 2 are pending, 3 is success, 4 is a compile
/// error, 5 is a runtime error. Anything else is reported as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ExecutionStatus {
    Queued,
    Running,
    Succeeded,
    CompileError,
    RuntimeError,
    Unknown,
}

impl ExecutionStatus {
    pub(crate) fn from_status_id(id: i64) -> Self {
        match id {
            1 => Self::Queued,
            2 => Self::Running,
            3 => Self::Succeeded,
            4 => Self::CompileError,
            5 => Self::RuntimeError,
            _ => Self::Unknown,
        }
    }

    pub(crate) fn is_pending(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::CompileError => "compile_error",
            Self::RuntimeError => "runtime_error",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ExecutionResult {
    pub(crate) status: ExecutionStatus,
    /// Verbatim program output with trailing whitespace removed.
    pub(crate) stdout: String,
    pub(crate) stderr: Option<String>,
    pub(crate) compile_output: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecutionRequest<'a> {
    pub(crate) source_code: &'a str,
    pub(crate) language_id: u32,
    pub(crate) stdin: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubmissionToken(pub(crate) String);

#[derive(Debug, Error)]
pub(crate) enum SandboxError {
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
    #[error("execution did not reach a terminal status after {elapsed_ms} ms")]
    TimedOut { elapsed_ms: u64 },
}

/// Remote code-execution service. Implementations hold no per-submission
/// state; everything needed to poll is in the token.
#[async_trait]
pub(crate) trait Sandbox: Send + Sync {
    async fn submit(&self, request: &ExecutionRequest<'_>) -> Result<SubmissionToken, SandboxError>;

    async fn poll(&self, token: &SubmissionToken) -> Result<ExecutionResult, SandboxError>;
}

/// Bounded wait/poll schedule: sleep `initial_wait`, poll, then sleep
/// `poll_interval` between further polls, at most `max_polls` polls, all of it
/// (submit included) inside `budget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollPolicy {
    pub(crate) initial_wait: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) max_polls: u32,
    pub(crate) budget: Duration,
}

impl PollPolicy {
    pub(crate) fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            initial_wait: Duration::from_millis(settings.initial_wait_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            max_polls: settings.max_polls.max(1),
            budget: Duration::from_millis(settings.budget_ms),
        }
    }
}

/// Submits `request` and polls until a terminal status, the poll limit, or the
/// wall-clock budget, whichever comes first.
pub(crate) async fn execute(
    sandbox: &dyn Sandbox,
    request: &ExecutionRequest<'_>,
    policy: &PollPolicy,
) -> Result<ExecutionResult, SandboxError> {
    let started = Instant::now();

    let outcome = match tokio::time::timeout(policy.budget, poll_to_completion(sandbox, request, policy))
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(SandboxError::TimedOut { elapsed_ms: elapsed_ms(started) }),
    };

    let status_label = match &outcome {
        Ok(result) => result.status.as_str(),
        Err(SandboxError::TimedOut { .. }) => "timed_out",
        Err(SandboxError::Unavailable(_)) => "unavailable",
    };
    metrics::counter!("sandbox_executions_total", "status" => status_label).increment(1);
    metrics::histogram!("sandbox_execution_seconds").record(started.elapsed().as_secs_f64());

    outcome
}

async fn poll_to_completion(
    sandbox: &dyn Sandbox,
    request: &ExecutionRequest<'_>,
    policy: &PollPolicy,
) -> Result<ExecutionResult, SandboxError> {
    let started = Instant::now();
    let token = sandbox.submit(request).await?;
    tracing::debug!(token = %token.0, language_id = request.language_id, "Submitted code for execution");

    let mut wait = policy.initial_wait;
    for poll in 1..=policy.max_polls {
        tokio::time::sleep(wait).await;

        let result = sandbox.poll(&token).await?;
        if !result.status.is_pending() {
            return Ok(result);
        }

        tracing::debug!(token = %token.0, poll, status = result.status.as_str(), "Execution still pending");
        wait = policy.poll_interval;
    }

    tracing::warn!(token = %token.0, polls = policy.max_polls, "Giving up on pending execution");
    Err(SandboxError::TimedOut { elapsed_ms: elapsed_ms(started) })
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// HTTP client for a Judge0-compatible execution service.
#[derive(Debug, Clone)]
pub(crate) struct Judge0Client {
    client: Client,
    base_url: String,
    api_key: String,
}

impl Judge0Client {
    pub(crate) fn from_settings(settings: &SandboxSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
            .context("Failed to build sandbox HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("X-Auth-Token", &self.api_key)
        }
    }

    async fn read_json(response: reqwest::Response, action: &str) -> Result<Value, SandboxError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SandboxError::Unavailable(format!("{action}: failed to read body: {err}")))?;

        if !status.is_success() {
            return Err(SandboxError::Unavailable(format!("{action} returned {status}: {body}")));
        }

        serde_json::from_str(&body).map_err(|err| {
            SandboxError::Unavailable(format!("{action} returned non-JSON body: {err}: {body}"))
        })
    }
}

#[async_trait]
impl Sandbox for Judge0Client {
    async fn submit(&self, request: &ExecutionRequest<'_>) -> Result<SubmissionToken, SandboxError> {
        let url = format!("{}/submissions?base64_encoded=false&wait=false", self.base_url);
        let payload = json!({
            "source_code": request.source_code,
            "language_id": request.language_id,
            "stdin": request.stdin,
        });

        let response = self
            .authorized(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(|err| SandboxError::Unavailable(format!("submit failed: {err}")))?;

        let body = Self::read_json(response, "submit").await?;
        extract_token(&body)
            .ok_or_else(|| SandboxError::Unavailable("submit response missing token".to_string()))
    }

    async fn poll(&self, token: &SubmissionToken) -> Result<ExecutionResult, SandboxError> {
        let url = format!(
            "{}/submissions/{}?base64_encoded=false&fields=status,stdout,stderr,compile_output",
            self.base_url, token.0
        );

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|err| SandboxError::Unavailable(format!("poll failed: {err}")))?;

        let body = Self::read_json(response, "poll").await?;
        parse_execution_result(&body)
    }
}

fn extract_token(payload: &Value) -> Option<SubmissionToken> {
    payload
        .get("token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| SubmissionToken(token.to_string()))
}

pub(crate) fn parse_execution_result(payload: &Value) -> Result<ExecutionResult, SandboxError> {
    let status_id = payload
        .get("status")
        .and_then(|status| status.get("id"))
        .and_then(Value::as_i64)
        .ok_or_else(|| SandboxError::Unavailable("poll response missing status.id".to_string()))?;

    let text = |field: &str| {
        payload
            .get(field)
            .and_then(Value::as_str)
            .map(|value| value.trim_end().to_string())
            .filter(|value| !value.is_empty())
    };

    Ok(ExecutionResult {
        status: ExecutionStatus::from_status_id(status_id),
        stdout: text("stdout").unwrap_or_default(),
        stderr: text("stderr"),
        compile_output: text("compile_output"),
    })
}

#[cfg(test)]
mod tests {
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    use super::*;
    use crate::test_support::{succeeded, ScriptedSandbox};

    fn policy() -> PollPolicy {
        PollPolicy {
            initial_wait: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(1000),
            max_polls: 2,
            budget: Duration::from_millis(5000),
        }
    }

    fn request() -> ExecutionRequest<'static> {
        ExecutionRequest { source_code: "int main() {}", language_id: 54, stdin: "" }
    }

    #[test]
    fn status_ids_map_to_states() {
        assert_eq!(ExecutionStatus::from_status_id(1), ExecutionStatus::Queued);
        assert_eq!(ExecutionStatus::from_status_id(2), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::from_status_id(3), ExecutionStatus::Succeeded);
        assert_eq!(ExecutionStatus::from_status_id(4), ExecutionStatus::CompileError);
        assert_eq!(ExecutionStatus::from_status_id(5), ExecutionStatus::RuntimeError);
        assert_eq!(ExecutionStatus::from_status_id(13), ExecutionStatus::Unknown);
        assert!(ExecutionStatus::Queued.is_pending());
        assert!(!ExecutionStatus::Unknown.is_pending());
    }

    #[test]
    fn parse_trims_trailing_whitespace_only() {
        let payload = json!({
            "status": {"id": 3, "description": "Accepted"},
            "stdout": "  42\n7 \n\n",
            "stderr": null,
            "compile_output": ""
        });

        let result = parse_execution_result(&payload).expect("result");
        assert_eq!(result.status, ExecutionStatus::Succeeded);
        assert_eq!(result.stdout, "  42\n7");
        assert_eq!(result.stderr, None);
        assert_eq!(result.compile_output, None);
    }

    #[test]
    fn parse_keeps_compiler_diagnostics() {
        let payload = json!({
            "status": {"id": 4},
            "stdout": null,
            "compile_output": "main.cpp:1:1: error: expected ';'\n"
        });

        let result = parse_execution_result(&payload).expect("result");
        assert_eq!(result.status, ExecutionStatus::CompileError);
        assert_eq!(result.stdout, "");
        assert_eq!(result.compile_output.as_deref(), Some("main.cpp:1:1: error: expected ';'"));
    }

    #[test]
    fn parse_without_status_is_unavailable() {
        let result = parse_execution_result(&json!({"stdout": "hi"}));
        assert!(matches!(result, Err(SandboxError::Unavailable(_))));
    }

    #[test]
    fn token_must_be_non_empty() {
        assert_eq!(
            extract_token(&json!({"token": "abc-123"})),
            Some(SubmissionToken("abc-123".to_string()))
        );
        assert_eq!(extract_token(&json!({"token": " "})), None);
        assert_eq!(extract_token(&json!({})), None);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_terminal_result() {
        let sandbox = ScriptedSandbox::responding(|_, _| succeeded("ok"));

        let result = execute(&sandbox, &request(), &policy()).await.expect("result");

        assert_eq!(result.stdout, "ok");
        assert_eq!(sandbox.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_once_more_while_pending() {
        let sandbox = ScriptedSandbox::responding(|_, _| succeeded("done")).with_pending_polls(1);

        let result = execute(&sandbox, &request(), &policy()).await.expect("result");

        assert_eq!(result.status, ExecutionStatus::Succeeded);
        assert_eq!(sandbox.poll_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_polls() {
        let sandbox = ScriptedSandbox::always_pending();
        let started = Instant::now();

        let result = execute(&sandbox, &request(), &policy()).await;

        assert!(matches!(result, Err(SandboxError::TimedOut { .. })));
        assert_eq!(sandbox.poll_count(), 2);
        assert!(started.elapsed() <= policy().budget);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_bounds_a_hanging_service() {
        let sandbox = ScriptedSandbox::hanging();
        let started = Instant::now();

        let result = execute(&sandbox, &request(), &policy()).await;

        assert!(matches!(result, Err(SandboxError::TimedOut { elapsed_ms: 5000 })));
        assert_eq!(started.elapsed(), policy().budget);
        assert_eq!(sandbox.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_failure_is_unavailable_without_polling() {
        let sandbox = ScriptedSandbox::unavailable();

        let result = execute(&sandbox, &request(), &policy()).await;

        assert!(matches!(result, Err(SandboxError::Unavailable(_))));
        assert_eq!(sandbox.poll_count(), 0);
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move { axum::serve(listener, app).await.expect("serve") });
        format!("http://{addr}")
    }

    fn judge(base_url: String, api_key: &str) -> Judge0Client {
        Judge0Client::from_settings(&SandboxSettings {
            base_url,
            api_key: api_key.to_string(),
            language_id: 54,
            request_timeout_ms: 2000,
            initial_wait_ms: 0,
            poll_interval_ms: 0,
            max_polls: 1,
            budget_ms: 5000,
            max_concurrent_runs: 1,
        })
        .expect("client")
    }

    /// Accepts submissions carrying the expected key and echoes stdin back
    /// as program output with a trailing newline.
    fn echo_judge() -> Router {
        Router::new()
            .route(
                "/submissions",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    let key = headers.get("x-auth-token").and_then(|value| value.to_str().ok());
                    if key != Some("judge-key") {
                        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
                    }
                    if body["language_id"] != 54 || body["source_code"].as_str().is_none() {
                        return (StatusCode::BAD_REQUEST, Json(json!({"error": "bad payload"})));
                    }
                    let stdin = body["stdin"].as_str().unwrap_or_default();
                    (StatusCode::CREATED, Json(json!({"token": format!("tok-{stdin}")})))
                }),
            )
            .route(
                "/submissions/:token",
                get(|Path(token): Path<String>| async move {
                    let stdout = token.trim_start_matches("tok-");
                    Json(json!({
                        "status": {"id": 3, "description": "Accepted"},
                        "stdout": format!("{stdout}\n"),
                        "stderr": null
                    }))
                }),
            )
    }

    #[tokio::test]
    async fn http_client_submits_then_polls() {
        let base_url = serve(echo_judge()).await;
        let client = judge(format!("{base_url}/"), "judge-key");
        let request = ExecutionRequest { source_code: "int main() {}", language_id: 54, stdin: "42" };
        let policy = PollPolicy {
            initial_wait: Duration::ZERO,
            poll_interval: Duration::ZERO,
            max_polls: 1,
            budget: Duration::from_secs(5),
        };

        let result = execute(&client, &request, &policy).await.expect("result");

        assert_eq!(result.status, ExecutionStatus::Succeeded);
        assert_eq!(result.stdout, "42");
        assert_eq!(result.stderr, None);
    }

    #[tokio::test]
    async fn http_client_sends_the_auth_header() {
        let base_url = serve(echo_judge()).await;

        let rejected = judge(base_url.clone(), "").submit(&request()).await;
        match rejected {
            Err(SandboxError::Unavailable(message)) => assert!(message.contains("401"), "{message}"),
            other => panic!("expected unavailable, got {other:?}"),
        }

        let token = judge(base_url, "judge-key").submit(&request()).await.expect("token");
        assert_eq!(token, SubmissionToken("tok-".to_string()));
    }

    #[tokio::test]
    async fn http_failures_are_unavailable() {
        let app = Router::new()
            .route("/broken/submissions", post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
            .route("/garbled/submissions", post(|| async { (StatusCode::OK, "not json") }))
            .route("/tokenless/submissions", post(|| async { Json(json!({"id": 1})) }))
            .route("/statusless/submissions/:token", get(|| async { Json(json!({"stdout": "hi"})) }));
        let base_url = serve(app).await;

        for prefix in ["broken", "garbled", "tokenless"] {
            let result = judge(format!("{base_url}/{prefix}"), "judge-key").submit(&request()).await;
            assert!(matches!(result, Err(SandboxError::Unavailable(_))), "{prefix}: {result:?}");
        }

        let polled = judge(format!("{base_url}/statusless"), "judge-key")
            .poll(&SubmissionToken("abc".to_string()))
            .await;
        assert!(matches!(polled, Err(SandboxError::Unavailable(_))), "{polled:?}");
    }
}
