//! Asynchronous execution backend (Judge0 protocol).
//!
//! Submission is non-blocking: the backend hands out an opaque token
//! immediately, then verdicts are polled by token on a fixed interval
//! up to a bounded attempt count. The flow is an explicit state
//! machine — Submit → Poll → terminal verdict | timeout | transport
//! error — with cancellation as a first-class transition at every
//! await point, so tearing down the requester stops polling at once.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::JudgeError;
use crate::judge::{CodeSubmission, JudgeBackend, Verdict, VerdictStatus};

/// Caps and cadence for the submit-then-poll protocol.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Base URL of the execution service.
    pub base_url: String,
    /// Cap on the submission request.
    pub submit_timeout: Duration,
    /// Cap on each individual poll request.
    pub poll_timeout: Duration,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Poll budget; 40 * 500 ms gives the 20 s overall ceiling.
    pub max_poll_attempts: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:2358".to_string(),
            submit_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            max_poll_attempts: 40,
        }
    }
}

/// Wire transport for the execution service. Separated from the
/// polling flow so the flow can be tested against scripted verdict
/// sequences without a live backend.
#[async_trait]
pub trait ExecutionTransport: Send + Sync {
    /// Submit code; returns the opaque verdict token.
    async fn submit(&self, submission: &CodeSubmission) -> Result<String, JudgeError>;
    /// Fetch the current verdict for a token.
    async fn fetch(&self, token: &str) -> Result<Verdict, JudgeError>;
}

/// The submit-then-poll orchestrator.
pub struct ExecutionJudge<T = HttpTransport> {
    transport: T,
    config: ExecutionConfig,
}

impl ExecutionJudge<HttpTransport> {
    pub fn new(config: ExecutionConfig) -> Self {
        let transport = HttpTransport::new(&config);
        Self { transport, config }
    }
}

impl<T: ExecutionTransport> ExecutionJudge<T> {
    /// Build an orchestrator over a custom transport (used in tests).
    pub fn with_transport(transport: T, config: ExecutionConfig) -> Self {
        Self { transport, config }
    }
}

/// Explicit flow state. Terminal outcomes are function returns.
enum JudgeFlow {
    Submit,
    Poll { token: String, attempt: u32 },
}

#[async_trait]
impl<T: ExecutionTransport> JudgeBackend for ExecutionJudge<T> {
    async fn submit_for_judging(
        &self,
        submission: &CodeSubmission,
        cancel: &CancellationToken,
    ) -> Result<Verdict, JudgeError> {
        let mut flow = JudgeFlow::Submit;

        loop {
            match flow {
                JudgeFlow::Submit => {
                    let token = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(JudgeError::Cancelled),
                        result = self.transport.submit(submission) => result?,
                    };
                    tracing::debug!(%token, "submission accepted, polling");
                    flow = JudgeFlow::Poll { token, attempt: 0 };
                }
                JudgeFlow::Poll { token, attempt } => {
                    if attempt >= self.config.max_poll_attempts {
                        return Err(JudgeError::Timeout(format!(
                            "no terminal status after {} polls",
                            self.config.max_poll_attempts
                        )));
                    }

                    let verdict = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(JudgeError::Cancelled),
                        result = self.transport.fetch(&token) => result?,
                    };

                    if verdict.status.is_terminal() {
                        tracing::debug!(
                            status = verdict.status.id,
                            description = %verdict.status.description,
                            polls = attempt + 1,
                            "terminal verdict"
                        );
                        return Ok(verdict);
                    }

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(JudgeError::Cancelled),
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                    flow = JudgeFlow::Poll {
                        token,
                        attempt: attempt + 1,
                    };
                }
            }
        }
    }
}

// ── HTTP transport ────────────────────────────────────────────────────

#[derive(Serialize)]
struct SubmitRequest<'a> {
    source_code: &'a str,
    language_id: u32,
    stdin: &'a str,
    redirect_stderr_to_stdout: bool,
}

#[derive(Deserialize)]
struct SubmitResponse {
    token: Option<String>,
}

#[derive(Deserialize)]
struct FetchResponse {
    status: Option<VerdictStatus>,
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
}

/// reqwest-backed transport speaking the Judge0 wire format.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    submit_timeout: Duration,
    poll_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            submit_timeout: config.submit_timeout,
            poll_timeout: config.poll_timeout,
        }
    }
}

#[async_trait]
impl ExecutionTransport for HttpTransport {
    async fn submit(&self, submission: &CodeSubmission) -> Result<String, JudgeError> {
        let request = SubmitRequest {
            source_code: &submission.source_code,
            language_id: submission.language.judge0_id(),
            stdin: &submission.stdin,
            redirect_stderr_to_stdout: true,
        };

        let response = self
            .client
            .post(format!(
                "{}/submissions?base64_encoded=false&wait=false",
                self.base_url
            ))
            .json(&request)
            .timeout(self.submit_timeout)
            .send()
            .await
            .map_err(JudgeError::from_transport)?
            .error_for_status()
            .map_err(|e| JudgeError::Transport(e.to_string()))?;

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| JudgeError::Malformed(e.to_string()))?;

        body.token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| JudgeError::Malformed("no token in submission response".to_string()))
    }

    async fn fetch(&self, token: &str) -> Result<Verdict, JudgeError> {
        let response = self
            .client
            .get(format!(
                "{}/submissions/{}?base64_encoded=false",
                self.base_url, token
            ))
            .timeout(self.poll_timeout)
            .send()
            .await
            .map_err(JudgeError::from_transport)?
            .error_for_status()
            .map_err(|e| JudgeError::Transport(e.to_string()))?;

        let body: FetchResponse = response
            .json()
            .await
            .map_err(|e| JudgeError::Malformed(e.to_string()))?;

        let status = body
            .status
            .ok_or_else(|| JudgeError::Malformed("verdict has no status field".to_string()))?;

        Ok(Verdict {
            stdout: body.stdout.unwrap_or_default(),
            stderr: body.stderr.unwrap_or_default(),
            compile_output: body.compile_output.unwrap_or_default(),
            status,
        })
    }
}
