//! Code judging orchestrator.
//!
//! Two backends live behind one contract: an asynchronous execution
//! backend speaking the Judge0 submit-then-poll protocol, and a
//! synchronous model-based simulation backend. Both normalize their
//! results into [`Verdict`]; failures are typed [`JudgeError`]s. The
//! verdict policies in [`policy`] layer pass/fail decisions on top.

pub mod execution;
pub mod policy;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::JudgeError;
use crate::session::Language;

/// Judge0 status id convention: 1 = in queue, 2 = processing,
/// 3 = accepted, above 3 = a terminal failure category.
pub const STATUS_IN_QUEUE: u32 = 1;
pub const STATUS_PROCESSING: u32 = 2;
pub const STATUS_ACCEPTED: u32 = 3;
pub const STATUS_COMPILATION_ERROR: u32 = 6;

/// Status component of a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictStatus {
    pub id: u32,
    #[serde(default)]
    pub description: String,
}

impl VerdictStatus {
    pub fn new(id: u32, description: &str) -> Self {
        Self {
            id,
            description: description.to_string(),
        }
    }

    /// A terminal status will not change on further polling.
    pub fn is_terminal(&self) -> bool {
        self.id >= STATUS_ACCEPTED
    }
}

/// Normalized judging result, identical in shape across backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub compile_output: String,
    pub status: VerdictStatus,
}

impl Verdict {
    pub fn accepted(&self) -> bool {
        self.status.id == STATUS_ACCEPTED
    }

    /// Whether the submission failed to compile or parse.
    pub fn compile_failed(&self) -> bool {
        self.status.id == STATUS_COMPILATION_ERROR || !self.compile_output.trim().is_empty()
    }
}

/// A piece of user code handed to a judging backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSubmission {
    pub source_code: String,
    pub language: Language,
    #[serde(default)]
    pub stdin: String,
}

impl CodeSubmission {
    pub fn new(source_code: &str, language: Language) -> Self {
        Self {
            source_code: source_code.to_string(),
            language,
            stdin: String::new(),
        }
    }

    pub fn with_stdin(mut self, stdin: &str) -> Self {
        self.stdin = stdin.to_string();
        self
    }
}

/// Contract both judging backends implement.
///
/// `submit_for_judging` resolves to a terminal verdict, a typed error,
/// or — when the token fires — `JudgeError::Cancelled`. No call may
/// hang past its backend's configured ceiling.
#[async_trait]
pub trait JudgeBackend: Send + Sync {
    async fn submit_for_judging(
        &self,
        submission: &CodeSubmission,
        cancel: &CancellationToken,
    ) -> Result<Verdict, JudgeError>;
}
