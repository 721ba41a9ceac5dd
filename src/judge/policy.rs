//! Verdict policies: how a raw judging verdict becomes pass/fail.
//!
//! A phase configures one or more policies per question. Each policy
//! produces a [`PolicyOutcome`]; when several run, the strictest
//! governs — any failure fails the submission.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bank::Question;
use crate::errors::JudgeError;
use crate::judge::simulated::{SimulatedJudge, extract_json};
use crate::judge::{CodeSubmission, JudgeBackend};

/// How a submission is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictPolicy {
    /// Pass if the code compiles/parses; output is irrelevant.
    SyntaxCheck,
    /// Model decides functional equivalence against rubric + reference.
    EquivalenceCheck,
    /// Run user code and reference with the same stdin, compare stdout.
    DirectComparison,
}

/// Pass/fail plus a message suitable for showing to the team.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyOutcome {
    pub correct: bool,
    pub message: String,
}

impl PolicyOutcome {
    pub fn pass(message: &str) -> Self {
        Self {
            correct: true,
            message: message.to_string(),
        }
    }

    pub fn fail(message: &str) -> Self {
        Self {
            correct: false,
            message: message.to_string(),
        }
    }
}

/// Question-derived inputs the policies need.
#[derive(Debug, Clone, Default)]
pub struct JudgingContext {
    /// Rubric steps a correct solution must implement.
    pub rubric: Vec<String>,
    /// Reference solution, for equivalence and direct comparison.
    pub reference_solution: Option<String>,
    /// The answer token a solution must derive rather than embed.
    pub expected_token: String,
    /// Stdin fed to judged executions.
    pub stdin: String,
}

impl JudgingContext {
    pub fn from_question(question: &Question) -> Self {
        Self {
            rubric: question.rubric.clone(),
            reference_solution: question.reference_solution.clone(),
            expected_token: question.answer.clone(),
            stdin: question.stdin.clone().unwrap_or_default(),
        }
    }
}

/// Model reply shape for the equivalence check.
#[derive(Deserialize)]
struct EquivalenceReply {
    #[serde(default)]
    correct: bool,
    #[serde(default)]
    hardcoded: bool,
    #[serde(default)]
    message: String,
}

/// Applies verdict policies using the two judging backends.
pub struct CodeJudge {
    execution: Arc<dyn JudgeBackend>,
    model: Arc<SimulatedJudge>,
}

impl CodeJudge {
    pub fn new(execution: Arc<dyn JudgeBackend>, model: Arc<SimulatedJudge>) -> Self {
        Self { execution, model }
    }

    /// Evaluate one policy. Backend failures (timeout, transport,
    /// cancellation) propagate as errors; a judged-and-rejected
    /// submission is an `Ok` outcome with `correct: false`.
    pub async fn evaluate(
        &self,
        policy: VerdictPolicy,
        submission: &CodeSubmission,
        context: &JudgingContext,
        cancel: &CancellationToken,
    ) -> Result<PolicyOutcome, JudgeError> {
        // The anti-hardcoding check is local and deterministic; it runs
        // before any backend is consulted so an embedded answer literal
        // can never slip through on a flaky model reply.
        if policy != VerdictPolicy::SyntaxCheck
            && contains_hardcoded_answer(&submission.source_code, &context.expected_token)
        {
            return Ok(PolicyOutcome::fail(
                "Solution embeds the expected answer instead of deriving it",
            ));
        }

        match policy {
            VerdictPolicy::SyntaxCheck => self.syntax_check(submission, cancel).await,
            VerdictPolicy::EquivalenceCheck => {
                self.equivalence_check(submission, context, cancel).await
            }
            VerdictPolicy::DirectComparison => {
                self.direct_comparison(submission, context, cancel).await
            }
        }
    }

    /// Evaluate several policies; any failure governs.
    pub async fn evaluate_all(
        &self,
        policies: &[VerdictPolicy],
        submission: &CodeSubmission,
        context: &JudgingContext,
        cancel: &CancellationToken,
    ) -> Result<PolicyOutcome, JudgeError> {
        let mut last_pass = PolicyOutcome::pass("Accepted");
        for policy in policies {
            let outcome = self.evaluate(*policy, submission, context, cancel).await?;
            if !outcome.correct {
                return Ok(outcome);
            }
            last_pass = outcome;
        }
        Ok(last_pass)
    }

    async fn syntax_check(
        &self,
        submission: &CodeSubmission,
        cancel: &CancellationToken,
    ) -> Result<PolicyOutcome, JudgeError> {
        let verdict = self.execution.submit_for_judging(submission, cancel).await?;
        if verdict.compile_failed() {
            let detail = if verdict.compile_output.trim().is_empty() {
                verdict.status.description.clone()
            } else {
                verdict.compile_output.trim().to_string()
            };
            return Ok(PolicyOutcome::fail(&format!(
                "Code does not compile: {detail}"
            )));
        }
        Ok(PolicyOutcome::pass("Code compiles cleanly"))
    }

    async fn equivalence_check(
        &self,
        submission: &CodeSubmission,
        context: &JudgingContext,
        cancel: &CancellationToken,
    ) -> Result<PolicyOutcome, JudgeError> {
        let prompt = build_equivalence_prompt(submission, context);
        let output = self.model.query(&prompt, cancel).await?;

        // A reply the parser cannot make sense of fails the submission
        // rather than passing it; the team can resubmit.
        let Some(json) = extract_json(&output) else {
            tracing::warn!("equivalence judge returned no JSON");
            return Ok(PolicyOutcome::fail(
                "Judge could not evaluate this submission; try again",
            ));
        };
        let reply: EquivalenceReply = match serde_json::from_str(&json) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable equivalence reply");
                return Ok(PolicyOutcome::fail(
                    "Judge could not evaluate this submission; try again",
                ));
            }
        };

        if reply.hardcoded {
            return Ok(PolicyOutcome::fail(
                "Solution embeds the expected answer instead of deriving it",
            ));
        }
        if !reply.correct {
            let message = if reply.message.is_empty() {
                "Solution does not implement the required steps".to_string()
            } else {
                reply.message
            };
            return Ok(PolicyOutcome::fail(&message));
        }
        Ok(PolicyOutcome::pass("Solution implements the required steps"))
    }

    async fn direct_comparison(
        &self,
        submission: &CodeSubmission,
        context: &JudgingContext,
        cancel: &CancellationToken,
    ) -> Result<PolicyOutcome, JudgeError> {
        let reference_code = context.reference_solution.as_deref().ok_or_else(|| {
            JudgeError::Malformed("direct comparison requires a reference solution".to_string())
        })?;

        let user_verdict = self.execution.submit_for_judging(submission, cancel).await?;
        if !user_verdict.accepted() {
            let detail = if user_verdict.compile_output.trim().is_empty() {
                user_verdict.status.description.clone()
            } else {
                user_verdict.compile_output.trim().to_string()
            };
            return Ok(PolicyOutcome::fail(&format!("Run failed: {detail}")));
        }

        let reference = CodeSubmission::new(reference_code, submission.language)
            .with_stdin(&context.stdin);
        let reference_verdict = self
            .execution
            .submit_for_judging(&reference, cancel)
            .await?;
        if !reference_verdict.accepted() {
            return Err(JudgeError::Malformed(
                "reference solution failed to run".to_string(),
            ));
        }

        if user_verdict.stdout.trim() == reference_verdict.stdout.trim() {
            Ok(PolicyOutcome::pass("Output matches"))
        } else {
            Ok(PolicyOutcome::fail("Output does not match expected result"))
        }
    }
}

/// Deterministic scan for the expected answer embedded in source text,
/// case-insensitive. Catches the lazy `print("answer")` escape hatch
/// without any backend involvement.
pub fn contains_hardcoded_answer(source: &str, expected_token: &str) -> bool {
    let token = expected_token.trim();
    if token.is_empty() {
        return false;
    }
    source.to_lowercase().contains(&token.to_lowercase())
}

fn build_equivalence_prompt(submission: &CodeSubmission, context: &JudgingContext) -> String {
    let rubric_list = context
        .rubric
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n");

    let reference_section = context
        .reference_solution
        .as_ref()
        .map(|reference| {
            format!(
                "\n## Reference Solution\n```{}\n{}\n```\n",
                submission.language, reference
            )
        })
        .unwrap_or_default();

    format!(
        r#"You are judging a coding challenge submission for functional correctness.

## Required Steps

A correct solution must implement every step:
{rubric_list}
{reference_section}
## Submission

```{language}
{source}
```

## Judging Instructions

1. Check the submission implements every required step.
2. Check it is functionally equivalent to the reference solution, if one is given. Style differences do not matter.
3. Check it does not hardcode or embed the final answer — the answer must be derived by the code.

Respond with ONLY a JSON object:

```json
{{
  "correct": true,
  "hardcoded": false,
  "message": "one-line explanation for the team"
}}
```
"#,
        rubric_list = rubric_list,
        reference_section = reference_section,
        language = submission.language,
        source = submission.source_code,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{STATUS_ACCEPTED, STATUS_COMPILATION_ERROR, Verdict, VerdictStatus};
    use crate::session::Language;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Execution backend that replays canned verdicts.
    struct CannedBackend {
        verdicts: Mutex<Vec<Verdict>>,
    }

    impl CannedBackend {
        fn new(verdicts: Vec<Verdict>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts),
            }
        }
    }

    #[async_trait]
    impl JudgeBackend for CannedBackend {
        async fn submit_for_judging(
            &self,
            _submission: &CodeSubmission,
            _cancel: &CancellationToken,
        ) -> Result<Verdict, JudgeError> {
            let mut verdicts = self.verdicts.lock().unwrap();
            if verdicts.is_empty() {
                return Err(JudgeError::Transport("no more canned verdicts".to_string()));
            }
            Ok(verdicts.remove(0))
        }
    }

    fn accepted(stdout: &str) -> Verdict {
        Verdict {
            stdout: stdout.to_string(),
            stderr: String::new(),
            compile_output: String::new(),
            status: VerdictStatus::new(STATUS_ACCEPTED, "Accepted"),
        }
    }

    fn compile_error(output: &str) -> Verdict {
        Verdict {
            stdout: String::new(),
            stderr: String::new(),
            compile_output: output.to_string(),
            status: VerdictStatus::new(STATUS_COMPILATION_ERROR, "Compilation Error"),
        }
    }

    fn judge_with(verdicts: Vec<Verdict>) -> CodeJudge {
        CodeJudge::new(
            Arc::new(CannedBackend::new(verdicts)),
            Arc::new(SimulatedJudge::new(Default::default())),
        )
    }

    #[test]
    fn hardcoded_answer_is_detected_case_insensitively() {
        assert!(contains_hardcoded_answer("print(\"pelmt\")", "pelmt"));
        assert!(contains_hardcoded_answer("print('PELMT')", "pelmt"));
        assert!(contains_hardcoded_answer("x = \"PeLmT\"", "PELMT"));
        assert!(!contains_hardcoded_answer(
            "print(derive_answer(records))",
            "pelmt"
        ));
        // Empty token never matches.
        assert!(!contains_hardcoded_answer("anything", ""));
        assert!(!contains_hardcoded_answer("anything", "   "));
    }

    #[tokio::test]
    async fn hardcoded_literal_fails_before_any_backend_runs() {
        // No canned verdicts: touching the backend would error.
        let judge = judge_with(vec![]);
        let submission = CodeSubmission::new("print(\"pelmt\")", Language::Python);
        let context = JudgingContext {
            expected_token: "pelmt".to_string(),
            ..Default::default()
        };

        let outcome = judge
            .evaluate(
                VerdictPolicy::EquivalenceCheck,
                &submission,
                &context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.correct);
        assert!(outcome.message.contains("embeds"));
    }

    #[tokio::test]
    async fn syntax_check_passes_compiling_code() {
        let judge = judge_with(vec![accepted("")]);
        let submission = CodeSubmission::new("int main() { return 0; }", Language::C);

        let outcome = judge
            .evaluate(
                VerdictPolicy::SyntaxCheck,
                &submission,
                &JudgingContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.correct);
    }

    #[tokio::test]
    async fn syntax_check_fails_on_compile_error() {
        let judge = judge_with(vec![compile_error("main.c:1: error: expected ';'")]);
        let submission = CodeSubmission::new("int main() { return 0 }", Language::C);

        let outcome = judge
            .evaluate(
                VerdictPolicy::SyntaxCheck,
                &submission,
                &JudgingContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.correct);
        assert!(outcome.message.contains("expected ';'"));
    }

    #[tokio::test]
    async fn syntax_check_ignores_answer_literals() {
        // The anti-hardcoding scan only applies to answer-deriving
        // policies; a debug fix may legitimately mention the token.
        let judge = judge_with(vec![accepted("")]);
        let submission = CodeSubmission::new("print(\"pelmt\")", Language::Python);
        let context = JudgingContext {
            expected_token: "pelmt".to_string(),
            ..Default::default()
        };

        let outcome = judge
            .evaluate(
                VerdictPolicy::SyntaxCheck,
                &submission,
                &context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.correct);
    }

    #[tokio::test]
    async fn direct_comparison_matches_trimmed_stdout() {
        let judge = judge_with(vec![accepted("42\n"), accepted("42")]);
        let submission = CodeSubmission::new("print(6 * 7)", Language::Python);
        let context = JudgingContext {
            reference_solution: Some("print(42)".to_string()),
            ..Default::default()
        };

        let outcome = judge
            .evaluate(
                VerdictPolicy::DirectComparison,
                &submission,
                &context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.correct);
    }

    #[tokio::test]
    async fn direct_comparison_rejects_differing_output() {
        let judge = judge_with(vec![accepted("41\n"), accepted("42\n")]);
        let submission = CodeSubmission::new("print(41)", Language::Python);
        let context = JudgingContext {
            reference_solution: Some("print(42)".to_string()),
            ..Default::default()
        };

        let outcome = judge
            .evaluate(
                VerdictPolicy::DirectComparison,
                &submission,
                &context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.correct);
    }

    #[tokio::test]
    async fn direct_comparison_requires_reference() {
        let judge = judge_with(vec![accepted("x")]);
        let submission = CodeSubmission::new("print(1)", Language::Python);

        let err = judge
            .evaluate(
                VerdictPolicy::DirectComparison,
                &submission,
                &JudgingContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JudgeError::Malformed(_)));
    }

    #[tokio::test]
    async fn backend_timeout_propagates_as_error() {
        // Empty canned list makes the backend error on first call.
        let judge = judge_with(vec![]);
        let submission = CodeSubmission::new("print(1)", Language::Python);

        let err = judge
            .evaluate(
                VerdictPolicy::SyntaxCheck,
                &submission,
                &JudgingContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JudgeError::Transport(_)));
    }

    #[tokio::test]
    async fn evaluate_all_strictest_governs() {
        // Syntax passes, then direct comparison fails.
        let judge = judge_with(vec![accepted(""), accepted("1\n"), accepted("2\n")]);
        let submission = CodeSubmission::new("print(1)", Language::Python);
        let context = JudgingContext {
            reference_solution: Some("print(2)".to_string()),
            ..Default::default()
        };

        let outcome = judge
            .evaluate_all(
                &[VerdictPolicy::SyntaxCheck, VerdictPolicy::DirectComparison],
                &submission,
                &context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.correct);
    }

    #[tokio::test]
    async fn evaluate_all_empty_policy_list_passes() {
        let judge = judge_with(vec![]);
        let submission = CodeSubmission::new("print(1)", Language::Python);

        let outcome = judge
            .evaluate_all(
                &[],
                &submission,
                &JudgingContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.correct);
    }

    #[test]
    fn policy_serde_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&VerdictPolicy::SyntaxCheck).unwrap(),
            "\"syntax_check\""
        );
        assert_eq!(
            serde_json::from_str::<VerdictPolicy>("\"equivalence_check\"").unwrap(),
            VerdictPolicy::EquivalenceCheck
        );
    }

    #[test]
    fn equivalence_prompt_carries_rubric_and_reference() {
        let submission = CodeSubmission::new("def f(): pass", Language::Python);
        let context = JudgingContext {
            rubric: vec!["Filter primes".to_string(), "Sort by length".to_string()],
            reference_solution: Some("def ref(): pass".to_string()),
            expected_token: "pelmt".to_string(),
            stdin: String::new(),
        };

        let prompt = build_equivalence_prompt(&submission, &context);
        assert!(prompt.contains("1. Filter primes"));
        assert!(prompt.contains("2. Sort by length"));
        assert!(prompt.contains("def ref(): pass"));
        assert!(prompt.contains("def f(): pass"));
    }
}
