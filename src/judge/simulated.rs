//! Synchronous model-based judging backend.
//!
//! Instead of executing code, this backend pipes a prompt to a local
//! model CLI and parses the JSON it prints. The same process plumbing
//! serves two callers: `JudgeBackend` (simulate a run of the code) and
//! the equivalence policy's free-form [`SimulatedJudge::query`].

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::errors::JudgeError;
use crate::judge::{
    CodeSubmission, JudgeBackend, STATUS_ACCEPTED, STATUS_COMPILATION_ERROR, Verdict,
    VerdictStatus,
};

const DEFAULT_JUDGE_CMD: &str = "claude";
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Model CLI command.
    pub judge_cmd: String,
    /// Extra arguments passed to every invocation.
    pub extra_args: Vec<String>,
    /// Ceiling on a single model invocation.
    pub timeout: Duration,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            judge_cmd: DEFAULT_JUDGE_CMD.to_string(),
            extra_args: vec!["--print".to_string()],
            timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
        }
    }
}

pub struct SimulatedJudge {
    config: SimulatedConfig,
}

/// Shape the simulation prompt asks the model to emit.
#[derive(Deserialize)]
struct SimulationReply {
    #[serde(default)]
    compiles: bool,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    compile_output: String,
}

impl SimulatedJudge {
    pub fn new(config: SimulatedConfig) -> Self {
        Self { config }
    }

    /// Send a free-form prompt to the model and return its raw stdout.
    ///
    /// Spawns the CLI, writes the prompt to stdin, and collects stdout
    /// line by line. The configured timeout bounds the whole run;
    /// firing the token kills the child and returns `Cancelled`.
    pub async fn query(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, JudgeError> {
        let mut cmd = Command::new(&self.config.judge_cmd);
        cmd.args(&self.config.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| JudgeError::Transport(format!("failed to spawn model judge: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| JudgeError::Transport(format!("failed to write prompt: {e}")))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| JudgeError::Transport(format!("failed to close stdin: {e}")))?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JudgeError::Transport("model judge has no stdout".to_string()))?;

        let collect = async {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            let mut output = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                output.push_str(&line);
                output.push('\n');
            }
            let status = child
                .wait()
                .await
                .map_err(|e| JudgeError::Transport(format!("failed to wait for judge: {e}")))?;
            if !status.success() {
                return Err(JudgeError::Transport(format!(
                    "model judge exited with code {}",
                    status.code().unwrap_or(-1)
                )));
            }
            Ok(output)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JudgeError::Cancelled),
            result = tokio::time::timeout(self.config.timeout, collect) => match result {
                Ok(output) => output,
                Err(_) => Err(JudgeError::Timeout(format!(
                    "model judge exceeded {}s",
                    self.config.timeout.as_secs()
                ))),
            },
        }
    }
}

#[async_trait]
impl JudgeBackend for SimulatedJudge {
    async fn submit_for_judging(
        &self,
        submission: &CodeSubmission,
        cancel: &CancellationToken,
    ) -> Result<Verdict, JudgeError> {
        let prompt = build_simulation_prompt(submission);
        let output = self.query(&prompt, cancel).await?;
        parse_simulation_reply(&output)
    }
}

fn build_simulation_prompt(submission: &CodeSubmission) -> String {
    format!(
        r#"You are a strict {language} compiler and runtime. Simulate compiling and running the program below.

Stdin for the run (may be empty):
```
{stdin}
```

Program:
```{language}
{source}
```

Respond with ONLY a JSON object:
```json
{{
  "compiles": true,
  "stdout": "exact output the program would print",
  "compile_output": "compiler errors verbatim, empty string if it compiles"
}}
```
"#,
        language = submission.language,
        stdin = submission.stdin,
        source = submission.source_code,
    )
}

/// Normalize a model reply into a `Verdict`. A reply the JSON parser
/// cannot make sense of is `Malformed`; callers decide how conservative
/// to be about that.
fn parse_simulation_reply(output: &str) -> Result<Verdict, JudgeError> {
    let json = extract_json(output)
        .ok_or_else(|| JudgeError::Malformed("no JSON object in model output".to_string()))?;
    let reply: SimulationReply = serde_json::from_str(&json)
        .map_err(|e| JudgeError::Malformed(format!("unparseable simulation reply: {e}")))?;

    let status = if reply.compiles {
        VerdictStatus::new(STATUS_ACCEPTED, "Accepted")
    } else {
        VerdictStatus::new(STATUS_COMPILATION_ERROR, "Compilation Error")
    };

    Ok(Verdict {
        stdout: reply.stdout,
        stderr: String::new(),
        compile_output: reply.compile_output,
        status,
    })
}

/// Extract a JSON object from model output that may wrap it in prose
/// or markdown fences.
pub(crate) fn extract_json(output: &str) -> Option<String> {
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    if let Some(start) = output.find("```") {
        let after_marker = &output[start + 3..];
        if let Some(end) = after_marker.find("```") {
            if let Some(json_start) = after_marker[..end].find('{') {
                let content = &after_marker[json_start..end];
                if !content.is_empty() {
                    return Some(content.trim().to_string());
                }
            }
        }
    }

    // Last resort: first brace-balanced object in the raw text.
    if let Some(start) = output.find('{') {
        let mut depth = 0;
        let mut end = start;
        for (i, c) in output[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if depth == 0 && end > start {
            return Some(output[start..end].to_string());
        }
    }

    None
}
