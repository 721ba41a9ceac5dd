//! Event configuration.
//!
//! Reads from a TOML file with sensible defaults for every field, so a
//! missing or partial file still yields a runnable event.
//!
//! # Configuration File Format
//!
//! ```toml
//! [event]
//! hint_delay_secs = 300
//! team_count = 10
//! log_failed_attempts = false
//!
//! [judge]
//! execution_url = "http://localhost:2358"
//! judge_cmd = "claude"
//! submit_timeout_secs = 10
//! poll_timeout_secs = 5
//! poll_interval_ms = 500
//! max_poll_attempts = 40
//! model_timeout_secs = 20
//!
//! [policies]
//! debug = ["syntax_check"]
//! final_coding = ["equivalence_check"]
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bank::PhaseKind;
use crate::judge::execution::ExecutionConfig;
use crate::judge::policy::VerdictPolicy;
use crate::judge::simulated::SimulatedConfig;

/// Top-level event configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default)]
    pub event: EventSettings,
    #[serde(default)]
    pub judge: JudgeSettings,
    #[serde(default)]
    pub policies: PolicySettings,
}

/// Event-wide pacing and roster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Seconds before a question's hint unlocks.
    #[serde(default = "default_hint_delay_secs")]
    pub hint_delay_secs: u64,
    /// Number of participating teams; valid team ids are 1..=team_count.
    #[serde(default = "default_team_count")]
    pub team_count: u32,
    /// Log rejected answer submissions (team id and phase, never the
    /// submitted text).
    #[serde(default)]
    pub log_failed_attempts: bool,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            hint_delay_secs: default_hint_delay_secs(),
            team_count: default_team_count(),
            log_failed_attempts: false,
        }
    }
}

/// Judging backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeSettings {
    /// Base URL of the execution service.
    #[serde(default = "default_execution_url")]
    pub execution_url: String,
    /// Model CLI command for the simulation backend.
    #[serde(default = "default_judge_cmd")]
    pub judge_cmd: String,
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            execution_url: default_execution_url(),
            judge_cmd: default_judge_cmd(),
            submit_timeout_secs: default_submit_timeout_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            model_timeout_secs: default_model_timeout_secs(),
        }
    }
}

/// Which verdict policies apply to each judged phase kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default = "default_debug_policies")]
    pub debug: Vec<VerdictPolicy>,
    #[serde(default = "default_final_coding_policies")]
    pub final_coding: Vec<VerdictPolicy>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            debug: default_debug_policies(),
            final_coding: default_final_coding_policies(),
        }
    }
}

fn default_hint_delay_secs() -> u64 {
    300
}

fn default_team_count() -> u32 {
    10
}

fn default_execution_url() -> String {
    "http://localhost:2358".to_string()
}

fn default_judge_cmd() -> String {
    "claude".to_string()
}

fn default_submit_timeout_secs() -> u64 {
    10
}

fn default_poll_timeout_secs() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_poll_attempts() -> u32 {
    40
}

fn default_model_timeout_secs() -> u64 {
    20
}

fn default_debug_policies() -> Vec<VerdictPolicy> {
    vec![VerdictPolicy::SyntaxCheck]
}

fn default_final_coding_policies() -> Vec<VerdictPolicy> {
    vec![VerdictPolicy::EquivalenceCheck]
}

impl EventConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: EventConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load from a file if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Policies for a phase kind; empty for non-judged kinds.
    pub fn policies_for(&self, kind: PhaseKind) -> &[VerdictPolicy] {
        match kind {
            PhaseKind::Debug => &self.policies.debug,
            PhaseKind::FinalCoding => &self.policies.final_coding,
            _ => &[],
        }
    }

    pub fn hint_delay(&self) -> Duration {
        Duration::from_secs(self.event.hint_delay_secs)
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            base_url: self.judge.execution_url.clone(),
            submit_timeout: Duration::from_secs(self.judge.submit_timeout_secs),
            poll_timeout: Duration::from_secs(self.judge.poll_timeout_secs),
            poll_interval: Duration::from_millis(self.judge.poll_interval_ms),
            max_poll_attempts: self.judge.max_poll_attempts,
        }
    }

    pub fn simulated_config(&self) -> SimulatedConfig {
        SimulatedConfig {
            judge_cmd: self.judge.judge_cmd.clone(),
            timeout: Duration::from_secs(self.judge.model_timeout_secs),
            ..SimulatedConfig::default()
        }
    }
}
