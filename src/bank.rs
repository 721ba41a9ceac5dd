//! Question bank definition and JSON loading.
//!
//! This module provides:
//! - `Question` and `PhaseBank` for a single phase's content
//! - `QuestionBank` representing the full bank.json format
//! - Loading functions for JSON-based bank configuration
//! - A built-in default bank as a fallback

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::session::{Language, PhaseId};

/// What kind of gate a phase puts in front of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Physical hunt: answer fragments found in the real world.
    AnswerHunt,
    /// Predict the output of a shown code snippet.
    OutputPrediction,
    /// Role-reversal round; gated like an answer hunt.
    RoleSwap,
    /// Fix broken code; judged for syntactic validity.
    Debug,
    /// Full coding challenge; judged against a reference solution.
    FinalCoding,
}

impl PhaseKind {
    /// Whether submissions in this phase go through the code judge.
    pub fn is_judged(self) -> bool {
        matches!(self, PhaseKind::Debug | PhaseKind::FinalCoding)
    }
}

/// A single gated question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Short module/system name shown with the question.
    pub module: String,
    /// The puzzle text presented to the team.
    pub prompt: String,
    /// Expected answer; compared after trimming whitespace.
    pub answer: String,
    /// Hint revealed once the timer expires.
    #[serde(default)]
    pub hint: String,
    /// Broken starter code for debugging phases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buggy_code: Option<String>,
    /// Language the judged code is written in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    /// Reference solution for equivalence and direct-comparison judging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_solution: Option<String>,
    /// Rubric steps a correct solution must implement.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rubric: Vec<String>,
    /// Stdin fed to judged executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

impl Question {
    pub fn new(module: &str, prompt: &str, answer: &str, hint: &str) -> Self {
        Self {
            module: module.to_string(),
            prompt: prompt.to_string(),
            answer: answer.to_string(),
            hint: hint.to_string(),
            buggy_code: None,
            language: None,
            reference_solution: None,
            rubric: Vec::new(),
            stdin: None,
        }
    }
}

/// All questions for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseBank {
    pub kind: PhaseKind,
    pub questions: Vec<Question>,
}

impl PhaseBank {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }
}

/// Represents the full bank.json file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBank {
    /// Master key accepted at the final merge (case-insensitive).
    #[serde(default = "default_master_key")]
    pub master_key: String,
    pub phases: BTreeMap<PhaseId, PhaseBank>,
}

fn default_master_key() -> String {
    "pelmt".to_string()
}

impl QuestionBank {
    /// Load a bank from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bank file: {}", path.display()))?;

        let bank: QuestionBank = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse bank JSON: {}", path.display()))?;

        Ok(bank)
    }

    /// Save a bank to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize bank to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write bank file: {}", path.display()))?;

        Ok(())
    }

    /// Try to load a bank from a file, falling back to the default bank.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default_bank()),
        }
    }

    pub fn phase(&self, id: PhaseId) -> Option<&PhaseBank> {
        self.phases.get(&id)
    }

    /// Built-in sample bank so a fresh install runs end to end.
    pub fn default_bank() -> Self {
        let mut phases = BTreeMap::new();

        phases.insert(
            PhaseId::Phase1,
            PhaseBank {
                kind: PhaseKind::AnswerHunt,
                questions: vec![
                    Question::new(
                        "GATEWAY NODE",
                        "Trace the intrusion to the machine room entrance and read the tag on the breaker panel.",
                        "BRKR-12",
                        "The panel is behind the west stairwell.",
                    ),
                    Question::new(
                        "UPLINK MAST",
                        "The roof antenna carries a serial plate. Report its last four characters.",
                        "A7F3",
                        "Look where the cable conduit leaves the building.",
                    ),
                    Question::new(
                        "COLD STORAGE",
                        "A fragment key is taped inside the server-room cabinet marked with a snowflake.",
                        "FROST-KEY",
                        "Cabinet row three, not row two.",
                    ),
                    Question::new(
                        "ARCHIVE VAULT",
                        "Count the marked crates in the archive corridor and append the corridor letter.",
                        "9C",
                        "Crates with the orange seal only.",
                    ),
                    Question::new(
                        "SIGNAL RELAY",
                        "The relay box blinks a word in Morse. Decode it.",
                        "EMBER",
                        "Three shorts is S; the word has five letters.",
                    ),
                ],
            },
        );

        phases.insert(
            PhaseId::Phase2,
            PhaseBank {
                kind: PhaseKind::OutputPrediction,
                questions: vec![
                    Question::new(
                        "LOOP CORE",
                        "int s = 0; for (int i = 1; i <= 4; i++) s += i * i; printf(\"%d\", s);\nWhat does this print?",
                        "30",
                        "Squares, not cubes.",
                    ),
                    Question::new(
                        "STRING MANGLER",
                        "print(\"gauntlet\"[1:4][::-1])\nWhat does this print?",
                        "nua",
                        "Slice first, then reverse.",
                    ),
                    Question::new(
                        "BITWISE LOCK",
                        "printf(\"%d\", (12 ^ 5) & 10);\nWhat does this print?",
                        "8",
                        "XOR gives 9, then mask.",
                    ),
                ],
            },
        );

        phases.insert(
            PhaseId::Phase3,
            PhaseBank {
                kind: PhaseKind::RoleSwap,
                questions: vec![
                    Question::new(
                        "PROTOCOL SWAP",
                        "Your navigator now holds the terminal. Recite the checkpoint phrase issued at the briefing desk.",
                        "crossed wires",
                        "It was printed on the back of the briefing card.",
                    ),
                    Question::new(
                        "RELAY HANDOFF",
                        "The marshal at the relay station will trade a token for your unit chant.",
                        "TOKEN-44",
                        "The marshal wears the staff lanyard.",
                    ),
                ],
            },
        );

        phases.insert(
            PhaseId::Phase4,
            PhaseBank {
                kind: PhaseKind::Debug,
                questions: vec![
                    Question {
                        module: "CHECKSUM DAEMON".to_string(),
                        prompt: "The checksum loop never terminates. Patch it and run the fix to unlock the location string."
                            .to_string(),
                        answer: "UNDER-THE-CLOCK".to_string(),
                        hint: "The string is taped under the lobby clock.".to_string(),
                        buggy_code: Some(
                            "def checksum(data):\n    total = 0\n    i = 0\n    while i < len(data):\n        total += data[i]\n    return total % 256\n"
                                .to_string(),
                        ),
                        language: Some(Language::Python),
                        reference_solution: None,
                        rubric: Vec::new(),
                        stdin: None,
                    },
                    Question {
                        module: "BUFFER GUARD".to_string(),
                        prompt: "The guard reads one byte too many. Fix the bound and submit.".to_string(),
                        answer: "DOCK-GATE-2".to_string(),
                        hint: "Second loading dock, left gate.".to_string(),
                        buggy_code: Some(
                            "int sum_bytes(const char *buf, int n) {\n    int total = 0;\n    for (int i = 0; i <= n; i++) {\n        total += buf[i];\n    }\n    return total;\n}\n"
                                .to_string(),
                        ),
                        language: Some(Language::C),
                        reference_solution: None,
                        rubric: Vec::new(),
                        stdin: None,
                    },
                ],
            },
        );

        phases.insert(
            PhaseId::Phase5,
            PhaseBank {
                kind: PhaseKind::FinalCoding,
                questions: vec![Question {
                    module: "CORE OVERRIDE".to_string(),
                    prompt: "Reassemble the override key from the collected records.".to_string(),
                    answer: "pelmt".to_string(),
                    hint: "The key has five letters.".to_string(),
                    buggy_code: None,
                    language: Some(Language::Python),
                    reference_solution: Some(
                        "records = [(4, 'pi_vot'), (6, 'he!lp'), (8, 'kernel*'), (9, 'mast__er'), (10, 'stack~trace')]\nkept = [r for r in records if not is_prime(r[0])]\nclean = [(i, ''.join(c for c in s if c.isalnum())) for i, s in kept]\nordered = sorted(clean, key=lambda r: (-len(r[1]), r[0]))\nprint(''.join(s[len(s) // 2] for _, s in ordered))\n"
                            .to_string(),
                    ),
                    rubric: vec![
                        "Filter: remove records whose id is a prime number".to_string(),
                        "Sanitize: strip every character that is not a letter or digit".to_string(),
                        "Sort: by string length descending, then by id ascending".to_string(),
                        "Forge: take the middle character of each remaining string".to_string(),
                    ],
                    stdin: None,
                }],
            },
        );

        Self {
            master_key: default_master_key(),
            phases,
        }
    }
}
