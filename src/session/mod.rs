//! Per-team session state: the durable record of event progress.
//!
//! A `TeamSession` is created on first login and lives for the whole
//! event. It is mutated exclusively through the state machine
//! operations in [`machine`] and persisted as a whole record by the
//! [`store`]. Progression counters only ever move forward; draft
//! fields are ephemeral working state that survives reloads.

pub mod hints;
pub mod machine;
pub mod sequence;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of one of the five event phases.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PhaseId {
    #[serde(rename = "1")]
    Phase1,
    #[serde(rename = "2")]
    Phase2,
    #[serde(rename = "3")]
    Phase3,
    #[serde(rename = "4")]
    Phase4,
    #[serde(rename = "5")]
    Phase5,
}

impl PhaseId {
    /// All phases in canonical numeric order.
    pub const ALL: [PhaseId; 5] = [
        PhaseId::Phase1,
        PhaseId::Phase2,
        PhaseId::Phase3,
        PhaseId::Phase4,
        PhaseId::Phase5,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            PhaseId::Phase1 => 1,
            PhaseId::Phase2 => 2,
            PhaseId::Phase3 => 3,
            PhaseId::Phase4 => 4,
            PhaseId::Phase5 => 5,
        }
    }

    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            1 => Some(PhaseId::Phase1),
            2 => Some(PhaseId::Phase2),
            3 => Some(PhaseId::Phase3),
            4 => Some(PhaseId::Phase4),
            5 => Some(PhaseId::Phase5),
            _ => None,
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl FromStr for PhaseId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u8>()
            .ok()
            .and_then(PhaseId::from_u8)
            .ok_or_else(|| format!("invalid phase id: {s}"))
    }
}

/// Where a team currently is: a numbered phase, or done with all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Phase(PhaseId),
    Completed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Phase(id) => write!(f, "{id}"),
            SessionPhase::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl Serialize for SessionPhase {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Language tag for judged code submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Python,
}

impl Language {
    /// Judge0 language id (50 = C with GCC, 71 = Python 3).
    pub fn judge0_id(self) -> u32 {
        match self {
            Language::C => 50,
            Language::Python => 71,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::C => write!(f, "c"),
            Language::Python => write!(f, "python"),
        }
    }
}

/// Per-phase progress record.
///
/// `current_question`, `order` and `start_time` are progression fields
/// and only move through the state machine; the remaining fields are
/// auto-saved drafts that may be overwritten freely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    /// Zero-based index into this phase's `order`; never decreases.
    #[serde(default)]
    pub current_question: usize,
    /// Persisted permutation of question indices, generated at most once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<usize>>,
    /// Anchor for the hint-unlock timer of the current question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_answer: Option<String>,
    #[serde(default)]
    pub code_fixed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
}

impl PhaseProgress {
    /// Whether `ensure_initialized` has run for this phase.
    pub fn is_initialized(&self) -> bool {
        self.order.is_some() && self.start_time.is_some()
    }
}

/// Terminal master-key state, separate from the numbered phases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalMergeProgress {
    #[serde(default)]
    pub won: bool,
}

/// The durable per-team progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSession {
    pub team_id: u32,
    /// Index into `phase_order`; monotonically non-decreasing.
    #[serde(default)]
    pub current_phase_index: usize,
    /// Fixed per-team permutation of the five phases, assigned at
    /// creation and never regenerated.
    pub phase_order: Vec<PhaseId>,
    /// Lazily populated per-phase progress; keys are never deleted.
    #[serde(default)]
    pub phase_progress: BTreeMap<PhaseId, PhaseProgress>,
    #[serde(default)]
    pub final_merge: FinalMergeProgress,
}

impl TeamSession {
    /// Create a fresh session with a randomized phase order.
    pub fn new(team_id: u32) -> Self {
        Self {
            team_id,
            current_phase_index: 0,
            phase_order: sequence::shuffled_phase_order(),
            phase_progress: BTreeMap::new(),
            final_merge: FinalMergeProgress::default(),
        }
    }

    /// The team's current position in its phase order.
    pub fn current_phase(&self) -> SessionPhase {
        match self.phase_order.get(self.current_phase_index) {
            Some(id) => SessionPhase::Phase(*id),
            None => SessionPhase::Completed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.current_phase_index >= self.phase_order.len()
    }

    pub fn progress(&self, phase: PhaseId) -> Option<&PhaseProgress> {
        self.phase_progress.get(&phase)
    }

    /// Progress record for a phase, created lazily on first visit.
    pub fn progress_mut(&mut self, phase: PhaseId) -> &mut PhaseProgress {
        self.phase_progress.entry(phase).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_id_roundtrips_through_u8() {
        for id in PhaseId::ALL {
            assert_eq!(PhaseId::from_u8(id.as_u8()), Some(id));
        }
        assert_eq!(PhaseId::from_u8(0), None);
        assert_eq!(PhaseId::from_u8(6), None);
    }

    #[test]
    fn phase_id_parses_from_str() {
        assert_eq!("3".parse::<PhaseId>().unwrap(), PhaseId::Phase3);
        assert!("0".parse::<PhaseId>().is_err());
        assert!("final".parse::<PhaseId>().is_err());
    }

    #[test]
    fn session_phase_display() {
        assert_eq!(SessionPhase::Phase(PhaseId::Phase4).to_string(), "4");
        assert_eq!(SessionPhase::Completed.to_string(), "COMPLETED");
    }

    #[test]
    fn language_judge0_ids() {
        assert_eq!(Language::C.judge0_id(), 50);
        assert_eq!(Language::Python.judge0_id(), 71);
    }

    #[test]
    fn new_session_starts_at_first_phase_with_full_order() {
        let session = TeamSession::new(3);
        assert_eq!(session.team_id, 3);
        assert_eq!(session.current_phase_index, 0);
        assert_eq!(session.phase_order.len(), 5);
        assert!(session.phase_progress.is_empty());
        assert!(!session.is_completed());
        assert!(matches!(session.current_phase(), SessionPhase::Phase(_)));
    }

    #[test]
    fn session_past_order_end_is_completed() {
        let mut session = TeamSession::new(1);
        session.current_phase_index = session.phase_order.len();
        assert!(session.is_completed());
        assert_eq!(session.current_phase(), SessionPhase::Completed);
    }

    #[test]
    fn progress_mut_creates_lazily_and_persists() {
        let mut session = TeamSession::new(1);
        assert!(session.progress(PhaseId::Phase2).is_none());
        session.progress_mut(PhaseId::Phase2).current_question = 0;
        assert!(session.progress(PhaseId::Phase2).is_some());
    }

    #[test]
    fn session_serialization_roundtrip() {
        let mut session = TeamSession::new(9);
        let progress = session.progress_mut(PhaseId::Phase1);
        progress.order = Some(vec![2, 0, 1]);
        progress.start_time = Some(Utc::now());
        progress.draft_answer = Some("half-typed".to_string());

        let json = serde_json::to_string(&session).unwrap();
        let parsed: TeamSession = serde_json::from_str(&json).unwrap();
        assert_eq!(session, parsed);
    }

    #[test]
    fn phase_progress_map_uses_numeric_keys() {
        let mut session = TeamSession::new(1);
        session.progress_mut(PhaseId::Phase3);
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"3\":"));
    }

    #[test]
    fn missing_optional_fields_deserialize_to_defaults() {
        let json = r#"{"team_id": 4, "phase_order": ["2", "1", "3", "5", "4"]}"#;
        let session: TeamSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.current_phase_index, 0);
        assert!(session.phase_progress.is_empty());
        assert!(!session.final_merge.won);
        assert_eq!(session.current_phase(), SessionPhase::Phase(PhaseId::Phase2));
    }
}
