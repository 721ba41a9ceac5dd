//! Phase state machine: pure transitions over `TeamSession` snapshots.
//!
//! Every operation takes an explicit `now` timestamp, so the machine
//! is deterministic under test and reload-invariant in production:
//! reconstructing it cannot move a timer or a counter. Callers load a
//! session from the store, apply a transition, and write the whole
//! record back.

use chrono::{DateTime, Utc};

use crate::bank::PhaseBank;
use crate::errors::SessionError;
use crate::session::{Language, PhaseId, SessionPhase, TeamSession, sequence};

/// Result of an answer submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub accepted: bool,
    /// The accepted answer was the phase's last question.
    pub phase_complete: bool,
    /// The completed phase was the team's last one.
    pub event_complete: bool,
}

impl AnswerOutcome {
    pub fn rejected() -> Self {
        Self {
            accepted: false,
            phase_complete: false,
            event_complete: false,
        }
    }
}

/// Partial update of a phase's ephemeral draft fields.
///
/// Absent fields are left untouched; progression counters, `order` and
/// `start_time` are not reachable from here at all, so an auto-save
/// can never clobber them.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct DraftUpdate {
    pub draft_code: Option<String>,
    pub draft_answer: Option<String>,
    pub code_fixed: Option<bool>,
    pub language: Option<Language>,
}

/// Initialize a phase's `order` and `start_time` if missing.
///
/// Idempotent: calling it on an initialized phase changes nothing, so
/// it is safe on every phase entry. Returns `true` if the session was
/// mutated (and therefore needs persisting).
pub fn ensure_initialized(
    session: &mut TeamSession,
    phase: PhaseId,
    bank_len: usize,
    now: DateTime<Utc>,
) -> bool {
    let progress = session.progress_mut(phase);

    if progress.order.is_none() {
        progress.order = Some(sequence::shuffled_indices(bank_len));
        progress.start_time = Some(now);
        return true;
    }

    // Missing start_time means "needs initialization", never "expired".
    if progress.start_time.is_none() {
        progress.start_time = Some(now);
        return true;
    }

    false
}

/// Record an answer submission for the team's current phase.
///
/// On a match the current question advances by one and the hint timer
/// re-anchors; answering the phase's last question advances the phase
/// index instead and leaves the exhausted phase in its final state.
/// On a mismatch the session is untouched — failed attempts are not
/// persisted or counted.
pub fn record_answer(
    session: &mut TeamSession,
    phase: PhaseId,
    submitted: &str,
    bank: &PhaseBank,
    now: DateTime<Utc>,
) -> Result<AnswerOutcome, SessionError> {
    guard_active(session, phase)?;

    let team_id = session.team_id;
    let progress = session
        .progress(phase)
        .ok_or(SessionError::Uninitialized(phase))?;
    let order = progress
        .order
        .as_ref()
        .ok_or(SessionError::Uninitialized(phase))?;
    let step = progress.current_question;
    let question_index = *order
        .get(step)
        .ok_or(SessionError::QuestionOutOfRange {
            phase,
            index: step,
            bank_len: bank.len(),
        })?;
    let question =
        bank.question(question_index)
            .ok_or(SessionError::QuestionOutOfRange {
                phase,
                index: question_index,
                bank_len: bank.len(),
            })?;

    if submitted.trim() != question.answer.trim() {
        tracing::debug!(team_id, %phase, step, "answer rejected");
        return Ok(AnswerOutcome::rejected());
    }

    Ok(advance_on_accept(session, phase, now)?)
}

/// Advance progression as if the current question was answered
/// correctly. Shared by `record_answer` and the code-judging path,
/// where the verdict policy replaces the literal comparison.
pub fn advance_on_accept(
    session: &mut TeamSession,
    phase: PhaseId,
    now: DateTime<Utc>,
) -> Result<AnswerOutcome, SessionError> {
    guard_active(session, phase)?;

    let order_len = session
        .progress(phase)
        .and_then(|p| p.order.as_ref())
        .map(Vec::len)
        .ok_or(SessionError::Uninitialized(phase))?;

    let team_id = session.team_id;
    let progress = session.progress_mut(phase);
    let next = progress.current_question + 1;

    if next < order_len {
        progress.current_question = next;
        progress.start_time = Some(now);
        tracing::info!(team_id, %phase, step = next, "advanced to next question");
        return Ok(AnswerOutcome {
            accepted: true,
            phase_complete: false,
            event_complete: false,
        });
    }

    // Last question answered: the exhausted phase keeps its final
    // progress record and the team moves along its phase order.
    session.current_phase_index += 1;
    let event_complete = session.is_completed();
    tracing::info!(team_id, %phase, event_complete, "phase complete");
    Ok(AnswerOutcome {
        accepted: true,
        phase_complete: true,
        event_complete,
    })
}

/// Merge ephemeral draft fields into a phase's progress record.
///
/// Deliberately lenient: drafts may target any visited (or
/// about-to-be-visited) phase and never fail, because auto-save is
/// fire-and-forget.
pub fn update_draft(session: &mut TeamSession, phase: PhaseId, update: DraftUpdate) {
    let progress = session.progress_mut(phase);
    if let Some(code) = update.draft_code {
        progress.draft_code = Some(code);
    }
    if let Some(answer) = update.draft_answer {
        progress.draft_answer = Some(answer);
    }
    if let Some(fixed) = update.code_fixed {
        progress.code_fixed = fixed;
    }
    if let Some(language) = update.language {
        progress.language = Some(language);
    }
}

/// Record a master-key submission at the final merge.
///
/// Only reachable once every phase is complete; the key compare is
/// trimmed and case-insensitive. Returns whether the key was accepted.
pub fn record_final_merge(
    session: &mut TeamSession,
    submitted: &str,
    master_key: &str,
) -> Result<bool, SessionError> {
    if !session.is_completed() {
        return Err(SessionError::FinalMergeLocked);
    }

    if submitted.trim().eq_ignore_ascii_case(master_key.trim()) {
        session.final_merge.won = true;
        tracing::info!(team_id = session.team_id, "master key accepted");
        Ok(true)
    } else {
        Ok(false)
    }
}

fn guard_active(session: &TeamSession, phase: PhaseId) -> Result<(), SessionError> {
    if session.current_phase() != SessionPhase::Phase(phase) {
        return Err(SessionError::PhaseNotActive {
            team_id: session.team_id,
            requested: phase,
        });
    }
    Ok(())
}
