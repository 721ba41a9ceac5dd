use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bank::{PhaseKind, Question, QuestionBank};
use crate::config::EventConfig;
use crate::errors::{JudgeError, SessionError};
use crate::judge::CodeSubmission;
use crate::judge::policy::{CodeJudge, JudgingContext};
use crate::session::store::StoreHandle;
use crate::session::{
    Language, PhaseId, SessionPhase, TeamSession, hints, machine,
    machine::DraftUpdate,
};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: StoreHandle,
    pub bank: Arc<QuestionBank>,
    pub judge: Arc<CodeJudge>,
    pub config: EventConfig,
    /// Fired on shutdown; in-flight judging stops with it.
    pub shutdown: CancellationToken,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub team_id: u32,
}

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
}

#[derive(Deserialize)]
pub struct JudgeRequest {
    pub source_code: String,
    pub language: Language,
}

#[derive(Deserialize)]
pub struct FinalMergeRequest {
    pub key: String,
}

// ── Response types ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct DashboardResponse {
    pub team_id: u32,
    pub phase_order: Vec<PhaseId>,
    pub current_phase: SessionPhase,
    pub completed: bool,
    pub final_merge_won: bool,
    pub phases: Vec<PhaseSummary>,
}

#[derive(Serialize)]
pub struct PhaseSummary {
    pub phase: PhaseId,
    pub kind: PhaseKind,
    pub total_questions: usize,
    pub answered: usize,
    pub active: bool,
    pub complete: bool,
}

/// Question content as shown to a team: never the answer, and the hint
/// only once its timer has expired.
#[derive(Serialize)]
pub struct QuestionView {
    pub module: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buggy_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rubric: Vec<String>,
}

impl QuestionView {
    fn from_question(question: &Question) -> Self {
        Self {
            module: question.module.clone(),
            prompt: question.prompt.clone(),
            buggy_code: question.buggy_code.clone(),
            language: question.language,
            rubric: question.rubric.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct DraftView {
    pub draft_code: Option<String>,
    pub draft_answer: Option<String>,
    pub code_fixed: bool,
    pub language: Option<Language>,
}

#[derive(Serialize)]
pub struct PhaseViewResponse {
    pub phase: PhaseId,
    pub kind: PhaseKind,
    /// 1-based position within the team's shuffled order.
    pub question_number: usize,
    pub total_questions: usize,
    pub question: QuestionView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub hint_remaining_secs: i64,
    pub hint_countdown: String,
    pub draft: DraftView,
}

#[derive(Serialize)]
pub struct AnswerResponse {
    pub correct: bool,
    pub phase_complete: bool,
    pub event_complete: bool,
}

#[derive(Serialize)]
pub struct JudgeResponse {
    pub correct: bool,
    pub message: String,
    pub phase_complete: bool,
    pub event_complete: bool,
}

#[derive(Serialize)]
pub struct FinalMergeResponse {
    pub won: bool,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// Request targets a phase the team has not reached or has left.
    /// Carries the dashboard path so clients can redirect.
    PhaseLocked { team_id: u32, message: String },
    /// Judging backend unreachable or incoherent.
    JudgeUnavailable(String),
    /// Judging did not finish inside its ceiling.
    JudgeTimeout(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({"error": msg})),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({"error": msg}))
            }
            ApiError::PhaseLocked { team_id, message } => (
                StatusCode::CONFLICT,
                serde_json::json!({
                    "error": message,
                    "redirect": format!("/team/{team_id}/dashboard"),
                }),
            ),
            ApiError::JudgeUnavailable(msg) => {
                (StatusCode::BAD_GATEWAY, serde_json::json!({"error": msg}))
            }
            ApiError::JudgeTimeout(msg) => {
                (StatusCode::GATEWAY_TIMEOUT, serde_json::json!({"error": msg}))
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": msg}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Map an error out of a store closure onto an HTTP shape. Session
/// errors keep their specific status; anything else is classified by
/// message the way the store reports it.
fn classify(e: anyhow::Error) -> ApiError {
    if let Some(session_err) = e.downcast_ref::<SessionError>() {
        return match session_err {
            SessionError::PhaseNotActive { team_id, .. } => ApiError::PhaseLocked {
                team_id: *team_id,
                message: session_err.to_string(),
            },
            SessionError::FinalMergeLocked => ApiError::BadRequest(session_err.to_string()),
            SessionError::Uninitialized(_) | SessionError::QuestionOutOfRange { .. } => {
                ApiError::BadRequest(session_err.to_string())
            }
            SessionError::Regression { .. } | SessionError::Other(_) => {
                ApiError::Internal(session_err.to_string())
            }
        };
    }
    let msg = e.to_string();
    if msg.contains("not found") {
        ApiError::NotFound(msg)
    } else {
        ApiError::Internal(msg)
    }
}

fn judge_error(e: JudgeError) -> ApiError {
    match e {
        JudgeError::Timeout(msg) => ApiError::JudgeTimeout(msg),
        JudgeError::Cancelled => ApiError::JudgeUnavailable("judging was cancelled".to_string()),
        JudgeError::Transport(msg) | JudgeError::Malformed(msg) => {
            ApiError::JudgeUnavailable(msg)
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/teams/{id}/dashboard", get(dashboard))
        .route("/api/teams/{id}/phases/{phase}", get(phase_view))
        .route("/api/teams/{id}/phases/{phase}/answer", post(submit_answer))
        .route("/api/teams/{id}/phases/{phase}/draft", patch(save_draft))
        .route("/api/teams/{id}/phases/{phase}/judge", post(judge_submission))
        .route("/api/teams/{id}/final-merge", post(final_merge))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn parse_phase(raw: &str) -> Result<PhaseId, ApiError> {
    raw.parse().map_err(ApiError::BadRequest)
}

async fn load_session(state: &SharedState, team_id: u32) -> Result<TeamSession, ApiError> {
    state
        .store
        .call(move |store| store.get(team_id))
        .await
        .map_err(classify)?
        .ok_or_else(|| ApiError::NotFound(format!("Team {team_id} not found")))
}

fn build_dashboard(session: &TeamSession, bank: &QuestionBank) -> DashboardResponse {
    let phases = session
        .phase_order
        .iter()
        .enumerate()
        .map(|(position, phase)| {
            let phase_bank = bank.phase(*phase);
            let total = phase_bank.map_or(0, |b| b.len());
            let answered = if position < session.current_phase_index {
                total
            } else {
                session
                    .progress(*phase)
                    .map_or(0, |p| p.current_question)
            };
            PhaseSummary {
                phase: *phase,
                kind: phase_bank.map_or(PhaseKind::AnswerHunt, |b| b.kind),
                total_questions: total,
                answered,
                active: position == session.current_phase_index,
                complete: position < session.current_phase_index,
            }
        })
        .collect();

    DashboardResponse {
        team_id: session.team_id,
        phase_order: session.phase_order.clone(),
        current_phase: session.current_phase(),
        completed: session.is_completed(),
        final_merge_won: session.final_merge.won,
        phases,
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let team_count = state.config.event.team_count;
    if req.team_id == 0 || req.team_id > team_count {
        return Err(ApiError::BadRequest(format!(
            "Team id must be between 1 and {team_count}"
        )));
    }

    let team_id = req.team_id;
    let session = state
        .store
        .call(move |store| store.get_or_create(team_id))
        .await
        .map_err(classify)?;

    Ok(Json(build_dashboard(&session, &state.bank)))
}

async fn dashboard(
    State(state): State<SharedState>,
    Path(team_id): Path<u32>,
) -> Result<impl IntoResponse, ApiError> {
    let session = load_session(&state, team_id).await?;
    Ok(Json(build_dashboard(&session, &state.bank)))
}

/// Enter a phase: initializes its shuffled order and hint timer on
/// first visit, then returns the current question. Visiting any phase
/// other than the active one is a conflict with a dashboard redirect.
async fn phase_view(
    State(state): State<SharedState>,
    Path((team_id, phase)): Path<(u32, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&phase)?;
    let phase_bank = state
        .bank
        .phase(phase)
        .ok_or_else(|| ApiError::NotFound(format!("No questions for phase {phase}")))?
        .clone();

    let bank_len = phase_bank.len();
    let now = Utc::now();
    let session = state
        .store
        .call(move |store| {
            let mut session = store
                .get(team_id)?
                .ok_or_else(|| anyhow::anyhow!("Team {team_id} not found"))?;
            if session.current_phase() != SessionPhase::Phase(phase) {
                return Err(SessionError::PhaseNotActive {
                    team_id,
                    requested: phase,
                }
                .into());
            }
            if machine::ensure_initialized(&mut session, phase, bank_len, now) {
                store.put(&session).map_err(anyhow::Error::from)?;
            }
            Ok(session)
        })
        .await
        .map_err(classify)?;

    let progress = session
        .progress(phase)
        .ok_or_else(|| ApiError::Internal("phase progress missing after init".to_string()))?;
    let order = progress
        .order
        .as_ref()
        .ok_or_else(|| ApiError::Internal("phase order missing after init".to_string()))?;
    let step = progress.current_question;
    let question_index = *order.get(step).ok_or_else(|| {
        ApiError::Internal(format!("question step {step} out of range for phase {phase}"))
    })?;
    let question = phase_bank.question(question_index).ok_or_else(|| {
        ApiError::Internal(format!("question index {question_index} missing from bank"))
    })?;

    let delay_secs = state.config.event.hint_delay_secs as i64;
    let (hint_remaining_secs, hint) = match progress.start_time {
        Some(start) => {
            let remaining = hints::remaining_secs(start, now, delay_secs);
            let hint = (remaining == 0 && !question.hint.is_empty())
                .then(|| question.hint.clone());
            (remaining, hint)
        }
        None => (delay_secs, None),
    };

    Ok(Json(PhaseViewResponse {
        phase,
        kind: phase_bank.kind,
        question_number: step + 1,
        total_questions: phase_bank.len(),
        question: QuestionView::from_question(question),
        hint,
        hint_remaining_secs,
        hint_countdown: hints::format_mm_ss(hint_remaining_secs),
        draft: DraftView {
            draft_code: progress.draft_code.clone(),
            draft_answer: progress.draft_answer.clone(),
            code_fixed: progress.code_fixed,
            language: progress.language,
        },
    }))
}

async fn submit_answer(
    State(state): State<SharedState>,
    Path((team_id, phase)): Path<(u32, String)>,
    Json(req): Json<AnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&phase)?;
    let phase_bank = state
        .bank
        .phase(phase)
        .ok_or_else(|| ApiError::NotFound(format!("No questions for phase {phase}")))?
        .clone();

    let now = Utc::now();
    let submitted = req.answer;
    let outcome = state
        .store
        .call(move |store| {
            let mut session = store
                .get(team_id)?
                .ok_or_else(|| anyhow::anyhow!("Team {team_id} not found"))?;
            let outcome = machine::record_answer(&mut session, phase, &submitted, &phase_bank, now)
                .map_err(anyhow::Error::from)?;
            if outcome.accepted {
                store.put(&session).map_err(anyhow::Error::from)?;
            }
            Ok(outcome)
        })
        .await
        .map_err(classify)?;

    if !outcome.accepted && state.config.event.log_failed_attempts {
        tracing::info!(team_id, %phase, "answer attempt rejected");
    }

    Ok(Json(AnswerResponse {
        correct: outcome.accepted,
        phase_complete: outcome.phase_complete,
        event_complete: outcome.event_complete,
    }))
}

/// Fire-and-forget auto-save of draft fields. Never touches
/// progression counters, so it cannot move a team backward.
async fn save_draft(
    State(state): State<SharedState>,
    Path((team_id, phase)): Path<(u32, String)>,
    Json(update): Json<DraftUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&phase)?;

    state
        .store
        .call(move |store| {
            let mut session = store
                .get(team_id)?
                .ok_or_else(|| anyhow::anyhow!("Team {team_id} not found"))?;
            machine::update_draft(&mut session, phase, update);
            store.put(&session).map_err(anyhow::Error::from)?;
            Ok(())
        })
        .await
        .map_err(classify)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Submit code for judging in a Debug or FinalCoding phase. The
/// configured verdict policies decide pass/fail; on a pass the phase
/// progression advances exactly as a correct literal answer would.
async fn judge_submission(
    State(state): State<SharedState>,
    Path((team_id, phase)): Path<(u32, String)>,
    Json(req): Json<JudgeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&phase)?;
    let phase_bank = state
        .bank
        .phase(phase)
        .ok_or_else(|| ApiError::NotFound(format!("No questions for phase {phase}")))?
        .clone();
    let kind = phase_bank.kind;
    if !kind.is_judged() {
        return Err(ApiError::BadRequest(format!(
            "Phase {phase} does not accept code submissions"
        )));
    }

    // Snapshot the session to find the current question; the guard
    // re-runs inside the progression write below.
    let session = load_session(&state, team_id).await?;
    if session.current_phase() != SessionPhase::Phase(phase) {
        return Err(ApiError::PhaseLocked {
            team_id,
            message: format!("Phase {phase} is not team {team_id}'s active phase"),
        });
    }
    let progress = session
        .progress(phase)
        .ok_or_else(|| ApiError::BadRequest(format!("Phase {phase} not initialized")))?;
    let order = progress
        .order
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest(format!("Phase {phase} not initialized")))?;
    let question_index = *order
        .get(progress.current_question)
        .ok_or_else(|| ApiError::Internal("question step out of range".to_string()))?;
    let question = phase_bank
        .question(question_index)
        .ok_or_else(|| ApiError::Internal("question missing from bank".to_string()))?;

    let context = JudgingContext::from_question(question);
    let submission =
        CodeSubmission::new(&req.source_code, req.language).with_stdin(&context.stdin);
    let policies = state.config.policies_for(kind);

    let outcome = state
        .judge
        .evaluate_all(policies, &submission, &context, &state.shutdown)
        .await
        .map_err(judge_error)?;

    if !outcome.correct {
        if state.config.event.log_failed_attempts {
            tracing::info!(team_id, %phase, "judged submission rejected");
        }
        return Ok(Json(JudgeResponse {
            correct: false,
            message: outcome.message,
            phase_complete: false,
            event_complete: false,
        }));
    }

    let now = Utc::now();
    let source_code = req.source_code;
    let language = req.language;
    let advance = state
        .store
        .call(move |store| {
            let mut session = store
                .get(team_id)?
                .ok_or_else(|| anyhow::anyhow!("Team {team_id} not found"))?;
            machine::update_draft(
                &mut session,
                phase,
                DraftUpdate {
                    draft_code: Some(source_code),
                    language: Some(language),
                    code_fixed: (kind == PhaseKind::Debug).then_some(true),
                    ..Default::default()
                },
            );
            let advance = machine::advance_on_accept(&mut session, phase, now)
                .map_err(anyhow::Error::from)?;
            store.put(&session).map_err(anyhow::Error::from)?;
            Ok(advance)
        })
        .await
        .map_err(classify)?;

    Ok(Json(JudgeResponse {
        correct: true,
        message: outcome.message,
        phase_complete: advance.phase_complete,
        event_complete: advance.event_complete,
    }))
}

async fn final_merge(
    State(state): State<SharedState>,
    Path(team_id): Path<u32>,
    Json(req): Json<FinalMergeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let master_key = state.bank.master_key.clone();
    let submitted = req.key;

    let won = state
        .store
        .call(move |store| {
            let mut session = store
                .get(team_id)?
                .ok_or_else(|| anyhow::anyhow!("Team {team_id} not found"))?;
            let won = machine::record_final_merge(&mut session, &submitted, &master_key)
                .map_err(anyhow::Error::from)?;
            if won {
                store.put(&session).map_err(anyhow::Error::from)?;
            }
            Ok(won)
        })
        .await
        .map_err(classify)?;

    if !won && state.config.event.log_failed_attempts {
        tracing::info!(team_id, "master key attempt rejected");
    }

    Ok(Json(FinalMergeResponse { won }))
}
