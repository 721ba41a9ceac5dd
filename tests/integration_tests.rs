//! End-to-end flows across the store, the state machine, and the HTTP
//! surface, with the judging backends scripted.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use gauntlet::bank::{PhaseKind, QuestionBank};
use gauntlet::config::EventConfig;
use gauntlet::errors::JudgeError;
use gauntlet::judge::policy::CodeJudge;
use gauntlet::judge::simulated::SimulatedJudge;
use gauntlet::judge::{
    CodeSubmission, JudgeBackend, STATUS_ACCEPTED, Verdict, VerdictStatus,
};
use gauntlet::server::api::AppState;
use gauntlet::server::build_router;
use gauntlet::session::store::{ProgressStore, StoreHandle};
use gauntlet::session::{PhaseId, SessionPhase, TeamSession, machine};

/// Execution backend that accepts everything it is handed.
struct AlwaysAccepts;

#[async_trait]
impl JudgeBackend for AlwaysAccepts {
    async fn submit_for_judging(
        &self,
        _submission: &CodeSubmission,
        _cancel: &CancellationToken,
    ) -> Result<Verdict, JudgeError> {
        Ok(Verdict {
            stdout: String::new(),
            stderr: String::new(),
            compile_output: String::new(),
            status: VerdictStatus::new(STATUS_ACCEPTED, "Accepted"),
        })
    }
}

fn router_with_db(path: &Path) -> Router {
    let store = StoreHandle::new(ProgressStore::open(path).unwrap());
    router_with_store(store)
}

fn router_with_store(store: StoreHandle) -> Router {
    let judge = Arc::new(CodeJudge::new(
        Arc::new(AlwaysAccepts),
        Arc::new(SimulatedJudge::new(Default::default())),
    ));
    let state = Arc::new(AppState {
        store,
        bank: Arc::new(QuestionBank::default_bank()),
        judge,
        config: EventConfig::default(),
        shutdown: CancellationToken::new(),
    });
    build_router(state)
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    send(app, "POST", uri, Some(body)).await
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri, None).await
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let req = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Walk one whole event through the state machine: every phase in the
/// team's shuffled order, every question in each phase's shuffled
/// order, then the final merge.
#[test]
fn full_event_flow_reaches_final_merge() {
    let bank = QuestionBank::default_bank();
    let store = ProgressStore::open_in_memory().unwrap();
    let mut session = store.get_or_create(3).unwrap();
    let now = Utc::now();

    for position in 0..session.phase_order.len() {
        let phase = session.phase_order[position];
        let phase_bank = bank.phase(phase).unwrap();

        machine::ensure_initialized(&mut session, phase, phase_bank.len(), now);
        store.put(&session).unwrap();

        for _ in 0..phase_bank.len() {
            let step = session.progress(phase).unwrap().current_question;
            let order = session.progress(phase).unwrap().order.clone().unwrap();
            let answer = phase_bank.question(order[step]).unwrap().answer.clone();

            let outcome =
                machine::record_answer(&mut session, phase, &answer, phase_bank, now).unwrap();
            assert!(outcome.accepted);
            store.put(&session).unwrap();
        }

        assert_eq!(session.current_phase_index, position + 1);
    }

    assert_eq!(session.current_phase(), SessionPhase::Completed);

    // Wrong key first, then the master key with noise around it.
    assert!(!machine::record_final_merge(&mut session, "tmlep", &bank.master_key).unwrap());
    assert!(machine::record_final_merge(&mut session, "  PeLmT ", &bank.master_key).unwrap());
    store.put(&session).unwrap();

    let stored = store.get(3).unwrap().unwrap();
    assert!(stored.final_merge.won);
}

#[tokio::test]
async fn answer_flow_via_http_and_reopened_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("progress.db");
    let bank = QuestionBank::default_bank();

    {
        let app = router_with_db(&db_path);

        let (status, dashboard) =
            post_json(&app, "/api/login", serde_json::json!({"team_id": 5})).await;
        assert_eq!(status, StatusCode::OK);
        let active: PhaseId = dashboard["phase_order"][0].as_str().unwrap().parse().unwrap();

        // Entering the phase fixes its question order and timer.
        let (status, _) = get_json(&app, &format!("/api/teams/5/phases/{active}")).await;
        assert_eq!(status, StatusCode::OK);

        // A wrong answer is rejected without moving anything.
        let (status, body) = post_json(
            &app,
            &format!("/api/teams/5/phases/{active}/answer"),
            serde_json::json!({"answer": "not it"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["correct"], false);

        // Look up the right answer through a side channel.
        let inspect = ProgressStore::open(&db_path).unwrap();
        let session = inspect.get(5).unwrap().unwrap();
        let order = session.progress(active).unwrap().order.clone().unwrap();
        let answer = bank.phase(active).unwrap().question(order[0]).unwrap().answer.clone();

        let (status, body) = post_json(
            &app,
            &format!("/api/teams/5/phases/{active}/answer"),
            serde_json::json!({"answer": answer}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["correct"], true);
        assert_eq!(body["phase_complete"], false);
    }

    // A new process over the same database sees the same progress.
    let app = router_with_db(&db_path);
    let (status, dashboard) = get_json(&app, "/api/teams/5/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dashboard["phases"][0]["answered"], 1);
    assert_eq!(dashboard["phases"][0]["active"], true);
}

#[tokio::test]
async fn draft_autosave_roundtrips_through_phase_view() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("progress.db");
    let app = router_with_db(&db_path);

    let (_, dashboard) = post_json(&app, "/api/login", serde_json::json!({"team_id": 1})).await;
    let active = dashboard["phase_order"][0].as_str().unwrap().to_string();

    let (_, _) = get_json(&app, &format!("/api/teams/1/phases/{active}")).await;

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/api/teams/1/phases/{active}/draft"),
        Some(serde_json::json!({
            "draft_answer": "half-typed guess",
            "draft_code": "print('wip')",
            "language": "python"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, view) = get_json(&app, &format!("/api/teams/1/phases/{active}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["draft"]["draft_answer"], "half-typed guess");
    assert_eq!(view["draft"]["draft_code"], "print('wip')");
    assert_eq!(view["draft"]["language"], "python");
    // The draft write did not disturb progression.
    assert_eq!(view["question_number"], 1);
}

#[tokio::test]
async fn judged_phase_advances_on_accepted_submission() {
    let bank = QuestionBank::default_bank();
    let store = StoreHandle::new(ProgressStore::open_in_memory().unwrap());

    // Seed a team whose first phase is the debug phase.
    let mut session = TeamSession::new(2);
    let debug_pos = session
        .phase_order
        .iter()
        .position(|p| *p == PhaseId::Phase4)
        .unwrap();
    session.phase_order.swap(0, debug_pos);
    let len = bank.phase(PhaseId::Phase4).unwrap().len();
    machine::ensure_initialized(&mut session, PhaseId::Phase4, len, Utc::now());
    store
        .call(move |s| s.put(&session).map_err(anyhow::Error::from))
        .await
        .unwrap();

    let app = router_with_store(store.clone());

    let (status, body) = post_json(
        &app,
        "/api/teams/2/phases/4/judge",
        serde_json::json!({
            "source_code": "def checksum(data):\n    return sum(data) % 256\n",
            "language": "python"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["correct"], true);

    let stored = store.call(|s| s.get(2)).await.unwrap().unwrap();
    let progress = stored.progress(PhaseId::Phase4).unwrap();
    assert_eq!(progress.current_question, 1);
    // A fixed debug submission is remembered as such.
    assert!(progress.code_fixed);
    assert_eq!(progress.draft_code.as_deref(), Some("def checksum(data):\n    return sum(data) % 256\n"));
}

#[tokio::test]
async fn judge_endpoint_rejects_non_judged_phases() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("progress.db");
    let app = router_with_db(&db_path);

    post_json(&app, "/api/login", serde_json::json!({"team_id": 1})).await;

    // Phase 1 is an answer hunt; it takes no code.
    let (status, _) = post_json(
        &app,
        "/api/teams/1/phases/1/judge",
        serde_json::json!({"source_code": "x", "language": "c"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn final_merge_locked_until_all_phases_done() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("progress.db");
    let app = router_with_db(&db_path);

    post_json(&app, "/api/login", serde_json::json!({"team_id": 7})).await;

    let (status, _) = post_json(
        &app,
        "/api/teams/7/final-merge",
        serde_json::json!({"key": "pelmt"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Force-complete the team through the store, then merge.
    let inspect = ProgressStore::open(&db_path).unwrap();
    let mut session = inspect.get(7).unwrap().unwrap();
    session.current_phase_index = session.phase_order.len();
    inspect.put(&session).unwrap();
    drop(inspect);

    let (status, body) = post_json(
        &app,
        "/api/teams/7/final-merge",
        serde_json::json!({"key": " PELMT "}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["won"], true);

    let (_, dashboard) = get_json(&app, "/api/teams/7/dashboard").await;
    assert_eq!(dashboard["final_merge_won"], true);
    assert_eq!(dashboard["completed"], true);
}

#[tokio::test]
async fn hardcoded_final_answer_is_rejected_without_backends() {
    let bank = QuestionBank::default_bank();
    let store = StoreHandle::new(ProgressStore::open_in_memory().unwrap());

    let mut session = TeamSession::new(4);
    let pos = session
        .phase_order
        .iter()
        .position(|p| *p == PhaseId::Phase5)
        .unwrap();
    session.phase_order.swap(0, pos);
    let len = bank.phase(PhaseId::Phase5).unwrap().len();
    assert_eq!(bank.phase(PhaseId::Phase5).unwrap().kind, PhaseKind::FinalCoding);
    machine::ensure_initialized(&mut session, PhaseId::Phase5, len, Utc::now());
    store
        .call(move |s| s.put(&session).map_err(anyhow::Error::from))
        .await
        .unwrap();

    let app = router_with_store(store.clone());

    // The equivalence policy's local pre-check fires before the model
    // backend would even be spawned.
    let (status, body) = post_json(
        &app,
        "/api/teams/4/phases/5/judge",
        serde_json::json!({"source_code": "print('PELMT')", "language": "python"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["correct"], false);

    let stored = store.call(|s| s.get(4)).await.unwrap().unwrap();
    assert_eq!(stored.progress(PhaseId::Phase5).unwrap().current_question, 0);
}
